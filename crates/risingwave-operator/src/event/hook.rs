use std::sync::Arc;

use async_trait::async_trait;
use ctrlkit::{ActionHook, Outcome};
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, Recorder};

use super::{MessageStore, RisingWaveEvent};
use crate::{
    crd::status::{ConditionType, RisingWaveStatus},
    logging::publish_event,
    object::RisingWaveManager,
};

/// Where the events of a RisingWave end up.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: RisingWaveEvent, message: String);
}

/// Publishes events on the RisingWave object through the Kubernetes events API.
pub struct RecorderSink {
    recorder: Recorder,
    reference: ObjectReference,
}

impl RecorderSink {
    pub fn new(recorder: Recorder, reference: ObjectReference) -> Self {
        Self { recorder, reference }
    }
}

#[async_trait]
impl EventSink for RecorderSink {
    async fn emit(&self, event: RisingWaveEvent, message: String) {
        let event = Event {
            type_: event.event_type(),
            reason: event.to_string(),
            note: Some(message),
            action: "Reconcile".to_owned(),
            secondary: None,
        };
        publish_event(&self.recorder, &event, &self.reference).await;
    }
}

fn is_recovering(status: &RisingWaveStatus) -> bool {
    status.condition(ConditionType::Initializing).is_none()
        && status.has_condition(ConditionType::Running, false)
}

/// The condition transitions of a pass worth an event, in emission order.
fn transitions(before: &RisingWaveStatus, after: &RisingWaveStatus) -> Vec<RisingWaveEvent> {
    let became = |eval: &dyn Fn(&RisingWaveStatus) -> bool| eval(after) && !eval(before);

    [
        (
            RisingWaveEvent::Initializing,
            became(&|s| s.has_condition(ConditionType::Initializing, true)),
        ),
        (
            RisingWaveEvent::Running,
            became(&|s| s.has_condition(ConditionType::Running, true)),
        ),
        (RisingWaveEvent::Recovering, became(&is_recovering)),
        (
            RisingWaveEvent::Upgrading,
            became(&|s| s.has_condition(ConditionType::Upgrading, true)),
        ),
    ]
    .into_iter()
    .filter_map(|(event, fired)| fired.then_some(event))
    .collect()
}

/// Emits events once the status of a pass has been written.
///
/// Subscribe it to the status write action only.
pub struct EventHook {
    manager: Arc<RisingWaveManager>,
    messages: Arc<MessageStore>,
    sink: Arc<dyn EventSink>,
}

impl EventHook {
    pub fn new(
        manager: Arc<RisingWaveManager>,
        messages: Arc<MessageStore>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            manager,
            messages,
            sink,
        }
    }

    async fn record(&self, event: RisingWaveEvent) {
        let message = self.messages.message_for(event.as_ref());
        self.sink.emit(event, message).await;
    }
}

#[async_trait]
impl ActionHook for EventHook {
    async fn post_run(&self, _action: &str, result: &ctrlkit::Result<Outcome>) {
        if result.is_err() {
            return;
        }

        let before = self.manager.status_before();
        let after = self.manager.status_after();
        for event in transitions(&before, &after) {
            self.record(event).await;
        }

        for event in RisingWaveEvent::WARNINGS {
            if self.messages.is_set(event.as_ref()) {
                self.record(event).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use rstest::rstest;

    use super::*;
    use crate::crd::status::Condition;

    fn status(conditions: &[(ConditionType, bool)]) -> RisingWaveStatus {
        RisingWaveStatus {
            conditions: conditions
                .iter()
                .map(|(type_, value)| Condition::new(*type_, *value))
                .collect(),
            ..RisingWaveStatus::default()
        }
    }

    use ConditionType::{Initializing, Running, Upgrading};

    #[rstest]
    #[case(&[], &[(Initializing, true), (Running, false)], &[RisingWaveEvent::Initializing])]
    #[case(
        &[(Initializing, true), (Running, false)],
        &[(Running, true)],
        &[RisingWaveEvent::Running]
    )]
    #[case(&[(Running, true)], &[(Running, false)], &[RisingWaveEvent::Recovering])]
    #[case(
        &[(Running, true)],
        &[(Running, true), (Upgrading, true)],
        &[RisingWaveEvent::Upgrading]
    )]
    #[case(&[(Running, true)], &[(Running, true)], &[])]
    #[case(&[(Running, false)], &[(Running, false)], &[])]
    fn condition_transitions(
        #[case] before: &[(ConditionType, bool)],
        #[case] after: &[(ConditionType, bool)],
        #[case] expected: &[RisingWaveEvent],
    ) {
        assert_eq!(transitions(&status(before), &status(after)), expected);
    }

    #[derive(Default)]
    struct CollectingSink {
        events: Mutex<Vec<(RisingWaveEvent, String)>>,
    }

    #[async_trait]
    impl EventSink for CollectingSink {
        async fn emit(&self, event: RisingWaveEvent, message: String) {
            self.events.lock().unwrap().push((event, message));
        }
    }

    fn offline_client() -> kube::Client {
        kube::Client::try_from(kube::Config::new("http://127.0.0.1:1".parse().unwrap())).unwrap()
    }

    #[tokio::test]
    async fn emits_transitions_and_unhealthy_after_status_write() {
        let rw = Arc::new(crate::factory::tests::minimal());
        let manager = Arc::new(RisingWaveManager::new(offline_client(), rw));
        let messages = Arc::new(MessageStore::new());
        let sink = Arc::new(CollectingSink::default());
        let hook = EventHook::new(manager.clone(), messages.clone(), sink.clone());

        manager.update_condition(Condition::new(Initializing, true));
        messages.set(RisingWaveEvent::Unhealthy.as_ref(), "compute is under target");

        hook.post_run("UpdateRisingWaveStatusViaClient", &Err(ctrlkit::Error::TimedOut {
            action: "UpdateRisingWaveStatusViaClient".to_owned(),
            timeout: std::time::Duration::from_secs(1),
        }))
        .await;
        assert!(sink.events.lock().unwrap().is_empty());

        hook.post_run("UpdateRisingWaveStatusViaClient", &Ok(Outcome::CONTINUE))
            .await;
        assert_eq!(*sink.events.lock().unwrap(), vec![
            (RisingWaveEvent::Initializing, "Initializing".to_owned()),
            (RisingWaveEvent::Unhealthy, "compute is under target".to_owned()),
        ]);
    }
}
