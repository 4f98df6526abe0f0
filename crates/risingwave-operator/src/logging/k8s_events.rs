//! Publishing Kubernetes events.

use std::{error::Error, fmt::Write as _};

use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::{
    controller,
    events::{Event, EventType, Recorder},
};
use tracing::Instrument;

use super::controller::ReconcilerError;

const MAX_NOTE_LEN: usize = 1024;

/// Publishes `event` on `reference`. Failures are logged and otherwise ignored.
pub async fn publish_event(recorder: &Recorder, event: &Event, reference: &ObjectReference) {
    if let Err(error) = recorder.publish(event, reference).await {
        tracing::warn!(
            error = &error as &dyn Error,
            reason = %event.reason,
            "failed to publish event"
        );
    }
}

fn error_to_event<E: ReconcilerError>(err: &E) -> Event {
    let mut note = err.to_string();
    let mut source = err.source();
    while let Some(err) = source {
        let _ = write!(note, ": {err}");
        source = err.source();
    }
    truncate_with_ellipsis(&mut note, MAX_NOTE_LEN);

    Event {
        type_: EventType::Warning,
        reason: err.category().to_owned(),
        note: Some(note),
        action: "Reconcile".to_owned(),
        secondary: err.secondary_object().map(Into::into),
    }
}

/// Publishes a failed reconcile as a Warning event on the reconciled object, in the background.
pub fn publish_controller_error_as_k8s_event<ReconcileErr, QueueErr>(
    recorder: &Recorder,
    controller_error: &controller::Error<ReconcileErr, QueueErr>,
) where
    ReconcileErr: ReconcilerError + 'static,
    QueueErr: Error + 'static,
{
    // The other variants concern the operator, not a user object.
    let controller::Error::ReconcilerFailed(error, obj) = controller_error else {
        return;
    };

    let recorder = recorder.clone();
    let reference = ObjectReference::from(obj.clone());
    let event = error_to_event(error);
    tokio::spawn(
        async move { publish_event(&recorder, &event, &reference).await }.in_current_span(),
    );
}

/// Cuts `msg` to at most `max_len` bytes, replacing the cut tail with an ellipsis.
pub fn truncate_with_ellipsis(msg: &mut String, max_len: usize) {
    const ELLIPSIS: char = '…';

    if msg.len() <= max_len {
        return;
    }
    let mut end = max_len.saturating_sub(ELLIPSIS.len_utf8());
    while !msg.is_char_boundary(end) {
        end -= 1;
    }
    msg.truncate(end);
    if ELLIPSIS.len_utf8() <= max_len {
        msg.push(ELLIPSIS);
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::apps::v1::StatefulSet;
    use kube::{core::DynamicObject, runtime::reflector::ObjectRef};
    use rstest::rstest;
    use snafu::Snafu;
    use strum::EnumDiscriminants;

    use super::*;

    #[rstest]
    #[case("meta", 4, "meta")]
    #[case("compute", 4, "c…")]
    #[case("frontend🙋", 11, "frontend…")]
    #[case("compactor", 2, "")]
    fn truncate(#[case] input: &str, #[case] max_len: usize, #[case] expected: &str) {
        let mut msg = input.to_owned();
        truncate_with_ellipsis(&mut msg, max_len);
        assert_eq!(msg, expected);
        assert!(msg.len() <= max_len);
    }

    #[derive(Debug, Snafu, EnumDiscriminants)]
    #[strum_discriminants(derive(strum::IntoStaticStr))]
    enum SyncError {
        #[snafu(display("failed to sync compute"))]
        SyncCompute { source: ApplyError },
    }

    #[derive(Debug, Snafu)]
    #[snafu(display("statefulset {workload} rejected"))]
    struct ApplyError {
        workload: ObjectRef<StatefulSet>,
    }

    impl ReconcilerError for SyncError {
        fn category(&self) -> &'static str {
            SyncErrorDiscriminants::from(self).into()
        }

        fn secondary_object(&self) -> Option<ObjectRef<DynamicObject>> {
            let Self::SyncCompute { source } = self;
            Some(source.workload.clone().erase())
        }
    }

    #[test]
    fn event_carries_chain_reason_and_secondary() {
        let err = SyncError::SyncCompute {
            source: ApplyError {
                workload: ObjectRef::new("rw-compute").within("default"),
            },
        };

        let event = error_to_event(&err);

        assert_eq!(event.reason, "SyncCompute");
        let note = event.note.unwrap();
        assert!(note.starts_with("failed to sync compute: statefulset "));
        assert!(note.ends_with("rw-compute.default rejected"));
        let secondary = event.secondary.unwrap();
        assert_eq!(secondary.name.as_deref(), Some("rw-compute"));
        assert_eq!(secondary.kind.as_deref(), Some("StatefulSet"));
    }
}
