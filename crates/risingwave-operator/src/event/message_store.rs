use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

/// Messages attached to the events emitted at the end of a reconcile pass, keyed by event name.
#[derive(Debug, Default)]
pub struct MessageStore {
    messages: RwLock<HashMap<String, String>>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, event: &str, message: impl Into<String>) {
        self.messages
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(event.to_owned(), message.into());
    }

    /// The message for `event`, or the event name itself when none was set.
    pub fn message_for(&self, event: &str) -> String {
        self.messages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event)
            .cloned()
            .unwrap_or_else(|| event.to_owned())
    }

    pub fn is_set(&self, event: &str) -> bool {
        self.messages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(event)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn defaults_to_event_name() {
        let store = MessageStore::new();
        assert!(!store.is_set("Unhealthy"));
        assert_eq!(store.message_for("Unhealthy"), "Unhealthy");

        store.set("Unhealthy", "compute is under target");
        assert!(store.is_set("Unhealthy"));
        assert_eq!(store.message_for("Unhealthy"), "compute is under target");
    }

    #[tokio::test]
    async fn shared_between_tasks() {
        let store = Arc::new(MessageStore::new());
        let handles: Vec<_> = ["Running", "Upgrading"]
            .into_iter()
            .map(|event| {
                let store = store.clone();
                tokio::spawn(async move { store.set(event, format!("{event}!")) })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.message_for("Running"), "Running!");
        assert_eq!(store.message_for("Upgrading"), "Upgrading!");
    }
}
