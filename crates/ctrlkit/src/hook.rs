//! Callbacks around action execution.
//!
//! Hooks are registered either for every action or for a single action name. For any given
//! action, the global hooks run first, then the ones subscribed to that name, each group in
//! registration order. All `pre_run` callbacks finish before the action starts, all `post_run`
//! callbacks run after it returns.

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;

use crate::{error::Result, outcome::Outcome};

#[async_trait]
pub trait ActionHook: Send + Sync {
    async fn pre_run(&self, _action: &str) {}

    async fn post_run(&self, _action: &str, _result: &Result<Outcome>) {}
}

#[derive(Default)]
pub struct ActionHooks {
    global: Vec<Arc<dyn ActionHook>>,
    by_action: BTreeMap<String, Vec<Arc<dyn ActionHook>>>,
}

impl ActionHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes `hook` to every action.
    pub fn subscribe(mut self, hook: Arc<dyn ActionHook>) -> Self {
        self.global.push(hook);
        self
    }

    /// Subscribes `hook` to the action called `action` only.
    pub fn subscribe_to(mut self, action: impl Into<String>, hook: Arc<dyn ActionHook>) -> Self {
        self.by_action.entry(action.into()).or_default().push(hook);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.global.is_empty() && self.by_action.is_empty()
    }

    fn hooks_for<'a>(&'a self, action: &str) -> impl Iterator<Item = &'a Arc<dyn ActionHook>> {
        self.global
            .iter()
            .chain(self.by_action.get(action).into_iter().flatten())
    }

    pub async fn pre_run(&self, action: &str) {
        for hook in self.hooks_for(action) {
            hook.pre_run(action).await;
        }
    }

    pub async fn post_run(&self, action: &str, result: &Result<Outcome>) {
        for hook in self.hooks_for(action) {
            hook.post_run(action, result).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        tag: &'static str,
        calls: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl ActionHook for Recorder {
        async fn pre_run(&self, action: &str) {
            self.calls
                .lock()
                .unwrap()
                .push(format!("{}:pre:{action}", self.tag));
        }

        async fn post_run(&self, action: &str, _result: &Result<Outcome>) {
            self.calls
                .lock()
                .unwrap()
                .push(format!("{}:post:{action}", self.tag));
        }
    }

    #[tokio::test]
    async fn hooks_chain_global_before_specific() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let hooks = ActionHooks::new()
            .subscribe_to(
                "B",
                Arc::new(Recorder {
                    tag: "only-b",
                    calls: calls.clone(),
                }),
            )
            .subscribe(Arc::new(Recorder {
                tag: "all",
                calls: calls.clone(),
            }));

        hooks.pre_run("A").await;
        hooks.post_run("A", &Ok(Outcome::CONTINUE)).await;
        hooks.pre_run("B").await;
        hooks.post_run("B", &Ok(Outcome::CONTINUE)).await;

        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                "all:pre:A",
                "all:post:A",
                "all:pre:B",
                "only-b:pre:B",
                "all:post:B",
                "only-b:post:B",
            ]
        );
    }
}
