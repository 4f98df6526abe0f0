use std::{future::Future, sync::Arc};

use async_trait::async_trait;
use snafu::ResultExt;

use crate::{
    error::{ActionFailedSnafu, Result},
    hook::ActionHooks,
    outcome::Outcome,
};

/// An atomic step of a workflow.
#[async_trait]
pub trait Action: Send + Sync {
    /// Stable name, used by hooks and in workflow descriptions.
    fn name(&self) -> &str;

    async fn run(&self) -> Result<Outcome>;
}

/// An [`Action`] backed by a closure returning a future.
pub struct FnAction<F> {
    name: String,
    f: F,
}

impl<F> FnAction<F> {
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F, Fut, E> Action for FnAction<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<Outcome, E>> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> Result<Outcome> {
        (self.f)().await.boxed().context(ActionFailedSnafu {
            action: self.name.clone(),
        })
    }
}

/// Runs the chained [`ActionHooks`] around an inner action.
pub struct HookedAction {
    inner: Arc<dyn Action>,
    hooks: Arc<ActionHooks>,
}

impl HookedAction {
    pub fn new(inner: Arc<dyn Action>, hooks: Arc<ActionHooks>) -> Self {
        Self { inner, hooks }
    }
}

#[async_trait]
impl Action for HookedAction {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn run(&self) -> Result<Outcome> {
        let name = self.inner.name();
        self.hooks.pre_run(name).await;
        let result = self.inner.run().await;
        self.hooks.post_run(name, &result).await;
        result
    }
}
