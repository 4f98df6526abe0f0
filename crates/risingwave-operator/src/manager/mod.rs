//! Named actions over the children of one RisingWave, bound for one reconcile pass.
//!
//! Every action is a [`Workflow`] leaf that runs the hooks registered for its name. The
//! controller composes them into the workflow of the pass.

use std::{future::Future, sync::Arc};

use ctrlkit::{ActionHooks, Outcome, Workflow, hooked_action};
use snafu::{ResultExt, Snafu};

use crate::{
    client::{self, OwnedClient},
    crd::RisingWave,
    event::MessageStore,
    factory::{self, ObjectFactory},
    object::{RisingWaveManager, risingwave_manager},
};

pub mod actions;
mod status;
mod sync;
mod wait;

pub use self::sync::partition_workloads;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to render the children of the RisingWave"))]
    Render { source: factory::Error },

    #[snafu(display("failed to access a child object"))]
    Child { source: client::Error },

    #[snafu(display("failed to look up the custom resource definition {name:?}"))]
    GetCustomResourceDefinition { source: kube::Error, name: String },

    #[snafu(display("failed to look up scale view {name:?}"))]
    GetScaleView { source: kube::Error, name: String },

    #[snafu(display("failed to write the status"))]
    WriteStatus { source: risingwave_manager::Error },
}

impl Error {
    pub fn is_invalid_configuration(&self) -> bool {
        matches!(self, Self::Render { source } if source.is_invalid_configuration())
    }
}

/// Maps lost races on child objects to an immediate requeue instead of an error.
fn requeue_on_conflict(result: client::Result<()>) -> Result<Outcome> {
    match result {
        Ok(()) => Ok(Outcome::CONTINUE),
        Err(err) if err.is_conflict() => {
            tracing::debug!(
                error = &err as &dyn std::error::Error,
                "conflict on a child object, requeueing"
            );
            Ok(Outcome::REQUEUE)
        }
        Err(source) => Err(Error::Child { source }),
    }
}

pub struct ControllerManager {
    client: OwnedClient,
    manager: Arc<RisingWaveManager>,
    messages: Arc<MessageStore>,
    hooks: Arc<ActionHooks>,
    operator_version: String,
    config_template: Arc<str>,
}

impl ControllerManager {
    pub fn new(
        client: OwnedClient,
        manager: Arc<RisingWaveManager>,
        messages: Arc<MessageStore>,
        hooks: Arc<ActionHooks>,
        operator_version: impl Into<String>,
        config_template: Arc<str>,
    ) -> Self {
        Self {
            client,
            manager,
            messages,
            hooks,
            operator_version: operator_version.into(),
            config_template,
        }
    }

    pub fn risingwave(&self) -> &RisingWave {
        self.manager.risingwave()
    }

    pub fn risingwave_manager(&self) -> &Arc<RisingWaveManager> {
        &self.manager
    }

    pub fn hooks(&self) -> &Arc<ActionHooks> {
        &self.hooks
    }

    fn factory(&self) -> Result<ObjectFactory<'_>> {
        ObjectFactory::new(self.manager.risingwave(), &self.operator_version).context(RenderSnafu)
    }

    /// Binds `f` as the action `name`, running the hooks subscribed to it.
    pub fn act<F, Fut, E>(self: &Arc<Self>, name: impl Into<String>, f: F) -> Workflow
    where
        F: Fn(Arc<Self>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Outcome, E>> + Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        let this = Arc::clone(self);
        hooked_action(name, &self.hooks, move || f(Arc::clone(&this)))
    }

    /// Writes the status of the working copy back.
    pub async fn update_remote_status(&self) -> Result<Outcome> {
        self.manager.update_remote_status().await.context(WriteStatusSnafu)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::factory::tests::OPERATOR_VERSION;

    /// A manager over `risingwave` without hooks and with an empty config template.
    pub fn manager(risingwave: RisingWave, client: kube::Client) -> Arc<ControllerManager> {
        let risingwave = Arc::new(risingwave);
        let owned = OwnedClient::new(client.clone(), &risingwave, false, OPERATOR_VERSION).unwrap();
        Arc::new(ControllerManager::new(
            owned,
            Arc::new(RisingWaveManager::new(client, risingwave)),
            Arc::new(MessageStore::new()),
            Arc::new(ActionHooks::new()),
            OPERATOR_VERSION,
            Arc::from(""),
        ))
    }
}
