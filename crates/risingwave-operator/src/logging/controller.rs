//! Reporting the outcome of controller reconciles.

use std::error::Error;

use kube::{
    Resource,
    core::DynamicObject,
    runtime::{
        controller::{self, Action},
        events::Recorder,
        reflector::ObjectRef,
    },
};

use super::k8s_events::publish_controller_error_as_k8s_event;

/// Extra information carried by reconciler errors.
pub trait ReconcilerError: Error {
    /// `PascalCase` name of the error kind, used as the event reason.
    ///
    /// Usually delegated to [`strum::EnumDiscriminants`] and [`strum::IntoStaticStr`].
    fn category(&self) -> &'static str;

    /// An object related to the failure, e.g. the workload that could not be applied.
    fn secondary_object(&self) -> Option<ObjectRef<DynamicObject>> {
        None
    }
}

/// Logs a reconcile result and publishes failures as Warning events on the object.
pub fn report_controller_reconciled<K, ReconcileErr, QueueErr>(
    recorder: &Recorder,
    controller_name: &str,
    result: &Result<(ObjectRef<K>, Action), controller::Error<ReconcileErr, QueueErr>>,
) where
    K: Resource,
    ReconcileErr: ReconcilerError + 'static,
    QueueErr: Error + 'static,
{
    match result {
        Ok((obj, action)) => {
            tracing::debug!(
                controller.name = controller_name,
                object = %obj,
                ?action,
                "reconciled object"
            );
        }
        Err(error) => {
            let category = match error {
                controller::Error::ReconcilerFailed(err, _) => err.category(),
                _ => "Queue",
            };
            tracing::error!(
                controller.name = controller_name,
                category,
                error = error as &dyn Error,
                "failed to reconcile object",
            );
            publish_controller_error_as_k8s_event(recorder, error);
        }
    }
}
