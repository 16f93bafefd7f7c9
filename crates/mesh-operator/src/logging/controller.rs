//! Reporting of controller reconcile outcomes.

use std::error::Error;

use kube::{
    Resource,
    core::DynamicObject,
    runtime::{
        controller::{self, Action},
        reflector::ObjectRef,
    },
};

use super::k8s_events::publish_controller_error_as_k8s_event;

/// Reconcile errors that can be reported to end users.
pub trait ReconcilerError: Error {
    /// The `PascalCase` name of the error category, used as event reason.
    ///
    /// Usually implemented via [`strum::EnumDiscriminants`] and
    /// [`strum::IntoStaticStr`].
    fn category(&self) -> &'static str;

    /// The related object the error occurred on, if it is not the reconciled
    /// object itself.
    fn secondary_object(&self) -> Option<ObjectRef<DynamicObject>> {
        None
    }
}

/// Logs the outcome of a single reconcile and publishes failures as events on
/// the reconciled object.
pub fn report_controller_reconciled<K, ReconcileErr, QueueErr>(
    client: &kube::Client,
    controller_name: &str,
    result: &Result<(ObjectRef<K>, Action), controller::Error<ReconcileErr, QueueErr>>,
) where
    K: Resource,
    ReconcileErr: ReconcilerError,
    QueueErr: Error,
{
    match result {
        Ok((obj, action)) => {
            tracing::info!(
                controller.name = controller_name,
                object = %obj,
                ?action,
                "reconciled object"
            );
        }
        Err(error) => {
            tracing::error!(
                controller.name = controller_name,
                error = &*error as &dyn Error,
                "failed to reconcile object",
            );
            publish_controller_error_as_k8s_event(client, controller_name, error);
        }
    }
}
