//! Reconciles `IstioOperator`s into the `HelmApp`s installing them.
//!
//! A reconcile runs through these steps:
//!
//! 1. A missing `IstioOperator` ends the cycle without any write.
//! 2. An `IstioOperator` marked for deletion gets its managed `HelmApp`
//!    deleted, then its finalizer removed.
//! 3. Otherwise the finalizer is added if needed, the `IstioOperator` is
//!    converted and the `HelmApp` is created or, if it differs, updated.
//! 4. The `HelmApp` phase is mirrored into the `IstioOperator` status and the
//!    next reconcile is scheduled depending on that phase.

use std::{sync::Arc, time::Duration};

use futures::StreamExt;
use kube::{
    Api,
    core::DynamicObject,
    runtime::{Controller, controller::Action, reflector::ObjectRef, watcher},
};
use snafu::{OptionExt, ResultExt, Snafu};
use strum::{EnumDiscriminants, IntoStaticStr};
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};

use crate::{
    cli::WatchNamespace,
    constants::{IOP_FINALIZER, MANAGED_LABEL_KEY, MANAGED_LABEL_VALUE, SOURCE_FROM_LABEL_KEY},
    convert::{self, Converter},
    crd::{HelmApp, HelmAppPhase, InstallPhase, InstallStatus, IstioOperator},
    logging::{ReconcilerError, report_controller_reconciled},
    store::{self, ObjectKey, Store, with_deadline},
};

pub const CONTROLLER_NAME: &str = "istiooperator.install.istio.io";

/// Requeue delay while the install failed.
const ERROR_REQUEUE_DELAY: Duration = Duration::from_secs(90);

/// Requeue delay while the install is in progress or its state is unknown.
const RECONCILING_REQUEUE_DELAY: Duration = Duration::from_secs(20);

/// Requeue delay after the status could not be written.
const STATUS_WRITE_FAILED_REQUEUE_DELAY: Duration = Duration::from_secs(60);

/// Requeue delay after any other failed reconcile.
const FAILED_REQUEUE_DELAY: Duration = Duration::from_secs(10);

#[derive(Debug, EnumDiscriminants, Snafu)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("IstioOperator has no namespace or name"))]
    MissingObjectKey,

    #[snafu(display("failed to get IstioOperator"))]
    GetIstioOperator { source: store::Error },

    #[snafu(display("failed to add finalizer"))]
    AddFinalizer { source: store::Error },

    #[snafu(display("failed to remove finalizer"))]
    RemoveFinalizer { source: store::Error },

    #[snafu(display("failed to convert IstioOperator into HelmApp"))]
    Convert { source: convert::Error },

    #[snafu(display("conversion did not finish within {timeout:?}"))]
    ConvertTimedOut { timeout: Duration },

    #[snafu(display("failed to get HelmApp {key}"))]
    GetHelmApp {
        source: store::Error,
        key: ObjectKey,
    },

    #[snafu(display("failed to create HelmApp {key}"))]
    CreateHelmApp {
        source: store::Error,
        key: ObjectKey,
    },

    #[snafu(display("failed to update HelmApp {key}"))]
    UpdateHelmApp {
        source: store::Error,
        key: ObjectKey,
    },

    #[snafu(display("failed to delete HelmApp {key}"))]
    DeleteHelmApp {
        source: store::Error,
        key: ObjectKey,
    },

    #[snafu(display("failed to update IstioOperator status"))]
    UpdateStatus { source: store::Error },
}

impl ReconcilerError for Error {
    fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }

    fn secondary_object(&self) -> Option<ObjectRef<DynamicObject>> {
        match self {
            Error::GetHelmApp { key, .. }
            | Error::CreateHelmApp { key, .. }
            | Error::UpdateHelmApp { key, .. }
            | Error::DeleteHelmApp { key, .. } => Some(
                ObjectRef::<HelmApp>::new(&key.name)
                    .within(&key.namespace)
                    .erase(),
            ),
            Error::MissingObjectKey
            | Error::GetIstioOperator { .. }
            | Error::AddFinalizer { .. }
            | Error::RemoveFinalizer { .. }
            | Error::Convert { .. }
            | Error::ConvertTimedOut { .. }
            | Error::UpdateStatus { .. } => None,
        }
    }
}

/// Shared state of all reconciles.
pub struct Context {
    pub store: Arc<dyn Store>,
    pub converter: Converter,

    /// Upper bound for a single reconcile, including all store calls and the
    /// conversion.
    pub reconcile_timeout: Duration,
}

/// Entry point for [`Controller::run`].
pub async fn reconcile(iop: Arc<IstioOperator>, ctx: Arc<Context>) -> Result<Action, Error> {
    let key = ObjectKey::of(iop.as_ref()).context(MissingObjectKeySnafu)?;
    reconcile_key(&key, &ctx).await
}

/// Decides when to retry a failed reconcile.
pub fn error_policy(_iop: Arc<IstioOperator>, error: &Error, _ctx: Arc<Context>) -> Action {
    match error {
        // An object without key cannot be read, retrying does not help
        Error::MissingObjectKey => Action::await_change(),
        Error::UpdateStatus { .. } => Action::requeue(STATUS_WRITE_FAILED_REQUEUE_DELAY),
        _ => Action::requeue(FAILED_REQUEUE_DELAY),
    }
}

/// Reconciles the `IstioOperator` stored under `key`.
#[tracing::instrument(skip(ctx), fields(namespace = %key.namespace, name = %key.name))]
pub async fn reconcile_key(key: &ObjectKey, ctx: &Context) -> Result<Action, Error> {
    let deadline = Instant::now() + ctx.reconcile_timeout;

    let Some(iop) = with_deadline(
        deadline,
        "get IstioOperator",
        ctx.store.get_istio_operator(key),
    )
    .await
    .context(GetIstioOperatorSnafu)?
    else {
        debug!("IstioOperator no longer exists");
        return Ok(Action::await_change());
    };

    if iop.metadata.deletion_timestamp.is_some() {
        return reconcile_delete(key, iop, ctx, deadline).await;
    }

    let iop = ensure_finalizer(iop, ctx, deadline).await?;
    let app = convert_iop(&iop, ctx, deadline).await?;
    create_or_update_helm_app(key, app, ctx, deadline).await?;

    let phase = overall_phase(key, ctx, deadline).await;
    with_deadline(
        deadline,
        "update IstioOperator status",
        ctx.store
            .update_istio_operator_status(key, &InstallStatus { status: phase }),
    )
    .await
    .context(UpdateStatusSnafu)?;

    Ok(requeue_action(phase))
}

async fn reconcile_delete(
    key: &ObjectKey,
    mut iop: IstioOperator,
    ctx: &Context,
    deadline: Instant,
) -> Result<Action, Error> {
    let existing = with_deadline(deadline, "get HelmApp", ctx.store.get_helm_app(key))
        .await
        .with_context(|_| GetHelmAppSnafu { key: key.clone() })?;

    match existing {
        Some(app) if is_managed(&app) => {
            with_deadline(deadline, "delete HelmApp", ctx.store.delete_helm_app(key))
                .await
                .with_context(|_| DeleteHelmAppSnafu { key: key.clone() })?;
            info!("deleted HelmApp");
        }
        Some(_) => info!("keeping HelmApp that is not managed by the operator"),
        None => debug!("HelmApp is already gone"),
    }

    if remove_finalizer(&mut iop) {
        with_deadline(
            deadline,
            "remove finalizer",
            ctx.store.update_istio_operator(&iop),
        )
        .await
        .context(RemoveFinalizerSnafu)?;
        info!("removed finalizer");
    }

    Ok(Action::await_change())
}

/// Adds the finalizer, so the deletion of `iop` waits for the `HelmApp` to be
/// cleaned up. Returns the stored object.
async fn ensure_finalizer(
    mut iop: IstioOperator,
    ctx: &Context,
    deadline: Instant,
) -> Result<IstioOperator, Error> {
    if has_finalizer(&iop) {
        return Ok(iop);
    }

    iop.metadata
        .finalizers
        .get_or_insert_with(Vec::new)
        .push(IOP_FINALIZER.to_owned());
    let iop = with_deadline(
        deadline,
        "add finalizer",
        ctx.store.update_istio_operator(&iop),
    )
    .await
    .context(AddFinalizerSnafu)?;
    debug!("added finalizer");
    Ok(iop)
}

/// Converts `iop`, cancelling the migration once `deadline` has passed.
async fn convert_iop(
    iop: &IstioOperator,
    ctx: &Context,
    deadline: Instant,
) -> Result<HelmApp, Error> {
    timeout_at(deadline, ctx.converter.convert(iop))
        .await
        .map_err(|_| Error::ConvertTimedOut {
            timeout: ctx.reconcile_timeout,
        })?
        .context(ConvertSnafu)
}

async fn create_or_update_helm_app(
    key: &ObjectKey,
    app: HelmApp,
    ctx: &Context,
    deadline: Instant,
) -> Result<(), Error> {
    let existing = with_deadline(deadline, "get HelmApp", ctx.store.get_helm_app(key))
        .await
        .with_context(|_| GetHelmAppSnafu { key: key.clone() })?;

    match existing {
        None => {
            info!("creating HelmApp");
            with_deadline(deadline, "create HelmApp", ctx.store.create_helm_app(&app))
                .await
                .with_context(|_| CreateHelmAppSnafu { key: key.clone() })?;
        }
        Some(existing) if !is_managed(&existing) => {
            info!("skipping update of HelmApp that is not managed by the operator");
        }
        Some(existing)
            if existing.metadata.labels == app.metadata.labels && existing.spec == app.spec =>
        {
            debug!("HelmApp is up to date");
        }
        Some(mut existing) => {
            info!("updating HelmApp");
            existing.metadata.labels = app.metadata.labels;
            existing.spec = app.spec;
            with_deadline(
                deadline,
                "update HelmApp",
                ctx.store.update_helm_app(&existing),
            )
            .await
            .with_context(|_| UpdateHelmAppSnafu { key: key.clone() })?;
        }
    }
    Ok(())
}

/// The install phase derived from the current `HelmApp`.
///
/// A `HelmApp` that cannot be read yields [`InstallPhase::None`] rather than
/// an error, so the status still gets written.
async fn overall_phase(key: &ObjectKey, ctx: &Context, deadline: Instant) -> InstallPhase {
    match with_deadline(deadline, "get HelmApp", ctx.store.get_helm_app(key)).await {
        Ok(Some(app)) => install_phase(app.phase()),
        Ok(None) => InstallPhase::Reconciling,
        Err(error) => {
            warn!(
                error = &error as &dyn std::error::Error,
                "failed to read HelmApp phase"
            );
            InstallPhase::None
        }
    }
}

pub fn install_phase(phase: HelmAppPhase) -> InstallPhase {
    match phase {
        HelmAppPhase::Unknown => InstallPhase::None,
        HelmAppPhase::Succeeded => InstallPhase::Healthy,
        HelmAppPhase::Failed => InstallPhase::Error,
        HelmAppPhase::Pending | HelmAppPhase::Running => InstallPhase::Reconciling,
    }
}

pub fn requeue_action(phase: InstallPhase) -> Action {
    match phase {
        InstallPhase::Error => Action::requeue(ERROR_REQUEUE_DELAY),
        InstallPhase::Reconciling | InstallPhase::None => {
            Action::requeue(RECONCILING_REQUEUE_DELAY)
        }
        InstallPhase::Updating | InstallPhase::Healthy | InstallPhase::ActionRequired => {
            Action::await_change()
        }
    }
}

fn is_managed(app: &HelmApp) -> bool {
    app.metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(MANAGED_LABEL_KEY))
        .is_some_and(|value| value == MANAGED_LABEL_VALUE)
}

fn has_finalizer(iop: &IstioOperator) -> bool {
    iop.metadata
        .finalizers
        .iter()
        .flatten()
        .any(|finalizer| finalizer == IOP_FINALIZER)
}

/// Removes the finalizer, returning whether it was present.
fn remove_finalizer(iop: &mut IstioOperator) -> bool {
    let Some(finalizers) = &mut iop.metadata.finalizers else {
        return false;
    };
    let before = finalizers.len();
    finalizers.retain(|finalizer| finalizer != IOP_FINALIZER);
    finalizers.len() != before
}

/// Maps a `HelmApp` back to the `IstioOperator` it was derived from.
fn source_of(app: HelmApp) -> Option<ObjectRef<IstioOperator>> {
    let namespace = app.metadata.namespace.as_deref()?;
    let source = app.metadata.labels.as_ref()?.get(SOURCE_FROM_LABEL_KEY)?;
    Some(ObjectRef::new(source).within(namespace))
}

/// Runs the controller until a termination signal is received.
pub async fn run(client: kube::Client, watch_namespace: &WatchNamespace, ctx: Context) {
    let iops: Api<IstioOperator> = watch_namespace.get_api(&client);
    let apps: Api<HelmApp> = watch_namespace.get_api(&client);

    info!(controller.name = CONTROLLER_NAME, "starting controller");
    Controller::new(iops, watcher::Config::default())
        .watches(apps, watcher::Config::default(), source_of)
        .shutdown_on_signal()
        .run(reconcile, error_policy, Arc::new(ctx))
        .for_each(|result| {
            report_controller_reconciled(&client, CONTROLLER_NAME, &result);
            futures::future::ready(())
        })
        .await;
    info!(controller.name = CONTROLLER_NAME, "controller stopped");
}
