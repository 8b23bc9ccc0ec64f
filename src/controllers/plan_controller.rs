//! Generic backup plan controller
//!
//! Watches one plan kind plus its owned Secrets and CronJobs and triggers
//! reconciliation. Retry/backoff lives entirely in the error policy; the
//! reconciler itself never retries.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::Secret;
use kube::{
    api::ListParams,
    runtime::{
        controller::{Action, Controller},
        watcher::Config as WatcherConfig,
    },
    Api, Client, ResourceExt,
};
use tracing::{error, info, instrument};

use crate::controllers::Context;
use crate::crd::BackupPlan;
use crate::error::{Error, Result};
use crate::metrics;
use crate::reconcilers::plan as plan_reconciler;

/// Run a controller for one plan kind
pub async fn run<P: BackupPlan>(client: Client, context: Arc<Context>) {
    let api: Api<P> = Api::all(client.clone());

    // Verify CRD is installed
    if let Err(e) = api.list(&ListParams::default().limit(1)).await {
        error!(kind = P::kind_name(), "CRD not installed: {}", e);
        return;
    }

    info!(kind = P::kind_name(), "Starting backup plan controller");

    Controller::new(api, WatcherConfig::default())
        .owns(
            Api::<Secret>::all(client.clone()),
            WatcherConfig::default(),
        )
        .owns(
            Api::<CronJob>::all(client.clone()),
            WatcherConfig::default(),
        )
        .shutdown_on_signal()
        .run(reconcile::<P>, error_policy::<P>, context)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    info!(
                        kind = P::kind_name(),
                        name = %obj.name,
                        namespace = obj.namespace.as_deref().unwrap_or("default"),
                        "Reconciled backup plan"
                    );
                }
                Err(e) => {
                    error!(kind = P::kind_name(), error = %e, "Reconciliation error");
                    metrics::RECONCILIATION_ERRORS
                        .with_label_values(&[P::kind_name()])
                        .inc();
                }
            }
        })
        .await;
}

/// Main reconciliation function
#[instrument(skip(ctx, plan), fields(kind = P::kind_name(), name = %plan.name_any(), namespace = plan.namespace()))]
async fn reconcile<P: BackupPlan>(plan: Arc<P>, ctx: Arc<Context>) -> Result<Action> {
    let _timer = metrics::RECONCILE_DURATION
        .with_label_values(&[P::kind_name()])
        .start_timer();
    metrics::RECONCILIATIONS
        .with_label_values(&[P::kind_name()])
        .inc();

    match plan_reconciler::reconcile_plan(plan.as_ref(), &ctx.client, &ctx.worker_image).await? {
        plan_reconciler::Reconciled::Cleaned => {
            metrics::CLEANUPS.with_label_values(&[P::kind_name()]).inc();
            Ok(Action::await_change())
        }
        plan_reconciler::Reconciled::FinalizerAdded
        | plan_reconciler::Reconciled::Applied
        | plan_reconciler::Reconciled::Unchanged => Ok(Action::await_change()),
    }
}

/// Error policy for the controller
fn error_policy<P: BackupPlan>(plan: Arc<P>, error: &Error, _ctx: Arc<Context>) -> Action {
    let name = plan.name_any();
    error!(
        kind = P::kind_name(),
        name = %name,
        error = %error,
        "Reconciliation failed, scheduling retry"
    );

    // Configuration problems only resolve through a user edit; transient
    // API failures retry sooner.
    let requeue_duration = match error {
        Error::Config(_) | Error::Validation(_) => Duration::from_secs(300),
        Error::Kube(_) => Duration::from_secs(30),
        _ => Duration::from_secs(60),
    };

    Action::requeue(requeue_duration)
}
