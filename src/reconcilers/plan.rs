//! Backup plan reconciler
//!
//! Converges the owned resources of a plan: a Secret carrying the serialized
//! plan and a CronJob launching the worker on schedule. Safely re-entrant
//! under at-least-once delivery: every invocation recomputes the full desired
//! state from the plan, so repeated calls with an unchanged plan produce no
//! semantic diff. Failures abort immediately and are retried by the caller.

use std::collections::BTreeMap;
use std::str::FromStr;

use cron::Schedule;
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::{DeleteParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource, ResourceExt};
use serde_json::json;
use tracing::info;

use crate::crd::{BackupPlan, OwnedReference};
use crate::error::{is_not_found, Error, Result};
use crate::reconcilers::cronjob::{build_cron_job_spec, CronJobParams, WORKER_CONFIG_KEY};

/// Finalizer gating deletion of owned resources
pub const FINALIZER_NAME: &str = "backup.plans.io/finalizer";

/// Minimal S3 multipart part size
const MIN_PART_SIZE: i64 = 5 * 1024 * 1024;

/// Validate a plan spec. Violations resurface on every reconcile until the
/// user corrects the resource; they are never retried internally.
pub fn validate<P: BackupPlan>(plan: &P) -> Result<()> {
    let common = plan.common();

    parse_schedule(common.schedule)?;

    if common.active_deadline_seconds < 1 {
        return Err(Error::validation(
            "activeDeadlineSeconds must be at least 1",
        ));
    }
    if common.retention < 1 {
        return Err(Error::validation("retention must be at least 1"));
    }

    let object_store = common
        .destination
        .and_then(|d| d.object_store.as_ref())
        .ok_or_else(|| Error::validation("destination.objectStore must be configured"))?;
    if object_store.endpoint.is_empty() {
        return Err(Error::validation("objectStore.endpoint must not be empty"));
    }
    if object_store.bucket.is_empty() {
        return Err(Error::validation("objectStore.bucket must not be empty"));
    }
    if let Some(part_size) = object_store.part_size {
        if part_size < MIN_PART_SIZE {
            return Err(Error::validation(format!(
                "objectStore.partSize must be at least {} bytes",
                MIN_PART_SIZE
            )));
        }
    }

    plan.validate_connection()
}

/// Parse a CronJob-style schedule. Kubernetes uses five fields, the cron
/// crate wants a seconds field, so a five-field schedule gets one prepended.
pub fn parse_schedule(schedule: &str) -> Result<Schedule> {
    let normalized = if schedule.split_whitespace().count() == 5 {
        format!("0 {}", schedule)
    } else {
        schedule.to_string()
    };
    Schedule::from_str(&normalized)
        .map_err(|e| Error::validation(format!("Invalid cron schedule '{}': {}", schedule, e)))
}

/// Outcome of one reconcile pass
#[derive(Debug, PartialEq, Eq)]
pub enum Reconciled {
    /// Finalizer was added; the update event re-enters the reconciler
    FinalizerAdded,
    /// Owned resources converged and status persisted
    Applied,
    /// Owned resources removed and finalizer cleared
    Cleaned,
    /// Deleting without the finalizer; nothing was done
    Unchanged,
}

/// Next move of the lifecycle state machine, decided from the deletion
/// marker and finalizer presence alone. Pure, so the ordering invariants are
/// testable without a cluster: the finalizer is persisted before anything is
/// created, and cleanup runs exactly while the finalizer is present.
#[derive(Debug, PartialEq, Eq)]
pub enum Step {
    /// Persist the finalizer, then wait for the update event to re-enter
    AddFinalizer,
    /// Converge owned resources and status
    Apply,
    /// Remove owned resources, then the finalizer
    Cleanup,
    /// Deleting but not gated by this controller; do nothing
    None,
}

/// Decide the next step for a plan
pub fn next_step(deleting: bool, has_finalizer: bool) -> Step {
    match (deleting, has_finalizer) {
        (false, false) => Step::AddFinalizer,
        (false, true) => Step::Apply,
        (true, true) => Step::Cleanup,
        (true, false) => Step::None,
    }
}

/// Run one pass of the lifecycle state machine for a plan.
///
/// States: NoFinalizer -> Reconciling -> Deleting -> Deleted. The finalizer
/// is always persisted before any owned resource is created, and owned
/// resources are removed before the finalizer is, exactly once.
pub async fn reconcile_plan<P: BackupPlan>(
    plan: &P,
    client: &Client,
    worker_image: &str,
) -> Result<Reconciled> {
    let namespace = plan.namespace().unwrap_or_else(|| "default".to_string());
    let name = plan.name_any();

    let api: Api<P> = Api::namespaced(client.clone(), &namespace);
    let secrets: Api<Secret> = Api::namespaced(client.clone(), &namespace);
    let cron_jobs: Api<CronJob> = Api::namespaced(client.clone(), &namespace);

    let deleting = plan.meta().deletion_timestamp.is_some();
    let has_finalizer = plan.finalizers().iter().any(|f| f == FINALIZER_NAME);

    match next_step(deleting, has_finalizer) {
        Step::Cleanup => {
            cleanup(plan, &api, &secrets, &cron_jobs, &name).await?;
            // Actual removal happens once the finalizer list empties.
            return Ok(Reconciled::Cleaned);
        }
        Step::None => return Ok(Reconciled::Unchanged),
        Step::AddFinalizer => {
            let mut finalizers = plan.finalizers().to_vec();
            finalizers.push(FINALIZER_NAME.to_string());
            api.patch(
                &name,
                &PatchParams::default(),
                &Patch::Merge(json!({"metadata": {"finalizers": finalizers}})),
            )
            .await?;
            info!(name = %name, namespace = %namespace, "Added finalizer");
            // Do not assume completion in this call; the update event
            // re-enters.
            return Ok(Reconciled::FinalizerAdded);
        }
        Step::Apply => {}
    }

    validate(plan)?;

    // Working copy: the status refs are resolved against the cluster before
    // the desired content is computed from it.
    let mut working: P = plan.clone();

    let secret_ref = ensure_secret(&mut working, &secrets, &namespace, &name).await?;
    working.status_mut().secret = Some(secret_ref);

    let cron_ref = ensure_cron_job(&mut working, &cron_jobs, &namespace, &name, worker_image).await?;
    working.status_mut().cron_job = Some(cron_ref);

    api.patch_status(
        &name,
        &PatchParams::default(),
        &Patch::Merge(json!({"status": working.status()})),
    )
    .await?;

    Ok(Reconciled::Applied)
}

/// Delete owned resources (ignoring 404), clear the status refs and remove
/// the finalizer. Terminal for this cycle.
async fn cleanup<P: BackupPlan>(
    plan: &P,
    api: &Api<P>,
    secrets: &Api<Secret>,
    cron_jobs: &Api<CronJob>,
    name: &str,
) -> Result<()> {
    if let Some(r) = plan.status().and_then(|s| s.secret.as_ref()) {
        match secrets.delete(&r.name, &DeleteParams::default()).await {
            Ok(_) => info!(secret = %r.name, "Removed owned Secret"),
            Err(e) if is_not_found(&e) => {}
            Err(e) => return Err(e.into()),
        }
    }
    if let Some(r) = plan.status().and_then(|s| s.cron_job.as_ref()) {
        match cron_jobs.delete(&r.name, &DeleteParams::default()).await {
            Ok(_) => info!(cron_job = %r.name, "Removed owned CronJob"),
            Err(e) if is_not_found(&e) => {}
            Err(e) => return Err(e.into()),
        }
    }

    api.patch_status(
        name,
        &PatchParams::default(),
        &Patch::Merge(json!({"status": {"secret": null, "cronJob": null}})),
    )
    .await?;

    let finalizers: Vec<String> = plan
        .finalizers()
        .iter()
        .filter(|f| f.as_str() != FINALIZER_NAME)
        .cloned()
        .collect();
    api.patch(
        name,
        &PatchParams::default(),
        &Patch::Merge(json!({"metadata": {"finalizers": finalizers}})),
    )
    .await?;
    info!(name = %name, "Removed finalizer");

    Ok(())
}

/// Create or update the owned Secret holding the serialized plan. A ref to a
/// Secret deleted out-of-band is cleared and the Secret recreated.
async fn ensure_secret<P: BackupPlan>(
    plan: &mut P,
    secrets: &Api<Secret>,
    namespace: &str,
    name: &str,
) -> Result<OwnedReference> {
    let mut existing: Option<Secret> = None;
    if let Some(r) = plan.status().and_then(|s| s.secret.clone()) {
        match secrets.get(&r.name).await {
            Ok(s) => existing = Some(s),
            Err(e) if is_not_found(&e) => {
                // Deleted out-of-band; fall back to create
                plan.status_mut().secret = None;
            }
            Err(e) => return Err(e.into()),
        }
    }

    let payload = plan.secret_payload()?;
    let mut data = BTreeMap::new();
    data.insert(WORKER_CONFIG_KEY.to_string(), ByteString(payload));

    let applied = match existing {
        Some(mut secret) => {
            secret.data = Some(data);
            secret.string_data = None;
            secrets
                .replace(&secret.name_any(), &PostParams::default(), &secret)
                .await?
        }
        None => {
            let secret = Secret {
                metadata: owned_meta(plan, namespace, name)?,
                data: Some(data),
                ..Default::default()
            };
            secrets.create(&PostParams::default(), &secret).await?
        }
    };

    Ok(reference_to(applied.meta()))
}

/// Create or update the owned CronJob, recomputing the desired spec from the
/// plan fields every time. Same out-of-band-deletion recovery as the Secret.
async fn ensure_cron_job<P: BackupPlan>(
    plan: &mut P,
    cron_jobs: &Api<CronJob>,
    namespace: &str,
    name: &str,
    worker_image: &str,
) -> Result<OwnedReference> {
    let mut existing: Option<CronJob> = None;
    if let Some(r) = plan.status().and_then(|s| s.cron_job.clone()) {
        match cron_jobs.get(&r.name).await {
            Ok(c) => existing = Some(c),
            Err(e) if is_not_found(&e) => {
                plan.status_mut().cron_job = None;
            }
            Err(e) => return Err(e.into()),
        }
    }

    let common = plan.common();
    let desired = build_cron_job_spec(&CronJobParams {
        schedule: common.schedule,
        active_deadline_seconds: common.active_deadline_seconds,
        image: worker_image,
        env: common.env,
        subcommand: P::subcommand(),
        secret_name: name,
        volumes: common.volumes,
        volume_mounts: common.volume_mounts,
    });

    let applied = match existing {
        Some(mut cron_job) => {
            cron_job.spec = Some(desired);
            cron_jobs
                .replace(&cron_job.name_any(), &PostParams::default(), &cron_job)
                .await?
        }
        None => {
            let cron_job = CronJob {
                metadata: owned_meta(plan, namespace, name)?,
                spec: Some(desired),
                ..Default::default()
            };
            cron_jobs.create(&PostParams::default(), &cron_job).await?
        }
    };

    Ok(reference_to(applied.meta()))
}

/// Metadata for a resource owned by the plan: named after the plan, in its
/// namespace, with the controller owner reference set.
fn owned_meta<P: BackupPlan>(plan: &P, namespace: &str, name: &str) -> Result<ObjectMeta> {
    let owner_ref = plan
        .controller_owner_ref(&())
        .ok_or_else(|| Error::config("plan has no name or uid for an owner reference"))?;
    Ok(ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        owner_references: Some(vec![owner_ref]),
        ..Default::default()
    })
}

fn reference_to(meta: &ObjectMeta) -> OwnedReference {
    OwnedReference {
        namespace: meta.namespace.clone().unwrap_or_default(),
        name: meta.name.clone().unwrap_or_default(),
        uid: meta.uid.clone(),
    }
}
