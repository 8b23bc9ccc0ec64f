//! Worker run flows executed inside CronJob pods
//!
//! A run loads the plan from the mounted Secret, expands credential
//! placeholders from the pod environment, streams one artifact into the
//! object store and then enforces retention. Run metrics are always pushed,
//! whether the run succeeded or not.

use std::path::Path;

use chrono::Utc;
use tracing::{info, warn};

use crate::backup::consul::{ConsulConfig, ConsulSource};
use crate::backup::mongodb::MongoDbSource;
use crate::backup::s3::S3Destination;
use crate::backup::{Destination, Source};
use crate::crd::{BackupPlan, ConsulBackupPlan, MongoDBBackupPlan};
use crate::error::{Error, Result};
use crate::metrics::publisher::PushMetricsPublisher;

pub mod env;

/// Back up a MongoDB deployment according to the plan at `config_path`
pub async fn run_mongodb(config_path: &Path) -> Result<()> {
    let plan: MongoDBBackupPlan = load_plan(config_path)?;
    let identity = PlanIdentity::of(&plan)?;
    let artifact = identity.artifact_name("tgz");
    let source = MongoDbSource::new(plan.spec.uri.clone(), artifact);
    run_cycle(&plan, &identity, source).await
}

/// Back up a Consul cluster according to the plan at `config_path`
pub async fn run_consul(config_path: &Path) -> Result<()> {
    let plan: ConsulBackupPlan = load_plan(config_path)?;
    let identity = PlanIdentity::of(&plan)?;
    let artifact = identity.artifact_name("snap");
    let config = ConsulConfig {
        address: plan.spec.address.clone(),
        username: plan.spec.username.clone(),
        password: plan.spec.password.clone(),
    };
    let source = ConsulSource::new(config, artifact);
    run_cycle(&plan, &identity, source).await
}

/// Namespace and name of the plan driving a run
struct PlanIdentity {
    namespace: String,
    name: String,
}

impl PlanIdentity {
    fn of<P: BackupPlan>(plan: &P) -> Result<Self> {
        let meta = plan.meta();
        let name = meta
            .name
            .clone()
            .ok_or_else(|| Error::config("plan has no name"))?;
        let namespace = meta
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string());
        Ok(Self { namespace, name })
    }

    /// UTC-timestamped artifact name, unique per run at second granularity
    fn artifact_name(&self, extension: &str) -> String {
        format!("backup-{}.{}", Utc::now().format("%Y%m%d%H%M%S"), extension)
    }

    fn prefix(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// Load a plan from the mounted config file. The whole document is expanded
/// against the process environment before parsing, so placeholders work in
/// any field, not just credentials.
fn load_plan<P: BackupPlan>(config_path: &Path) -> Result<P> {
    let raw = std::fs::read_to_string(config_path)
        .map_err(|e| Error::config(format!("failed to read '{}': {}", config_path.display(), e)))?;
    Ok(serde_json::from_str(&env::expand(&raw))?)
}

async fn run_cycle<P, S>(plan: &P, identity: &PlanIdentity, mut source: S) -> Result<()>
where
    P: BackupPlan,
    S: Source,
{
    let common = plan.common();
    let mut publisher = PushMetricsPublisher::from_config(
        common.pushgateway,
        &identity.namespace,
        &identity.name,
    );
    publisher.start_timer();

    let result = async {
        let store = common
            .destination
            .and_then(|d| d.object_store.as_ref())
            .ok_or_else(|| Error::config("plan has no object store destination"))?;
        let mut dst = S3Destination::connect(store, &identity.prefix()).await?;

        let written = source.stream(&mut dst as &mut (dyn Destination + Send)).await?;
        info!(
            namespace = %identity.namespace,
            name = %identity.name,
            written,
            "Backup stored"
        );
        publisher.set_backup_size_in_bytes(written);

        dst.ensure_retention(common.retention as usize).await?;
        publisher.set_successful_run();
        Ok(())
    }
    .await;

    // Metrics always go out, even for a failed run.
    publisher.stop_timer();
    if let Err(e) = publisher.publish().await {
        warn!(error = %e, "Failed to publish run metrics");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_expand_anywhere_in_the_loaded_plan() {
        std::env::set_var("WORKER_PLAN_TEST_BUCKET", "expanded-bucket");
        std::env::set_var("WORKER_PLAN_TEST_KEY", "topsecret");

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.json");
        std::fs::write(
            &path,
            r#"{
                "apiVersion": "backup.plans.io/v1alpha1",
                "kind": "MongoDBBackupPlan",
                "metadata": {"name": "db-nightly", "namespace": "default"},
                "spec": {
                    "schedule": "0 3 * * *",
                    "activeDeadlineSeconds": 300,
                    "retention": 3,
                    "uri": "mongodb://db:27017",
                    "destination": {
                        "objectStore": {
                            "endpoint": "minio:9000",
                            "bucket": "${WORKER_PLAN_TEST_BUCKET}",
                            "accessKey": "admin",
                            "secretKey": "$WORKER_PLAN_TEST_KEY"
                        }
                    }
                }
            }"#,
        )
        .unwrap();

        let plan: MongoDBBackupPlan = load_plan(&path).unwrap();
        let store = plan.spec.destination.unwrap().object_store.unwrap();
        // Expansion covers the whole document, bucket included, not only
        // the credential fields.
        assert_eq!(store.bucket, "expanded-bucket");
        assert_eq!(store.secret_key, "topsecret");
    }
}
