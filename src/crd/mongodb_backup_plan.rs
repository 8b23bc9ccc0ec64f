//! MongoDBBackupPlan Custom Resource Definition

use k8s_openapi::api::core::v1::{EnvVar, Volume, VolumeMount};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{BackupPlan, BackupPlanStatus, Destination, PlanCommon, Pushgateway};
use crate::error::{Error, Result};

/// MongoDBBackupPlan resource specification
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "backup.plans.io",
    version = "v1alpha1",
    kind = "MongoDBBackupPlan",
    plural = "mongodbbackupplans",
    singular = "mongodbbackupplan",
    shortname = "mbp",
    namespaced,
    status = "BackupPlanStatus",
    printcolumn = r#"{"name": "Schedule", "type": "string", "jsonPath": ".spec.schedule"}"#,
    printcolumn = r#"{"name": "Retention", "type": "integer", "jsonPath": ".spec.retention"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MongoDBBackupPlanSpec {
    /// Schedule in cron format
    pub schedule: String,

    /// Deadline for a single backup job run, seconds (minimum 1)
    pub active_deadline_seconds: i64,

    /// Number of backups to keep (minimum 1)
    pub retention: i64,

    /// Environment for the worker container
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,

    /// Fully qualifying MongoDB URI connection string. Environment variables
    /// are expanded by the worker before usage.
    pub uri: String,

    /// Pushgateway setup for worker run metrics
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pushgateway: Option<Pushgateway>,

    /// Destination for the backup
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<Destination>,

    /// Extra volumes bound to the worker pod
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,

    /// Extra mounts for the worker container
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,
}

impl BackupPlan for MongoDBBackupPlan {
    fn kind_name() -> &'static str {
        "MongoDBBackupPlan"
    }

    fn subcommand() -> &'static str {
        "mongodb"
    }

    fn common(&self) -> PlanCommon<'_> {
        PlanCommon {
            schedule: &self.spec.schedule,
            active_deadline_seconds: self.spec.active_deadline_seconds,
            retention: self.spec.retention,
            env: &self.spec.env,
            destination: self.spec.destination.as_ref(),
            pushgateway: self.spec.pushgateway.as_ref(),
            volumes: &self.spec.volumes,
            volume_mounts: &self.spec.volume_mounts,
        }
    }

    fn status(&self) -> Option<&BackupPlanStatus> {
        self.status.as_ref()
    }

    fn status_mut(&mut self) -> &mut BackupPlanStatus {
        self.status.get_or_insert_with(BackupPlanStatus::default)
    }

    fn validate_connection(&self) -> Result<()> {
        if self.spec.uri.is_empty() {
            return Err(Error::validation("MongoDB URI must not be empty"));
        }
        Ok(())
    }
}
