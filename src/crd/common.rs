//! Types shared by all backup plan kinds

use k8s_openapi::api::core::v1::{EnvVar, Volume, VolumeMount};
use k8s_openapi::NamespaceResourceScope;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Backup destination configuration
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
    /// Object storage (S3-compatible) backend configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_store: Option<ObjectStoreSpec>,
}

/// S3-compatible object storage configuration
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObjectStoreSpec {
    /// Endpoint, e.g. `minio.backup.svc:9000`
    pub endpoint: String,

    /// Bucket name; created on first use if it does not exist
    pub bucket: String,

    /// Use TLS when talking to the endpoint
    #[serde(default)]
    pub use_ssl: bool,

    /// Access key; environment variables are expanded by the worker
    pub access_key: String,

    /// Secret key; environment variables are expanded by the worker
    pub secret_key: String,

    /// Customer-supplied encryption key (SSE-C), base64-encoded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encryption_key: Option<String>,

    /// SSE-C algorithm, defaults to AES256 when an encryption key is set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encryption_algorithm: Option<String>,

    /// Key prefix within the bucket; defaults to `<namespace>/<name>`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,

    /// Multipart upload part size in bytes (minimum 5 MiB)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub part_size: Option<i64>,
}

/// Prometheus Pushgateway configuration for worker run metrics
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Pushgateway {
    /// Pushgateway URL; falls back to `PUSHGATEWAY_URL`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Basic auth username; falls back to `PUSHGATEWAY_USERNAME`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Basic auth password; falls back to `PUSHGATEWAY_PASSWORD`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Reference to a resource owned by a plan
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OwnedReference {
    /// Namespace of the owned resource
    pub namespace: String,
    /// Name of the owned resource
    pub name: String,
    /// UID of the owned resource at creation time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

/// Observed state shared by all backup plan kinds.
///
/// Once set, the references point at resources whose owner reference is this
/// plan; at most one Secret and one CronJob exist per live plan.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackupPlanStatus {
    /// Owned Secret carrying the serialized plan
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<OwnedReference>,

    /// Owned CronJob triggering periodic worker runs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cron_job: Option<OwnedReference>,
}

/// Borrowed view of the spec fields common to every plan kind
pub struct PlanCommon<'a> {
    /// Schedule in cron format
    pub schedule: &'a str,
    /// Deadline for a single backup job run, seconds (>= 1)
    pub active_deadline_seconds: i64,
    /// Number of backups to keep (>= 1)
    pub retention: i64,
    /// Environment for the worker container
    pub env: &'a [EnvVar],
    /// Backup destination
    pub destination: Option<&'a Destination>,
    /// Pushgateway setup for worker run metrics
    pub pushgateway: Option<&'a Pushgateway>,
    /// Extra volumes bound to the worker pod
    pub volumes: &'a [Volume],
    /// Extra mounts for the worker container
    pub volume_mounts: &'a [VolumeMount],
}

/// Capability set every backup plan kind implements. Adding a kind means one
/// more implementation of this trait; the reconciler stays untouched.
pub trait BackupPlan:
    kube::Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + std::fmt::Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// Kind string, e.g. `MongoDBBackupPlan`
    fn kind_name() -> &'static str;

    /// Worker subcommand baked into the CronJob args
    fn subcommand() -> &'static str;

    /// Spec fields common to all plan kinds
    fn common(&self) -> PlanCommon<'_>;

    /// Observed state, if any
    fn status(&self) -> Option<&BackupPlanStatus>;

    /// Observed state, initialized on first access
    fn status_mut(&mut self) -> &mut BackupPlanStatus;

    /// Validate the kind-specific connection fields
    fn validate_connection(&self) -> Result<()>;

    /// Canonical payload stored in the owned Secret: the full plan with the
    /// secret reference itself cleared to avoid self-reference. Credential
    /// placeholders are expanded by the worker, never here.
    fn secret_payload(&self) -> Result<Vec<u8>> {
        let mut copy = self.clone();
        copy.status_mut().secret = None;
        Ok(serde_json::to_vec(&copy)?)
    }
}
