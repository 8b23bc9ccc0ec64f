//! Custom Resource Definitions for the Backup Plan Operator

mod common;
mod consul_backup_plan;
mod mongodb_backup_plan;

pub use common::*;
pub use consul_backup_plan::*;
pub use mongodb_backup_plan::*;

use kube::CustomResourceExt;

/// Generate all CRD YAML manifests
pub fn generate_crds() -> Vec<String> {
    vec![
        serde_yaml::to_string(&MongoDBBackupPlan::crd()).unwrap(),
        serde_yaml::to_string(&ConsulBackupPlan::crd()).unwrap(),
    ]
}
