//! Backup Plan Operator
//!
//! Kubernetes operator that schedules streaming backups of stateful services
//! (MongoDB, Consul) into S3-compatible object storage, driven by
//! `*BackupPlan` Custom Resource Definitions (CRDs).

pub mod backup;
pub mod controllers;
pub mod crd;
pub mod error;
pub mod metrics;
pub mod reconcilers;
pub mod worker;

pub use error::{Error, Result};
