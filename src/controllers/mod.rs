//! Kubernetes controllers for backup plan CRDs
//!
//! One generic controller implementation, instantiated per plan kind. It
//! watches the CRD and the owned Secret/CronJob kinds and hands every
//! observed change to the reconciler.

mod plan_controller;

pub use plan_controller::run as run_plan_controller;

use kube::Client;

/// Default worker image used when none is configured
pub const DEFAULT_WORKER_IMAGE: &str = "backup-plan-worker:latest";

/// Shared context for all controllers
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Image the owned CronJobs run as worker
    pub worker_image: String,
}

impl Context {
    /// Create a new context
    pub fn new(client: Client, worker_image: String) -> Self {
        Self {
            client,
            worker_image,
        }
    }
}
