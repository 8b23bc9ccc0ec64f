//! Backup Plan Kubernetes Operator
//!
//! Main entry point for the operator. Sets up the Kubernetes client,
//! registers one controller per backup plan kind, and runs the
//! reconciliation loops.

use std::sync::Arc;

use kube::Client;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use backup_plan_operator::{
    controllers::{self, Context},
    crd::{ConsulBackupPlan, MongoDBBackupPlan},
    metrics,
};

/// Default metrics port
const METRICS_PORT: u16 = 8080;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    init_tracing();

    info!("Starting Backup Plan Operator");

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes API server");

    // Create shared context
    let worker_image = std::env::var("WORKER_IMAGE")
        .unwrap_or_else(|_| controllers::DEFAULT_WORKER_IMAGE.to_string());
    let context = Arc::new(Context::new(client.clone(), worker_image));

    // Start metrics server
    let metrics_handle = tokio::spawn(metrics::serve(METRICS_PORT));
    info!("Metrics server starting on port {}", METRICS_PORT);

    // Run all controllers concurrently
    let mongodb_controller =
        controllers::run_plan_controller::<MongoDBBackupPlan>(client.clone(), context.clone());
    let consul_controller =
        controllers::run_plan_controller::<ConsulBackupPlan>(client.clone(), context.clone());

    // Handle graceful shutdown
    tokio::select! {
        _ = mongodb_controller => {
            error!("MongoDB plan controller exited unexpectedly");
        }
        _ = consul_controller => {
            error!("Consul plan controller exited unexpectedly");
        }
        _ = metrics_handle => {
            error!("Metrics server exited unexpectedly");
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, stopping operator");
        }
    }

    info!("Backup Plan Operator stopped");
    Ok(())
}

/// Initialize tracing subscriber
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kube=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received CTRL+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
