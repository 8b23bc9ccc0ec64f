//! Backup worker
//!
//! Runs inside the CronJob pods created by the operator. Reads the plan
//! from the mounted Secret, performs one backup cycle and exits non-zero
//! on failure so the Job is marked failed.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use backup_plan_operator::worker;

#[derive(Parser)]
#[command(name = "worker", about = "Runs one backup cycle for a plan")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Back up a MongoDB deployment
    Mongodb {
        /// Path to the plan configuration file
        config: PathBuf,
    },
    /// Back up a Consul cluster
    Consul {
        /// Path to the plan configuration file
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    let result = match &cli.command {
        Command::Mongodb { config } => worker::run_mongodb(config).await,
        Command::Consul { config } => worker::run_consul(config).await,
    };

    match result {
        Ok(()) => {
            info!("Backup cycle completed");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Backup cycle failed");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,hyper=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}
