//! Quobyte Kubernetes Deployer
//!
//! Reads the deployment file, connects to the cluster and runs the bootstrap
//! sequence once. Exits non-zero on the first fatal error.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use quobyte_k8s_deployer::{
    BootstrapSequencer, ClusterConfig, KubeControlPlane, Result, TokioSleeper,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Quobyte Kubernetes Deployer - bootstrap a Quobyte cluster on Kubernetes
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Deployment configuration file
    #[arg(long = "config_file", env = "CONFIG_FILE", default_value = "./config.yaml")]
    config_file: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();

    init_logging(&args);

    info!("Starting Quobyte Kubernetes Deployer");
    info!("  Version: {}", quobyte_k8s_deployer::VERSION);
    info!("  Config file: {}", args.config_file.display());

    match deploy(&args).await {
        Ok(hint) => {
            println!("Quobyte Cluster was successfully deployed");
            println!("Verify the services with: {}", hint);
        }
        Err(e) => {
            error!(action = ?e.action(), "Deployment failed: {}", e);
            std::process::exit(1);
        }
    }
}

async fn deploy(args: &Args) -> Result<String> {
    let config = ClusterConfig::from_file(&args.config_file)?;
    info!("  Namespace: {}", config.namespace);
    info!("  Quobyte version: {}", config.version);

    let control_plane = KubeControlPlane::connect(&config.connection()).await?;
    info!("Connected to Kubernetes API");

    let sequencer = BootstrapSequencer::new(config, Arc::new(control_plane), Arc::new(TokioSleeper));
    let report = sequencer.run().await?;

    for step in report.incomplete_steps() {
        for warning in &step.warnings {
            info!(step = %step.step, "incomplete: {}", warning);
        }
    }
    if let Ok(json) = serde_json::to_string(&report) {
        debug!(report = %json, "deployment report");
    }

    Ok(sequencer.verification_hint())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = ["hyper=warn", "kube=info", "tower=warn"]
        .iter()
        .filter_map(|directive| directive.parse().ok())
        .fold(
            EnvFilter::from_default_env().add_directive(level.into()),
            |filter, directive| filter.add_directive(directive),
        );

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
