//! Main entry point for the store-exporter CLI

use anyhow::Context;
use clap::Parser;
use store_exporter::cli::Cli;
use store_exporter::metrics;
use store_exporter::shutdown::ShutdownCoordinator;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber with optional JSON formatting
fn init_tracing() {
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("store_exporter=info"));

    // stdout carries the result report
    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();

    if let Some(addr) = cli.metrics_addr {
        match metrics::init_metrics(addr).await {
            Ok(()) => info!("Metrics endpoint listening on {}", addr),
            Err(e) => warn!("Metrics endpoint unavailable: {}", e),
        }
    }

    let shutdown = ShutdownCoordinator::shared();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Ctrl+C received - cancelling export...");
                shutdown.request_shutdown();
            }
        }
    });

    let entity = cli.command.entity();
    let result = cli
        .execute(shutdown.clone())
        .await
        .with_context(|| format!("{entity} export failed"));

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
