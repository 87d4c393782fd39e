use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

use loadgen_node::config::{LoadConfig, LoggingConfig};
use loadgen_node::recorder::describe_metrics;
use loadgen_node::{HttpTargetClient, LoadRunner};

/// Exit code of a run whose thresholds failed
const THRESHOLDS_FAILED_EXIT_CODE: i32 = 99;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/default".to_string());

    // Load configuration from file if available, otherwise use defaults
    let (config, load_error) = match LoadConfig::from_file(&config_path) {
        Ok(config) => (config, None),
        Err(e) => (LoadConfig::default(), Some(e)),
    };

    init_tracing(&config.logging);

    info!("Starting Loadgen Node v{}", env!("CARGO_PKG_VERSION"));
    match load_error {
        None => info!(path = %config_path, "Configuration loaded"),
        Some(e) => warn!("Failed to load config file {}: {}, using defaults", config_path, e),
    }

    config.validate().context("Invalid configuration")?;

    describe_metrics();
    if config.metrics.prometheus_enabled {
        let metrics_addr = config
            .metrics_addr()
            .context("Invalid metrics listen address")?;
        start_metrics_exporter(metrics_addr)?;
    }

    let client = HttpTargetClient::new(&config.target).context("Failed to create target client")?;
    let runner = LoadRunner::new(config, Arc::new(client));

    let report = runner.run().await.context("Load test aborted")?;

    if !report.passed() {
        error!(
            failed = report.thresholds.failures().count(),
            "Thresholds failed"
        );
        std::process::exit(THRESHOLDS_FAILED_EXIT_CODE);
    }

    info!("Load test passed");
    Ok(())
}

/// Structured logging; `RUST_LOG` overrides the configured level
fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("loadgen_node={}", logging.level).into());

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true);

    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Install the Prometheus exporter with its own HTTP listener
fn start_metrics_exporter(listen_addr: SocketAddr) -> Result<()> {
    info!(
        metrics_addr = %listen_addr,
        "Starting Prometheus metrics server"
    );

    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(listen_addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    info!(
        metrics_addr = %listen_addr,
        "Prometheus metrics server started"
    );
    Ok(())
}
