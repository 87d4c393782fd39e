use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

use loadgen_node::target_stub::{run_target_stub, TargetStubState};

/// In-memory team / pull-request API for local smoke runs.
///
/// Usage: `test-target [listen_addr] [latency_ms]`
#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "loadgen_node=info,tower_http=info".into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .init();

    let mut args = std::env::args().skip(1);
    let listen_addr: SocketAddr = args
        .next()
        .unwrap_or_else(|| "127.0.0.1:8080".to_string())
        .parse()
        .context("Invalid listen address")?;
    let latency_ms: u64 = match args.next() {
        Some(raw) => raw.parse().context("Invalid latency")?,
        None => 0,
    };

    let state = TargetStubState::new().with_latency(Duration::from_millis(latency_ms));

    info!(
        listen_addr = %listen_addr,
        latency_ms = latency_ms,
        "Starting test target"
    );
    run_target_stub(listen_addr, state)
        .await
        .context("Test target failed")
}
