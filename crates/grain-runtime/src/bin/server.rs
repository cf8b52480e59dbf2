#![forbid(unsafe_code)]

//! **grain-server** – Standalone HTTP server over a Grain runtime.
//!
//! Serves `POST /command` and `POST /query` for whatever handlers the
//! embedding application registered in the process-wide default registries
//! before this binary's `main` runs (or, as shipped, an empty registry -
//! useful as a wiring smoke test). Storage is in-memory; snapshots can be
//! kept on disk with `--snapshot-dir`.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use grain_kv::KvConfig;
use grain_runtime::{Runtime, RuntimeConfig, SnapshotConfig};
use grain_store_core::StoreConfig;
use grain_types::SchemaRegistry;

#[derive(Parser)]
#[command(name = "grain-server")]
#[command(about = "Grain - CQRS/event-sourcing runtime over HTTP")]
#[command(version)]
struct Cli {
    /// Listen address
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: String,

    /// Per-subscription bus queue capacity
    #[arg(long, default_value = "1024")]
    bus_buffer: usize,

    /// Keep projection snapshots on disk in this directory
    #[arg(long)]
    snapshot_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    info!("starting grain-server v{}", env!("CARGO_PKG_VERSION"));

    let snapshots = match &cli.snapshot_dir {
        Some(dir) => SnapshotConfig::Sled(KvConfig {
            storage_dir: dir.clone(),
            db_name: "grain-snapshots".to_string(),
        }),
        None => SnapshotConfig::Memory,
    };
    let config = RuntimeConfig {
        store: StoreConfig::default(),
        bus_buffer: cli.bus_buffer,
        snapshots,
    };

    let runtime = Runtime::with_default_registries(config, SchemaRegistry::new())
        .map_err(|anomaly| anyhow::anyhow!(anomaly))?;

    let app = runtime.router(serde_json::Map::new());
    let listener = tokio::net::TcpListener::bind(&cli.listen)
        .await
        .with_context(|| format!("failed to bind {}", cli.listen))?;
    info!(listen = %cli.listen, "serving commands and queries");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    runtime.shutdown().await;
    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))?;
    Ok(())
}

async fn shutdown_signal() {
    if signal::ctrl_c().await.is_ok() {
        info!("shutdown signal received");
    }
}
