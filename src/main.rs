use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use redis_lens::catalog::{CatalogConfig, DEFAULT_SCAN_BATCH, DEFAULT_SCAN_THRESHOLD};
use redis_lens::server::{self, AppState};
use tracing_subscriber::EnvFilter;

/// Redis Lens, a browser console for exploring and managing a Redis server
#[derive(Parser)]
#[command(name = "redis-lens", version, about)]
struct Cli {
    /// Host to bind the HTTP server to
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Port to bind the HTTP server to
    #[arg(long, default_value_t = 8005)]
    port: u16,

    /// Directory holding the built UI (index.html and its assets)
    #[arg(long, default_value = "static")]
    static_dir: PathBuf,

    /// Databases with more keys than this are listed with SCAN instead of KEYS
    #[arg(long, default_value_t = DEFAULT_SCAN_THRESHOLD)]
    scan_threshold: u64,

    /// COUNT hint sent with each SCAN call
    #[arg(long, default_value_t = DEFAULT_SCAN_BATCH)]
    scan_count: u32,

    /// Seconds to wait when connecting to a Redis server
    #[arg(long, default_value_t = 5)]
    connect_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if cli.scan_count == 0 {
        anyhow::bail!("--scan-count must be at least 1");
    }

    if !cli.static_dir.join("index.html").exists() {
        tracing::warn!(
            dir = %cli.static_dir.display(),
            "UI bundle not found, only the /api endpoints will work"
        );
    }

    let state = AppState {
        catalog: CatalogConfig {
            scan_threshold: cli.scan_threshold,
            scan_batch: cli.scan_count,
            connect_timeout: Duration::from_secs(cli.connect_timeout),
        },
        static_dir: cli.static_dir,
    };

    let listener = tokio::net::TcpListener::bind((cli.host.as_str(), cli.port))
        .await
        .with_context(|| format!("Cannot bind to {}:{}", cli.host, cli.port))?;
    let addr: SocketAddr = listener.local_addr()?;

    tracing::info!(
        %addr,
        scan_threshold = cli.scan_threshold,
        scan_count = cli.scan_count,
        "Starting Redis Lens server on http://{}:{}",
        cli.host,
        cli.port
    );

    axum::serve(listener, server::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
