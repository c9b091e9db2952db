//! Data server binary

use anyhow::Result;
use clap::Parser;
use minidfs::{Config, DataServer};
use std::path::PathBuf;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "minidfs-data")]
#[command(about = "minidfs data server - block storage node")]
#[command(version)]
struct Args {
    /// Config file (defaults to ./minidfs.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Node name reported in heartbeats
    #[arg(short, long)]
    id: Option<String>,

    /// Host to bind and advertise
    #[arg(long)]
    host: Option<String>,

    /// Port to bind
    #[arg(short, long)]
    port: Option<u16>,

    /// Directory for block files
    #[arg(short, long)]
    storage: Option<PathBuf>,

    /// Metadata server, host:port
    #[arg(short, long)]
    metadata: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load_from(args.config.as_deref())?;
    if args.id.is_some() {
        config.node_id = args.id;
    }
    if let Some(host) = args.host {
        config.data_host = host;
    }
    if let Some(port) = args.port {
        config.data_port = port;
    }
    if let Some(storage) = args.storage {
        config.storage_root = storage;
    }
    if let Some(metadata) = args.metadata {
        let (host, port) = metadata
            .rsplit_once(':')
            .ok_or_else(|| anyhow::anyhow!("--metadata must be host:port, got {}", metadata))?;
        config.metadata_host = host.to_string();
        config.metadata_port = port.parse()?;
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let server = DataServer::bind(config).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    server.serve(shutdown_rx).await?;
    Ok(())
}
