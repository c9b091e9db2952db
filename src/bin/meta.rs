//! Metadata server binary

use clap::Parser;
use minidfs::{Config, MetadataServer};
use std::path::PathBuf;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "minidfs-meta")]
#[command(about = "minidfs metadata server")]
#[command(version)]
struct Cli {
    /// Config file (defaults to ./minidfs.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind
    #[arg(long)]
    host: Option<String>,

    /// Port to bind
    #[arg(long)]
    port: Option<u16>,

    /// Replication factor
    #[arg(long)]
    replicas: Option<usize>,

    /// Static data nodes, id@host:port (comma-separated)
    #[arg(long, value_delimiter = ',')]
    bootstrap: Vec<String>,

    /// Worker tasks serving connections
    #[arg(long)]
    workers: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config from file and environment, then override with CLI arguments
    let mut config = Config::load_from(cli.config.as_deref())?;
    if let Some(host) = cli.host {
        config.metadata_host = host;
    }
    if let Some(port) = cli.port {
        config.metadata_port = port;
    }
    if let Some(replicas) = cli.replicas {
        config.replication_factor = replicas;
    }
    if !cli.bootstrap.is_empty() {
        config.bootstrap_nodes = cli.bootstrap;
    }
    if let Some(workers) = cli.workers {
        config.worker_count = workers;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let server = MetadataServer::bind(config).await?;

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
