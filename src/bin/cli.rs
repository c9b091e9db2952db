//! CLI for file operations

use clap::{Parser, Subcommand};
use minidfs::common::format_bytes;
use minidfs::{Config, DfsClient};
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "minidfs")]
#[command(about = "minidfs distributed file system CLI")]
#[command(version)]
struct Cli {
    /// Config file (defaults to ./minidfs.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Metadata server, host:port
    #[arg(long)]
    metadata: Option<String>,

    /// Act as this user
    #[arg(long)]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a local file
    Put {
        /// Local file
        local: PathBuf,
        /// Remote path
        remote: String,
    },

    /// Download a file
    Get {
        /// Remote path
        remote: String,
        /// Local file
        local: PathBuf,
    },

    /// Print a file (or a byte range of it) to stdout
    Cat {
        path: String,

        #[arg(long, default_value = "0")]
        offset: u64,

        /// Bytes to read (whole file if omitted)
        #[arg(long)]
        length: Option<u64>,
    },

    /// List a directory
    Ls {
        #[arg(default_value = "/")]
        path: String,

        /// Show owner, size and replica count
        #[arg(short, long)]
        long: bool,
    },

    /// Create a directory (and missing parents)
    Mkdir { path: String },

    /// Delete a file or directory tree
    Rm { path: String },

    /// Rename or move
    Mv { src: String, dst: String },

    /// Copy a file
    Cp { src: String, dst: String },

    /// Show metadata as JSON
    Stat { path: String },

    /// List data nodes
    Nodes,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = Config::load_from(cli.config.as_deref())?;
    if let Some(metadata) = cli.metadata {
        let (host, port) = metadata
            .rsplit_once(':')
            .ok_or_else(|| anyhow::anyhow!("--metadata must be host:port, got {}", metadata))?;
        config.metadata_host = host.to_string();
        config.metadata_port = port.parse()?;
    }
    if let Some(user) = cli.user {
        config.user = user;
    }
    let client = DfsClient::from_config(&config);

    match cli.command {
        Commands::Put { local, remote } => {
            let outcome = client.upload_file(&local, &remote).await?;
            println!("Uploaded {} -> {}", local.display(), remote);
            println!("  Replicas: {}", outcome.locations.len());
            if outcome.degraded {
                println!(
                    "  Warning: fewer than {} replicas available",
                    config.replication_factor
                );
            }
        }

        Commands::Get { remote, local } => {
            let bytes = client.download_file(&remote, &local).await?;
            println!("Downloaded {} ({})", remote, format_bytes(bytes));
        }

        Commands::Cat {
            path,
            offset,
            length,
        } => {
            let data = match length {
                Some(length) => client.read_file(&path, offset, length).await?,
                None => {
                    let size = client.file_size(&path).await?;
                    let length = size.checked_sub(offset).ok_or_else(|| {
                        anyhow::anyhow!("offset {} is past the end of {} ({} bytes)", offset, path, size)
                    })?;
                    client.read_file(&path, offset, length).await?
                }
            };
            std::io::stdout().write_all(&data)?;
        }

        Commands::Ls { path, long } => {
            let names = client.list_files(&path).await?;
            if !long {
                for name in names {
                    println!("{}", name);
                }
                return Ok(());
            }
            for name in names {
                let child = if path.ends_with('/') {
                    format!("{}{}", path, name)
                } else {
                    format!("{}/{}", path, name)
                };
                let info = client.file_info(&child).await?;
                let created = chrono::DateTime::from_timestamp_millis(info.created_at as i64)
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default();
                println!(
                    "{} {:<10} {:>10} {} r{} {}",
                    if info.is_directory { "d" } else { "-" },
                    info.owner,
                    format_bytes(info.size_bytes),
                    created,
                    info.locations.len(),
                    name
                );
            }
        }

        Commands::Mkdir { path } => {
            client.create_directory(&path).await?;
            println!("Created {}", path);
        }

        Commands::Rm { path } => {
            client.delete_file(&path).await?;
            println!("Deleted {}", path);
        }

        Commands::Mv { src, dst } => {
            client.move_file(&src, &dst).await?;
            println!("Moved {} -> {}", src, dst);
        }

        Commands::Cp { src, dst } => {
            client.copy_file(&src, &dst).await?;
            println!("Copied {} -> {}", src, dst);
        }

        Commands::Stat { path } => {
            let info = client.file_info(&path).await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }

        Commands::Nodes => {
            let nodes = client.list_nodes().await?;
            println!("Data nodes: {}", nodes.len());
            for node in nodes {
                println!("  {:<20} {:<22} {}", node.node_id, node.addr(), node.state);
            }
        }
    }

    Ok(())
}
