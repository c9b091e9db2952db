//! Configuration for minidfs components
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `MINIDFS_*` environment variables. Binaries apply CLI flags last.

use crate::common::{validate_node_id, Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "minidfs.toml";

/// Global configuration shared by the metadata server, data servers and clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Host the metadata server binds to and clients connect to
    pub metadata_host: String,

    /// Metadata server port
    pub metadata_port: u16,

    /// Host a data server binds to and advertises in heartbeats
    pub data_host: String,

    /// Data server port
    pub data_port: u16,

    /// Seconds between heartbeats from a data server
    pub heartbeat_interval_secs: u64,

    /// Missed heartbeats before a node is considered stale
    pub heartbeat_miss_threshold: u32,

    /// Seconds of silence before a node is considered dead
    pub heartbeat_timeout_secs: u64,

    /// Replicas placed per file
    pub replication_factor: usize,

    /// Root directory of the local block store
    pub storage_root: PathBuf,

    /// Worker tasks serving connections
    pub worker_count: usize,

    /// Accepted connections waiting for a worker
    pub queue_depth: usize,

    /// Deadline for serving one request, and for outbound requests
    pub io_timeout_secs: u64,

    /// Deadline for establishing outbound connections
    pub connect_timeout_secs: u64,

    /// Node name used by a data server (defaults to the host name)
    pub node_id: Option<String>,

    /// Static data nodes known at metadata startup, `id@host:port`
    pub bootstrap_nodes: Vec<String>,

    /// Owner name used by clients
    pub user: String,

    /// Logging level
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            metadata_host: "127.0.0.1".to_string(),
            metadata_port: 10001,
            data_host: "127.0.0.1".to_string(),
            data_port: 9526,
            heartbeat_interval_secs: 5,
            heartbeat_miss_threshold: 2,
            heartbeat_timeout_secs: 20,
            replication_factor: 3,
            storage_root: PathBuf::from("./dfs-data"),
            worker_count: 16,
            queue_depth: 256,
            io_timeout_secs: 30,
            connect_timeout_secs: 5,
            node_id: None,
            bootstrap_nodes: Vec::new(),
            user: "root".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// A data node listed in the static bootstrap configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapNode {
    pub node_id: String,
    pub host: String,
    pub port: u16,
}

impl BootstrapNode {
    /// Parse `id@host:port`
    pub fn parse(entry: &str) -> Result<Self> {
        let invalid = || Error::InvalidConfig(format!("bootstrap node must be id@host:port: {}", entry));
        let (node_id, addr) = entry.split_once('@').ok_or_else(invalid)?;
        let (host, port) = addr.rsplit_once(':').ok_or_else(invalid)?;
        let port = port.parse::<u16>().map_err(|_| invalid())?;
        if node_id.is_empty() || host.is_empty() {
            return Err(invalid());
        }
        validate_node_id(node_id)?;
        Ok(Self {
            node_id: node_id.to_string(),
            host: host.to_string(),
            port,
        })
    }
}

impl Config {
    /// Load from `minidfs.toml` (if present) and the environment
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load from an explicit file (required when given) and the environment
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => config::File::from(p).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let loaded: Config = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("MINIDFS")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("bootstrap_nodes"),
            )
            .build()?
            .try_deserialize()?;

        loaded.validate()?;
        Ok(loaded)
    }

    /// Reject settings the liveness and placement logic cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.replication_factor == 0 {
            return Err(Error::InvalidConfig("replication_factor must be at least 1".into()));
        }
        if self.heartbeat_interval_secs == 0 || self.heartbeat_miss_threshold == 0 {
            return Err(Error::InvalidConfig(
                "heartbeat interval and miss threshold must be non-zero".into(),
            ));
        }
        if self.heartbeat_timeout() <= self.active_window() {
            return Err(Error::InvalidConfig(format!(
                "heartbeat_timeout_secs ({}) must exceed interval * miss threshold ({}s)",
                self.heartbeat_timeout_secs,
                self.active_window().as_secs()
            )));
        }
        if self.worker_count == 0 || self.queue_depth == 0 {
            return Err(Error::InvalidConfig("worker_count and queue_depth must be non-zero".into()));
        }
        if let Some(node_id) = &self.node_id {
            validate_node_id(node_id)?;
        }
        for node in &self.bootstrap_nodes {
            BootstrapNode::parse(node)?;
        }
        Ok(())
    }

    pub fn metadata_addr(&self) -> String {
        format!("{}:{}", self.metadata_host, self.metadata_port)
    }

    pub fn data_addr(&self) -> String {
        format!("{}:{}", self.data_host, self.data_port)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    /// Silence a node may show and still be ACTIVE
    pub fn active_window(&self) -> Duration {
        self.heartbeat_interval() * self.heartbeat_miss_threshold
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn bootstrap(&self) -> Result<Vec<BootstrapNode>> {
        self.bootstrap_nodes
            .iter()
            .map(|s| BootstrapNode::parse(s))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.active_window(), Duration::from_secs(10));
        assert_eq!(config.metadata_addr(), "127.0.0.1:10001");
    }

    #[test]
    fn test_validate_rejects_short_timeout() {
        let config = Config {
            heartbeat_timeout_secs: 10,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            replication_factor: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bootstrap_parse() {
        let node = BootstrapNode::parse("dn1@10.0.0.7:9526").unwrap();
        assert_eq!(node.node_id, "dn1");
        assert_eq!(node.host, "10.0.0.7");
        assert_eq!(node.port, 9526);

        assert!(BootstrapNode::parse("dn1:9526").is_err());
        assert!(BootstrapNode::parse("@host:1").is_err());
        assert!(BootstrapNode::parse("dn1@host:notaport").is_err());
        assert!(matches!(
            BootstrapNode::parse("dn,evil@host:1"),
            Err(Error::InvalidNodeId(_))
        ));

        let config = Config {
            node_id: Some("dn,evil".into()),
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidNodeId(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "metadata_port = 12000\nreplication_factor = 2\nbootstrap_nodes = [\"a@h:1\"]"
        )
        .unwrap();

        let config = Config::load_from(Some(file.path())).unwrap();
        assert_eq!(config.metadata_port, 12000);
        assert_eq!(config.replication_factor, 2);
        assert_eq!(config.data_port, 9526);
        assert_eq!(config.bootstrap().unwrap().len(), 1);
    }
}
