//! In-process cluster harness for integration tests

#![allow(dead_code)]

use minidfs::common::NodeState;
use minidfs::volume::DataService;
use minidfs::{Config, DataServer, DfsClient, MetadataServer};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub fn test_config(replication_factor: usize) -> Config {
    Config {
        metadata_host: "127.0.0.1".into(),
        metadata_port: 0,
        data_host: "127.0.0.1".into(),
        data_port: 0,
        heartbeat_interval_secs: 1,
        heartbeat_miss_threshold: 2,
        heartbeat_timeout_secs: 4,
        replication_factor,
        worker_count: 4,
        queue_depth: 32,
        io_timeout_secs: 5,
        connect_timeout_secs: 2,
        ..Config::default()
    }
}

pub struct DataNode {
    pub node_id: String,
    pub addr: SocketAddr,
    pub storage: PathBuf,
    pub service: Arc<DataService>,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<minidfs::Result<()>>,
}

impl DataNode {
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}

pub struct Cluster {
    pub config: Config,
    pub meta_addr: SocketAddr,
    pub nodes: Vec<DataNode>,
    meta_shutdown: watch::Sender<bool>,
    meta_handle: JoinHandle<minidfs::Result<()>>,
    dir: TempDir,
}

impl Cluster {
    /// Metadata server plus `data_nodes` data servers, all on ephemeral ports
    pub async fn start(replication_factor: usize, data_nodes: usize) -> Self {
        let mut config = test_config(replication_factor);
        let meta = MetadataServer::bind(config.clone()).await.unwrap();
        let meta_addr = meta.local_addr().unwrap();
        config.metadata_port = meta_addr.port();

        let (meta_shutdown, rx) = watch::channel(false);
        let meta_handle = tokio::spawn(meta.serve(rx));

        let mut cluster = Self {
            config,
            meta_addr,
            nodes: Vec::new(),
            meta_shutdown,
            meta_handle,
            dir: TempDir::new().unwrap(),
        };
        for i in 0..data_nodes {
            cluster.add_node(&format!("dn{}", i)).await;
        }
        cluster.wait_for_active(data_nodes).await;
        cluster
    }

    /// Start a data server named `node_id`, reusing its storage directory
    pub async fn add_node(&mut self, node_id: &str) -> SocketAddr {
        let storage = self.dir.path().join(node_id);
        let mut config = self.config.clone();
        config.node_id = Some(node_id.to_string());
        config.storage_root = storage.clone();

        let server = DataServer::bind(config).await.unwrap();
        let addr = server.local_addr().unwrap();
        let service = server.service();
        let (shutdown, rx) = watch::channel(false);
        let handle = tokio::spawn(server.serve(rx));

        self.nodes.push(DataNode {
            node_id: node_id.to_string(),
            addr,
            storage,
            service,
            shutdown,
            handle,
        });
        addr
    }

    /// Start a data server that cannot reach the metadata server and register
    /// it with a single heartbeat sent on its behalf. Its own reports are
    /// dropped; it stays ACTIVE for one liveness window.
    pub async fn add_isolated_node(&mut self, node_id: &str) -> SocketAddr {
        let unused = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let dead_port = unused.local_addr().unwrap().port();
        drop(unused);

        let storage = self.dir.path().join(node_id);
        let mut config = self.config.clone();
        config.node_id = Some(node_id.to_string());
        config.storage_root = storage.clone();
        config.metadata_port = dead_port;

        let server = DataServer::bind(config).await.unwrap();
        let addr = server.local_addr().unwrap();
        let service = server.service();
        let (shutdown, rx) = watch::channel(false);
        let handle = tokio::spawn(server.serve(rx));

        self.client()
            .meta()
            .heartbeat(node_id, "127.0.0.1", addr.port())
            .await
            .unwrap();

        self.nodes.push(DataNode {
            node_id: node_id.to_string(),
            addr,
            storage,
            service,
            shutdown,
            handle,
        });
        addr
    }

    /// Stop a data server and forget it
    pub async fn stop_node(&mut self, node_id: &str) {
        if let Some(pos) = self.nodes.iter().position(|n| n.node_id == node_id) {
            self.nodes.remove(pos).stop().await;
        }
    }

    pub fn node(&self, node_id: &str) -> &DataNode {
        self.nodes.iter().find(|n| n.node_id == node_id).unwrap()
    }

    pub fn client(&self) -> DfsClient {
        DfsClient::from_config(&self.config)
    }

    pub fn client_as(&self, user: &str) -> DfsClient {
        let mut config = self.config.clone();
        config.user = user.to_string();
        DfsClient::from_config(&config)
    }

    pub async fn wait_for_active(&self, count: usize) {
        let client = self.client();
        let client = &client;
        wait_until(Duration::from_secs(10), move || async move {
            client
                .list_nodes()
                .await
                .map(|nodes| nodes.iter().filter(|n| n.state == NodeState::Active).count() >= count)
                .unwrap_or(false)
        })
        .await;
    }

    pub async fn shutdown(self) {
        for node in self.nodes {
            node.stop().await;
        }
        let _ = self.meta_shutdown.send(true);
        let _ = self.meta_handle.await;
    }
}

/// Poll `check` until it returns true; panics after `limit`
pub async fn wait_until<F, Fut>(limit: Duration, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("condition not met within {:?}", limit);
}
