//! Data server

use crate::client::MetaClient;
use crate::common::net::{serve_pool, PoolConfig};
use crate::common::{BlockStore, Config, FsBlockStore, Result};
use crate::volume::heartbeat::HeartbeatSender;
use crate::volume::service::DataService;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;

pub struct DataServer {
    config: Config,
    node_id: String,
    listener: TcpListener,
    service: Arc<DataService>,
}

impl DataServer {
    /// Bind the listener and open the block store under `storage_root`
    pub async fn bind(config: Config) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(FsBlockStore::open(&config.storage_root)?);
        Self::with_store(config, store).await
    }

    /// Bind with an explicit block store
    pub async fn with_store(config: Config, store: Arc<dyn BlockStore>) -> Result<Self> {
        let listener = TcpListener::bind(config.data_addr()).await?;
        let port = listener.local_addr()?.port();
        let node_id = config
            .node_id
            .clone()
            .unwrap_or_else(|| format!("{}-{}", config.data_host, port));
        let service = Arc::new(DataService::from_config(node_id.clone(), store, &config));

        Ok(Self {
            config,
            node_id,
            listener,
            service,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn service(&self) -> Arc<DataService> {
        self.service.clone()
    }

    /// Serve until `shutdown` flips to true
    pub async fn serve(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let port = self.local_addr()?.port();
        tracing::info!("Starting data server: {}", self.node_id);
        tracing::info!("  Listening on: {}", self.local_addr()?);
        tracing::info!("  Storage root: {}", self.config.storage_root.display());
        tracing::info!("  Metadata server: {}", self.config.metadata_addr());

        let heartbeat = HeartbeatSender::new(
            MetaClient::new(
                self.config.metadata_addr(),
                self.config.connect_timeout(),
                self.config.io_timeout(),
            ),
            self.node_id.clone(),
            self.config.data_host.clone(),
            port,
            self.config.heartbeat_interval(),
            self.config.heartbeat_timeout(),
        );
        let heartbeat = tokio::spawn(heartbeat.run(shutdown.clone()));

        let service = self.service.clone();
        let pool = PoolConfig {
            workers: self.config.worker_count,
            queue_depth: self.config.queue_depth,
            io_timeout: self.config.io_timeout(),
        };

        tracing::info!("✓ Data server ready");
        let result = serve_pool(
            "data",
            self.listener,
            pool,
            move |stream, _peer| {
                let service = service.clone();
                async move { service.handle_connection(stream).await }
            },
            shutdown,
        )
        .await;

        let _ = heartbeat.await;
        result
    }
}
