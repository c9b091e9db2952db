//! Metadata server

use crate::common::net::{serve_pool, PoolConfig};
use crate::common::{timestamp_now_millis, Config, Result};
use crate::coordinator::service::MetadataService;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;

pub struct MetadataServer {
    config: Config,
    listener: TcpListener,
    service: Arc<MetadataService>,
}

impl MetadataServer {
    /// Bind the listener and load the static node list
    pub async fn bind(config: Config) -> Result<Self> {
        config.validate()?;
        let listener = TcpListener::bind(config.metadata_addr()).await?;
        let service = Arc::new(MetadataService::from_config(&config));

        let now = timestamp_now_millis();
        for node in config.bootstrap()? {
            tracing::info!("Bootstrap node {} at {}:{}", node.node_id, node.host, node.port);
            service
                .liveness()
                .register_static(&node.node_id, &node.host, node.port, now);
        }

        Ok(Self {
            config,
            listener,
            service,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn service(&self) -> Arc<MetadataService> {
        self.service.clone()
    }

    /// Serve until `shutdown` flips to true
    pub async fn serve(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        tracing::info!("Starting metadata server");
        tracing::info!("  Listening on: {}", self.local_addr()?);
        tracing::info!("  Replication factor: {}", self.config.replication_factor);
        tracing::info!(
            "  Heartbeat: every {}s, stale after {}s, dead after {}s",
            self.config.heartbeat_interval_secs,
            self.config.active_window().as_secs(),
            self.config.heartbeat_timeout_secs
        );

        let sweeper = tokio::spawn(run_sweeper(
            self.service.clone(),
            self.config.heartbeat_interval(),
            shutdown.clone(),
        ));

        let service = self.service.clone();
        let pool = PoolConfig {
            workers: self.config.worker_count,
            queue_depth: self.config.queue_depth,
            io_timeout: self.config.io_timeout(),
        };

        tracing::info!("✓ Metadata server ready");
        let result = serve_pool(
            "metadata",
            self.listener,
            pool,
            move |stream, _peer| {
                let service = service.clone();
                async move { service.handle_connection(stream).await }
            },
            shutdown,
        )
        .await;

        let _ = sweeper.await;
        result
    }
}

/// Periodically decay node states until shutdown
async fn run_sweeper(
    service: Arc<MetadataService>,
    period: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                service.sweep(timestamp_now_millis());
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    tracing::debug!("Liveness sweeper stopped");
}
