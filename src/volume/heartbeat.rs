//! Periodic heartbeats from a data node to the metadata server
//!
//! The first heartbeat goes out immediately so a new node is placeable right
//! away. While the metadata server is unreachable the sender backs off
//! exponentially, capped, and returns to the normal interval on success.

use crate::client::MetaClient;
use std::time::Duration;
use tokio::sync::watch;

/// Retry delay after consecutive failures
#[derive(Debug, Clone)]
pub struct Backoff {
    interval: Duration,
    max: Duration,
    failures: u32,
}

impl Backoff {
    pub fn new(interval: Duration, max: Duration) -> Self {
        Self {
            interval,
            max: max.max(interval),
            failures: 0,
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn on_success(&mut self) -> Duration {
        self.failures = 0;
        self.interval
    }

    pub fn on_failure(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let factor = 1u32 << self.failures.min(16);
        self.interval.saturating_mul(factor).min(self.max)
    }
}

/// Sends HEART_BEAT for one data node until shutdown
pub struct HeartbeatSender {
    meta: MetaClient,
    node_id: String,
    host: String,
    port: u16,
    backoff: Backoff,
}

impl HeartbeatSender {
    pub fn new(
        meta: MetaClient,
        node_id: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        interval: Duration,
        max_backoff: Duration,
    ) -> Self {
        Self {
            meta,
            node_id: node_id.into(),
            host: host.into(),
            port,
            backoff: Backoff::new(interval, max_backoff),
        }
    }

    /// Send one heartbeat and return the delay before the next one
    pub async fn beat(&mut self) -> Duration {
        match self.meta.heartbeat(&self.node_id, &self.host, self.port).await {
            Ok(()) => {
                if self.backoff.failures() > 0 {
                    tracing::info!("Metadata server {} reachable again", self.meta.addr());
                }
                self.backoff.on_success()
            }
            Err(e) => {
                let delay = self.backoff.on_failure();
                tracing::warn!(
                    "Heartbeat to {} failed ({} in a row), retrying in {:?}: {}",
                    self.meta.addr(),
                    self.backoff.failures(),
                    delay,
                    e
                );
                delay
            }
        }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            "Heartbeating as {} ({}:{}) to {}",
            self.node_id,
            self.host,
            self.port,
            self.meta.addr()
        );
        loop {
            let delay = self.beat().await;
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("Heartbeat sender stopped");
    }
}
