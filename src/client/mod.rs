//! Client library
//!
//! `DfsClient` hides the split between metadata and data servers: it asks the
//! metadata server where a file lives, then moves bytes directly to or from
//! the data nodes holding its replicas.

pub mod data;
pub mod meta;

pub use data::DataClient;
pub use meta::{CreatedFile, FileInfo, MetaClient};

use crate::common::{
    normalize_path, Config, Error, NodeInfo, ReplicaLocation, ReplicaState, ReplicaTarget,
    Result,
};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{PoisonError, RwLock};

/// Result of a successful write
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteOutcome {
    pub file_id: String,
    pub locations: Vec<ReplicaLocation>,
    /// Fewer replicas than the replication factor were placed
    pub degraded: bool,
}

pub struct DfsClient {
    meta: MetaClient,
    data: DataClient,
    user: String,
    /// node id → node, refreshed from LIST_NODES on a miss
    directory: RwLock<HashMap<String, NodeInfo>>,
}

impl DfsClient {
    pub fn new(meta: MetaClient, data: DataClient, user: impl Into<String>) -> Self {
        Self {
            meta,
            data,
            user: user.into(),
            directory: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            MetaClient::new(
                config.metadata_addr(),
                config.connect_timeout(),
                config.io_timeout(),
            ),
            DataClient::new(config.connect_timeout(), config.io_timeout()),
            config.user.clone(),
        )
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn meta(&self) -> &MetaClient {
        &self.meta
    }

    fn cached_addr(&self, node_id: &str) -> Option<String> {
        self.directory
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(node_id)
            .map(NodeInfo::addr)
    }

    /// Socket address of a data node
    async fn node_addr(&self, node_id: &str) -> Result<String> {
        if let Some(addr) = self.cached_addr(node_id) {
            return Ok(addr);
        }
        self.list_nodes().await?;
        self.cached_addr(node_id)
            .ok_or_else(|| Error::NodeUnreachable(format!("unknown data node {}", node_id)))
    }

    /// Where a path lives (one GET_FILE_INFO round trip). There is no
    /// separate open step; this lookup is all a reader needs.
    pub async fn resolve(&self, path: &str) -> Result<FileInfo> {
        self.meta.file_info(&normalize_path(path)?).await
    }

    pub async fn file_info(&self, path: &str) -> Result<FileInfo> {
        self.resolve(path).await
    }

    pub async fn file_size(&self, path: &str) -> Result<u64> {
        Ok(self.resolve(path).await?.size_bytes)
    }

    /// Read `length` bytes at `offset`, falling back across replicas
    pub async fn read_file(&self, path: &str, offset: u64, length: u64) -> Result<Vec<u8>> {
        let info = self.resolve(path).await?;
        self.read_from_replicas(&info, offset, length).await
    }

    /// Whole file content
    pub async fn read_all(&self, path: &str) -> Result<Vec<u8>> {
        let info = self.resolve(path).await?;
        // Size 0 is only trustworthy once some replica has been confirmed
        if !info.is_directory
            && info.size_bytes == 0
            && !info.replica_states.contains(&ReplicaState::Confirmed)
        {
            return Err(Error::NodeUnreachable(format!(
                "no confirmed replica of {}",
                info.path
            )));
        }
        self.read_from_replicas(&info, 0, info.size_bytes).await
    }

    async fn read_from_replicas(&self, info: &FileInfo, offset: u64, length: u64) -> Result<Vec<u8>> {
        if info.is_directory {
            return Err(Error::InvalidPath(format!("{} is a directory", info.path)));
        }

        for location in info.read_order() {
            let addr = match self.node_addr(&location.node_id).await {
                Ok(addr) => addr,
                Err(e) => {
                    tracing::warn!("Skipping replica {}: {}", location, e);
                    continue;
                }
            };
            match self
                .data
                .read_block(&addr, &location.block_id, offset, length)
                .await
            {
                Ok(data) => return Ok(data),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => tracing::warn!("Read from {} failed, trying next replica: {}", location, e),
            }
        }

        Err(Error::NodeUnreachable(format!(
            "no replica of {} could be read",
            info.path
        )))
    }

    /// Create `path` and store `data` on its replicas
    pub async fn write_file(&self, path: &str, data: &[u8]) -> Result<WriteOutcome> {
        let path = normalize_path(path)?;
        let created = self.meta.create_file(&path, &self.user, false).await?;
        if created.degraded {
            tracing::warn!(
                "{} placed on only {} replicas",
                path,
                created.locations.len()
            );
        }

        let mut targets = Vec::with_capacity(created.locations.len());
        for location in &created.locations {
            match self.node_addr(&location.node_id).await {
                Ok(addr) => targets.push(ReplicaTarget {
                    addr,
                    node_id: location.node_id.clone(),
                    block_id: location.block_id.clone(),
                }),
                Err(e) => tracing::warn!("Replica {} has no address: {}", location, e),
            }
        }

        // The first target that accepts the write acts as primary and forwards
        // to the targets after it
        let mut last_error = None;
        for (i, primary) in targets.iter().enumerate() {
            let siblings = &targets[i + 1..];
            match self
                .data
                .write_block(&primary.addr, &primary.block_id, &created.file_id, siblings, data)
                .await
            {
                Ok(()) => {
                    tracing::debug!("Wrote {} via {}", path, primary.node_id);
                    // The primary's own report is best-effort; the size must
                    // not depend on it
                    let location = ReplicaLocation::new(&primary.node_id, &primary.block_id);
                    self.meta
                        .report_block(&created.file_id, &location, true, data.len() as u64)
                        .await?;
                    return Ok(WriteOutcome {
                        file_id: created.file_id,
                        locations: created.locations,
                        degraded: created.degraded,
                    });
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    tracing::warn!("Write to {} failed: {}", primary.node_id, e);
                    let location = ReplicaLocation::new(&primary.node_id, &primary.block_id);
                    if let Err(report) = self
                        .meta
                        .report_block(&created.file_id, &location, false, 0)
                        .await
                    {
                        tracing::debug!("Could not report {} as lost: {}", location, report);
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            Error::NodeUnreachable(format!("no replica of {} is reachable", path))
        }))
    }

    /// Tell the first reachable replica that the file is closed
    pub async fn close_file(&self, path: &str) -> Result<()> {
        let info = self.resolve(path).await?;
        let mut last_error = None;
        for location in info.read_order() {
            let result = match self.node_addr(&location.node_id).await {
                Ok(addr) => self.data.close_block(&addr, &location.block_id).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => return Ok(()),
                Err(e) => last_error = Some(e),
            }
        }
        match last_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Delete a path and, best-effort, its blocks. A directory is removed with
    /// everything beneath it, so this also serves as directory delete.
    pub async fn delete_file(&self, path: &str) -> Result<()> {
        let path = normalize_path(path)?;
        let removed = self.meta.delete(&path, &self.user).await?;
        for location in removed {
            let result = match self.node_addr(&location.node_id).await {
                Ok(addr) => self.data.delete_block(&addr, &location.block_id).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                tracing::warn!("Could not delete block {}: {}", location, e);
            }
        }
        Ok(())
    }

    pub async fn create_directory(&self, path: &str) -> Result<()> {
        let path = normalize_path(path)?;
        self.meta.create_file(&path, &self.user, true).await.map(|_| ())
    }

    pub async fn rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        self.meta
            .rename(&normalize_path(old_path)?, &normalize_path(new_path)?)
            .await
    }

    pub async fn move_file(&self, src: &str, dst: &str) -> Result<()> {
        self.rename(src, dst).await
    }

    pub async fn list_files(&self, path: &str) -> Result<Vec<String>> {
        self.meta.list(&normalize_path(path)?).await
    }

    /// Every registered data node with its current state
    pub async fn list_nodes(&self) -> Result<Vec<NodeInfo>> {
        let nodes = self.meta.list_nodes().await?;
        let mut directory = self.directory.write().unwrap_or_else(PoisonError::into_inner);
        directory.clear();
        directory.extend(nodes.iter().map(|n| (n.node_id.clone(), n.clone())));
        Ok(nodes)
    }

    /// Addresses of the data nodes currently accepting writes
    pub async fn storage_nodes(&self) -> Result<Vec<String>> {
        Ok(self
            .list_nodes()
            .await?
            .into_iter()
            .filter(|n| n.state.is_healthy())
            .map(|n| n.addr())
            .collect())
    }

    pub async fn upload_file(&self, local: &Path, remote: &str) -> Result<WriteOutcome> {
        let data = tokio::fs::read(local).await?;
        self.write_file(remote, &data).await
    }

    /// Copy a remote file to `local`; returns the number of bytes written
    pub async fn download_file(&self, remote: &str, local: &Path) -> Result<u64> {
        let data = self.read_all(remote).await?;
        tokio::fs::write(local, &data).await?;
        Ok(data.len() as u64)
    }

    pub async fn copy_file(&self, src: &str, dst: &str) -> Result<WriteOutcome> {
        let data = self.read_all(src).await?;
        self.write_file(dst, &data).await
    }
}
