//! Data request handling
//!
//! A write is stored locally and acked. Confirming it to the metadata server
//! and copying it to sibling replicas happen afterwards on a spawned task, so
//! a slow metadata server or a dead sibling never fails or delays the
//! client's write.

use crate::client::{DataClient, MetaClient};
use crate::common::{
    BlockStore, Config, DataOp, Error, FrameReader, FrameWriter, ReplicaLocation, ReplicaTarget,
    Result,
};
use bytes::Bytes;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;

/// A parsed data request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataRequest {
    WriteFile {
        block_id: String,
        file_id: String,
        siblings: Vec<ReplicaTarget>,
        data: Bytes,
    },
    ReadFile {
        block_id: String,
        offset: u64,
        length: u64,
    },
    CloseFile {
        block_id: String,
    },
    DeleteBlock {
        block_id: String,
    },
}

impl DataRequest {
    /// Read the opcode and the fields that follow it
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut FrameReader<R>) -> Result<Self> {
        let op = DataOp::try_from(reader.read_u8().await?)?;
        Ok(match op {
            DataOp::WriteFile => {
                let block_id = reader.read_str().await?;
                let file_id = reader.read_str().await?;
                let count = reader.read_count().await?;
                let mut siblings = Vec::with_capacity(count.min(16));
                for _ in 0..count {
                    siblings.push(ReplicaTarget {
                        node_id: reader.read_str().await?,
                        addr: reader.read_str().await?,
                        block_id: reader.read_str().await?,
                    });
                }
                let data = Bytes::from(reader.read_bytes().await?);
                DataRequest::WriteFile {
                    block_id,
                    file_id,
                    siblings,
                    data,
                }
            }
            DataOp::ReadFile => {
                let block_id = reader.read_str().await?;
                let offset = reader.read_i64().await?;
                let length = reader.read_i64().await?;
                if offset < 0 || length < 0 {
                    return Err(Error::Protocol(format!(
                        "negative read range: offset {} length {}",
                        offset, length
                    )));
                }
                DataRequest::ReadFile {
                    block_id,
                    offset: offset as u64,
                    length: length as u64,
                }
            }
            DataOp::CloseFile => DataRequest::CloseFile {
                block_id: reader.read_str().await?,
            },
            DataOp::DeleteBlock => DataRequest::DeleteBlock {
                block_id: reader.read_str().await?,
            },
        })
    }
}

/// Counters for local writes and sibling replication
#[derive(Debug, Default)]
pub struct ReplicationStats {
    blocks_written: AtomicU64,
    bytes_written: AtomicU64,
    blocks_read: AtomicU64,
    forwarded: AtomicU64,
    forward_failures: AtomicU64,
}

/// Point-in-time copy of [`ReplicationStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub blocks_written: u64,
    pub bytes_written: u64,
    pub blocks_read: u64,
    pub forwarded: u64,
    pub forward_failures: u64,
}

impl ReplicationStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            blocks_written: self.blocks_written.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            blocks_read: self.blocks_read.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            forward_failures: self.forward_failures.load(Ordering::Relaxed),
        }
    }
}

/// Block storage on one data node
pub struct DataService {
    node_id: String,
    store: Arc<dyn BlockStore>,
    meta: MetaClient,
    peers: DataClient,
    stats: ReplicationStats,
}

impl DataService {
    pub fn new(
        node_id: impl Into<String>,
        store: Arc<dyn BlockStore>,
        meta: MetaClient,
        peers: DataClient,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            store,
            meta,
            peers,
            stats: ReplicationStats::default(),
        }
    }

    pub fn from_config(node_id: impl Into<String>, store: Arc<dyn BlockStore>, config: &Config) -> Self {
        Self::new(
            node_id,
            store,
            MetaClient::new(
                config.metadata_addr(),
                config.connect_timeout(),
                config.io_timeout(),
            ),
            DataClient::new(config.connect_timeout(), config.io_timeout()),
        )
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Persist a block locally
    pub async fn write_block(&self, block_id: &str, data: Bytes) -> Result<()> {
        let size = data.len() as u64;
        let store = self.store.clone();
        let id = block_id.to_string();
        tokio::task::spawn_blocking(move || store.put(&id, &data)).await??;

        self.stats.blocks_written.fetch_add(1, Ordering::Relaxed);
        self.stats.bytes_written.fetch_add(size, Ordering::Relaxed);
        tracing::debug!("Stored block {} ({} bytes)", block_id, size);
        Ok(())
    }

    /// Confirm a stored block to the metadata server, then forward it to its
    /// siblings, all in the background
    pub fn replicate(self: &Arc<Self>, work: PostWrite) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            let PostWrite {
                file_id,
                block_id,
                data,
                siblings,
            } = work;
            if !file_id.is_empty() {
                let location = ReplicaLocation::new(&service.node_id, &block_id);
                let size = data.len() as u64;
                if let Err(e) = service.meta.report_block(&file_id, &location, true, size).await {
                    tracing::warn!("Could not confirm {} to metadata server: {}", location, e);
                }
            }

            for sibling in siblings {
                match service
                    .peers
                    .write_block(&sibling.addr, &sibling.block_id, &file_id, &[], &data)
                    .await
                {
                    Ok(()) => {
                        service.stats.forwarded.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!("Forwarded block to {}", sibling.node_id);
                    }
                    Err(e) => {
                        service.stats.forward_failures.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(
                            "Replication to {} ({}) failed: {}",
                            sibling.node_id,
                            sibling.addr,
                            e
                        );
                        let location = ReplicaLocation::new(&sibling.node_id, &sibling.block_id);
                        if let Err(e) = service.meta.report_block(&file_id, &location, false, 0).await {
                            tracing::warn!("Could not report {} as lost: {}", location, e);
                        }
                    }
                }
            }
        })
    }

    pub async fn read_block(&self, block_id: &str, offset: u64, length: u64) -> Result<Vec<u8>> {
        let store = self.store.clone();
        let id = block_id.to_string();
        let data =
            tokio::task::spawn_blocking(move || store.get_range(&id, offset, length)).await??;
        self.stats.blocks_read.fetch_add(1, Ordering::Relaxed);
        Ok(data)
    }

    /// Blocks are complete once written; closing only acknowledges
    pub fn close_block(&self, block_id: &str) -> Result<()> {
        tracing::debug!("Closed block {}", block_id);
        Ok(())
    }

    pub async fn delete_block(&self, block_id: &str) -> Result<()> {
        let store = self.store.clone();
        let id = block_id.to_string();
        tokio::task::spawn_blocking(move || store.delete(&id)).await??;
        tracing::debug!("Deleted block {}", block_id);
        Ok(())
    }

    /// Run one request; a stored write also yields the work left after the ack
    async fn execute(&self, request: DataRequest) -> Result<(FrameWriter, Option<PostWrite>)> {
        let mut reply = FrameWriter::ok();
        let mut post_write = None;
        match request {
            DataRequest::WriteFile {
                block_id,
                file_id,
                siblings,
                data,
            } => {
                tracing::debug!("WRITE_FILE {} ({} siblings)", block_id, siblings.len());
                self.write_block(&block_id, data.clone()).await?;
                if !file_id.is_empty() || !siblings.is_empty() {
                    post_write = Some(PostWrite {
                        file_id,
                        block_id,
                        data,
                        siblings,
                    });
                }
                reply.put_str("stored")?;
            }
            DataRequest::ReadFile {
                block_id,
                offset,
                length,
            } => {
                tracing::debug!("READ_FILE {} [{}+{}]", block_id, offset, length);
                let data = self.read_block(&block_id, offset, length).await?;
                reply.put_bytes(&data)?;
            }
            DataRequest::CloseFile { block_id } => {
                self.close_block(&block_id)?;
                reply.put_str("closed")?;
            }
            DataRequest::DeleteBlock { block_id } => {
                self.delete_block(&block_id).await?;
                reply.put_str("deleted")?;
            }
        }
        Ok((reply, post_write))
    }

    /// Serve the single request carried by `stream`
    pub async fn handle_connection<S>(self: &Arc<Self>, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut reader = FrameReader::new(stream);
        let request = DataRequest::read_from(&mut reader).await?;

        let (reply, post_write) = match self.execute(request).await {
            Ok(done) => done,
            Err(e) if e.closes_connection() => return Err(e),
            Err(e) => {
                tracing::debug!("Request failed: {}", e);
                (FrameWriter::error(&e), None)
            }
        };
        let sent = reply.send(reader.get_mut()).await;

        // The metadata server and the siblings hear about a write only after
        // the client has its ack
        if let Some(work) = post_write {
            self.replicate(work);
        }
        sent
    }
}

/// Work still owed after a local write has been acked
#[derive(Debug, Clone)]
pub struct PostWrite {
    pub file_id: String,
    pub block_id: String,
    pub data: Bytes,
    pub siblings: Vec<ReplicaTarget>,
}
