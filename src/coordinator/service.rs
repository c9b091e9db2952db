//! Metadata request dispatch
//!
//! A connection carries exactly one request: read the opcode, read that
//! opcode's fields, run it, write one response. A frame that cannot be parsed
//! gets no response; the connection is just closed.

use crate::common::{
    normalize_path, timestamp_now_millis, validate_node_id, Config, Error, FrameReader,
    FrameWriter, MetaOp, NodeState, ReplicaLocation, ReplicaState, Result,
};
use crate::coordinator::liveness::{LivenessPolicy, LivenessTracker, NodeRecord, Transition};
use crate::coordinator::namespace::{NamespaceStore, PathEntry};
use crate::coordinator::placement::PlacementManager;
use tokio::io::{AsyncRead, AsyncWrite};

/// A parsed metadata request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetaRequest {
    HeartBeat {
        node_id: String,
        host: String,
        port: u16,
    },
    CreateFile {
        path: String,
        owner: String,
        is_directory: bool,
    },
    RenameFile {
        old_path: String,
        new_path: String,
    },
    DelFile {
        path: String,
        requester: String,
    },
    ListFile {
        path: String,
    },
    GetFileInfo {
        path: String,
    },
    ListNodes,
    ReportBlock {
        file_id: String,
        node_id: String,
        block_id: String,
        confirmed: bool,
        size: u64,
    },
}

impl MetaRequest {
    /// Read the opcode and the fields that follow it
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut FrameReader<R>) -> Result<Self> {
        let op = MetaOp::try_from(reader.read_u8().await?)?;
        Ok(match op {
            MetaOp::HeartBeat => {
                let node_id = reader.read_str().await?;
                let host = reader.read_str().await?;
                let port = reader.read_i32().await?;
                let port = u16::try_from(port)
                    .map_err(|_| Error::Protocol(format!("invalid port: {}", port)))?;
                MetaRequest::HeartBeat {
                    node_id,
                    host,
                    port,
                }
            }
            MetaOp::CreateFile => MetaRequest::CreateFile {
                path: reader.read_str().await?,
                owner: reader.read_str().await?,
                is_directory: reader.read_bool().await?,
            },
            MetaOp::RenameFile => MetaRequest::RenameFile {
                old_path: reader.read_str().await?,
                new_path: reader.read_str().await?,
            },
            MetaOp::DelFile => MetaRequest::DelFile {
                path: reader.read_str().await?,
                requester: reader.read_str().await?,
            },
            MetaOp::ListFile => MetaRequest::ListFile {
                path: reader.read_str().await?,
            },
            MetaOp::GetFileInfo => MetaRequest::GetFileInfo {
                path: reader.read_str().await?,
            },
            MetaOp::ListNodes => MetaRequest::ListNodes,
            MetaOp::ReportBlock => {
                let file_id = reader.read_str().await?;
                let node_id = reader.read_str().await?;
                let block_id = reader.read_str().await?;
                let confirmed = reader.read_bool().await?;
                let size = reader.read_i64().await?;
                let size = u64::try_from(size)
                    .map_err(|_| Error::Protocol(format!("negative block size: {}", size)))?;
                MetaRequest::ReportBlock {
                    file_id,
                    node_id,
                    block_id,
                    confirmed,
                    size,
                }
            }
        })
    }
}

/// Outcome of CREATE_FILE
#[derive(Debug, Clone)]
pub struct Created {
    pub entry: PathEntry,
    pub degraded: bool,
}

/// The metadata authority: namespace, node registry and placement
pub struct MetadataService {
    namespace: NamespaceStore,
    liveness: LivenessTracker,
    placement: PlacementManager,
}

impl MetadataService {
    pub fn new(root_owner: &str, policy: LivenessPolicy, replication_factor: usize) -> Self {
        Self {
            namespace: NamespaceStore::new(root_owner),
            liveness: LivenessTracker::new(policy),
            placement: PlacementManager::new(replication_factor),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.user,
            LivenessPolicy::from_config(config),
            config.replication_factor,
        )
    }

    pub fn namespace(&self) -> &NamespaceStore {
        &self.namespace
    }

    pub fn liveness(&self) -> &LivenessTracker {
        &self.liveness
    }

    pub fn heartbeat(&self, node_id: &str, host: &str, port: u16) -> Result<()> {
        validate_node_id(node_id)?;
        self.liveness
            .heartbeat(node_id, host, port, timestamp_now_millis());
        Ok(())
    }

    /// Create a file (with replica placement) or a directory
    pub fn create_file(&self, path: &str, owner: &str, is_directory: bool) -> Result<Created> {
        let path = normalize_path(path)?;
        if is_directory {
            let entry = self.namespace.create(&path, owner, true)?;
            return Ok(Created {
                entry,
                degraded: false,
            });
        }

        // Cheap early exit; create_with_locations re-checks under the lock
        if self.namespace.exists(&path) {
            return Err(Error::AlreadyExists(path));
        }
        let placement = self.placement.place(&self.liveness, timestamp_now_millis());
        let entry = self
            .namespace
            .create_with_locations(&path, owner, false, placement.locations)?;

        tracing::info!(
            "Created {} ({} replicas{})",
            entry.path,
            entry.locations.len(),
            if placement.degraded { ", degraded" } else { "" }
        );
        Ok(Created {
            entry,
            degraded: placement.degraded,
        })
    }

    pub fn rename_file(&self, old_path: &str, new_path: &str) -> Result<()> {
        self.namespace.rename(old_path, new_path)?;
        tracing::info!("Renamed {} -> {}", old_path, new_path);
        Ok(())
    }

    /// Delete a path and its subtree; returns the replica locations it held
    pub fn delete_file(&self, path: &str, requester: &str) -> Result<Vec<ReplicaLocation>> {
        let removed = self.namespace.delete(path, requester)?;
        tracing::info!("Deleted {} ({} entries)", path, removed.len());
        Ok(removed.into_iter().flat_map(|e| e.locations).collect())
    }

    pub fn list_files(&self, path: &str) -> Result<Vec<String>> {
        self.namespace.list_children(path)
    }

    pub fn file_info(&self, path: &str) -> Result<PathEntry> {
        self.namespace.get(path)
    }

    pub fn list_nodes(&self) -> Vec<NodeRecord> {
        self.liveness.nodes(timestamp_now_millis())
    }

    pub fn report_block(
        &self,
        file_id: &str,
        node_id: &str,
        block_id: &str,
        confirmed: bool,
        size: u64,
    ) -> Result<()> {
        let location = ReplicaLocation::new(node_id, block_id);
        let (state, size) = if confirmed {
            (ReplicaState::Confirmed, Some(size))
        } else {
            (ReplicaState::Lost, None)
        };
        self.namespace.update_replica(file_id, &location, state, size)
    }

    /// Apply liveness decay; replicas on dead nodes become LOST
    pub fn sweep(&self, now: u64) -> Vec<Transition> {
        let transitions = self.liveness.sweep(now);
        for t in &transitions {
            tracing::warn!("Node {} is now {} (was {})", t.node_id, t.to, t.from);
            if t.to == NodeState::Dead {
                let lost = self.namespace.mark_node_lost(&t.node_id);
                if lost > 0 {
                    tracing::warn!("{} replicas on {} marked LOST", lost, t.node_id);
                }
            }
        }
        transitions
    }

    /// Run one request and build its success response
    pub fn execute(&self, request: MetaRequest) -> Result<FrameWriter> {
        let mut reply = FrameWriter::ok();
        match request {
            MetaRequest::HeartBeat {
                node_id,
                host,
                port,
            } => {
                self.heartbeat(&node_id, &host, port)?;
                reply.put_str("heartbeat received")?;
            }
            MetaRequest::CreateFile {
                path,
                owner,
                is_directory,
            } => {
                let created = self.create_file(&path, &owner, is_directory)?;
                reply.put_str(&ReplicaLocation::join(&created.entry.locations))?;
                reply.put_str(&created.entry.file_id)?;
                reply.put_bool(created.degraded);
            }
            MetaRequest::RenameFile { old_path, new_path } => {
                self.rename_file(&old_path, &new_path)?;
                reply.put_str("renamed")?;
            }
            MetaRequest::DelFile { path, requester } => {
                let locations = self.delete_file(&path, &requester)?;
                reply.put_str("deleted")?;
                reply.put_i32(locations.len() as i32);
                for location in &locations {
                    reply.put_str(&location.to_string())?;
                }
            }
            MetaRequest::ListFile { path } => {
                let names = self.list_files(&path)?;
                reply.put_i32(names.len() as i32);
                for name in &names {
                    reply.put_str(name)?;
                }
            }
            MetaRequest::GetFileInfo { path } => {
                let entry = self.file_info(&path)?;
                reply
                    .put_str(&entry.name)?
                    .put_bool(entry.is_directory)
                    .put_str(&entry.owner)?
                    .put_i64(entry.size_bytes as i64)
                    .put_i32(entry.locations.len() as i32);
                for location in &entry.locations {
                    reply.put_str(&location.to_string())?;
                }
                reply
                    .put_str(&entry.file_id)?
                    .put_i64(entry.created_at as i64);
                for location in &entry.locations {
                    reply.put_str(entry.state_of(location).as_str())?;
                }
            }
            MetaRequest::ListNodes => {
                let nodes = self.list_nodes();
                reply.put_i32(nodes.len() as i32);
                for node in &nodes {
                    reply
                        .put_str(&node.node_id)?
                        .put_str(&node.host)?
                        .put_i32(node.port as i32)
                        .put_str(node.state.as_str())?;
                }
            }
            MetaRequest::ReportBlock {
                file_id,
                node_id,
                block_id,
                confirmed,
                size,
            } => {
                self.report_block(&file_id, &node_id, &block_id, confirmed, size)?;
                reply.put_str("reported")?;
            }
        }
        Ok(reply)
    }

    /// Serve the single request carried by `stream`
    pub async fn handle_connection<S>(&self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut reader = FrameReader::new(stream);
        let request = MetaRequest::read_from(&mut reader).await?;
        tracing::debug!("Metadata request: {:?}", request);

        let reply = match self.execute(request) {
            Ok(reply) => reply,
            Err(e) if e.closes_connection() => return Err(e),
            Err(e) => {
                tracing::debug!("Request failed: {}", e);
                FrameWriter::error(&e)
            }
        };
        reply.send(reader.get_mut()).await
    }
}
