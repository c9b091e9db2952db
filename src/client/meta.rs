//! Metadata server client
//!
//! One TCP connection per request, matching the server's one-request-per-
//! connection contract. Each exchange runs under the I/O deadline.

use crate::common::net::{connect, with_deadline};
use crate::common::{
    Error, FrameReader, FrameWriter, MetaOp, NodeInfo, NodeState, ReplicaLocation, ReplicaState,
    Result,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::net::TcpStream;

/// File or directory metadata as returned by GET_FILE_INFO
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub path: String,
    pub name: String,
    pub is_directory: bool,
    pub owner: String,
    pub size_bytes: u64,
    pub file_id: String,
    pub created_at: u64,
    pub locations: Vec<ReplicaLocation>,
    /// One per location, same order
    pub replica_states: Vec<ReplicaState>,
}

impl FileInfo {
    /// Locations in read order: replicas not known to be lost come first
    pub fn read_order(&self) -> Vec<ReplicaLocation> {
        let (live, lost): (Vec<_>, Vec<_>) = self
            .locations
            .iter()
            .zip(self.replica_states.iter())
            .partition(|(_, state)| **state != ReplicaState::Lost);
        live.into_iter()
            .chain(lost)
            .map(|(location, _)| location.clone())
            .collect()
    }
}

/// Reply to CREATE_FILE
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedFile {
    pub file_id: String,
    pub locations: Vec<ReplicaLocation>,
    pub degraded: bool,
}

#[derive(Debug, Clone)]
pub struct MetaClient {
    addr: String,
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl MetaClient {
    pub fn new(addr: impl Into<String>, connect_timeout: Duration, io_timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout,
            io_timeout,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Send one request and return a reader positioned at the success payload
    async fn exchange(&self, request: FrameWriter) -> Result<FrameReader<TcpStream>> {
        let mut stream = connect(&self.addr, self.connect_timeout).await?;
        request.send(&mut stream).await?;
        let mut reader = FrameReader::new(stream);
        reader.read_status().await?;
        Ok(reader)
    }

    /// Exchange expecting a single message string back
    async fn call(&self, request: FrameWriter) -> Result<String> {
        with_deadline(&self.addr, self.io_timeout, async {
            let mut reader = self.exchange(request).await?;
            reader.read_str().await
        })
        .await
    }

    pub async fn heartbeat(&self, node_id: &str, host: &str, port: u16) -> Result<()> {
        let mut req = FrameWriter::request(MetaOp::HeartBeat as u8);
        req.put_str(node_id)?.put_str(host)?.put_i32(port as i32);
        self.call(req).await.map(|_| ())
    }

    pub async fn create_file(
        &self,
        path: &str,
        owner: &str,
        is_directory: bool,
    ) -> Result<CreatedFile> {
        let mut req = FrameWriter::request(MetaOp::CreateFile as u8);
        req.put_str(path)?.put_str(owner)?.put_bool(is_directory);
        with_deadline(&self.addr, self.io_timeout, async {
            let mut r = self.exchange(req).await?;
            let locations = ReplicaLocation::parse_list(&r.read_str().await?)?;
            let file_id = r.read_str().await?;
            let degraded = r.read_bool().await?;
            Ok(CreatedFile {
                file_id,
                locations,
                degraded,
            })
        })
        .await
    }

    pub async fn rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        let mut req = FrameWriter::request(MetaOp::RenameFile as u8);
        req.put_str(old_path)?.put_str(new_path)?;
        self.call(req).await.map(|_| ())
    }

    /// Delete a path; returns the replica locations the removed files held
    pub async fn delete(&self, path: &str, requester: &str) -> Result<Vec<ReplicaLocation>> {
        let mut req = FrameWriter::request(MetaOp::DelFile as u8);
        req.put_str(path)?.put_str(requester)?;
        with_deadline(&self.addr, self.io_timeout, async {
            let mut r = self.exchange(req).await?;
            let _message = r.read_str().await?;
            let count = r.read_count().await?;
            let mut locations = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                locations.push(ReplicaLocation::parse(&r.read_str().await?)?);
            }
            Ok(locations)
        })
        .await
    }

    pub async fn list(&self, path: &str) -> Result<Vec<String>> {
        let mut req = FrameWriter::request(MetaOp::ListFile as u8);
        req.put_str(path)?;
        with_deadline(&self.addr, self.io_timeout, async {
            let mut r = self.exchange(req).await?;
            let count = r.read_count().await?;
            let mut names = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                names.push(r.read_str().await?);
            }
            Ok(names)
        })
        .await
    }

    pub async fn file_info(&self, path: &str) -> Result<FileInfo> {
        let mut req = FrameWriter::request(MetaOp::GetFileInfo as u8);
        req.put_str(path)?;
        with_deadline(&self.addr, self.io_timeout, async {
            let mut r = self.exchange(req).await?;
            let name = r.read_str().await?;
            let is_directory = r.read_bool().await?;
            let owner = r.read_str().await?;
            let size_bytes = non_negative(r.read_i64().await?)?;
            let count = r.read_count().await?;
            let mut locations = Vec::with_capacity(count.min(64));
            for _ in 0..count {
                locations.push(ReplicaLocation::parse(&r.read_str().await?)?);
            }
            let file_id = r.read_str().await?;
            let created_at = non_negative(r.read_i64().await?)?;
            let mut replica_states = Vec::with_capacity(locations.len());
            for _ in 0..count {
                replica_states.push(ReplicaState::parse(&r.read_str().await?)?);
            }
            Ok(FileInfo {
                path: path.to_string(),
                name,
                is_directory,
                owner,
                size_bytes,
                file_id,
                created_at,
                locations,
                replica_states,
            })
        })
        .await
    }

    pub async fn list_nodes(&self) -> Result<Vec<NodeInfo>> {
        let req = FrameWriter::request(MetaOp::ListNodes as u8);
        with_deadline(&self.addr, self.io_timeout, async {
            let mut r = self.exchange(req).await?;
            let count = r.read_count().await?;
            let mut nodes = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                let node_id = r.read_str().await?;
                let host = r.read_str().await?;
                let port = r.read_i32().await?;
                let port = u16::try_from(port)
                    .map_err(|_| Error::Protocol(format!("invalid port: {}", port)))?;
                let state = r.read_str().await?;
                let state = NodeState::parse(&state)
                    .ok_or_else(|| Error::Protocol(format!("unknown node state: {}", state)))?;
                nodes.push(NodeInfo {
                    node_id,
                    host,
                    port,
                    state,
                });
            }
            Ok(nodes)
        })
        .await
    }

    /// Report the outcome of one replica write
    pub async fn report_block(
        &self,
        file_id: &str,
        location: &ReplicaLocation,
        confirmed: bool,
        size: u64,
    ) -> Result<()> {
        let mut req = FrameWriter::request(MetaOp::ReportBlock as u8);
        req.put_str(file_id)?
            .put_str(&location.node_id)?
            .put_str(&location.block_id)?
            .put_bool(confirmed)
            .put_i64(size as i64);
        self.call(req).await.map(|_| ())
    }
}

fn non_negative(v: i64) -> Result<u64> {
    u64::try_from(v).map_err(|_| Error::Protocol(format!("unexpected negative value: {}", v)))
}
