//! Opcodes and shared record types of the metadata and data protocols

use crate::common::{Error, NodeState, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Metadata server operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MetaOp {
    HeartBeat = 1,
    CreateFile = 2,
    RenameFile = 3,
    DelFile = 4,
    ListFile = 5,
    GetFileInfo = 6,
    ListNodes = 7,
    ReportBlock = 8,
}

impl TryFrom<u8> for MetaOp {
    type Error = Error;

    fn try_from(v: u8) -> Result<Self> {
        Ok(match v {
            1 => MetaOp::HeartBeat,
            2 => MetaOp::CreateFile,
            3 => MetaOp::RenameFile,
            4 => MetaOp::DelFile,
            5 => MetaOp::ListFile,
            6 => MetaOp::GetFileInfo,
            7 => MetaOp::ListNodes,
            8 => MetaOp::ReportBlock,
            other => return Err(Error::Protocol(format!("unknown metadata opcode: {}", other))),
        })
    }
}

/// Data server operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DataOp {
    WriteFile = 1,
    ReadFile = 2,
    CloseFile = 3,
    DeleteBlock = 4,
}

impl TryFrom<u8> for DataOp {
    type Error = Error;

    fn try_from(v: u8) -> Result<Self> {
        Ok(match v {
            1 => DataOp::WriteFile,
            2 => DataOp::ReadFile,
            3 => DataOp::CloseFile,
            4 => DataOp::DeleteBlock,
            other => return Err(Error::Protocol(format!("unknown data opcode: {}", other))),
        })
    }
}

/// Node ids are embedded in comma-joined `node:blockId` lists, so they must
/// be non-empty and free of `,`
pub fn validate_node_id(node_id: &str) -> Result<()> {
    if node_id.is_empty() {
        return Err(Error::InvalidNodeId("node id is empty".into()));
    }
    if node_id.contains(',') {
        return Err(Error::InvalidNodeId(format!("{:?} contains ','", node_id)));
    }
    Ok(())
}

/// Where one replica of a file lives: `node:blockId` on the wire
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReplicaLocation {
    pub node_id: String,
    pub block_id: String,
}

impl ReplicaLocation {
    pub fn new(node_id: impl Into<String>, block_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            block_id: block_id.into(),
        }
    }

    /// Parse `node:blockId`. Block ids never contain `:`, node ids may.
    pub fn parse(s: &str) -> Result<Self> {
        match s.rsplit_once(':') {
            Some((node, block)) if !node.is_empty() && !block.is_empty() => Ok(Self::new(node, block)),
            _ => Err(Error::Protocol(format!("malformed replica location: {:?}", s))),
        }
    }

    /// Parse a comma-joined location list; an empty string is an empty list
    pub fn parse_list(s: &str) -> Result<Vec<Self>> {
        s.split(',')
            .filter(|part| !part.is_empty())
            .map(Self::parse)
            .collect()
    }

    pub fn join(locations: &[ReplicaLocation]) -> String {
        locations
            .iter()
            .map(|l| l.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for ReplicaLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.node_id, self.block_id)
    }
}

/// Durability state of one replica
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReplicaState {
    Pending,
    Confirmed,
    Lost,
}

impl ReplicaState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplicaState::Pending => "PENDING",
            ReplicaState::Confirmed => "CONFIRMED",
            ReplicaState::Lost => "LOST",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(ReplicaState::Pending),
            "CONFIRMED" => Ok(ReplicaState::Confirmed),
            "LOST" => Ok(ReplicaState::Lost),
            other => Err(Error::Protocol(format!("unknown replica state: {}", other))),
        }
    }
}

impl fmt::Display for ReplicaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A data node as published by LIST_NODES
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: String,
    pub host: String,
    pub port: u16,
    pub state: NodeState,
}

impl NodeInfo {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A sibling replica the primary forwards a write to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaTarget {
    pub addr: String,
    pub node_id: String,
    pub block_id: String,
}
