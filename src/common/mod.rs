//! Common utilities and types shared across minidfs

pub mod config;
pub mod error;
pub mod net;
pub mod protocol;
pub mod storage;
pub mod utils;
pub mod wire;

pub use config::{BootstrapNode, Config};
pub use error::{Error, Result};
pub use protocol::{
    validate_node_id, DataOp, MetaOp, NodeInfo, ReplicaLocation, ReplicaState, ReplicaTarget,
};
pub use storage::{BlockStore, FsBlockStore, MemBlockStore};
pub use utils::{format_bytes, normalize_path, timestamp_now_millis, NodeState};
pub use wire::{FrameReader, FrameWriter};
