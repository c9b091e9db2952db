//! # minidfs
//!
//! A small distributed file system with:
//! - A single metadata server owning the namespace tree
//! - Data servers storing one block per file replica
//! - Heartbeat-driven liveness (ACTIVE → STALE → DEAD)
//! - Random K-of-N replica placement with degraded writes
//! - Asynchronous replica fan-out with per-replica outcome tracking
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │           Metadata Server               │
//! │  namespace tree · node registry ·       │
//! │  placement · replica states             │
//! └───────────┬─────────────────────────────┘
//!             │ HEART_BEAT / REPORT_BLOCK
//!   ┌─────────┴──────────┬──────────────┐
//!   │                    │              │
//! ┌─▼──────────┐   ┌─────▼──────┐   ┌──▼───────────┐
//! │ Data node 1│──▶│ Data node 2│   │ Data node 3  │
//! │  blocks    │   │  blocks    │   │  blocks      │
//! └────────────┘   └────────────┘   └──────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start the metadata server
//! ```bash
//! minidfs-meta --port 10001 --replicas 3
//! ```
//!
//! ### Start a data server
//! ```bash
//! minidfs-data --id dn1 --port 9526 --storage ./dn1 --metadata 127.0.0.1:10001
//! ```
//!
//! ### Use the CLI
//! ```bash
//! minidfs put ./report.pdf /home/report.pdf
//! minidfs ls /home
//! minidfs get /home/report.pdf ./copy.pdf
//! minidfs nodes
//! ```

pub mod client;
pub mod common;
pub mod coordinator;
pub mod volume;

// Re-export commonly used types
pub use client::{DfsClient, FileInfo, WriteOutcome};
pub use common::{Config, Error, Result};
pub use coordinator::MetadataServer;
pub use volume::DataServer;

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
