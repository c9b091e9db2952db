//! Data server implementation
//!
//! Handles block storage with:
//! - One durable file per block
//! - Asynchronous fan-out to sibling replicas
//! - Per-replica outcome reports to the metadata server
//! - Periodic heartbeats with backoff

pub mod heartbeat;
pub mod server;
pub mod service;

pub use server::DataServer;
pub use service::DataService;
