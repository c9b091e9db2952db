//! Metadata server implementation
//!
//! The metadata server is responsible for:
//! - The namespace tree (paths, owners, replica lists)
//! - Data node liveness from heartbeats
//! - Replica placement for new files
//! - Per-replica outcome tracking

pub mod liveness;
pub mod namespace;
pub mod placement;
pub mod server;
pub mod service;

pub use liveness::{LivenessPolicy, LivenessTracker, NodeRecord};
pub use namespace::{NamespaceStore, PathEntry};
pub use placement::{Placement, PlacementManager};
pub use server::MetadataServer;
pub use service::MetadataService;
