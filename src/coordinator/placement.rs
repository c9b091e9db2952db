//! Replica placement for new files
//!
//! Picks K distinct ACTIVE data nodes uniformly at random and assigns each a
//! fresh block id. Fewer active nodes than K, none included, still succeeds
//! and is flagged degraded.

use crate::common::ReplicaLocation;
use crate::coordinator::liveness::{LivenessTracker, NodeRecord};
use rand::seq::SliceRandom;

/// Result of a placement decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub locations: Vec<ReplicaLocation>,
    /// Fewer replicas than the replication factor were available
    pub degraded: bool,
}

/// PlacementManager selects data nodes for new files.
pub struct PlacementManager {
    /// Number of replicas per file
    replicas: usize,
}

impl PlacementManager {
    pub fn new(replicas: usize) -> Self {
        Self {
            replicas: replicas.max(1),
        }
    }

    pub fn replication_factor(&self) -> usize {
        self.replicas
    }

    /// Choose up to `k` distinct healthy nodes from `nodes`
    pub fn choose(&self, k: usize, nodes: &[NodeRecord]) -> Vec<String> {
        let healthy: Vec<&NodeRecord> = nodes.iter().filter(|n| n.state.is_healthy()).collect();
        healthy
            .choose_multiple(&mut rand::thread_rng(), k)
            .map(|n| n.node_id.clone())
            .collect()
    }

    /// Select replica locations among the nodes active at `now`
    pub fn place(&self, tracker: &LivenessTracker, now: u64) -> Placement {
        let active = tracker.active_nodes(now);
        let chosen = self.choose(self.replicas, &active);
        let degraded = chosen.len() < self.replicas;
        if degraded {
            tracing::warn!(
                "Degraded placement: {} of {} replicas available",
                chosen.len(),
                self.replicas
            );
        }

        let locations = chosen
            .into_iter()
            .map(|node_id| ReplicaLocation::new(node_id, uuid::Uuid::new_v4().to_string()))
            .collect();

        Placement { locations, degraded }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::NodeState;
    use crate::coordinator::liveness::LivenessPolicy;
    use std::collections::HashSet;
    use std::time::Duration;

    fn mock_node(id: &str, state: NodeState) -> NodeRecord {
        NodeRecord {
            node_id: id.to_string(),
            host: "localhost".to_string(),
            port: 9526,
            last_heartbeat_at: 0,
            state,
        }
    }

    fn tracker_with(active: &[&str]) -> LivenessTracker {
        let tracker = LivenessTracker::new(LivenessPolicy {
            interval: Duration::from_secs(5),
            miss_threshold: 2,
            timeout: Duration::from_secs(20),
        });
        for (i, id) in active.iter().enumerate() {
            tracker.heartbeat(id, "localhost", 9000 + i as u16, 1_000);
        }
        tracker
    }

    #[test]
    fn test_select_nodes() {
        let manager = PlacementManager::new(3);
        let tracker = tracker_with(&["dn-1", "dn-2", "dn-3", "dn-4"]);

        let placement = manager.place(&tracker, 1_000);
        assert_eq!(placement.locations.len(), 3);
        assert!(!placement.degraded);

        let nodes: HashSet<_> = placement.locations.iter().map(|l| &l.node_id).collect();
        let blocks: HashSet<_> = placement.locations.iter().map(|l| &l.block_id).collect();
        assert_eq!(nodes.len(), 3);
        assert_eq!(blocks.len(), 3);
    }

    #[test]
    fn test_degraded_placement() {
        let manager = PlacementManager::new(3);
        let tracker = tracker_with(&["dn-1", "dn-2"]);

        let placement = manager.place(&tracker, 1_000);
        assert_eq!(placement.locations.len(), 2);
        assert!(placement.degraded);
    }

    #[test]
    fn test_no_active_nodes() {
        let manager = PlacementManager::new(3);
        let tracker = tracker_with(&["dn-1"]);

        // Long past the heartbeat timeout
        let placement = manager.place(&tracker, 1_000_000);
        assert!(placement.locations.is_empty());
        assert!(placement.degraded);
    }

    #[test]
    fn test_never_chooses_unhealthy_nodes() {
        let manager = PlacementManager::new(3);
        let nodes = vec![
            mock_node("alive", NodeState::Active),
            mock_node("stale", NodeState::Stale),
            mock_node("dead", NodeState::Dead),
        ];

        for _ in 0..50 {
            assert_eq!(manager.choose(3, &nodes), vec!["alive".to_string()]);
        }
    }

    #[test]
    fn test_choice_is_spread() {
        let manager = PlacementManager::new(1);
        let nodes: Vec<_> = (0..4)
            .map(|i| mock_node(&format!("dn-{}", i), NodeState::Active))
            .collect();

        let seen: HashSet<String> = (0..200).flat_map(|_| manager.choose(1, &nodes)).collect();
        assert!(seen.len() > 1);
    }
}
