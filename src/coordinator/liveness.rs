//! Data node liveness tracking
//!
//! Heartbeats only record a timestamp; state is derived from heartbeat age
//! when read. A node degrades ACTIVE → STALE → DEAD as silence grows and only
//! a new heartbeat brings it back.

use crate::common::{Config, NodeInfo, NodeState};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

/// Thresholds for classifying heartbeat age
#[derive(Debug, Clone, Copy)]
pub struct LivenessPolicy {
    pub interval: Duration,
    pub miss_threshold: u32,
    pub timeout: Duration,
}

impl LivenessPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval: config.heartbeat_interval(),
            miss_threshold: config.heartbeat_miss_threshold,
            timeout: config.heartbeat_timeout(),
        }
    }

    /// State implied by heartbeat age alone
    pub fn classify_age(&self, age: Duration) -> NodeState {
        if age < self.interval * self.miss_threshold {
            NodeState::Active
        } else if age < self.timeout {
            NodeState::Stale
        } else {
            NodeState::Dead
        }
    }
}

/// A registered data node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub node_id: String,
    pub host: String,
    pub port: u16,
    /// Unix millis
    pub last_heartbeat_at: u64,
    pub state: NodeState,
}

impl NodeRecord {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn to_info(&self) -> NodeInfo {
        NodeInfo {
            node_id: self.node_id.clone(),
            host: self.host.clone(),
            port: self.port,
            state: self.state,
        }
    }
}

/// A state change applied by a sweep
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub node_id: String,
    pub from: NodeState,
    pub to: NodeState,
}

/// Registry of data nodes and their heartbeats
pub struct LivenessTracker {
    policy: LivenessPolicy,
    nodes: RwLock<HashMap<String, NodeRecord>>,
}

impl LivenessTracker {
    pub fn new(policy: LivenessPolicy) -> Self {
        Self {
            policy,
            nodes: RwLock::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> LivenessPolicy {
        self.policy
    }

    /// Record a heartbeat. Returns true when the node was not known before.
    pub fn heartbeat(&self, node_id: &str, host: &str, port: u16, observed_at: u64) -> bool {
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        match nodes.get_mut(node_id) {
            Some(record) => {
                record.host = host.to_string();
                record.port = port;
                record.last_heartbeat_at = record.last_heartbeat_at.max(observed_at);
                if record.state != NodeState::Active {
                    tracing::info!("Node {} is back ({} -> ACTIVE)", node_id, record.state);
                }
                record.state = NodeState::Active;
                false
            }
            None => {
                tracing::info!("New data node registered: {} at {}:{}", node_id, host, port);
                nodes.insert(
                    node_id.to_string(),
                    NodeRecord {
                        node_id: node_id.to_string(),
                        host: host.to_string(),
                        port,
                        last_heartbeat_at: observed_at,
                        state: NodeState::Active,
                    },
                );
                true
            }
        }
    }

    /// Register a node from the static bootstrap list as if it had just reported
    pub fn register_static(&self, node_id: &str, host: &str, port: u16, now: u64) {
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        nodes.entry(node_id.to_string()).or_insert_with(|| NodeRecord {
            node_id: node_id.to_string(),
            host: host.to_string(),
            port,
            last_heartbeat_at: now,
            state: NodeState::Active,
        });
    }

    /// State of `record` at `now`; never better than the recorded state
    pub fn classify(&self, record: &NodeRecord, now: u64) -> NodeState {
        let age = Duration::from_millis(now.saturating_sub(record.last_heartbeat_at));
        self.policy.classify_age(age).max(record.state)
    }

    fn classified(&self, record: &NodeRecord, now: u64) -> NodeRecord {
        let mut snapshot = record.clone();
        snapshot.state = self.classify(record, now);
        snapshot
    }

    pub fn node(&self, node_id: &str, now: u64) -> Option<NodeRecord> {
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        nodes.get(node_id).map(|r| self.classified(r, now))
    }

    /// All nodes, classified at `now`, sorted by id
    pub fn nodes(&self, now: u64) -> Vec<NodeRecord> {
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<NodeRecord> = nodes.values().map(|r| self.classified(r, now)).collect();
        out.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        out
    }

    /// Nodes that may receive new replicas
    pub fn active_nodes(&self, now: u64) -> Vec<NodeRecord> {
        self.nodes(now)
            .into_iter()
            .filter(|r| r.state.is_healthy())
            .collect()
    }

    /// Persist degraded states and report what changed
    pub fn sweep(&self, now: u64) -> Vec<Transition> {
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        let mut transitions = Vec::new();
        for record in nodes.values_mut() {
            let next = self.classify(record, now);
            if next != record.state {
                transitions.push(Transition {
                    node_id: record.node_id.clone(),
                    from: record.state,
                    to: next,
                });
                record.state = next;
            }
        }
        transitions.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        transitions
    }

    pub fn len(&self) -> usize {
        self.nodes.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEC: u64 = 1000;

    fn tracker() -> LivenessTracker {
        LivenessTracker::new(LivenessPolicy {
            interval: Duration::from_secs(5),
            miss_threshold: 2,
            timeout: Duration::from_secs(20),
        })
    }

    #[test]
    fn test_classify_by_age() {
        let t = tracker();
        t.heartbeat("dn1", "h", 1, 100 * SEC);

        assert_eq!(t.node("dn1", 100 * SEC).unwrap().state, NodeState::Active);
        assert_eq!(t.node("dn1", 109 * SEC).unwrap().state, NodeState::Active);
        assert_eq!(t.node("dn1", 110 * SEC).unwrap().state, NodeState::Stale);
        assert_eq!(t.node("dn1", 119 * SEC).unwrap().state, NodeState::Stale);
        assert_eq!(t.node("dn1", 120 * SEC).unwrap().state, NodeState::Dead);
    }

    #[test]
    fn test_transitions_only_degrade_without_heartbeat() {
        let t = tracker();
        t.heartbeat("dn1", "h", 1, 0);

        let mut last = NodeState::Active;
        for now in (0..40).map(|s| s * SEC) {
            t.sweep(now);
            let state = t.node("dn1", now).unwrap().state;
            assert!(state >= last, "{} went back to {}", last, state);
            last = state;
        }
        assert_eq!(last, NodeState::Dead);

        // A sweep persisted DEAD; reading with an earlier clock does not revive it
        assert_eq!(t.node("dn1", 0).unwrap().state, NodeState::Dead);

        t.heartbeat("dn1", "h", 1, 41 * SEC);
        assert_eq!(t.node("dn1", 41 * SEC).unwrap().state, NodeState::Active);
    }

    #[test]
    fn test_sweep_reports_transitions() {
        let t = tracker();
        t.heartbeat("dn1", "h", 1, 0);
        t.heartbeat("dn2", "h", 2, 15 * SEC);

        let changes = t.sweep(16 * SEC);
        assert_eq!(
            changes,
            vec![Transition {
                node_id: "dn1".into(),
                from: NodeState::Active,
                to: NodeState::Stale,
            }]
        );
        assert!(t.sweep(16 * SEC).is_empty());

        let changes = t.sweep(30 * SEC);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].to, NodeState::Dead);
        assert_eq!(changes[1].to, NodeState::Stale);
    }

    #[test]
    fn test_active_nodes_excludes_stale_and_dead() {
        let t = tracker();
        t.heartbeat("fresh", "h", 1, 100 * SEC);
        t.heartbeat("stale", "h", 2, 88 * SEC);
        t.heartbeat("dead", "h", 3, 10 * SEC);

        let active: Vec<String> = t
            .active_nodes(100 * SEC)
            .into_iter()
            .map(|r| r.node_id)
            .collect();
        assert_eq!(active, vec!["fresh"]);
        assert_eq!(t.len(), 3);
    }

    #[test]
    fn test_heartbeat_updates_address_and_keeps_newest_time() {
        let t = tracker();
        assert!(t.heartbeat("dn1", "old-host", 1, 50 * SEC));
        assert!(!t.heartbeat("dn1", "new-host", 2, 40 * SEC));

        let record = t.node("dn1", 50 * SEC).unwrap();
        assert_eq!(record.addr(), "new-host:2");
        assert_eq!(record.last_heartbeat_at, 50 * SEC);
    }

    #[test]
    fn test_static_registration_decays() {
        let t = tracker();
        t.register_static("boot", "10.0.0.1", 9526, 0);
        t.register_static("boot", "ignored", 1, 0);

        assert_eq!(t.node("boot", 0).unwrap().host, "10.0.0.1");
        assert_eq!(t.node("boot", 25 * SEC).unwrap().state, NodeState::Dead);
    }

    #[test]
    fn test_concurrent_heartbeats() {
        let t = std::sync::Arc::new(tracker());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let t = t.clone();
                std::thread::spawn(move || {
                    for n in 0..100u64 {
                        t.heartbeat(&format!("dn{}", i), "h", 1, n * SEC);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let nodes = t.nodes(99 * SEC);
        assert_eq!(nodes.len(), 8);
        assert!(nodes.iter().all(|n| n.last_heartbeat_at == 99 * SEC));
        assert!(nodes.iter().all(|n| n.state == NodeState::Active));
    }
}
