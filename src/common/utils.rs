//! Utility functions for minidfs

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp (milliseconds)
pub fn timestamp_now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_idx])
}

/// Liveness state of a data node.
///
/// Ordered from healthiest to worst, so `max` picks the more degraded state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeState {
    Active,
    Stale,
    Dead,
}

impl NodeState {
    /// Can this node receive new replicas?
    pub fn is_healthy(&self) -> bool {
        matches!(self, NodeState::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeState::Active => "ACTIVE",
            NodeState::Stale => "STALE",
            NodeState::Dead => "DEAD",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(NodeState::Active),
            "STALE" => Some(NodeState::Stale),
            "DEAD" => Some(NodeState::Dead),
            _ => None,
        }
    }
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalize an absolute namespace path.
///
/// Repeated separators collapse and a trailing separator is dropped.
/// Relative paths and `.`/`..` components are rejected.
pub fn normalize_path(path: &str) -> crate::Result<String> {
    if !path.starts_with('/') {
        return Err(crate::Error::InvalidPath(format!("path must be absolute: {:?}", path)));
    }

    let mut normalized = String::with_capacity(path.len());
    for component in path.split('/').filter(|c| !c.is_empty()) {
        if component == "." || component == ".." {
            return Err(crate::Error::InvalidPath(format!(
                "relative component in {:?}",
                path
            )));
        }
        if component.chars().any(|c| c.is_control()) {
            return Err(crate::Error::InvalidPath(format!(
                "control character in {:?}",
                path
            )));
        }
        normalized.push('/');
        normalized.push_str(component);
    }

    if normalized.is_empty() {
        normalized.push('/');
    }
    Ok(normalized)
}

/// Parent of a normalized path; `None` for the root
pub fn parent_path(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Last component of a normalized path (`/` for the root)
pub fn file_name(path: &str) -> &str {
    if path == "/" {
        return "/";
    }
    path.rsplit('/').next().unwrap_or(path)
}

/// Ancestors of a normalized path, nearest to the root first, excluding `/`
/// and the path itself.
pub fn ancestors(path: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut current = parent_path(path);
    while let Some(p) = current {
        if p == "/" {
            break;
        }
        out.push(p);
        current = parent_path(p);
    }
    out.reverse();
    out
}

/// Is `path` equal to `dir` or located beneath it?
pub fn is_within(path: &str, dir: &str) -> bool {
    if dir == "/" {
        return true;
    }
    path == dir || (path.starts_with(dir) && path.as_bytes().get(dir.len()) == Some(&b'/'))
}
