//! Namespace tree of the metadata server
//!
//! Entries live in an arena keyed by their normalized path. Parent and child
//! links are path keys, never references. One store-wide lock makes each
//! mutation, including the implicit creation of missing ancestors, atomic.

use crate::common::utils::{ancestors, file_name, is_within, parent_path};
use crate::common::{
    normalize_path, timestamp_now_millis, Error, ReplicaLocation, ReplicaState, Result,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// One file or directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathEntry {
    pub path: String,
    pub name: String,
    pub is_directory: bool,
    pub owner: String,
    pub size_bytes: u64,
    /// Unix millis
    pub created_at: u64,
    /// Stable across renames
    pub file_id: String,
    pub parent_path: Option<String>,
    /// Direct children in insertion order
    pub child_paths: Vec<String>,
    /// Replica list, primary first; empty for directories
    pub locations: Vec<ReplicaLocation>,
    pub replica_state: HashMap<ReplicaLocation, ReplicaState>,
}

impl PathEntry {
    fn new(
        path: &str,
        owner: &str,
        is_directory: bool,
        created_at: u64,
        locations: Vec<ReplicaLocation>,
    ) -> Self {
        let locations = if is_directory { Vec::new() } else { locations };
        let replica_state = locations
            .iter()
            .map(|l| (l.clone(), ReplicaState::Pending))
            .collect();

        Self {
            path: path.to_string(),
            name: file_name(path).to_string(),
            is_directory,
            owner: owner.to_string(),
            size_bytes: 0,
            created_at,
            file_id: uuid::Uuid::new_v4().to_string(),
            parent_path: parent_path(path).map(str::to_string),
            child_paths: Vec::new(),
            locations,
            replica_state,
        }
    }

    /// Replica state for a location; locations without a record are pending
    pub fn state_of(&self, location: &ReplicaLocation) -> ReplicaState {
        self.replica_state
            .get(location)
            .copied()
            .unwrap_or(ReplicaState::Pending)
    }

    /// Locations whose replica is not known to be lost
    pub fn live_locations(&self) -> Vec<ReplicaLocation> {
        self.locations
            .iter()
            .filter(|l| self.state_of(l) != ReplicaState::Lost)
            .cloned()
            .collect()
    }
}

#[derive(Debug, Default)]
struct Tree {
    entries: HashMap<String, PathEntry>,
    by_file_id: HashMap<String, String>,
}

impl Tree {
    /// Insert an entry whose parent exists, linking it into the parent
    fn insert_child(&mut self, entry: PathEntry) {
        if let Some(parent) = entry
            .parent_path
            .as_ref()
            .and_then(|p| self.entries.get_mut(p))
        {
            if !parent.child_paths.contains(&entry.path) {
                parent.child_paths.push(entry.path.clone());
            }
        }
        self.by_file_id
            .insert(entry.file_id.clone(), entry.path.clone());
        self.entries.insert(entry.path.clone(), entry);
    }

    fn detach_from_parent(&mut self, path: &str) {
        if let Some(parent) = parent_path(path).and_then(|p| self.entries.get_mut(p)) {
            parent.child_paths.retain(|c| c != path);
        }
    }

    fn subtree_paths(&self, root: &str) -> Vec<String> {
        self.entries
            .keys()
            .filter(|p| is_within(p, root))
            .cloned()
            .collect()
    }
}

/// The path tree
pub struct NamespaceStore {
    tree: RwLock<Tree>,
}

impl NamespaceStore {
    /// Empty tree holding only `/`, owned by `root_owner`
    pub fn new(root_owner: &str) -> Self {
        let mut tree = Tree::default();
        let root = PathEntry::new("/", root_owner, true, timestamp_now_millis(), Vec::new());
        tree.insert_child(root);
        Self {
            tree: RwLock::new(tree),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Tree> {
        self.tree.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tree> {
        self.tree.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a file or directory; missing ancestors become directories owned by `owner`
    pub fn create(&self, path: &str, owner: &str, is_directory: bool) -> Result<PathEntry> {
        self.create_with_locations(path, owner, is_directory, Vec::new())
    }

    /// Create an entry with its replica placement attached in the same step
    pub fn create_with_locations(
        &self,
        path: &str,
        owner: &str,
        is_directory: bool,
        locations: Vec<ReplicaLocation>,
    ) -> Result<PathEntry> {
        let path = normalize_path(path)?;
        let mut tree = self.write();

        if tree.entries.contains_key(&path) {
            return Err(Error::AlreadyExists(path));
        }

        let missing: Vec<String> = ancestors(&path)
            .into_iter()
            .map(|anc| match tree.entries.get(anc) {
                Some(e) if !e.is_directory => Err(Error::InvalidPath(format!(
                    "{} is not a directory",
                    anc
                ))),
                Some(_) => Ok(None),
                None => Ok(Some(anc.to_string())),
            })
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .flatten()
            .collect();

        let now = timestamp_now_millis();
        for dir in missing {
            tracing::debug!("Implicitly creating directory {} for {}", dir, owner);
            tree.insert_child(PathEntry::new(&dir, owner, true, now, Vec::new()));
        }

        let entry = PathEntry::new(&path, owner, is_directory, now, locations);
        tree.insert_child(entry.clone());

        tracing::info!(
            "{} {} created by {}",
            if is_directory { "Directory" } else { "File" },
            path,
            owner
        );
        Ok(entry)
    }

    pub fn get(&self, path: &str) -> Result<PathEntry> {
        let path = normalize_path(path)?;
        self.read()
            .entries
            .get(&path)
            .cloned()
            .ok_or(Error::NotFound(path))
    }

    pub fn get_by_file_id(&self, file_id: &str) -> Result<PathEntry> {
        let tree = self.read();
        tree.by_file_id
            .get(file_id)
            .and_then(|p| tree.entries.get(p))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("file id {}", file_id)))
    }

    pub fn exists(&self, path: &str) -> bool {
        normalize_path(path)
            .map(|p| self.read().entries.contains_key(&p))
            .unwrap_or(false)
    }

    /// Move an entry (and its subtree) to a new path
    pub fn rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        let old = normalize_path(old_path)?;
        let new = normalize_path(new_path)?;
        if old == "/" {
            return Err(Error::InvalidPath("cannot rename /".into()));
        }

        let mut tree = self.write();
        if !tree.entries.contains_key(&old) {
            return Err(Error::NotFound(old));
        }
        if tree.entries.contains_key(&new) {
            return Err(Error::AlreadyExists(new));
        }
        if is_within(&new, &old) {
            return Err(Error::InvalidPath(format!("cannot move {} beneath itself", old)));
        }

        let new_parent = parent_path(&new).unwrap_or("/").to_string();
        match tree.entries.get(&new_parent) {
            None => return Err(Error::NotFound(new_parent)),
            Some(p) if !p.is_directory => {
                return Err(Error::InvalidPath(format!("{} is not a directory", new_parent)))
            }
            Some(_) => {}
        }

        tree.detach_from_parent(&old);

        let rebase = |p: &str| format!("{}{}", new, &p[old.len()..]);
        let moved: Vec<PathEntry> = tree
            .subtree_paths(&old)
            .into_iter()
            .filter_map(|p| tree.entries.remove(&p))
            .collect();

        for mut entry in moved {
            let moved_path = rebase(&entry.path);
            entry.parent_path = if entry.path == old {
                Some(new_parent.clone())
            } else {
                entry.parent_path.as_deref().map(rebase)
            };
            entry.child_paths = entry.child_paths.iter().map(|c| rebase(c)).collect();
            entry.name = file_name(&moved_path).to_string();
            entry.path = moved_path.clone();
            tree.by_file_id.insert(entry.file_id.clone(), moved_path.clone());
            tree.entries.insert(moved_path, entry);
        }

        if let Some(parent) = tree.entries.get_mut(&new_parent) {
            parent.child_paths.push(new.clone());
        }

        tracing::info!("Renamed {} to {}", old, new);
        Ok(())
    }

    /// Remove an entry and everything beneath it; only the owner may delete.
    /// Returns the removed entries.
    pub fn delete(&self, path: &str, requester: &str) -> Result<Vec<PathEntry>> {
        let path = normalize_path(path)?;
        if path == "/" {
            return Err(Error::InvalidPath("cannot delete /".into()));
        }

        let mut tree = self.write();
        let owner = match tree.entries.get(&path) {
            Some(e) => e.owner.clone(),
            None => return Err(Error::NotFound(path)),
        };
        if owner != requester {
            return Err(Error::PermissionDenied(format!(
                "{} is not the owner of {}",
                requester, path
            )));
        }

        tree.detach_from_parent(&path);
        let mut removed: Vec<PathEntry> = tree
            .subtree_paths(&path)
            .into_iter()
            .filter_map(|p| tree.entries.remove(&p))
            .collect();
        for entry in &removed {
            tree.by_file_id.remove(&entry.file_id);
        }
        removed.sort_by(|a, b| a.path.cmp(&b.path));

        tracing::info!("{} deleted by {} ({} entries)", path, requester, removed.len());
        Ok(removed)
    }

    /// Names of direct children, in insertion order
    pub fn list_children(&self, path: &str) -> Result<Vec<String>> {
        let path = normalize_path(path)?;
        let tree = self.read();
        let entry = tree.entries.get(&path).ok_or(Error::NotFound(path))?;
        Ok(entry
            .child_paths
            .iter()
            .map(|c| file_name(c).to_string())
            .collect())
    }

    /// Record the outcome of one replica write
    pub fn update_replica(
        &self,
        file_id: &str,
        location: &ReplicaLocation,
        state: ReplicaState,
        size: Option<u64>,
    ) -> Result<()> {
        let mut tree = self.write();
        let path = tree
            .by_file_id
            .get(file_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("file id {}", file_id)))?;
        let entry = tree
            .entries
            .get_mut(&path)
            .ok_or_else(|| Error::NotFound(path.clone()))?;

        if !entry.locations.contains(location) {
            return Err(Error::NotFound(format!("replica {} of {}", location, path)));
        }
        entry.replica_state.insert(location.clone(), state);
        if let (ReplicaState::Confirmed, Some(size)) = (state, size) {
            entry.size_bytes = size;
        }

        tracing::debug!("Replica {} of {} is now {}", location, path, state);
        Ok(())
    }

    /// Mark every replica held by `node_id` as lost; returns how many changed.
    ///
    /// The scan runs under the read lock; the write lock is held only to flip
    /// the replicas it found.
    pub fn mark_node_lost(&self, node_id: &str) -> usize {
        let found: Vec<(String, ReplicaLocation)> = {
            let tree = self.read();
            tree.entries
                .values()
                .flat_map(|entry| {
                    entry
                        .locations
                        .iter()
                        .filter(|l| l.node_id == node_id && entry.state_of(l) != ReplicaState::Lost)
                        .map(|l| (entry.path.clone(), l.clone()))
                })
                .collect()
        };
        if found.is_empty() {
            return 0;
        }

        let mut tree = self.write();
        let mut changed = 0;
        for (path, location) in found {
            // Renamed or deleted since the scan
            let Some(entry) = tree.entries.get_mut(&path) else {
                continue;
            };
            if !entry.locations.contains(&location) {
                continue;
            }
            let previous = entry
                .replica_state
                .insert(location, ReplicaState::Lost);
            if previous != Some(ReplicaState::Lost) {
                changed += 1;
            }
        }
        changed
    }

    /// Number of entries, root included
    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every entry, sorted by path
    pub fn snapshot(&self) -> Vec<PathEntry> {
        let mut entries: Vec<PathEntry> = self.read().entries.values().cloned().collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        entries
    }
}
