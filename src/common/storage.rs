//! Local block persistence for data servers
//!
//! One file per block under the storage root, or an in-memory map for tests.
use crate::common::{Error, Result};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Trait for block storage backends
pub trait BlockStore: Send + Sync {
    /// Store a block durably, replacing any previous content
    fn put(&self, block_id: &str, data: &[u8]) -> Result<()>;

    /// Whole block content
    fn get(&self, block_id: &str) -> Result<Vec<u8>>;

    /// Exactly `length` bytes starting at `offset`
    fn get_range(&self, block_id: &str, offset: u64, length: u64) -> Result<Vec<u8>> {
        let data = self.get(block_id)?;
        let size = data.len() as u64;
        check_range(offset, length, size)?;
        Ok(data[offset as usize..(offset + length) as usize].to_vec())
    }

    /// Remove a block; removing a missing block is not an error
    fn delete(&self, block_id: &str) -> Result<()>;

    fn contains(&self, block_id: &str) -> bool;
}

fn check_range(offset: u64, length: u64, size: u64) -> Result<()> {
    match offset.checked_add(length) {
        Some(end) if end <= size => Ok(()),
        _ => Err(Error::InvalidRange {
            offset,
            length,
            size,
        }),
    }
}

/// Block ids become file names, so they must be plain tokens
fn validate_block_id(block_id: &str) -> Result<()> {
    let valid = !block_id.is_empty()
        && block_id.len() <= 128
        && block_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidPath(format!("invalid block id: {:?}", block_id)))
    }
}

/// In-memory store
pub struct MemBlockStore {
    map: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemBlockStore {
    pub fn new() -> Self {
        Self {
            map: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.map.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemBlockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockStore for MemBlockStore {
    fn put(&self, block_id: &str, data: &[u8]) -> Result<()> {
        validate_block_id(block_id)?;
        self.map
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(block_id.to_string(), data.to_vec());
        Ok(())
    }

    fn get(&self, block_id: &str) -> Result<Vec<u8>> {
        self.map
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(block_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("block {}", block_id)))
    }

    fn delete(&self, block_id: &str) -> Result<()> {
        self.map
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(block_id);
        Ok(())
    }

    fn contains(&self, block_id: &str) -> bool {
        self.map
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(block_id)
    }
}

/// Filesystem store: `<root>/<blockId>.blk`
pub struct FsBlockStore {
    root: PathBuf,
}

impl FsBlockStore {
    /// Open or create the storage root
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        tracing::info!("Block store opened at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn block_path(&self, block_id: &str) -> Result<PathBuf> {
        validate_block_id(block_id)?;
        Ok(self.root.join(format!("{}.blk", block_id)))
    }

    fn open_block(&self, block_id: &str) -> Result<File> {
        let path = self.block_path(block_id)?;
        File::open(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(format!("block {}", block_id)),
            _ => Error::Io(e),
        })
    }
}

impl BlockStore for FsBlockStore {
    fn put(&self, block_id: &str, data: &[u8]) -> Result<()> {
        let path = self.block_path(block_id)?;
        let tmp = self.root.join(format!("{}.tmp-{}", block_id, uuid::Uuid::new_v4()));

        let written = (|| -> std::io::Result<()> {
            let mut file = OpenOptions::new().write(true).create_new(true).open(&tmp)?;
            file.write_all(data)?;
            file.sync_all()?;
            fs::rename(&tmp, &path)
        })();

        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(Error::Io(e));
        }
        Ok(())
    }

    fn get(&self, block_id: &str) -> Result<Vec<u8>> {
        let mut file = self.open_block(block_id)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        Ok(data)
    }

    fn get_range(&self, block_id: &str, offset: u64, length: u64) -> Result<Vec<u8>> {
        let mut file = self.open_block(block_id)?;
        let size = file.metadata()?.len();
        check_range(offset, length, size)?;

        file.seek(SeekFrom::Start(offset))?;
        let mut data = vec![0u8; length as usize];
        file.read_exact(&mut data)?;
        Ok(data)
    }

    fn delete(&self, block_id: &str) -> Result<()> {
        let path = self.block_path(block_id)?;
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn contains(&self, block_id: &str) -> bool {
        self.block_path(block_id).map(|p| p.exists()).unwrap_or(false)
    }
}
