//! Persistent overlay store
//!
//! One sled database per checkout, one record per path that differs
//! from the snapshot. Records are keyed by the normalised relative path.
//! The store outlives mounts: reopening the same directory after an
//! unmount yields exactly the records present before it.

use crate::error::{Error, Result};
use crate::path;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::entry::OverlayEntry;

const ENTRIES_TREE: &str = "entries";

/// Durable path-indexed store of working-copy deltas
pub struct OverlayStore {
    /// Directory of the sled database
    dir: PathBuf,
    db: sled::Db,
    entries: sled::Tree,
    /// Paths written since the last successful flush
    dirty: Mutex<HashSet<String>>,
}

impl OverlayStore {
    /// Open or create the overlay at `dir`
    pub fn open(dir: &Path, cache_capacity: u64) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .map_err(|e| Error::Storage(format!("Failed to create overlay dir {:?}: {}", dir, e)))?;

        let db = sled::Config::new()
            .path(dir)
            .cache_capacity(cache_capacity)
            .open()?;
        let entries = db.open_tree(ENTRIES_TREE)?;

        debug!("Opened overlay at {:?} ({} entries)", dir, entries.len());

        Ok(Self {
            dir: dir.to_path_buf(),
            db,
            entries,
            dirty: Mutex::new(HashSet::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn put(&self, path: &str, entry: &OverlayEntry) -> Result<()> {
        let key = path::normalize(path)?;
        let value = entry.to_bytes()?;
        self.entries.insert(key.as_bytes(), value)?;
        self.dirty.lock().insert(key);
        Ok(())
    }

    /// Upsert file content for a path
    pub fn write(&self, path: &str, content: &[u8], mode: u32) -> Result<()> {
        self.put(path, &OverlayEntry::file(content.to_vec(), mode))
    }

    /// Upsert a symlink target for a path
    pub fn write_symlink(&self, path: &str, target: &str) -> Result<()> {
        self.put(path, &OverlayEntry::symlink(target.to_string()))
    }

    /// Record a tombstone for a path deleted from the working copy
    pub fn mark_removed(&self, path: &str) -> Result<()> {
        self.put(path, &OverlayEntry::removed())
    }

    /// Entry for a path, `None` meaning "defer to the snapshot"
    pub fn read(&self, path: &str) -> Result<Option<OverlayEntry>> {
        let key = path::normalize(path)?;
        let Some(value) = self.entries.get(key.as_bytes())? else {
            return Ok(None);
        };
        let mut entry = OverlayEntry::from_bytes(&value)?;
        entry.dirty = self.dirty.lock().contains(&key);
        Ok(Some(entry))
    }

    /// Drop the entry for a path. Returns whether one existed.
    pub fn delete(&self, path: &str) -> Result<bool> {
        let key = path::normalize(path)?;
        let existed = self.entries.remove(key.as_bytes())?.is_some();
        if existed {
            self.dirty.lock().insert(key);
        }
        Ok(existed)
    }

    /// Consistent view of all entries in path order
    pub fn entries(&self) -> Result<BTreeMap<String, OverlayEntry>> {
        let dirty = self.dirty.lock().clone();
        let mut result = BTreeMap::new();
        for item in self.entries.iter() {
            let (key, value) = item?;
            let path = String::from_utf8(key.to_vec())
                .map_err(|e| Error::Deserialization(format!("Overlay key is not UTF-8: {}", e)))?;
            let mut entry = OverlayEntry::from_bytes(&value)?;
            entry.dirty = dirty.contains(&path);
            result.insert(path, entry);
        }
        Ok(result)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of paths written since the last flush
    pub fn dirty_count(&self) -> usize {
        self.dirty.lock().len()
    }

    /// Make every write issued before this call durable. Writers are not
    /// paused; writes racing with the flush stay dirty for the next one.
    pub fn flush(&self) -> Result<usize> {
        let pending = std::mem::take(&mut *self.dirty.lock());
        let count = pending.len();

        if let Err(e) = self.db.flush() {
            warn!("Overlay flush failed at {:?}: {}", self.dir, e);
            self.dirty.lock().extend(pending);
            return Err(e.into());
        }

        if count > 0 {
            debug!("Flushed {} overlay entries at {:?}", count, self.dir);
        }
        Ok(count)
    }

    /// Delete an overlay directory. The store must not be open.
    pub fn destroy(dir: &Path) -> Result<()> {
        if dir.exists() {
            std::fs::remove_dir_all(dir).map_err(|e| {
                Error::Storage(format!("Failed to delete overlay {:?}: {}", dir, e))
            })?;
            info!("Deleted overlay at {:?}", dir);
        }
        Ok(())
    }
}
