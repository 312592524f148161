//! Local content-addressed store
//!
//! Read-only source of committed state for the checkout manager. Values
//! are split into key spaces, each a separate sled tree. The store is
//! thread safe; reads and writes may come from any thread.

use crate::error::{Error, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use super::commit::{CommitId, CommitSnapshot, ContentHash};

/// Source of committed trees and blob contents
pub trait BackingStore: Send + Sync {
    /// Load the snapshot of a commit
    fn snapshot(&self, commit: &CommitId) -> Result<Arc<CommitSnapshot>>;

    /// Load blob bytes by content hash
    fn blob(&self, hash: &ContentHash) -> Result<Vec<u8>>;
}

/// Key spaces of the local store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySpace {
    /// Blob contents keyed by content hash
    Blob,
    /// Serialized commit snapshots keyed by commit id
    Commit,
}

impl KeySpace {
    pub const ALL: [KeySpace; 2] = [KeySpace::Blob, KeySpace::Commit];

    fn tree_name(&self) -> &'static str {
        match self {
            KeySpace::Blob => "blob",
            KeySpace::Commit => "commit",
        }
    }
}

/// sled-backed local store
pub struct LocalStore {
    db: sled::Db,
    blobs: sled::Tree,
    commits: sled::Tree,
}

impl LocalStore {
    /// Open or create a store at `path`
    pub fn open(path: &Path) -> Result<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Store that is deleted when dropped
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self> {
        let blobs = db.open_tree(KeySpace::Blob.tree_name())?;
        let commits = db.open_tree(KeySpace::Commit.tree_name())?;
        Ok(Self { db, blobs, commits })
    }

    fn tree(&self, key_space: KeySpace) -> &sled::Tree {
        match key_space {
            KeySpace::Blob => &self.blobs,
            KeySpace::Commit => &self.commits,
        }
    }

    /// Get a value
    pub fn get(&self, key_space: KeySpace, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.tree(key_space).get(key)?.map(|v| v.to_vec()))
    }

    /// Check whether a key exists
    pub fn has_key(&self, key_space: KeySpace, key: &[u8]) -> Result<bool> {
        Ok(self.tree(key_space).contains_key(key)?)
    }

    /// Store a single value
    pub fn put(&self, key_space: KeySpace, key: &[u8], value: &[u8]) -> Result<()> {
        self.tree(key_space).insert(key, value)?;
        Ok(())
    }

    /// Drop every value in a key space
    pub fn clear_key_space(&self, key_space: KeySpace) -> Result<()> {
        debug!("Clearing key space {:?}", key_space);
        self.tree(key_space).clear()?;
        Ok(())
    }

    /// Start a batch of writes applied atomically per key space
    pub fn begin_write(&self) -> WriteBatch<'_> {
        WriteBatch {
            store: self,
            blobs: sled::Batch::default(),
            commits: sled::Batch::default(),
            pending: 0,
        }
    }

    /// Flush all pending writes to disk
    pub fn close(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

impl BackingStore for LocalStore {
    fn snapshot(&self, commit: &CommitId) -> Result<Arc<CommitSnapshot>> {
        let data = self
            .get(KeySpace::Commit, commit.as_str().as_bytes())?
            .ok_or_else(|| Error::SnapshotNotFound(commit.to_string()))?;
        Ok(Arc::new(CommitSnapshot::from_bytes(&data)?))
    }

    fn blob(&self, hash: &ContentHash) -> Result<Vec<u8>> {
        self.get(KeySpace::Blob, hash.as_str().as_bytes())?
            .ok_or_else(|| Error::BlobNotFound(hash.to_string()))
    }
}

/// Batched writes against a [`LocalStore`]
pub struct WriteBatch<'a> {
    store: &'a LocalStore,
    blobs: sled::Batch,
    commits: sled::Batch,
    pending: usize,
}

impl WriteBatch<'_> {
    /// Queue a value
    pub fn put(&mut self, key_space: KeySpace, key: &[u8], value: &[u8]) {
        match key_space {
            KeySpace::Blob => self.blobs.insert(key, value),
            KeySpace::Commit => self.commits.insert(key, value),
        }
        self.pending += 1;
    }

    /// Number of queued values
    pub fn len(&self) -> usize {
        self.pending
    }

    pub fn is_empty(&self) -> bool {
        self.pending == 0
    }

    /// Apply the queued writes. Blobs land before the commits that
    /// reference them.
    pub fn flush(self) -> Result<()> {
        let WriteBatch {
            store,
            blobs,
            commits,
            pending,
        } = self;
        store.blobs.apply_batch(blobs)?;
        store.commits.apply_batch(commits)?;
        debug!("Applied write batch of {} values", pending);
        Ok(())
    }
}
