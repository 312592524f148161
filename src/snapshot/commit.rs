//! Commit snapshots
//!
//! A snapshot is the immutable path -> (content hash, mode) mapping of a
//! commit. Contents live in the backing store, addressed by BLAKE3 hash.

use crate::error::{Error, Result};
use crate::path;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::store::{KeySpace, LocalStore};

/// Commit identifier as supplied by the version-control backend
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommitId(String);

impl CommitId {
    pub fn new(id: impl Into<String>) -> Self {
        CommitId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// BLAKE3 hash of blob content, hex encoded
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentHash(String);

impl ContentHash {
    /// Hash blob content
    pub fn of(content: &[u8]) -> Self {
        ContentHash(blake3::hash(content).to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Permission bits kept in entry modes
pub const PERMISSION_BITS: u32 = 0o7777;

/// Kind of a tracked entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryType {
    /// Regular file
    Regular,
    /// Symbolic link; content is the link target
    Symlink,
}

impl EntryType {
    /// Mode string as printed in git-style diff headers
    pub fn git_mode(&self, mode: u32) -> &'static str {
        match self {
            EntryType::Symlink => "120000",
            EntryType::Regular if mode & 0o111 != 0 => "100755",
            EntryType::Regular => "100644",
        }
    }
}

/// A single path in a commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    /// Content hash of the file bytes or symlink target
    pub hash: ContentHash,
    /// POSIX permission bits
    pub mode: u32,
    /// Entry kind
    pub kind: EntryType,
}

/// Immutable view of a commit's tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitSnapshot {
    /// Commit this snapshot was taken from
    pub commit: CommitId,
    entries: BTreeMap<String, SnapshotEntry>,
}

impl CommitSnapshot {
    /// Empty snapshot for a commit
    pub fn empty(commit: CommitId) -> Self {
        CommitSnapshot {
            commit,
            entries: BTreeMap::new(),
        }
    }

    /// Look up a path
    pub fn get(&self, path: &str) -> Option<&SnapshotEntry> {
        self.entries.get(path)
    }

    /// Whether the path exists in the commit
    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// All entries in path order
    pub fn entries(&self) -> impl Iterator<Item = (&String, &SnapshotEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialize for storage in the commit key space
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize from the commit key space
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data).map_err(|e| Error::Deserialization(e.to_string()))
    }
}

/// Builds a commit and writes it, with its blobs, into a [`LocalStore`]
pub struct SnapshotBuilder {
    snapshot: CommitSnapshot,
    blobs: Vec<(ContentHash, Vec<u8>)>,
}

impl SnapshotBuilder {
    pub fn new(commit: impl Into<String>) -> Self {
        SnapshotBuilder {
            snapshot: CommitSnapshot::empty(CommitId::new(commit)),
            blobs: Vec::new(),
        }
    }

    /// Add a regular file
    pub fn file(self, path: &str, content: impl AsRef<[u8]>, mode: u32) -> Result<Self> {
        self.add(path, content.as_ref(), mode, EntryType::Regular)
    }

    /// Add a symlink pointing at `target`
    pub fn symlink(self, path: &str, target: &str) -> Result<Self> {
        self.add(path, target.as_bytes(), 0o777, EntryType::Symlink)
    }

    fn add(mut self, path: &str, content: &[u8], mode: u32, kind: EntryType) -> Result<Self> {
        let path = path::normalize(path)?;
        let hash = ContentHash::of(content);
        self.blobs.push((hash.clone(), content.to_vec()));
        // file type bits (e.g. git's 0o100644) are carried by `kind`
        let mode = mode & PERMISSION_BITS;
        self.snapshot
            .entries
            .insert(path, SnapshotEntry { hash, mode, kind });
        Ok(self)
    }

    /// Write blobs and the commit manifest in a single batch
    pub fn commit(self, store: &LocalStore) -> Result<CommitId> {
        let mut batch = store.begin_write();
        for (hash, content) in &self.blobs {
            batch.put(KeySpace::Blob, hash.as_str().as_bytes(), content);
        }
        let manifest = self.snapshot.to_bytes()?;
        batch.put(
            KeySpace::Commit,
            self.snapshot.commit.as_str().as_bytes(),
            &manifest,
        );
        batch.flush()?;
        Ok(self.snapshot.commit)
    }
}
