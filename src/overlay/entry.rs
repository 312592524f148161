//! Overlay entries
//!
//! An entry records how one path in the working copy differs from the
//! commit snapshot: new file content, a new symlink target, or removal.

use crate::error::{Error, Result};
use crate::snapshot::{ContentHash, EntryType, SnapshotEntry, PERMISSION_BITS};
use serde::{Deserialize, Serialize};

/// Working-copy state of a path that differs from the snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverlayData {
    /// Materialized regular file
    File(Vec<u8>),
    /// Symlink target
    Symlink(String),
    /// Tombstone for a path deleted from the working copy
    Removed,
}

/// Overlay entry for one path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayEntry {
    /// Content or tombstone
    pub data: OverlayData,
    /// POSIX permission bits
    pub mode: u32,
    /// Written since the last flush
    #[serde(skip)]
    pub dirty: bool,
}

impl OverlayEntry {
    /// Regular file entry
    pub fn file(content: Vec<u8>, mode: u32) -> Self {
        OverlayEntry {
            data: OverlayData::File(content),
            mode: mode & PERMISSION_BITS,
            dirty: false,
        }
    }

    /// Symlink entry
    pub fn symlink(target: String) -> Self {
        OverlayEntry {
            data: OverlayData::Symlink(target),
            mode: 0o777,
            dirty: false,
        }
    }

    /// Removal tombstone
    pub fn removed() -> Self {
        OverlayEntry {
            data: OverlayData::Removed,
            mode: 0,
            dirty: false,
        }
    }

    pub fn is_removed(&self) -> bool {
        matches!(self.data, OverlayData::Removed)
    }

    /// Entry kind, `None` for tombstones
    pub fn kind(&self) -> Option<EntryType> {
        match self.data {
            OverlayData::File(_) => Some(EntryType::Regular),
            OverlayData::Symlink(_) => Some(EntryType::Symlink),
            OverlayData::Removed => None,
        }
    }

    /// File bytes or symlink target bytes
    pub fn content(&self) -> Option<&[u8]> {
        match &self.data {
            OverlayData::File(content) => Some(content),
            OverlayData::Symlink(target) => Some(target.as_bytes()),
            OverlayData::Removed => None,
        }
    }

    /// Whether this entry reproduces the snapshot entry exactly.
    /// Symlink permission bits are not compared.
    pub fn matches(&self, entry: &SnapshotEntry) -> bool {
        let (Some(kind), Some(content)) = (self.kind(), self.content()) else {
            return false;
        };
        if kind != entry.kind {
            return false;
        }
        if kind == EntryType::Regular
            && self.mode & PERMISSION_BITS != entry.mode & PERMISSION_BITS
        {
            return false;
        }
        ContentHash::of(content) == entry.hash
    }

    /// Serialize for the overlay tree
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize from the overlay tree
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data).map_err(|e| Error::Deserialization(e.to_string()))
    }
}
