//! Working-copy status
//!
//! Classifies every path of the snapshot and the overlay relative to the
//! commit. The result depends only on the current overlay contents and
//! the snapshot, never on the order edits were made in.

use crate::overlay::OverlayEntry;
use crate::snapshot::{CommitId, CommitSnapshot, SnapshotEntry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Change classification of a path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileStatus {
    Modified,
    Added,
    Removed,
    Unchanged,
}

impl FileStatus {
    /// Single-letter status code
    pub fn code(&self) -> char {
        match self {
            FileStatus::Modified => 'M',
            FileStatus::Added => 'A',
            FileStatus::Removed => 'R',
            FileStatus::Unchanged => 'C',
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileStatus::Modified => "modified",
            FileStatus::Added => "added",
            FileStatus::Removed => "removed",
            FileStatus::Unchanged => "unchanged",
        };
        f.write_str(name)
    }
}

/// Classify one path from its snapshot entry and overlay entry.
/// `None` when the path exists in neither.
pub fn classify(
    snapshot: Option<&SnapshotEntry>,
    overlay: Option<&OverlayEntry>,
) -> Option<FileStatus> {
    match (snapshot, overlay) {
        (None, None) => None,
        (Some(_), None) => Some(FileStatus::Unchanged),
        (None, Some(entry)) if entry.is_removed() => None,
        (None, Some(_)) => Some(FileStatus::Added),
        (Some(_), Some(entry)) if entry.is_removed() => Some(FileStatus::Removed),
        (Some(committed), Some(entry)) if entry.matches(committed) => Some(FileStatus::Unchanged),
        (Some(_), Some(_)) => Some(FileStatus::Modified),
    }
}

/// Status of every path in a checkout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Commit the checkout is compared against
    pub commit: CommitId,
    entries: BTreeMap<String, FileStatus>,
}

impl StatusReport {
    /// Status of one path
    pub fn get(&self, path: &str) -> Option<FileStatus> {
        self.entries.get(path).copied()
    }

    /// All paths in order
    pub fn iter(&self) -> impl Iterator<Item = (&str, FileStatus)> {
        self.entries.iter().map(|(p, s)| (p.as_str(), *s))
    }

    /// Paths that differ from the commit
    pub fn changed(&self) -> impl Iterator<Item = (&str, FileStatus)> {
        self.iter().filter(|(_, s)| *s != FileStatus::Unchanged)
    }

    /// Changed paths with their status codes, as `hg status` reports them
    pub fn changed_codes(&self) -> BTreeMap<String, char> {
        self.changed()
            .map(|(p, s)| (p.to_string(), s.code()))
            .collect()
    }

    /// No path differs from the commit
    pub fn is_clean(&self) -> bool {
        self.changed().next().is_none()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_map(self) -> BTreeMap<String, FileStatus> {
        self.entries
    }
}

/// Compute the status of a checkout
pub fn compute(snapshot: &CommitSnapshot, overlay: &BTreeMap<String, OverlayEntry>) -> StatusReport {
    let mut entries = BTreeMap::new();

    for (path, committed) in snapshot.entries() {
        if let Some(status) = classify(Some(committed), overlay.get(path)) {
            entries.insert(path.clone(), status);
        }
    }

    for (path, entry) in overlay {
        if snapshot.contains(path) {
            continue;
        }
        if let Some(status) = classify(None, Some(entry)) {
            entries.insert(path.clone(), status);
        }
    }

    StatusReport {
        commit: snapshot.commit.clone(),
        entries,
    }
}
