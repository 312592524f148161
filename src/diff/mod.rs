//! Git-style diffs of a checkout against its commit
//!
//! Text files get unified hunks; binary files and symlinks are reported
//! by name only.

mod hunk;
mod lcs;

pub use hunk::{diff_lines, split_lines, DiffLine, Hunk, Line, LineKind, CONTEXT_LINES};
pub use lcs::{align, Edit};

use crate::error::Result;
use crate::overlay::OverlayEntry;
use crate::snapshot::{BackingStore, CommitSnapshot, EntryType, SnapshotEntry};
use crate::status::{self, FileStatus};
use std::collections::BTreeMap;
use std::fmt;

/// Bytes inspected when deciding whether content is binary
const BINARY_SNIFF_LEN: usize = 8000;

/// Content with a NUL byte near the start is treated as binary
pub fn is_binary(content: &[u8]) -> bool {
    content[..content.len().min(BINARY_SNIFF_LEN)].contains(&0)
}

/// Body of a file diff
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffBody {
    /// Line hunks; empty for mode-only changes and empty added files
    Text(Vec<Hunk>),
    /// Binary content, name only
    Binary,
    /// Symlink on either side, name only
    Symlink,
}

/// Diff block for one path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDiff {
    pub path: String,
    pub status: FileStatus,
    /// Git mode of the committed entry
    pub old_mode: Option<&'static str>,
    /// Git mode of the working-copy entry
    pub new_mode: Option<&'static str>,
    pub body: DiffBody,
}

impl FileDiff {
    /// Whether the block shows anything beyond its header. Permission
    /// changes that keep the git mode (0o644 to 0o600) show nothing.
    pub fn is_visible(&self) -> bool {
        match &self.body {
            DiffBody::Text(hunks) => {
                !hunks.is_empty()
                    || self.status != FileStatus::Modified
                    || self.old_mode != self.new_mode
            }
            DiffBody::Binary | DiffBody::Symlink => true,
        }
    }
}

impl fmt::Display for FileDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = &self.path;
        writeln!(f, "diff --git a/{} b/{}", path, path)?;

        match (self.status, self.old_mode, self.new_mode) {
            (FileStatus::Added, _, Some(mode)) => writeln!(f, "new file mode {}", mode)?,
            (FileStatus::Removed, Some(mode), _) => writeln!(f, "deleted file mode {}", mode)?,
            (_, Some(old), Some(new)) if old != new => {
                writeln!(f, "old mode {}", old)?;
                writeln!(f, "new mode {}", new)?;
            }
            _ => {}
        }

        match &self.body {
            DiffBody::Text(hunks) if !hunks.is_empty() => {
                let old_path = match self.status {
                    FileStatus::Added => "/dev/null".to_string(),
                    _ => format!("a/{}", path),
                };
                let new_path = match self.status {
                    FileStatus::Removed => "/dev/null".to_string(),
                    _ => format!("b/{}", path),
                };
                writeln!(f, "--- {}", old_path)?;
                writeln!(f, "+++ {}", new_path)?;
                for hunk in hunks {
                    write!(f, "{}", hunk)?;
                }
            }
            DiffBody::Text(_) | DiffBody::Symlink => {}
            DiffBody::Binary => writeln!(f, "Binary file {} has changed", path)?,
        }
        Ok(())
    }
}

/// Render a sequence of diff blocks as one text
pub fn render(diffs: &[FileDiff]) -> String {
    diffs.iter().map(|d| d.to_string()).collect()
}

fn body_for(old: &[u8], new: &[u8]) -> DiffBody {
    if is_binary(old) || is_binary(new) {
        return DiffBody::Binary;
    }
    DiffBody::Text(diff_lines(
        &String::from_utf8_lossy(old),
        &String::from_utf8_lossy(new),
    ))
}

/// Diff one changed path
fn diff_path(
    path: &str,
    file_status: FileStatus,
    committed: Option<&SnapshotEntry>,
    entry: Option<&OverlayEntry>,
    backing: &dyn BackingStore,
) -> Result<FileDiff> {
    let old_kind = committed.map(|c| c.kind);
    let new_kind = entry.and_then(|e| e.kind());

    let old_mode = committed.map(|c| c.kind.git_mode(c.mode));
    let new_mode = match (entry, new_kind) {
        (Some(e), Some(kind)) => Some(kind.git_mode(e.mode)),
        _ => None,
    };

    let symlink_involved =
        old_kind == Some(EntryType::Symlink) || new_kind == Some(EntryType::Symlink);

    let body = if symlink_involved {
        DiffBody::Symlink
    } else {
        let old = match committed {
            Some(c) => backing.blob(&c.hash)?,
            None => Vec::new(),
        };
        let new = entry.and_then(|e| e.content()).unwrap_or_default();
        body_for(&old, new)
    };

    Ok(FileDiff {
        path: path.to_string(),
        status: file_status,
        old_mode,
        new_mode,
        body,
    })
}

/// Diff every changed path of a checkout, in path order. Paths whose
/// change git cannot show are left out.
pub fn diff_checkout(
    snapshot: &CommitSnapshot,
    overlay: &BTreeMap<String, OverlayEntry>,
    backing: &dyn BackingStore,
) -> Result<Vec<FileDiff>> {
    let report = status::compute(snapshot, overlay);
    let mut diffs = Vec::new();
    for (path, file_status) in report.changed() {
        let diff = diff_path(
            path,
            file_status,
            snapshot.get(path),
            overlay.get(path),
            backing,
        )?;
        if diff.is_visible() {
            diffs.push(diff);
        }
    }
    Ok(diffs)
}
