//! Commit snapshots and the content-addressed store backing them
//!
//! Snapshots are read-only: the checkout manager never mutates committed
//! state, it only compares the overlay against it.

mod commit;
mod store;

pub use commit::{
    CommitId, CommitSnapshot, ContentHash, EntryType, SnapshotBuilder, SnapshotEntry,
    PERMISSION_BITS,
};
pub use store::{BackingStore, KeySpace, LocalStore, WriteBatch};
