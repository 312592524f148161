//! Overlay storage for checkoutfs
//!
//! The overlay holds local edits that are not part of the commit:
//! - Entries: materialized files, new symlink targets, removal tombstones
//! - Store: sled database per checkout, kept across unmount/remount
//! - Handles: open file accounting for safe unmount

mod entry;
mod handle;
mod store;

pub use entry::{OverlayData, OverlayEntry};
pub use handle::{FileHandle, HandleManager};
pub use store::OverlayStore;
