//! checkoutfs - Checkout manager for virtual source-control mounts
//!
//! This library manages the lifecycle of checkouts projected into the
//! filesystem, persists their local edits in a per-checkout overlay that
//! survives unmount and restart, and reports status and git-style diffs
//! of the working copy against the commit it was checked out from.

pub mod config;
pub mod diff;
pub mod error;
pub mod fault;
pub mod mount;
pub mod overlay;
pub mod path;
pub mod service;
pub mod snapshot;
pub mod status;

pub use config::Config;
pub use error::{Error, Result};
pub use service::CheckoutService;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::fault::{FaultDefinition, FaultKind};
    pub use crate::mount::{Mount, MountState};
    pub use crate::service::CheckoutService;
    pub use crate::snapshot::{CommitId, LocalStore, SnapshotBuilder};
    pub use crate::status::{FileStatus, StatusReport};
}
