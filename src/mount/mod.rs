//! Checkout lifecycle
//!
//! - State: `NOT_RUNNING -> INITIALIZING -> RUNNING -> SHUTTING_DOWN`
//! - Checkout: per-mount state machine, overlay attachment, edit surface
//! - Registry: path-keyed table of checkouts, persisted across restarts

mod checkout;
mod registry;
mod state;

pub use checkout::{FileContents, Mount};
pub use registry::{canonical_mount_path, CheckoutRecord, MountRegistry};
pub use state::MountState;
