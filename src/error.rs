//! Error types for checkoutfs

use std::path::PathBuf;
use thiserror::Error;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the checkout manager
#[derive(Error, Debug)]
pub enum Error {
    /// Mount requested for a checkout that is not `NOT_RUNNING`
    #[error("Checkout is already mounted: {0}")]
    AlreadyMounted(PathBuf),

    /// Operation requires a mounted checkout
    #[error("Checkout is not mounted: {0}")]
    NotMounted(PathBuf),

    /// Removal requested for a checkout that is still mounted
    #[error("Checkout is still mounted: {0}")]
    StillMounted(PathBuf),

    /// No checkout is registered at the path
    #[error("No checkout registered at {0}")]
    UnknownCheckout(PathBuf),

    /// A checkout is already registered at the path
    #[error("A checkout already exists at {0}")]
    CheckoutExists(PathBuf),

    /// Overlay or local store I/O failure
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Path is not a valid repository-relative path
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Path exists neither in the overlay nor in the snapshot
    #[error("Path not found: {0}")]
    PathNotFound(String),

    #[error("Snapshot not found for commit {0}")]
    SnapshotNotFound(String),

    #[error("Blob not found: {0}")]
    BlobNotFound(String),

    #[error("Invalid fault pattern '{pattern}': {reason}")]
    InvalidFaultPattern { pattern: String, reason: String },

    #[error("Fault injection is not enabled")]
    FaultInjectionDisabled,

    /// Raised by an error-kind fault definition
    #[error("Injected fault for {key_class}/{key_value}: {message}")]
    FaultInjected {
        key_class: String,
        key_value: String,
        message: String,
    },

    /// File handle was issued before the last unmount
    #[error("Stale file handle: {0}")]
    StaleHandle(u64),

    /// File handle was never issued or is already closed
    #[error("Bad file handle: {0}")]
    BadHandle(u64),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sled::Error> for Error {
    fn from(err: sled::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl Error {
    /// Whether this error is a lifecycle violation returned synchronously
    /// to the caller (never retried automatically)
    pub fn is_state_violation(&self) -> bool {
        matches!(
            self,
            Error::AlreadyMounted(_) | Error::NotMounted(_) | Error::StillMounted(_)
        )
    }
}
