//! Mount lifecycle states

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a mount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MountState {
    /// Registered but not mounted; the overlay is closed
    #[default]
    NotRunning,
    /// Mount in progress, possibly held by a fault
    Initializing,
    /// Mounted and serving edits
    Running,
    /// Unmount in progress, or stuck after a failed flush
    ShuttingDown,
}

impl MountState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MountState::NotRunning => "NOT_RUNNING",
            MountState::Initializing => "INITIALIZING",
            MountState::Running => "RUNNING",
            MountState::ShuttingDown => "SHUTTING_DOWN",
        }
    }

    /// Whether an unmount may start from this state
    pub fn can_unmount(&self) -> bool {
        !matches!(self, MountState::NotRunning)
    }
}

impl fmt::Display for MountState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
