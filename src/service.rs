//! Control surface of the checkout manager
//!
//! [`CheckoutService`] owns the fault table and the mount registry. It is
//! constructed once per process and shared by reference with whatever
//! front end (CLI, RPC) drives it.

use crate::config::Config;
use crate::diff::FileDiff;
use crate::error::{Error, Result};
use crate::fault::{FaultDefinition, FaultInjector};
use crate::mount::{Mount, MountRegistry, MountState};
use crate::snapshot::{BackingStore, CommitId};
use crate::status::StatusReport;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

pub struct CheckoutService {
    config: Arc<Config>,
    backing: Arc<dyn BackingStore>,
    faults: Arc<FaultInjector>,
    registry: MountRegistry,
}

impl CheckoutService {
    /// Validate the configuration, create the data directories and reload
    /// persisted checkouts
    pub fn open(config: Config, backing: Arc<dyn BackingStore>) -> Result<Self> {
        config.validate()?;
        config.ensure_directories()?;

        let config = Arc::new(config);
        let faults = Arc::new(FaultInjector::new(config.fault_injection.enabled));
        let registry = MountRegistry::open(config.clone(), backing.clone(), faults.clone())?;

        info!(
            "Checkout service started in {:?} ({} checkouts, fault injection {})",
            config.data_dir,
            registry.len(),
            if faults.is_enabled() { "on" } else { "off" }
        );

        Ok(CheckoutService {
            config,
            backing,
            faults,
            registry,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Register a checkout of `commit` at `path` and mount it
    pub async fn clone_checkout(&self, path: &Path, commit: CommitId) -> Result<Arc<Mount>> {
        self.backing.snapshot(&commit)?;
        let mount = self.registry.register(path, commit)?;
        mount.mount().await?;
        Ok(mount)
    }

    /// Mount a registered checkout
    pub async fn mount(&self, path: &Path) -> Result<()> {
        self.registry.get(path)?.mount().await
    }

    pub async fn unmount(&self, path: &Path) -> Result<()> {
        self.registry.get(path)?.unmount().await
    }

    /// Remove an unmounted checkout and its overlay
    pub async fn remove(&self, path: &Path) -> Result<()> {
        self.registry.remove(path, false).await
    }

    /// Remove a checkout whatever its state, without flushing
    pub async fn force_remove(&self, path: &Path) -> Result<()> {
        self.registry.remove(path, true).await
    }

    pub fn list_mounts(&self) -> BTreeMap<PathBuf, MountState> {
        self.registry.list()
    }

    pub fn mount_state(&self, path: &Path) -> Result<MountState> {
        Ok(self.registry.get(path)?.state())
    }

    /// Registered checkout, for the working-copy edit surface
    pub fn checkout(&self, path: &Path) -> Result<Arc<Mount>> {
        self.registry.get(path)
    }

    pub fn get_status(&self, path: &Path) -> Result<StatusReport> {
        self.registry.get(path)?.status()
    }

    pub fn get_diff(&self, path: &Path) -> Result<Vec<FileDiff>> {
        self.registry.get(path)?.diff()
    }

    pub fn inject_fault(&self, definition: FaultDefinition) -> Result<()> {
        self.faults.inject(definition)
    }

    /// Drop a fault and release the transitions it holds
    pub fn unblock_fault(&self, key_class: &str, key_value_regex: &str) -> Result<usize> {
        self.faults.unblock(key_class, key_value_regex)
    }

    pub fn remove_fault(&self, key_class: &str, key_value_regex: &str) -> bool {
        self.faults.remove(key_class, key_value_regex)
    }

    pub fn list_faults(&self) -> Vec<FaultDefinition> {
        self.faults.list()
    }

    /// Unmount every running checkout concurrently. Returns the first
    /// failure after all unmounts have finished.
    pub async fn shutdown(&self) -> Result<()> {
        let running: Vec<_> = self
            .registry
            .mounts()
            .into_iter()
            .filter(|m| m.state() == MountState::Running)
            .collect();

        info!("Shutting down {} running checkouts", running.len());

        let results = join_all(running.iter().map(|m| m.unmount())).await;

        let mut first_error: Option<Error> = None;
        for (mount, result) in running.iter().zip(results) {
            if let Err(e) = result {
                error!("Failed to unmount {:?} on shutdown: {}", mount.path(), e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
