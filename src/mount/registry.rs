//! Process-wide table of checkouts
//!
//! Maps canonical mount paths to their [`Mount`]. Records are persisted
//! to `checkouts.json` so that registered checkouts come back as
//! `NOT_RUNNING` after a restart.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::fault::FaultInjector;
use crate::overlay::OverlayStore;
use crate::snapshot::{BackingStore, CommitId};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::checkout::Mount;
use super::state::MountState;

/// Persisted description of a checkout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutRecord {
    /// Canonical mount path
    pub path: PathBuf,
    /// Commit the working copy is compared against
    pub commit: CommitId,
    /// Directory of the checkout's overlay database
    pub overlay_dir: PathBuf,
    pub created_at: DateTime<Utc>,
}

impl CheckoutRecord {
    /// New record with its overlay under `clients_dir`
    pub fn new(path: PathBuf, commit: CommitId, clients_dir: &Path) -> Self {
        let hash = blake3::hash(path.to_string_lossy().as_bytes());
        let client_id = &hash.to_hex()[..16];
        CheckoutRecord {
            overlay_dir: clients_dir.join(client_id).join("overlay"),
            path,
            commit,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CheckoutsFile {
    checkouts: Vec<CheckoutRecord>,
}

/// Resolve a mount path to the key it is registered under. Falls back to
/// an absolute path when the directory no longer exists.
pub fn canonical_mount_path(path: &Path) -> Result<PathBuf> {
    match std::fs::canonicalize(path) {
        Ok(canonical) => Ok(canonical),
        Err(_) if path.is_absolute() => Ok(path.to_path_buf()),
        Err(_) => Ok(std::env::current_dir()?.join(path)),
    }
}

/// Registry of every checkout known to the process
pub struct MountRegistry {
    config: Arc<Config>,
    backing: Arc<dyn BackingStore>,
    faults: Arc<FaultInjector>,
    mounts: DashMap<PathBuf, Arc<Mount>>,
    /// Serializes rewrites of the checkouts file
    persist_lock: Mutex<()>,
}

impl MountRegistry {
    /// Load the registry, restoring persisted checkouts as `NOT_RUNNING`
    pub fn open(
        config: Arc<Config>,
        backing: Arc<dyn BackingStore>,
        faults: Arc<FaultInjector>,
    ) -> Result<Self> {
        let registry = MountRegistry {
            config,
            backing,
            faults,
            mounts: DashMap::new(),
            persist_lock: Mutex::new(()),
        };

        let file = registry.config.checkouts_file();
        if file.exists() {
            let content = std::fs::read_to_string(&file)?;
            let saved: CheckoutsFile = serde_json::from_str(&content).map_err(|e| {
                Error::Deserialization(format!("Failed to parse {:?}: {}", file, e))
            })?;
            for record in saved.checkouts {
                debug!("Restored checkout {:?}", record.path);
                let path = record.path.clone();
                registry.mounts.insert(path, registry.new_mount(record));
            }
            info!("Loaded {} checkouts from {:?}", registry.mounts.len(), file);
        }

        Ok(registry)
    }

    fn new_mount(&self, record: CheckoutRecord) -> Arc<Mount> {
        Arc::new(Mount::new(
            record,
            self.config.clone(),
            self.backing.clone(),
            self.faults.clone(),
        ))
    }

    /// Register a new checkout at `path`, creating the directory
    pub fn register(&self, path: &Path, commit: CommitId) -> Result<Arc<Mount>> {
        std::fs::create_dir_all(path)?;
        let canonical = canonical_mount_path(path)?;

        let record = CheckoutRecord::new(canonical.clone(), commit, &self.config.clients_dir());
        let mount = match self.mounts.entry(canonical.clone()) {
            Entry::Occupied(_) => return Err(Error::CheckoutExists(canonical)),
            Entry::Vacant(slot) => slot.insert(self.new_mount(record)).clone(),
        };

        if let Err(e) = self.persist() {
            self.mounts.remove(&canonical);
            return Err(e);
        }
        if let Err(e) = mount.install_marker() {
            warn!("Failed to write marker for {:?}: {}", canonical, e);
        }

        info!("Registered checkout {:?} at commit {}", canonical, mount.commit());
        Ok(mount)
    }

    /// Checkout registered at `path`
    pub fn get(&self, path: &Path) -> Result<Arc<Mount>> {
        let canonical = canonical_mount_path(path)?;
        self.mounts
            .get(&canonical)
            .map(|m| m.value().clone())
            .ok_or(Error::UnknownCheckout(canonical))
    }

    /// State of every checkout, by path
    pub fn list(&self) -> BTreeMap<PathBuf, MountState> {
        self.mounts
            .iter()
            .map(|m| (m.key().clone(), m.value().state()))
            .collect()
    }

    pub fn mounts(&self) -> Vec<Arc<Mount>> {
        self.mounts.iter().map(|m| m.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.mounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mounts.is_empty()
    }

    /// Remove a checkout: its registry entry, overlay, marker file and
    /// (when empty) mount directory. `force` also tears down a checkout
    /// that is not `NOT_RUNNING`.
    pub async fn remove(&self, path: &Path, force: bool) -> Result<()> {
        let mount = self.get(path)?;
        mount.retire(force).await?;

        // the entry keeps the path reserved until its on-disk state is gone
        let record = mount.record().clone();
        OverlayStore::destroy(&record.overlay_dir)?;
        if let Some(client_dir) = record.overlay_dir.parent() {
            // only removes the directory when nothing else lives there
            if let Err(e) = std::fs::remove_dir(client_dir) {
                debug!("Kept client dir {:?}: {}", client_dir, e);
            }
        }

        mount.remove_marker()?;
        if self.config.mount.remove_empty_mount_point {
            if let Err(e) = std::fs::remove_dir(&record.path) {
                debug!("Kept mount point {:?}: {}", record.path, e);
            }
        }

        self.mounts
            .remove_if(&record.path, |_, m| Arc::ptr_eq(m, &mount));
        self.persist()?;

        info!("Removed checkout {:?}", record.path);
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        let _guard = self.persist_lock.lock();

        let mut checkouts: Vec<CheckoutRecord> = self
            .mounts
            .iter()
            .map(|m| m.value().record().clone())
            .collect();
        checkouts.sort_by(|a, b| a.path.cmp(&b.path));

        let content = serde_json::to_string_pretty(&CheckoutsFile { checkouts })
            .map_err(|e| Error::Serialization(e.to_string()))?;

        let file = self.config.checkouts_file();
        let tmp = file.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &file)?;
        Ok(())
    }
}
