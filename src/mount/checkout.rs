//! A single checkout and its lifecycle state machine
//!
//! Every transition runs under the checkout's own transition lock, so
//! transitions of one checkout are linearizable while different
//! checkouts progress independently. The state itself lives behind a
//! separate lock that is never held across an await, which keeps state
//! queries non-blocking even while a transition is parked on a fault.

use crate::config::Config;
use crate::diff::{self, FileDiff};
use crate::error::{Error, Result};
use crate::fault::{FaultInjector, FLUSH_KEY_CLASS, MOUNT_KEY_CLASS, UNMOUNT_KEY_CLASS};
use crate::overlay::{HandleManager, OverlayData, OverlayEntry, OverlayStore};
use crate::path;
use crate::snapshot::{BackingStore, CommitId, CommitSnapshot, EntryType};
use crate::status::{self, StatusReport};
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use super::registry::CheckoutRecord;
use super::state::MountState;

const MARKER_CONTENTS: &str = "\
This directory is the mount point of a virtual checkout.

The checkout is not currently mounted, so its files are not visible.
Mount it again to get the working copy back; local changes are kept.
";

/// Content of a path in the working copy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileContents {
    File { content: Vec<u8>, mode: u32 },
    Symlink(String),
}

/// Live state of a mounted checkout
struct Attached {
    overlay: Arc<OverlayStore>,
    snapshot: Arc<CommitSnapshot>,
}

/// One registered checkout
pub struct Mount {
    record: CheckoutRecord,
    config: Arc<Config>,
    backing: Arc<dyn BackingStore>,
    faults: Arc<FaultInjector>,
    state: RwLock<MountState>,
    /// Serializes mount, unmount and removal of this checkout
    transition: tokio::sync::Mutex<()>,
    /// Set once the checkout has been removed from the registry
    retired: AtomicBool,
    attached: RwLock<Option<Attached>>,
    handles: HandleManager,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

impl Mount {
    pub(crate) fn new(
        record: CheckoutRecord,
        config: Arc<Config>,
        backing: Arc<dyn BackingStore>,
        faults: Arc<FaultInjector>,
    ) -> Self {
        Mount {
            record,
            config,
            backing,
            faults,
            state: RwLock::new(MountState::NotRunning),
            transition: tokio::sync::Mutex::new(()),
            retired: AtomicBool::new(false),
            attached: RwLock::new(None),
            handles: HandleManager::new(),
            flusher: Mutex::new(None),
        }
    }

    /// Canonical mount path
    pub fn path(&self) -> &Path {
        &self.record.path
    }

    pub fn commit(&self) -> &CommitId {
        &self.record.commit
    }

    pub fn record(&self) -> &CheckoutRecord {
        &self.record
    }

    /// Current lifecycle state. Never waits on a transition.
    pub fn state(&self) -> MountState {
        *self.state.read()
    }

    fn set_state(&self, state: MountState) {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        debug!("Checkout {:?}: {} -> {}", self.record.path, previous, state);
    }

    /// Key value matched by fault definitions
    fn fault_key(&self) -> String {
        self.record.path.to_string_lossy().into_owned()
    }

    /// Marker file in the mount directory
    pub fn marker_path(&self) -> PathBuf {
        self.record.path.join(&self.config.mount.marker_file_name)
    }

    /// Open file handles of the current mount
    pub fn open_handle_count(&self) -> usize {
        self.handles.live_count()
    }

    /// Mount the checkout against its recorded commit
    pub async fn mount(&self) -> Result<()> {
        let _guard = self.transition.lock().await;

        if self.retired.load(Ordering::SeqCst) {
            return Err(Error::UnknownCheckout(self.record.path.clone()));
        }
        if self.state() != MountState::NotRunning {
            return Err(Error::AlreadyMounted(self.record.path.clone()));
        }

        info!("Mounting {:?} at commit {}", self.record.path, self.record.commit);
        self.set_state(MountState::Initializing);

        match self.initialize().await {
            Ok(()) => {
                self.set_state(MountState::Running);
                info!("Mounted {:?}", self.record.path);
                Ok(())
            }
            Err(e) => {
                warn!("Mount of {:?} failed: {}", self.record.path, e);
                self.stop_flusher();
                self.detach();
                self.set_state(MountState::NotRunning);
                Err(e)
            }
        }
    }

    async fn initialize(&self) -> Result<()> {
        let snapshot = self.backing.snapshot(&self.record.commit)?;
        let overlay = Arc::new(OverlayStore::open(
            &self.record.overlay_dir,
            self.config.overlay.cache_capacity_bytes,
        )?);
        debug!(
            "Attached overlay for {:?} with {} entries",
            self.record.path,
            overlay.len()
        );

        *self.attached.write() = Some(Attached {
            overlay: overlay.clone(),
            snapshot,
        });

        self.faults.check(MOUNT_KEY_CLASS, &self.fault_key()).await?;

        self.remove_marker()?;
        self.start_flusher(&overlay);
        Ok(())
    }

    /// Unmount the checkout. Open handles are invalidated rather than
    /// waited for. A failed flush leaves the checkout `SHUTTING_DOWN`.
    pub async fn unmount(&self) -> Result<()> {
        let _guard = self.transition.lock().await;

        let previous = self.state();
        if !previous.can_unmount() {
            return Err(Error::NotMounted(self.record.path.clone()));
        }

        info!("Unmounting {:?}", self.record.path);
        self.set_state(MountState::ShuttingDown);

        if let Err(e) = self.faults.check(UNMOUNT_KEY_CLASS, &self.fault_key()).await {
            warn!("Unmount of {:?} failed: {}", self.record.path, e);
            self.set_state(previous);
            return Err(e);
        }

        self.stop_flusher();

        let invalidated = self.handles.invalidate_all();
        if invalidated > 0 {
            debug!(
                "Invalidated {} open handles on {:?}",
                invalidated, self.record.path
            );
        }

        if let Some(overlay) = self.overlay() {
            let flushed = match self.faults.check(FLUSH_KEY_CLASS, &self.fault_key()).await {
                Ok(()) => overlay.flush(),
                Err(e) => Err(Error::Storage(e.to_string())),
            };
            if let Err(e) = flushed {
                error!(
                    "Overlay flush failed while unmounting {:?}: {}",
                    self.record.path, e
                );
                return Err(e);
            }
        }

        self.detach();

        if let Err(e) = self.write_marker() {
            warn!("Failed to write marker for {:?}: {}", self.record.path, e);
        }

        self.set_state(MountState::NotRunning);
        info!("Unmounted {:?}", self.record.path);
        Ok(())
    }

    /// Prepare for removal from the registry. Without `force` the checkout
    /// must be `NOT_RUNNING`; with it, a live or stuck mount is torn down
    /// without flushing.
    pub(crate) async fn retire(&self, force: bool) -> Result<()> {
        let _guard = self.transition.lock().await;

        match self.state() {
            MountState::NotRunning => {}
            state if force => {
                warn!("Force removing {:?} in state {}", self.record.path, state);
                self.stop_flusher();
                self.handles.invalidate_all();
                self.detach();
                self.set_state(MountState::NotRunning);
            }
            _ => return Err(Error::StillMounted(self.record.path.clone())),
        }

        self.retired.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn overlay(&self) -> Option<Arc<OverlayStore>> {
        self.attached.read().as_ref().map(|a| a.overlay.clone())
    }

    fn detach(&self) {
        if self.attached.write().take().is_some() {
            debug!("Detached overlay for {:?}", self.record.path);
        }
    }

    fn start_flusher(&self, overlay: &Arc<OverlayStore>) {
        let secs = self.config.overlay.flush_interval_secs;
        if secs == 0 {
            return;
        }

        // weak so an unmount can close the store while the task winds down
        let overlay = Arc::downgrade(overlay);
        let path = self.record.path.clone();
        let task = tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(secs));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(overlay) = overlay.upgrade() else {
                    break;
                };
                if let Err(e) = overlay.flush() {
                    error!("Periodic flush failed for {:?}: {}", path, e);
                }
            }
            debug!("Flusher for {:?} stopped", path);
        });

        if let Some(previous) = self.flusher.lock().replace(task) {
            previous.abort();
        }
    }

    fn stop_flusher(&self) {
        if let Some(task) = self.flusher.lock().take() {
            task.abort();
        }
    }

    fn write_marker(&self) -> Result<()> {
        if !self.record.path.is_dir() {
            return Ok(());
        }
        std::fs::write(self.marker_path(), MARKER_CONTENTS)?;
        Ok(())
    }

    pub(crate) fn remove_marker(&self) -> Result<()> {
        match std::fs::remove_file(self.marker_path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Leave the marker behind for a freshly registered checkout
    pub(crate) fn install_marker(&self) -> Result<()> {
        self.write_marker()
    }

    /// Overlay and snapshot of a running checkout
    fn running(&self) -> Result<(Arc<OverlayStore>, Arc<CommitSnapshot>)> {
        if self.state() != MountState::Running {
            return Err(Error::NotMounted(self.record.path.clone()));
        }
        self.attached
            .read()
            .as_ref()
            .map(|a| (a.overlay.clone(), a.snapshot.clone()))
            .ok_or_else(|| Error::NotMounted(self.record.path.clone()))
    }

    /// Write file content. Content and mode identical to the commit drop
    /// the overlay entry instead.
    pub fn write_file(&self, path: &str, content: &[u8], mode: u32) -> Result<()> {
        let (overlay, snapshot) = self.running()?;
        let key = path::normalize(path)?;

        let entry = OverlayEntry::file(content.to_vec(), mode);
        if snapshot.get(&key).is_some_and(|c| entry.matches(c)) {
            overlay.delete(&key)?;
            debug!("{} reverted to commit in {:?}", key, self.record.path);
            return Ok(());
        }
        overlay.write(&key, content, mode)
    }

    /// Point a symlink at `target`
    pub fn write_symlink(&self, path: &str, target: &str) -> Result<()> {
        let (overlay, snapshot) = self.running()?;
        let key = path::normalize(path)?;

        let entry = OverlayEntry::symlink(target.to_string());
        if snapshot.get(&key).is_some_and(|c| entry.matches(c)) {
            overlay.delete(&key)?;
            return Ok(());
        }
        overlay.write_symlink(&key, target)
    }

    /// Delete a file or symlink from the working copy
    pub fn remove_file(&self, path: &str) -> Result<()> {
        let (overlay, snapshot) = self.running()?;
        let key = path::normalize(path)?;

        let exists = match overlay.read(&key)? {
            Some(entry) => !entry.is_removed(),
            None => snapshot.contains(&key),
        };
        if !exists {
            return Err(Error::PathNotFound(key));
        }

        if snapshot.contains(&key) {
            overlay.mark_removed(&key)
        } else {
            overlay.delete(&key).map(|_| ())
        }
    }

    /// Working-copy content of a path: the overlay if it has an entry,
    /// the commit otherwise
    pub fn read_file(&self, path: &str) -> Result<FileContents> {
        let (overlay, snapshot) = self.running()?;
        let key = path::normalize(path)?;

        if let Some(entry) = overlay.read(&key)? {
            return match entry.data {
                OverlayData::File(content) => Ok(FileContents::File {
                    content,
                    mode: entry.mode,
                }),
                OverlayData::Symlink(target) => Ok(FileContents::Symlink(target)),
                OverlayData::Removed => Err(Error::PathNotFound(key)),
            };
        }

        let Some(committed) = snapshot.get(&key) else {
            return Err(Error::PathNotFound(key));
        };
        let content = self.backing.blob(&committed.hash)?;
        match committed.kind {
            EntryType::Regular => Ok(FileContents::File {
                content,
                mode: committed.mode,
            }),
            EntryType::Symlink => Ok(FileContents::Symlink(
                String::from_utf8_lossy(&content).into_owned(),
            )),
        }
    }

    /// Open a path of a running checkout
    pub fn open(&self, path: &str, flags: i32) -> Result<u64> {
        self.running()?;
        let key = path::normalize(path)?;
        Ok(self.handles.open(key, flags))
    }

    /// Replace the content of the file behind a handle, keeping its mode
    pub fn write_handle(&self, fh: u64, content: &[u8]) -> Result<()> {
        let (writable, path) = self
            .handles
            .with_handle(fh, |h| (h.is_writable(), h.path.clone()))?;
        if !writable {
            return Err(std::io::Error::from_raw_os_error(libc::EBADF).into());
        }

        let mode = match self.read_file(&path) {
            Ok(FileContents::File { mode, .. }) => mode,
            Ok(FileContents::Symlink(_)) => {
                return Err(std::io::Error::from_raw_os_error(libc::EINVAL).into())
            }
            Err(Error::PathNotFound(_)) => 0o644,
            Err(e) => return Err(e),
        };

        self.write_file(&path, content, mode)?;
        self.handles.with_handle(fh, |h| h.mark_dirty())
    }

    /// Close a handle. Closing a handle invalidated by an unmount succeeds.
    pub fn close(&self, fh: u64) -> Result<()> {
        self.handles.close(fh)
    }

    /// Force durability of the overlay of an attached checkout
    pub fn flush(&self) -> Result<usize> {
        match self.overlay() {
            Some(overlay) => overlay.flush(),
            None => Err(Error::NotMounted(self.record.path.clone())),
        }
    }

    /// Classify every path of the checkout against its commit
    pub fn status(&self) -> Result<StatusReport> {
        let (overlay, snapshot) = self.running()?;
        let entries = overlay.entries()?;
        Ok(status::compute(&snapshot, &entries))
    }

    /// Diff blocks for every changed path
    pub fn diff(&self) -> Result<Vec<FileDiff>> {
        let (overlay, snapshot) = self.running()?;
        let entries = overlay.entries()?;
        diff::diff_checkout(&snapshot, &entries, self.backing.as_ref())
    }
}

impl Drop for Mount {
    fn drop(&mut self) {
        self.stop_flusher();
    }
}
