//! Open file handle accounting
//!
//! Handles are tagged with the mount generation they were issued in.
//! Unmount bumps the generation instead of waiting for handles to close;
//! a handle from an earlier generation is stale on its next use, while
//! closing it still succeeds.

use crate::error::{Error, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// An open file or directory in a checkout
pub struct FileHandle {
    /// Checkout-relative path, empty for the checkout root
    pub path: String,
    /// Open flags
    pub flags: i32,
    /// Mount generation the handle was issued in
    pub generation: u64,
    /// Has the handle written through to the overlay?
    pub dirty: AtomicBool,
}

impl FileHandle {
    pub fn new(path: String, flags: i32, generation: u64) -> Self {
        FileHandle {
            path,
            flags,
            generation,
            dirty: AtomicBool::new(false),
        }
    }

    /// Check if opened for writing
    pub fn is_writable(&self) -> bool {
        let mode = self.flags & libc::O_ACCMODE;
        mode == libc::O_WRONLY || mode == libc::O_RDWR
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }
}

/// Manages open file handles for one checkout
pub struct HandleManager {
    next_id: AtomicU64,
    generation: AtomicU64,
    handles: RwLock<HashMap<u64, FileHandle>>,
}

impl HandleManager {
    pub fn new() -> Self {
        HandleManager {
            next_id: AtomicU64::new(1),
            generation: AtomicU64::new(0),
            handles: RwLock::new(HashMap::new()),
        }
    }

    /// Open a handle in the current generation
    pub fn open(&self, path: String, flags: i32) -> u64 {
        let fh = self.next_id.fetch_add(1, Ordering::SeqCst);
        let generation = self.generation.load(Ordering::SeqCst);
        self.handles
            .write()
            .insert(fh, FileHandle::new(path, flags, generation));
        fh
    }

    /// Run `f` against a live handle
    pub fn with_handle<F, R>(&self, fh: u64, f: F) -> Result<R>
    where
        F: FnOnce(&FileHandle) -> R,
    {
        let handles = self.handles.read();
        let handle = handles.get(&fh).ok_or(Error::BadHandle(fh))?;
        if handle.generation != self.generation.load(Ordering::SeqCst) {
            return Err(Error::StaleHandle(fh));
        }
        Ok(f(handle))
    }

    /// Close a handle. Stale handles close without error.
    pub fn close(&self, fh: u64) -> Result<()> {
        self.handles
            .write()
            .remove(&fh)
            .map(|_| ())
            .ok_or(Error::BadHandle(fh))
    }

    /// Invalidate every open handle. Returns how many were open.
    pub fn invalidate_all(&self) -> usize {
        let handles = self.handles.read();
        self.generation.fetch_add(1, Ordering::SeqCst);
        handles.len()
    }

    /// Handles issued in the current generation and not yet closed
    pub fn live_count(&self) -> usize {
        let generation = self.generation.load(Ordering::SeqCst);
        self.handles
            .read()
            .values()
            .filter(|h| h.generation == generation)
            .count()
    }
}

impl Default for HandleManager {
    fn default() -> Self {
        Self::new()
    }
}
