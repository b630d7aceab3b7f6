//! C, exposed — the embedder-owned synchronization object used to pause,
//! resume, or tear down a long-running load/replay (spec sections 3, 4.6).
//!
//! Grounded on the teacher's `proxmox_sys`-style mutex/condvar pairing (see
//! e.g. `pbs-datastore::chunk_store::ChunkStore`'s `Mutex<()>` guard), reduced
//! here to plain `std::sync::{Mutex, Condvar}` since no cross-process locking
//! is required.

use std::sync::{Condvar, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    Opening,
    Ready,
    Suspending,
    Suspended,
    Freeing,
}

pub struct LoadContext {
    status: Mutex<LoadStatus>,
    cond: Condvar,
}

impl Default for LoadContext {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadContext {
    pub fn new() -> Self {
        LoadContext {
            status: Mutex::new(LoadStatus::Opening),
            cond: Condvar::new(),
        }
    }

    pub fn status(&self) -> LoadStatus {
        *self.status.lock().unwrap()
    }

    fn set_status(&self, status: LoadStatus) {
        let mut guard = self.status.lock().unwrap();
        *guard = status;
        self.cond.notify_all();
    }

    /// Requested by the embedder to pause an in-progress load.
    pub fn request_suspend(&self) {
        self.set_status(LoadStatus::Suspending);
    }

    /// Requested by the embedder to resume a suspended load.
    pub fn resume(&self) {
        self.set_status(LoadStatus::Opening);
    }

    /// Requested by the embedder to tear down a load in progress.
    pub fn request_free(&self) {
        self.set_status(LoadStatus::Freeing);
    }

    pub fn mark_ready(&self) {
        self.set_status(LoadStatus::Ready);
    }

    /// Called by the replay loop between chapters. If a suspend has been
    /// requested, transitions to `SUSPENDED`, broadcasts, and blocks until
    /// the embedder sets `OPENING` (resume) or `FREEING` (teardown). Returns
    /// `true` only when teardown was requested, in which case the caller
    /// must abort with `SHUTTING_DOWN`.
    pub fn check_for_suspend(&self) -> bool {
        let mut guard = self.status.lock().unwrap();
        if *guard != LoadStatus::Suspending {
            return false;
        }

        *guard = LoadStatus::Suspended;
        self.cond.notify_all();

        while *guard != LoadStatus::Opening && *guard != LoadStatus::Freeing {
            guard = self.cond.wait(guard).unwrap();
        }

        *guard == LoadStatus::Freeing
    }
}
