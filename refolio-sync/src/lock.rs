//! Single-flight lock and cooperative cancellation.
//!
//! At most one sync cycle runs at a time. [`SyncLock::try_acquire`] either
//! hands out a [`SyncGuard`] or reports the engine busy; the guard releases
//! the lock when dropped, so every exit path (including panics and early
//! returns on error) releases it. [`CancelFlag`] is the matching stop
//! signal: any holder may request cancellation, and the running cycle polls
//! it at phase and batch boundaries, never mid-batch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

/// Mutual exclusion for sync cycles.
#[derive(Debug, Clone, Default)]
pub struct SyncLock {
    locked: Arc<AtomicBool>,
}

impl SyncLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to take the lock without blocking.
    pub fn try_acquire(&self) -> Option<SyncGuard> {
        if self
            .locked
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            debug!("Sync lock acquired");
            Some(SyncGuard {
                locked: Arc::clone(&self.locked),
            })
        } else {
            None
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }
}

/// Holds the sync lock; releases it on drop.
#[derive(Debug)]
pub struct SyncGuard {
    locked: Arc<AtomicBool>,
}

impl Drop for SyncGuard {
    fn drop(&mut self) {
        self.locked.store(false, Ordering::Release);
        debug!("Sync lock released");
    }
}

/// Cooperative stop request for a running cycle.
///
/// Setting the flag never interrupts work in flight; the cycle observes it
/// at the next boundary, stops advancing, and clears it so the next run
/// starts clean.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    flag: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation of the running cycle, if any.
    pub fn request(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Observes and clears the flag in one step.
    ///
    /// Returns true when a cancellation was pending. Only the running cycle
    /// should call this.
    pub fn acknowledge(&self) -> bool {
        self.flag.swap(false, Ordering::AcqRel)
    }
}
