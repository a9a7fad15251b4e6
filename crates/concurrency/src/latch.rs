//! Per-cell commit latch
//!
//! A one-byte spin latch that serialises commits on a cell. It is held only
//! for the compare-and-publish step of a commit, never while user code runs,
//! so waiters spin with [`Backoff`] instead of parking the thread.
//!
//! The latch distinguishes two holders:
//! - `Single`: one cell is committing; the publish is a single pointer swap
//!   and readers need not wait
//! - `Batch`: a multi-cell transaction is validating and publishing; readers
//!   wait until it releases so that its new values appear all at once

use crossbeam::utils::Backoff;
use std::sync::atomic::{AtomicU8, Ordering};

const FREE: u8 = 0;
const SINGLE: u8 = 1;
const BATCH: u8 = 2;

/// Commit arbitration for one cell
#[derive(Debug, Default)]
pub struct CommitLatch {
    state: AtomicU8,
}

impl CommitLatch {
    /// Create a free latch
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(FREE),
        }
    }

    /// Acquire for a single-cell commit
    pub fn lock_single(&self) -> LatchGuard<'_> {
        self.acquire(SINGLE)
    }

    /// Acquire for a multi-cell publish
    pub fn lock_batch(&self) -> LatchGuard<'_> {
        self.acquire(BATCH)
    }

    /// True while a multi-cell publish holds the latch
    #[inline]
    pub fn is_batch_held(&self) -> bool {
        self.state.load(Ordering::SeqCst) == BATCH
    }

    /// True while anyone holds the latch
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.state.load(Ordering::SeqCst) != FREE
    }

    fn acquire(&self, holder: u8) -> LatchGuard<'_> {
        let backoff = Backoff::new();
        loop {
            if self
                .state
                .compare_exchange_weak(FREE, holder, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok()
            {
                return LatchGuard { latch: self };
            }
            while self.is_locked() {
                backoff.snooze();
            }
        }
    }
}

/// Releases the latch on drop
#[must_use = "the latch is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct LatchGuard<'a> {
    latch: &'a CommitLatch,
}

impl LatchGuard<'_> {
    /// True if this guard holds `latch`
    pub fn guards(&self, latch: &CommitLatch) -> bool {
        std::ptr::eq(self.latch, latch)
    }
}

impl Drop for LatchGuard<'_> {
    fn drop(&mut self) {
        self.latch.state.store(FREE, Ordering::SeqCst);
    }
}
