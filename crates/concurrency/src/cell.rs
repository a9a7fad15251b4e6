//! Versioned cell: an atomically replaceable `(value, version)` pair
//!
//! The cell points at an immutable slot holding a reference-counted value and
//! the version it was committed at. A commit builds a brand-new slot and swaps
//! it in, so readers can never observe a value paired with the wrong version,
//! and a value is never mutated once published.
//!
//! ## Primitives
//!
//! - [`VersionedCell::snapshot`]: consistent `(value, version)` pair
//! - [`VersionedCell::try_commit`]: publish a new value if the version still
//!   matches, exactly one competing committer per version wins
//!
//! ## Memory reclamation
//!
//! Retired slots are handed to crossbeam's epoch collector and freed once no
//! pinned reader can still reach them. The values inside are `Arc`s, so a
//! value captured by a snapshot lives on for as long as the snapshot does,
//! independent of the cell itself.

use crate::latch::{CommitLatch, LatchGuard};
use crossbeam::epoch::{self, Atomic, Guard, Owned};
use crossbeam::utils::Backoff;
use occbox_core::{CellId, Version, INITIAL_VERSION};
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Published state of a cell. Immutable once reachable.
struct Slot<T> {
    version: Version,
    value: Arc<T>,
}

/// A consistent point-in-time view of a cell
///
/// Holds its own reference to the value, so it stays valid after the cell
/// moves on to newer versions or is dropped.
pub struct Snapshot<T> {
    value: Arc<T>,
    version: Version,
}

impl<T> Snapshot<T> {
    /// Shared handle to the captured value
    pub fn value(&self) -> &Arc<T> {
        &self.value
    }

    /// Version the value was committed at
    pub fn version(&self) -> Version {
        self.version
    }

    /// Drop the version and keep the handle
    pub fn into_value(self) -> Arc<T> {
        self.value
    }

    /// Split into handle and version
    pub fn into_parts(self) -> (Arc<T>, Version) {
        (self.value, self.version)
    }
}

impl<T> Deref for Snapshot<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> Clone for Snapshot<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            version: self.version,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Snapshot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("version", &self.version)
            .field("value", &self.value)
            .finish()
    }
}

/// Atomic `(value, version)` pair with optimistic commit
///
/// # Thread Safety
///
/// - `snapshot()` is lock-free unless a multi-cell transaction is publishing
///   into this cell, in which case it spins until that publish completes
/// - `try_commit()` holds the cell's commit latch only for the version check
///   and a single pointer swap
///
/// Values must be `Send + Sync + 'static`: retired values may be released by
/// whichever thread advances the epoch.
pub struct VersionedCell<T: Send + Sync + 'static> {
    id: CellId,
    state: Atomic<Slot<T>>,
    latch: CommitLatch,
}

impl<T: Send + Sync + 'static> VersionedCell<T> {
    /// Create a cell holding `value` at [`INITIAL_VERSION`]
    pub fn new(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    /// Create a cell that adopts an existing handle
    pub fn from_arc(value: Arc<T>) -> Self {
        Self {
            id: CellId::next(),
            state: Atomic::new(Slot {
                version: INITIAL_VERSION,
                value,
            }),
            latch: CommitLatch::new(),
        }
    }

    /// Stable identity of this cell
    #[inline]
    pub fn id(&self) -> CellId {
        self.id
    }

    /// Atomically capture the current value and version
    ///
    /// Waits out an in-flight multi-cell publish on this cell so that a
    /// transaction's values become visible all together.
    pub fn snapshot(&self) -> Snapshot<T> {
        let backoff = Backoff::new();
        loop {
            if let Some(snapshot) = self.snapshot_once() {
                return snapshot;
            }
            backoff.snooze();
        }
    }

    /// Like [`snapshot`](Self::snapshot), but gives up after `attempts` tries
    ///
    /// At least one attempt is always made.
    pub fn try_snapshot(&self, attempts: u32) -> Option<Snapshot<T>> {
        let backoff = Backoff::new();
        for _ in 0..attempts.max(1) {
            if let Some(snapshot) = self.snapshot_once() {
                return Some(snapshot);
            }
            backoff.spin();
        }
        None
    }

    /// Current version
    ///
    /// Only meaningful for diagnostics: it may change before the caller acts
    /// on it.
    pub fn version(&self) -> Version {
        let guard = epoch::pin();
        self.version_in(&guard)
    }

    /// Current version, read under an existing pin
    ///
    /// Never collects garbage, so it is safe to call with a latch held.
    pub(crate) fn version_in(&self, guard: &Guard) -> Version {
        self.current(guard).version
    }

    /// Publish `value` if the cell is still at `expected`
    ///
    /// Returns `true` and moves the cell to `expected + 1` on success. On
    /// `false` the cell is untouched; a failed commit is an ordinary outcome.
    pub fn try_commit(&self, expected: Version, value: Arc<T>) -> bool {
        // Pinning may run deferred destructors, so it happens before the
        // latch is taken and the guard outlives the latch.
        let guard = epoch::pin();
        let latch = self.latch.lock_single();
        if self.version_in(&guard) != expected {
            return false;
        }
        self.publish_locked(&latch, &guard, expected + 1, value);
        true
    }

    /// Commit latch of this cell, for multi-cell commits
    pub(crate) fn latch(&self) -> &CommitLatch {
        &self.latch
    }

    /// Swap in a new slot. Caller holds this cell's latch, has validated the
    /// version, and pinned `guard` before latching.
    ///
    /// The old slot is only deferred here; no destructor runs on this path.
    pub(crate) fn publish_locked(
        &self,
        latch: &LatchGuard<'_>,
        guard: &Guard,
        version: Version,
        value: Arc<T>,
    ) {
        debug_assert!(latch.guards(&self.latch));
        let old = self
            .state
            .swap(Owned::new(Slot { version, value }), Ordering::AcqRel, guard);
        // SAFETY: `old` is no longer reachable through the cell. Readers that
        // loaded it are pinned, so destruction waits for their guards.
        unsafe { guard.defer_destroy(old) };
    }

    fn snapshot_once(&self) -> Option<Snapshot<T>> {
        let guard = epoch::pin();
        let snapshot = self.load(&guard);
        if self.latch.is_batch_held() {
            return None;
        }
        Some(snapshot)
    }

    fn load(&self, guard: &Guard) -> Snapshot<T> {
        let slot = self.current(guard);
        Snapshot {
            value: Arc::clone(&slot.value),
            version: slot.version,
        }
    }

    fn current<'g>(&self, guard: &'g Guard) -> &'g Slot<T> {
        let shared = self.state.load(Ordering::Acquire, guard);
        // SAFETY: the state pointer is never null, and a slot swapped out
        // after this load is only destroyed once `guard` is unpinned.
        unsafe { shared.deref() }
    }
}

impl<T: Send + Sync + 'static> Drop for VersionedCell<T> {
    fn drop(&mut self) {
        // SAFETY: `&mut self` means no other thread can reach the current
        // slot any more. Older slots are owned by the epoch collector.
        unsafe {
            let guard = epoch::unprotected();
            let current = self.state.load(Ordering::Acquire, guard);
            drop(current.into_owned());
        }
    }
}

impl<T: Send + Sync + 'static> fmt::Debug for VersionedCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionedCell")
            .field("id", &self.id)
            .field("version", &self.version())
            .finish()
    }
}
