//! Atomic multi-box commits
//!
//! A [`Transaction`] bundles one mutation per box and publishes all of them
//! or none. It is one validate-then-commit round; it never retries on its own
//! so callers can choose their own retry or compensation policy.
//!
//! ## Commit Sequence
//!
//! ```text
//! 1. Reject duplicate boxes        - before any user code runs
//! 2. Snapshot every box            - lock-free, any order
//! 3. Compute every new value       - lock-free, user code runs here only
//! 4. Latch every box               - ascending CellId order
//! 5. Validate every version        - mismatch: release, return Conflict
//! 6. Publish every new value       - version + 1 on each box
//! 7. Release the latches
//! ```
//!
//! Steps 4-7 only compare integers and swap pointers, so the latched window
//! is O(N) no matter how expensive the mutators were. The epoch guard is
//! pinned before step 4 and released after step 7, so retired values are
//! never dropped while a latch is held.
//!
//! ## Deadlock Freedom
//!
//! Every transaction takes latches in ascending `CellId` order, so two
//! overlapping transactions can never wait on each other in a cycle.
//! Single-box writes take one latch at a time.
//!
//! ## Visibility
//!
//! Readers wait while a box is latched for a multi-box publish. A reader that
//! sees any of a transaction's new values therefore sees all of them.

use crate::cell::VersionedCell;
use crate::latch::{CommitLatch, LatchGuard};
use crate::occ_box::OccBox;
use crossbeam::epoch::{self, Guard};
use occbox_core::{CellId, Error, Result, Version, INITIAL_VERSION};
use smallvec::SmallVec;
use std::sync::Arc;
use tracing::{debug, warn};

/// One staged box inside a transaction
trait Participant<'a> {
    fn cell_id(&self) -> CellId;

    fn latch(&self) -> &'a CommitLatch;

    /// Snapshot the box and compute its next value
    fn prepare(&mut self);

    /// Check the box is still at the snapshot version. Caller holds the latch.
    fn validate(&self, guard: &Guard) -> Result<()>;

    /// Publish the computed value. Caller holds the latch and has validated.
    fn publish(&mut self, latch: &LatchGuard<'_>, guard: &Guard) -> Version;
}

struct Staged<'a, T, F>
where
    T: Send + Sync + 'static,
{
    cell: &'a VersionedCell<T>,
    compute: Option<F>,
    base: Version,
    next: Option<Arc<T>>,
}

impl<'a, T, F> Participant<'a> for Staged<'a, T, F>
where
    T: Send + Sync + 'static,
    F: FnOnce(&Arc<T>) -> Arc<T>,
{
    fn cell_id(&self) -> CellId {
        self.cell.id()
    }

    fn latch(&self) -> &'a CommitLatch {
        self.cell.latch()
    }

    fn prepare(&mut self) {
        let snapshot = self.cell.snapshot();
        if let Some(compute) = self.compute.take() {
            self.next = Some(compute(snapshot.value()));
        }
        self.base = snapshot.version();
    }

    fn validate(&self, guard: &Guard) -> Result<()> {
        let actual = self.cell.version_in(guard);
        if actual != self.base {
            return Err(Error::Conflict {
                cell: self.cell.id(),
                expected: self.base,
                actual,
            });
        }
        Ok(())
    }

    fn publish(&mut self, latch: &LatchGuard<'_>, guard: &Guard) -> Version {
        let version = self.base + 1;
        if let Some(next) = self.next.take() {
            self.cell.publish_locked(latch, guard, version, next);
        }
        version
    }
}

/// New versions produced by a successful commit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReceipt {
    versions: SmallVec<[(CellId, Version); 4]>,
}

impl CommitReceipt {
    /// Version a box was committed at, if it took part
    pub fn version_of(&self, cell: CellId) -> Option<Version> {
        self.versions
            .iter()
            .find(|(id, _)| *id == cell)
            .map(|(_, version)| *version)
    }

    /// Number of boxes committed
    pub fn len(&self) -> usize {
        self.versions.len()
    }

    /// True for an empty transaction
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// `(cell, new version)` pairs in ascending cell order
    pub fn iter(&self) -> impl Iterator<Item = &(CellId, Version)> {
        self.versions.iter()
    }
}

/// A set of box mutations committed with all-or-nothing visibility
///
/// Built on the caller's stack, consumed by [`commit`](Self::commit) or
/// [`apply`](Self::apply). Boxes of different value types can be mixed.
/// Mutators run exactly once per commit attempt, outside any latch.
///
/// # Example
///
/// ```
/// use occbox_concurrency::{OccBox, Transaction};
///
/// let a = OccBox::new(100);
/// let b = OccBox::new(200);
///
/// let ok = Transaction::new()
///     .update(&a, |v| *v -= 50)
///     .update(&b, |v| *v += 50)
///     .apply();
///
/// assert!(ok);
/// assert_eq!(a.read(|v| *v), 50);
/// assert_eq!(b.read(|v| *v), 250);
/// ```
#[must_use = "a transaction does nothing until it is committed or applied"]
pub struct Transaction<'a> {
    participants: SmallVec<[Box<dyn Participant<'a> + 'a>; 4]>,
}

impl<'a> Transaction<'a> {
    /// Start an empty transaction
    pub fn new() -> Self {
        Self {
            participants: SmallVec::new(),
        }
    }

    /// Stage a value-mode mutation: `mutator` edits a private copy
    pub fn update<T, F>(self, target: &'a OccBox<T>, mutator: F) -> Self
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(&mut T) + 'a,
    {
        self.replace(target, move |current: &Arc<T>| {
            let mut next = T::clone(current);
            mutator(&mut next);
            Arc::new(next)
        })
    }

    /// Stage a pointer-mode mutation: `replacer` builds a new handle
    pub fn replace<T, F>(mut self, target: &'a OccBox<T>, replacer: F) -> Self
    where
        T: Send + Sync + 'static,
        F: FnOnce(&Arc<T>) -> Arc<T> + 'a,
    {
        self.participants.push(Box::new(Staged {
            cell: target.cell(),
            compute: Some(replacer),
            base: INITIAL_VERSION,
            next: None,
        }));
        self
    }

    /// Number of staged boxes
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    /// True if nothing is staged
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Run the transaction once
    ///
    /// # Errors
    ///
    /// - `Error::DuplicateCell` if a box was staged twice; no mutator runs
    /// - `Error::Conflict` if any box changed after it was snapshotted; no
    ///   box is modified
    pub fn commit(mut self) -> Result<CommitReceipt> {
        if self.participants.is_empty() {
            return Ok(CommitReceipt::default());
        }

        // Lock order; also makes duplicates adjacent.
        self.participants.sort_by_key(|p| p.cell_id());
        if let Some(pair) = self
            .participants
            .windows(2)
            .find(|pair| pair[0].cell_id() == pair[1].cell_id())
        {
            let cell = pair[0].cell_id();
            warn!(%cell, "box staged twice in one transaction");
            return Err(Error::DuplicateCell(cell));
        }

        for participant in self.participants.iter_mut() {
            participant.prepare();
        }

        // Pinning may run deferred destructors, which are user code. Pin once
        // here so that nothing under the latches can trigger a collection.
        let guard = epoch::pin();
        let latches: SmallVec<[LatchGuard<'a>; 4]> = self
            .participants
            .iter()
            .map(|p| p.latch().lock_batch())
            .collect();

        for participant in self.participants.iter() {
            if let Err(e) = participant.validate(&guard) {
                drop(latches);
                debug!(
                    participants = self.participants.len(),
                    error = %e,
                    "transaction aborted"
                );
                return Err(e);
            }
        }

        let versions = self
            .participants
            .iter_mut()
            .zip(latches.iter())
            .map(|(participant, latch)| (participant.cell_id(), participant.publish(latch, &guard)))
            .collect();
        drop(latches);

        debug!(participants = self.participants.len(), "transaction committed");
        Ok(CommitReceipt { versions })
    }

    /// Run the transaction once, reporting only success
    ///
    /// `true` if every mutation was published (always for an empty
    /// transaction), `false` if nothing was. Use [`commit`](Self::commit)
    /// to tell a conflict from a rejected duplicate.
    pub fn apply(self) -> bool {
        self.commit().is_ok()
    }
}

impl Default for Transaction<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// Atomically apply `fa` to `a` and `fb` to `b`
///
/// Shorthand for a two-box value-mode [`Transaction`].
pub fn apply2<'a, A, B, FA, FB>(a: &'a OccBox<A>, fa: FA, b: &'a OccBox<B>, fb: FB) -> bool
where
    A: Clone + Send + Sync + 'static,
    B: Clone + Send + Sync + 'static,
    FA: FnOnce(&mut A) + 'a,
    FB: FnOnce(&mut B) + 'a,
{
    Transaction::new().update(a, fa).update(b, fb).apply()
}
