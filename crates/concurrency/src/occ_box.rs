//! OccBox: optimistic reads and retrying writes over one versioned cell
//!
//! ## Read path
//!
//! `read()` takes one snapshot and runs the visitor against it. It never
//! blocks a writer and never sees a half-mutated value, because published
//! values are never mutated in place.
//!
//! ## Write path
//!
//! Every write is a snapshot / compute / commit cycle:
//!
//! ```text
//! 1. snapshot()                     - capture (value, version)
//! 2. compute the next value         - private copy or brand-new handle
//! 3. try_commit(version, next)      - publish if nobody else did first
//! 4. on conflict: ask the RetryPolicy, discard the work, go to 1
//! ```
//!
//! ## Purity Requirement
//!
//! Mutators may run more than once when commits conflict. Side effects inside
//! a mutator (logging, counters) can be observed once per attempt. Only the
//! result of the attempt that commits becomes visible.
//!
//! ## Two write modes
//!
//! - `write()`: clone the current value, mutate the clone (`T: Clone`)
//! - `write_ptr()`: build a new handle from a read-only view of the current
//!   one, never cloning `T`

use crate::cell::{Snapshot, VersionedCell};
use crate::retry::{Bounded, RetryPolicy};
use crossbeam::utils::Backoff;
use occbox_core::{CellId, Error, Result, Version};
use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;
use tracing::{trace, warn};

/// A value guarded by optimistic concurrency control
///
/// Not `Clone`: two boxes sharing one cell would break the one-writer-visible
/// invariant. Moving a box is fine.
///
/// # Example
///
/// ```
/// use occbox_concurrency::OccBox;
///
/// let counter = OccBox::new(40);
/// counter.write(|v| *v += 10);
/// assert_eq!(counter.read(|v| *v), 50);
/// assert_eq!(counter.version(), 1);
/// ```
pub struct OccBox<T: Send + Sync + 'static> {
    cell: VersionedCell<T>,
}

impl<T: Send + Sync + 'static> OccBox<T> {
    /// Create a box holding `value`
    pub fn new(value: T) -> Self {
        Self {
            cell: VersionedCell::new(value),
        }
    }

    /// Create a box that adopts an existing handle
    pub fn from_arc(value: Arc<T>) -> Self {
        Self {
            cell: VersionedCell::from_arc(value),
        }
    }

    /// Stable identity of the underlying cell
    pub fn id(&self) -> CellId {
        self.cell.id()
    }

    /// Current version
    ///
    /// Useful for diagnostics and tests only; it may change before the caller
    /// acts on it.
    pub fn version(&self) -> Version {
        self.cell.version()
    }

    /// Underlying versioned cell
    pub fn cell(&self) -> &VersionedCell<T> {
        &self.cell
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Apply `visitor` to a consistent snapshot and return its result
    pub fn read<R, F>(&self, visitor: F) -> R
    where
        F: FnOnce(&T) -> R,
    {
        let snapshot = self.cell.snapshot();
        visitor(snapshot.value().as_ref())
    }

    /// Like [`read`](Self::read), but gives up after `attempts` tries to get
    /// a snapshot clear of an in-flight transaction publish
    pub fn try_read<R, F>(&self, visitor: F, attempts: u32) -> Option<R>
    where
        F: FnOnce(&T) -> R,
    {
        let snapshot = self.cell.try_snapshot(attempts)?;
        Some(visitor(snapshot.value().as_ref()))
    }

    /// Capture the current value together with its version
    pub fn snapshot(&self) -> Snapshot<T> {
        self.cell.snapshot()
    }

    /// Shared handle to the current value
    pub fn load(&self) -> Arc<T> {
        self.cell.snapshot().into_value()
    }

    // =========================================================================
    // Pointer-mode writes
    // =========================================================================

    /// Replace the value with a handle built from the current one
    ///
    /// `replacer` sees the current handle read-only and must return a new
    /// one. `T` is never cloned by this path. Retries until it commits and
    /// returns the committed version.
    pub fn write_ptr<F>(&self, mut replacer: F) -> Version
    where
        F: FnMut(&Arc<T>) -> Arc<T>,
    {
        match self.spin_loop(|current| Ok::<_, Infallible>(replacer(current))) {
            Ok(version) => version,
            Err(never) => match never {},
        }
    }

    /// [`write_ptr`](Self::write_ptr) driven by a caller-supplied retry policy
    ///
    /// Returns the committed version, or `Error::RetriesExhausted` if the
    /// policy gave up. The cell is untouched in the error case.
    pub fn write_ptr_with<P, F>(&self, policy: &mut P, mut replacer: F) -> Result<Version>
    where
        P: RetryPolicy + ?Sized,
        F: FnMut(&Arc<T>) -> Arc<T>,
    {
        self.policy_loop(policy, |current| Ok::<_, Infallible>(replacer(current)))
            .map_err(Abort::<Infallible>::into_error)
    }

    /// [`write_ptr`](Self::write_ptr) with at most `attempts` commit attempts
    pub fn try_write_ptr<F>(&self, replacer: F, attempts: u32) -> bool
    where
        F: FnMut(&Arc<T>) -> Arc<T>,
    {
        self.write_ptr_with(&mut Bounded::new(attempts), replacer)
            .is_ok()
    }

    // =========================================================================
    // Commit loops
    // =========================================================================

    /// One snapshot / compute / commit round
    ///
    /// `Ok(None)` means another writer committed first.
    fn attempt<E, F>(&self, compute: &mut F) -> std::result::Result<Option<Version>, E>
    where
        F: FnMut(&Arc<T>) -> std::result::Result<Arc<T>, E>,
    {
        let snapshot = self.cell.snapshot();
        let next = compute(snapshot.value())?;
        let base = snapshot.version();
        Ok(self.cell.try_commit(base, next).then(|| base + 1))
    }

    /// Retry until a round commits or `compute` rejects
    fn spin_loop<E, F>(&self, mut compute: F) -> std::result::Result<Version, E>
    where
        F: FnMut(&Arc<T>) -> std::result::Result<Arc<T>, E>,
    {
        let backoff = Backoff::new();
        let mut attempt: u32 = 0;
        loop {
            if let Some(version) = self.attempt(&mut compute)? {
                return Ok(version);
            }
            attempt = attempt.saturating_add(1);
            trace!(cell = %self.id(), attempt, "commit conflict");
            backoff.snooze();
        }
    }

    /// Retry while `policy` allows it
    fn policy_loop<P, E, F>(
        &self,
        policy: &mut P,
        mut compute: F,
    ) -> std::result::Result<Version, Abort<E>>
    where
        P: RetryPolicy + ?Sized,
        F: FnMut(&Arc<T>) -> std::result::Result<Arc<T>, E>,
    {
        let mut attempt: u32 = 0;
        loop {
            if let Some(version) = self.attempt(&mut compute).map_err(Abort::Rejected)? {
                return Ok(version);
            }

            attempt = attempt.saturating_add(1);
            trace!(cell = %self.id(), attempt, "commit conflict");
            if !policy.on_conflict(attempt) {
                warn!(cell = %self.id(), attempts = attempt, "retry policy gave up");
                return Err(Abort::GaveUp(Error::RetriesExhausted {
                    cell: self.id(),
                    attempts: attempt,
                }));
            }
        }
    }
}

/// Why a policy-driven write loop stopped without committing
enum Abort<E> {
    /// The mutator rejected the change
    Rejected(E),
    /// The retry policy declined another attempt
    GaveUp(Error),
}

impl Abort<Infallible> {
    fn into_error(self) -> Error {
        match self {
            Abort::GaveUp(e) => e,
            Abort::Rejected(never) => match never {},
        }
    }
}

impl<T: Clone + Send + Sync + 'static> OccBox<T> {
    // =========================================================================
    // Value-mode writes
    // =========================================================================

    /// Mutate a private copy of the current value and publish it
    ///
    /// Retries until it commits and returns the committed version. `mutator`
    /// may run more than once.
    pub fn write<F>(&self, mut mutator: F) -> Version
    where
        F: FnMut(&mut T),
    {
        let compute = |current: &Arc<T>| Ok::<_, Infallible>(copy_and_mutate(current, &mut mutator));
        match self.spin_loop(compute) {
            Ok(version) => version,
            Err(never) => match never {},
        }
    }

    /// [`write`](Self::write) driven by a caller-supplied retry policy
    ///
    /// Returns the committed version, or `Error::RetriesExhausted` if the
    /// policy gave up. The cell is untouched in the error case.
    pub fn write_with<P, F>(&self, policy: &mut P, mut mutator: F) -> Result<Version>
    where
        P: RetryPolicy + ?Sized,
        F: FnMut(&mut T),
    {
        self.policy_loop(policy, |current| {
            Ok::<_, Infallible>(copy_and_mutate(current, &mut mutator))
        })
        .map_err(Abort::<Infallible>::into_error)
    }

    /// [`write`](Self::write) with at most `attempts` commit attempts
    pub fn try_write<F>(&self, mutator: F, attempts: u32) -> bool
    where
        F: FnMut(&mut T),
    {
        self.write_with(&mut Bounded::new(attempts), mutator).is_ok()
    }

    /// Write with a mutator that may reject the change
    ///
    /// An `Err` from `mutator` abandons the write and is returned unchanged;
    /// nothing is committed. Conflicts are retried like [`write`](Self::write).
    /// On success returns the committed version.
    pub fn update<E, F>(&self, mut mutator: F) -> std::result::Result<Version, E>
    where
        F: FnMut(&mut T) -> std::result::Result<(), E>,
    {
        self.spin_loop(|current| try_copy_and_mutate(current, &mut mutator))
    }

    /// [`update`](Self::update) driven by a caller-supplied retry policy
    ///
    /// A policy that gives up surfaces as `Error::RetriesExhausted`,
    /// converted into the mutator's error type.
    pub fn update_with<P, E, F>(
        &self,
        policy: &mut P,
        mut mutator: F,
    ) -> std::result::Result<Version, E>
    where
        P: RetryPolicy + ?Sized,
        E: From<Error>,
        F: FnMut(&mut T) -> std::result::Result<(), E>,
    {
        self.policy_loop(policy, |current| try_copy_and_mutate(current, &mut mutator))
            .map_err(|abort| match abort {
                Abort::Rejected(e) => e,
                Abort::GaveUp(e) => E::from(e),
            })
    }

    /// Consume the box and return its value
    ///
    /// Clones only if a snapshot taken earlier still shares the value.
    pub fn into_inner(self) -> T {
        let value = self.load();
        drop(self);
        Arc::try_unwrap(value).unwrap_or_else(|shared| T::clone(&shared))
    }
}

fn copy_and_mutate<T, F>(current: &Arc<T>, mutator: &mut F) -> Arc<T>
where
    T: Clone,
    F: FnMut(&mut T),
{
    let mut next = T::clone(current);
    mutator(&mut next);
    Arc::new(next)
}

fn try_copy_and_mutate<T, E, F>(current: &Arc<T>, mutator: &mut F) -> std::result::Result<Arc<T>, E>
where
    T: Clone,
    F: FnMut(&mut T) -> std::result::Result<(), E>,
{
    let mut next = T::clone(current);
    mutator(&mut next)?;
    Ok(Arc::new(next))
}

impl<T: Default + Send + Sync + 'static> Default for OccBox<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Send + Sync + 'static> From<T> for OccBox<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

impl<T: fmt::Debug + Send + Sync + 'static> fmt::Debug for OccBox<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.cell.snapshot();
        f.debug_struct("OccBox")
            .field("id", &self.id())
            .field("version", &snapshot.version())
            .field("value", snapshot.value())
            .finish()
    }
}
