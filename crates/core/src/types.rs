//! Identity and version types for versioned cells
//!
//! - [`CellId`]: process-unique, creation-ordered cell identity
//! - [`Version`]: monotonically increasing commit counter

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Commit counter of a single cell.
///
/// Starts at [`INITIAL_VERSION`] and increases by exactly one on every
/// successful commit. Never decreases.
pub type Version = u64;

/// Version carried by a freshly constructed cell.
pub const INITIAL_VERSION: Version = 0;

static NEXT_CELL_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a versioned cell
///
/// Ids are handed out from a process-wide counter at cell construction, so
/// they are unique for the lifetime of the process and totally ordered by
/// creation. Multi-cell commits acquire cells in ascending id order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellId(u64);

impl CellId {
    /// Allocate the next unused id
    ///
    /// # Examples
    ///
    /// ```
    /// use occbox_core::CellId;
    ///
    /// let a = CellId::next();
    /// let b = CellId::next();
    /// assert!(a < b);
    /// ```
    pub fn next() -> Self {
        CellId(NEXT_CELL_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for CellId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cell#{}", self.0)
    }
}
