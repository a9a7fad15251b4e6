//! Unified error type for occbox operations.
//!
//! A version conflict is an ordinary outcome of optimistic concurrency. The
//! single-cell write loops recover from it internally; it only surfaces as an
//! error from a transaction commit or from a write loop whose retry policy
//! gave up.

use crate::types::{CellId, Version};
use thiserror::Error;

/// All occbox errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A cell changed between snapshot and commit
    #[error("version conflict on {cell}: expected {expected}, found {actual}")]
    Conflict {
        /// Cell whose version moved
        cell: CellId,
        /// Version captured by the snapshot
        expected: Version,
        /// Version found at commit time
        actual: Version,
    },

    /// The same cell was named twice in one transaction
    #[error("{0} appears more than once in one transaction")]
    DuplicateCell(CellId),

    /// A retry policy stopped a write loop before it could commit
    #[error("retry budget exhausted on {cell} after {attempts} attempts")]
    RetriesExhausted {
        /// Cell being written
        cell: CellId,
        /// Commit attempts made, all of which conflicted
        attempts: u32,
    },

    /// Retry configuration rejected by validation
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for occbox operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if this is a version conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }

    /// Check if this error is retryable.
    ///
    /// Conflicts and exhausted retry budgets may succeed when attempted again
    /// against fresh data. Misuse and configuration errors never will.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Conflict { .. } | Error::RetriesExhausted { .. })
    }

    /// Cell the error refers to, if any.
    pub fn cell(&self) -> Option<CellId> {
        match self {
            Error::Conflict { cell, .. }
            | Error::RetriesExhausted { cell, .. }
            | Error::DuplicateCell(cell) => Some(*cell),
            Error::InvalidConfig(_) => None,
        }
    }
}
