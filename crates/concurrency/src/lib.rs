//! Concurrency layer for occbox
//!
//! This crate implements optimistic concurrency control (OCC) with:
//! - VersionedCell: atomic `(value, version)` pair with compare-and-commit
//! - OccBox: snapshot reads and retrying optimistic writes
//! - Transaction: all-or-nothing commits across several boxes
//! - RetryPolicy: injectable retry and backoff for write loops

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cell;
pub mod latch;
pub mod occ_box;
pub mod retry;
pub mod transaction;

pub use cell::{Snapshot, VersionedCell};
pub use latch::{CommitLatch, LatchGuard};
pub use occ_box::OccBox;
pub use retry::{Bounded, ExponentialBackoff, RetryConfig, RetryConfigBuilder, RetryPolicy, Spin};
pub use transaction::{apply2, CommitReceipt, Transaction};

// Re-export the shared vocabulary for convenience
pub use occbox_core::{CellId, Error, Result, Version, INITIAL_VERSION};
