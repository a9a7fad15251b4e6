//! # occbox
//!
//! Optimistic concurrency control for in-process shared values.
//!
//! An [`OccBox`] holds one value behind a versioned cell. Readers take
//! consistent snapshots without blocking writers; writers compute a new value
//! from a snapshot and commit it only if nobody else committed first, retrying
//! otherwise. A [`Transaction`] commits mutations to several boxes with
//! all-or-nothing visibility.
//!
//! ## Quick Start
//!
//! ```
//! use occbox::prelude::*;
//!
//! let a = OccBox::new(100);
//! let b = OccBox::new(200);
//!
//! // Single-box optimistic write
//! a.write(|v| *v += 1);
//!
//! // Atomic transfer across two boxes
//! let ok = Transaction::new()
//!     .update(&a, |v| *v -= 51)
//!     .update(&b, |v| *v += 51)
//!     .apply();
//!
//! assert!(ok);
//! assert_eq!(a.read(|v| *v), 50);
//! assert_eq!(b.read(|v| *v), 251);
//! ```
//!
//! ## Retry Control
//!
//! `write` retries until it commits. Callers that need a bound or a backoff
//! pass a [`RetryPolicy`] to `write_with`, or describe one with
//! [`RetryConfig`]:
//!
//! ```
//! use occbox::prelude::*;
//! use std::time::Duration;
//!
//! let config = RetryConfig::builder()
//!     .exponential(Duration::from_micros(50), Duration::from_millis(5))
//!     .max_attempts(16)
//!     .jitter(true)
//!     .build()?;
//! let mut policy = config.into_policy()?;
//!
//! let counter = OccBox::new(0u64);
//! counter.write_with(&mut *policy, |v| *v += 1)?;
//! # Ok::<(), occbox::Error>(())
//! ```
//!
//! ## Layers
//!
//! - [`occbox_core`]: ids, versions, errors
//! - [`occbox_concurrency`]: cells, boxes, transactions, retry policies

#![warn(missing_docs)]

pub mod prelude;

pub use occbox_concurrency::{
    apply2, cell, latch, occ_box, retry, transaction, Bounded, CommitReceipt,
    ExponentialBackoff, OccBox, RetryConfig, RetryConfigBuilder, RetryPolicy, Snapshot, Spin,
    Transaction, VersionedCell,
};
pub use occbox_core::{CellId, Error, Result, Version, INITIAL_VERSION};

/// Current version of occbox
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
