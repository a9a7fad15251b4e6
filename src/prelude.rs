//! Convenient imports for occbox.
//!
//! ```
//! use occbox::prelude::*;
//!
//! let cell = OccBox::new(1);
//! cell.write(|v| *v += 1);
//! ```

// Boxes and transactions
pub use crate::{apply2, CommitReceipt, OccBox, Snapshot, Transaction};

// Retry control
pub use crate::{Bounded, ExponentialBackoff, RetryConfig, RetryPolicy, Spin};

// Error handling
pub use crate::{Error, Result};

// Core types
pub use crate::{CellId, Version};
