//! Core types for occbox
//!
//! This crate defines the vocabulary shared by every layer:
//! - [`CellId`]: stable identity of a versioned cell, used for lock ordering
//! - [`Version`]: per-cell commit counter
//! - [`Error`]: unified error type

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{CellId, Version, INITIAL_VERSION};
