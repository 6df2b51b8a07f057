//! Shared syncforge record, error, and state model types.
//!
//! This crate sits at the bottom of the dependency graph so validation,
//! state, and engine crates can share types without circular dependencies.

pub mod error;
pub mod state;
pub mod value;

pub use error::{BackoffClass, ErrorCategory, Stage, SyncError};
pub use value::{Row, Value};
