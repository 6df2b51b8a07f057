//! Sync state persistence.
//!
//! Provides the [`StateBackend`] trait and a [`SqliteStateBackend`]
//! implementation for the mapping registry, per-mapping watermarks, the
//! append-only run log, and the failed-record log.

#![warn(clippy::pedantic)]

pub mod backend;
pub mod error;
pub mod sqlite;

pub use backend::{MappingFilter, StateBackend};
pub use error::StateError;
pub use sqlite::SqliteStateBackend;

/// Common imports for state backend consumers.
pub mod prelude {
    pub use crate::backend::{MappingFilter, StateBackend};
    pub use crate::error::StateError;
    pub use crate::sqlite::SqliteStateBackend;
    pub use syncforge_types::state::{
        FailedRecord, MappingId, MappingRecord, RunId, RunMode, RunRecord, RunStats, RunStatus,
        Watermark,
    };
}
