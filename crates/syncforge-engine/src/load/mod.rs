//! Loaders: persist transformed records into the destination store.

pub mod sqlite;
pub mod store;

use async_trait::async_trait;
use syncforge_types::{ErrorCategory, SyncError};

use crate::transform::Record;

pub use sqlite::SqliteTableLoader;
pub use store::{EntityWrite, LocalStore, StoreError, StoredEntity, WriteOutcome};

/// A record the loader refused, reported before the commit boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadFailure {
    pub index: usize,
    pub natural_key: Option<String>,
    pub message: String,
    pub category: ErrorCategory,
}

/// Per-call counts. Skipped records are not counted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub created: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub failures: Vec<LoadFailure>,
}

impl LoadSummary {
    #[must_use]
    pub fn failed(&self) -> u64 {
        self.failures.len() as u64
    }

    #[must_use]
    pub fn succeeded(&self) -> u64 {
        self.created + self.updated + self.unchanged
    }

    pub fn record(&mut self, outcome: WriteOutcome) {
        match outcome {
            WriteOutcome::Created => self.created += 1,
            WriteOutcome::Updated => self.updated += 1,
            WriteOutcome::Unchanged => self.unchanged += 1,
        }
    }
}

#[async_trait]
pub trait Loader: Send + Sync {
    /// Registry key this loader was built from.
    fn kind(&self) -> &'static str;

    /// Per-run setup, such as building the parent lookup. Called once before
    /// the first [`Loader::load`].
    ///
    /// # Errors
    ///
    /// Returns a load error if the destination cannot be read.
    async fn prepare(&mut self) -> Result<(), SyncError>;

    /// Persist one sub-batch atomically. Records that cannot be written are
    /// returned as failures and excluded from the commit.
    ///
    /// # Errors
    ///
    /// A returned error means nothing from this sub-batch was committed.
    async fn load(&mut self, records: &[Record]) -> Result<LoadSummary, SyncError>;
}
