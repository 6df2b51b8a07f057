//! State backend trait definition.
//!
//! [`StateBackend`] defines the storage contract for the mapping registry,
//! per-mapping watermarks, run history, and the failed-record log. Model
//! types live in [`syncforge_types::state`].

use chrono::{DateTime, Utc};
use syncforge_types::state::{
    FailedRecord, MappingId, MappingRecord, RunId, RunMode, RunRecord, RunStats, RunStatus,
    Watermark,
};

use crate::error;

/// Selects mappings from the registry. Every set field must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingFilter {
    pub entity_type: Option<String>,
    pub source: Option<String>,
    pub target: Option<String>,
    pub active_only: bool,
}

impl MappingFilter {
    /// Every active mapping.
    #[must_use]
    pub fn active() -> Self {
        Self {
            active_only: true,
            ..Self::default()
        }
    }
}

/// Storage contract for sync state.
///
/// Implementations must be `Send + Sync` for use behind `Arc<dyn StateBackend>`.
pub trait StateBackend: Send + Sync {
    /// Create the named source or update its extractor and config.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn upsert_source(
        &self,
        name: &str,
        extractor: &str,
        config: &serde_json::Value,
    ) -> error::Result<i64>;

    /// Create the named target or update its loader settings.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn upsert_target(
        &self,
        name: &str,
        loader: &str,
        unique_field: Option<&str>,
        conflict_strategy: &str,
    ) -> error::Result<i64>;

    /// Create the (source, target, entity type) mapping or update its
    /// active flag and config. Repeated calls converge on one row.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn upsert_mapping(
        &self,
        source_id: i64,
        target_id: i64,
        entity_type: &str,
        active: bool,
        config: &serde_json::Value,
    ) -> error::Result<MappingId>;

    /// Fetch one mapping by id.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn get_mapping(&self, id: MappingId) -> error::Result<Option<MappingRecord>>;

    /// Mappings matching `filter`, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn list_mappings(&self, filter: &MappingFilter) -> error::Result<Vec<MappingRecord>>;

    /// Deactivate every mapping whose id is not in `keep`. Returns the
    /// number of mappings switched off.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn deactivate_except(&self, keep: &[MappingId]) -> error::Result<u64>;

    /// Entity types with more than one active mapping.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn duplicate_active_mappings(&self) -> error::Result<Vec<(String, Vec<MappingId>)>>;

    /// Read the watermark for a mapping. A mapping that has never run
    /// yields [`Watermark::empty`].
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn get_watermark(&self, mapping: MappingId) -> error::Result<Watermark>;

    /// Record that a run started at `at`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn mark_sync_started(&self, mapping: MappingId, at: DateTime<Utc>) -> error::Result<()>;

    /// Remember the last record identifier a run saw.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn record_last_seen(&self, mapping: MappingId, last_id: &str) -> error::Result<()>;

    /// Advance the successful watermark to `at`. The stored time never
    /// moves backward; returns `false` when `at` is older than the stored
    /// value and nothing changed.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn mark_sync_succeeded(
        &self,
        mapping: MappingId,
        at: DateTime<Utc>,
        last_id: Option<&str>,
    ) -> error::Result<bool>;

    /// Begin a new run in `running` state, returning its id.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn start_run(&self, mapping: MappingId, mode: RunMode, attempt: u32) -> error::Result<RunId>;

    /// Finalize a run with its terminal status and counters. A run can be
    /// finalized once; later calls fail with
    /// [`StateError::RunFinished`](crate::error::StateError::RunFinished).
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn complete_run(&self, run: RunId, status: RunStatus, stats: &RunStats) -> error::Result<()>;

    /// Fetch one run record.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn get_run(&self, run: RunId) -> error::Result<Option<RunRecord>>;

    /// Most recent runs first, optionally for one mapping.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn list_runs(&self, mapping: Option<MappingId>, limit: usize)
        -> error::Result<Vec<RunRecord>>;

    /// Persist records that failed during a run. Returns the count inserted.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn insert_failed_records(
        &self,
        mapping: MappingId,
        run: RunId,
        records: &[FailedRecord],
    ) -> error::Result<u64>;

    /// Failed records stored for one run, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn list_failed_records(&self, run: RunId) -> error::Result<Vec<FailedRecord>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Verify the trait is object-safe (can be used as `dyn StateBackend`).
    #[test]
    fn trait_is_object_safe() {
        fn _assert_object_safe(_: &dyn StateBackend) {}
    }

    #[test]
    fn active_filter_only_sets_flag() {
        let filter = MappingFilter::active();
        assert!(filter.active_only);
        assert!(filter.entity_type.is_none());
    }
}
