//! State backend model types.
//!
//! Pure data types used by `StateBackend` implementations and the engine.
//! Kept in the types crate so the state and engine crates can share them
//! without circular dependencies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorCategory;

/// Maximum number of error messages kept on a run record.
pub const MAX_RUN_ERRORS: usize = 10;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Registry identifier of a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MappingId(i64);

impl MappingId {
    #[must_use]
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    #[must_use]
    pub fn get(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for MappingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a run record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(i64);

impl RunId {
    #[must_use]
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    #[must_use]
    pub fn get(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Run tracking
// ---------------------------------------------------------------------------

/// Lifecycle status of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Partial,
    Failed,
    Unknown,
}

impl RunStatus {
    /// Wire-format string for storage.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Partial => "partial",
            Self::Failed => "failed",
            Self::Unknown => "unknown",
        }
    }

    /// Parse a stored status. Unrecognised strings map to `Unknown`.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw {
            "pending" => Self::Pending,
            "running" => Self::Running,
            "completed" => Self::Completed,
            "partial" => Self::Partial,
            "failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }

    /// Whether the run has reached an end state.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Partial | Self::Failed)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Full refresh or watermark-bounded incremental run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Incremental,
    Full,
}

impl RunMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Incremental => "incremental",
            Self::Full => "full",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Self {
        if raw == "incremental" {
            Self::Incremental
        } else {
            Self::Full
        }
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate counters for a run. `records_processed` always equals
/// succeeded plus failed; skipped rows are tracked on their own.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub records_processed: u64,
    pub records_created: u64,
    pub records_updated: u64,
    pub records_unchanged: u64,
    pub records_failed: u64,
    pub records_skipped: u64,
    /// First [`MAX_RUN_ERRORS`] record-level error messages.
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_trace: Option<String>,
}

impl RunStats {
    /// Records that reached the store (created, updated, or already current).
    #[must_use]
    pub fn records_succeeded(&self) -> u64 {
        self.records_created + self.records_updated + self.records_unchanged
    }

    /// Append a record-level error, keeping only the first few.
    pub fn push_error(&mut self, message: impl Into<String>) {
        if self.errors.len() < MAX_RUN_ERRORS {
            self.errors.push(message.into());
        }
    }
}

/// Persisted outcome of one pipeline execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: RunId,
    pub mapping_id: MappingId,
    pub mode: RunMode,
    pub status: RunStatus,
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stats: RunStats,
}

/// A record that failed to load, kept so the failed subset can be retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedRecord {
    pub record_key: Option<String>,
    pub record_json: String,
    pub error_message: String,
    pub error_category: ErrorCategory,
    pub failed_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Watermarks
// ---------------------------------------------------------------------------

/// Per-mapping incremental state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    pub mapping_id: MappingId,
    /// When a run last started.
    pub last_sync_time: Option<DateTime<Utc>>,
    /// When a run last completed without fatal error.
    pub last_successful_sync_time: Option<DateTime<Utc>>,
    pub last_sync_id: Option<String>,
    pub last_successful_id: Option<String>,
}

impl Watermark {
    #[must_use]
    pub fn empty(mapping_id: MappingId) -> Self {
        Self {
            mapping_id,
            last_sync_time: None,
            last_successful_sync_time: None,
            last_sync_id: None,
            last_successful_id: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Mapping registry
// ---------------------------------------------------------------------------

/// A named external system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub id: i64,
    pub name: String,
    pub extractor: String,
    pub config: serde_json::Value,
}

/// A named destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRecord {
    pub id: i64,
    pub name: String,
    pub loader: String,
    pub unique_field: Option<String>,
    pub conflict_strategy: String,
}

/// The (source, target, entity type) configuration unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingRecord {
    pub id: MappingId,
    pub source: String,
    pub target: String,
    pub entity_type: String,
    pub active: bool,
    /// The full declarative mapping block, as loaded from configuration.
    pub config: serde_json::Value,
}
