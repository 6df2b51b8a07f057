//! Transformers: raw source rows to target-shaped, validated records.
//!
//! A transformer emits exactly one [`Record`] per input row, in input order.
//! Rows that fail coercion or validation are flagged, never dropped, so the
//! loader and the run log can still identify them.

mod coerce;
pub mod field_map;
mod rules;

use syncforge_types::{Row, SyncError};
use syncforge_validation::ValidationError;

pub use coerce::FieldType;
pub use field_map::FieldMapTransformer;

/// Outcome of transforming one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordStatus {
    Ok,
    /// `field: message` lines for every error on the record.
    Failed(Vec<String>),
    /// The row asked to be excluded from the run.
    Skipped(String),
}

/// One transformed record.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Position of the source row within the run.
    pub index: usize,
    pub raw: Row,
    pub values: Row,
    pub natural_key: Option<String>,
    pub status: RecordStatus,
    pub warnings: Vec<String>,
}

impl Record {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == RecordStatus::Ok
    }

    #[must_use]
    pub fn is_skipped(&self) -> bool {
        matches!(self.status, RecordStatus::Skipped(_))
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self.status, RecordStatus::Failed(_))
    }

    /// Natural key when known, otherwise the row position.
    #[must_use]
    pub fn identity(&self) -> String {
        self.natural_key
            .clone()
            .unwrap_or_else(|| format!("#{}", self.index))
    }

    /// Flag the record as failed, keeping any earlier messages.
    pub fn fail(&mut self, message: impl Into<String>) {
        match &mut self.status {
            RecordStatus::Failed(messages) => messages.push(message.into()),
            _ => self.status = RecordStatus::Failed(vec![message.into()]),
        }
    }

    /// Single-line summary of why the record failed.
    #[must_use]
    pub fn error_summary(&self) -> String {
        match &self.status {
            RecordStatus::Failed(messages) => messages.join("; "),
            RecordStatus::Skipped(reason) => reason.clone(),
            RecordStatus::Ok => String::new(),
        }
    }
}

/// Maps raw rows to records and exposes post-transform checks.
pub trait Transformer: Send + Sync {
    /// Registry key this transformer was built from.
    fn kind(&self) -> &'static str;

    /// Transform one page. `offset` is the run-wide index of `rows[0]`.
    ///
    /// # Errors
    ///
    /// Only systemic failures are returned; per-row problems are recorded on
    /// the row's [`Record`].
    fn transform(&self, rows: Vec<Row>, offset: usize) -> Result<Vec<Record>, SyncError>;

    /// Re-run the configured checks against an already transformed record.
    fn validate(&self, record: &Record) -> Vec<ValidationError>;
}
