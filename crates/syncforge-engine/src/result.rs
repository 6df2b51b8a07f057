//! Pipeline execution result types.

use std::time::Duration;

use syncforge_types::state::{MappingId, RunRecord, RunStats, RunStatus};

use crate::errors::PipelineError;

/// Stage timing breakdown for one run.
#[derive(Debug, Clone, Default)]
pub struct StageTiming {
    pub extract_secs: f64,
    pub transform_secs: f64,
    pub load_secs: f64,
    pub pages: u64,
    pub batches: u64,
}

/// Result of one pipeline attempt that reached a terminal state.
///
/// A failed attempt still produces a result: the run record carries the
/// partial counts and the error text, and `failure` holds the typed error
/// so the retry layer can classify it.
#[derive(Debug)]
pub struct PipelineResult {
    pub run: RunRecord,
    pub timing: StageTiming,
    pub duration: Duration,
    /// Whether `last_successful_sync_time` moved forward.
    pub watermark_advanced: bool,
    pub failure: Option<PipelineError>,
}

impl PipelineResult {
    #[must_use]
    pub fn status(&self) -> RunStatus {
        self.run.status
    }

    #[must_use]
    pub fn stats(&self) -> &RunStats {
        &self.run.stats
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.failure.as_ref().is_some_and(PipelineError::is_retryable)
    }
}

/// Final outcome of a mapping run, including every retry attempt.
#[derive(Debug)]
pub struct MappingOutcome {
    pub mapping_id: MappingId,
    pub entity_type: String,
    /// One entry per attempt, oldest first. Empty only when the run could
    /// not be started at all.
    pub attempts: Vec<PipelineResult>,
    /// Set when no attempt produced a run record (the pipeline could not be
    /// built, or the state backend was unreachable).
    pub error: Option<PipelineError>,
}

impl MappingOutcome {
    /// The last attempt's result.
    #[must_use]
    pub fn last(&self) -> Option<&PipelineResult> {
        self.attempts.last()
    }

    /// Terminal status of the final attempt, `failed` when none ran.
    #[must_use]
    pub fn status(&self) -> RunStatus {
        self.last().map_or(RunStatus::Failed, PipelineResult::status)
    }

    #[must_use]
    pub fn retry_count(&self) -> u32 {
        u32::try_from(self.attempts.len().saturating_sub(1)).unwrap_or(u32::MAX)
    }

    /// Error text for the final failure, if any.
    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        if let Some(err) = &self.error {
            return Some(err.to_string());
        }
        self.last()
            .and_then(|r| r.failure.as_ref())
            .map(ToString::to_string)
    }
}

/// Result of checking one mapping's components without running it.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub entity_type: String,
    pub source_ok: bool,
    pub problems: Vec<String>,
}

impl CheckResult {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.source_ok && self.problems.is_empty()
    }
}
