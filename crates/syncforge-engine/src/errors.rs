//! Pipeline error model and retry backoff helpers.

use std::time::Duration;

use syncforge_types::error::{BackoffClass, SyncError};

// ---------------------------------------------------------------------------
// PipelineError: categorised errors for retry decisions
// ---------------------------------------------------------------------------

/// Categorized pipeline error for retry decisions.
///
/// `Sync` wraps a typed [`SyncError`] raised by an extractor, transformer,
/// or loader, carrying `retryable` and `backoff_class`.
///
/// `Infrastructure` wraps opaque host-side errors (state backend failures,
/// panicked blocking tasks, configuration glue) that are never retryable.
#[derive(Debug)]
pub enum PipelineError {
    /// Typed stage error with retry metadata.
    Sync(SyncError),
    /// Infrastructure error (state backend, task join, etc.)
    Infrastructure(anyhow::Error),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sync(e) => write!(f, "{e}"),
            Self::Infrastructure(e) => write!(f, "{e:#}"),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<anyhow::Error> for PipelineError {
    fn from(e: anyhow::Error) -> Self {
        Self::Infrastructure(e)
    }
}

impl From<SyncError> for PipelineError {
    fn from(e: SyncError) -> Self {
        Self::Sync(e)
    }
}

impl PipelineError {
    /// Returns `true` if this is a typed stage error marked as retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Sync(e) => e.retryable,
            Self::Infrastructure(_) => false,
        }
    }

    /// Returns the typed stage error if this is a `Sync` variant.
    #[must_use]
    pub fn as_sync_error(&self) -> Option<&SyncError> {
        match self {
            Self::Sync(e) => Some(e),
            Self::Infrastructure(_) => None,
        }
    }

    /// Error text plus cause chain, for the run record's trace column.
    #[must_use]
    pub fn trace(&self) -> String {
        match self {
            Self::Sync(e) => match &e.details {
                Some(details) => format!("{e}\ndetails: {details}"),
                None => e.to_string(),
            },
            Self::Infrastructure(e) => e
                .chain()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("\ncaused by: "),
        }
    }
}

/// Exponential backoff: `base × 2^(attempt-1)`, scaled by the error's
/// backoff class and capped at `max`.
#[must_use]
pub fn compute_backoff(class: BackoffClass, base: Duration, max: Duration, attempt: u32) -> Duration {
    #[allow(clippy::cast_possible_truncation)]
    let base_ms = base.as_millis() as u64;
    let class_base_ms = match class {
        BackoffClass::Fast => base_ms / 10,
        BackoffClass::Normal => base_ms,
        BackoffClass::Slow => base_ms.saturating_mul(5),
    };
    let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
    let delay = Duration::from_millis(class_base_ms.saturating_mul(factor));
    delay.min(max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncforge_types::error::{ErrorCategory, Stage};

    const BASE: Duration = Duration::from_millis(1_000);
    const MAX: Duration = Duration::from_millis(60_000);

    #[test]
    fn test_pipeline_error_sync_is_retryable() {
        let err = PipelineError::Sync(SyncError::extract_connect(
            "OPEN_FAILED",
            "unable to open database file",
        ));
        assert!(err.is_retryable());
        let se = err.as_sync_error().unwrap();
        assert_eq!(se.category, ErrorCategory::Connectivity);
        assert_eq!(se.backoff_class, BackoffClass::Normal);
    }

    #[test]
    fn test_pipeline_error_sync_not_retryable() {
        let err = PipelineError::Sync(SyncError::config("MISSING_TABLE", "table is required"));
        assert!(!err.is_retryable());
        assert_eq!(err.as_sync_error().unwrap().category, ErrorCategory::Config);
    }

    #[test]
    fn test_pipeline_error_infrastructure_not_retryable() {
        let err = PipelineError::Infrastructure(anyhow::anyhow!("state backend lock poisoned"));
        assert!(!err.is_retryable());
        assert!(err.as_sync_error().is_none());
    }

    #[test]
    fn test_pipeline_error_from_anyhow() {
        let pe: PipelineError = anyhow::anyhow!("something went wrong").into();
        assert!(matches!(pe, PipelineError::Infrastructure(_)));
        assert!(!pe.is_retryable());
    }

    #[test]
    fn test_pipeline_error_display_sync() {
        let err = PipelineError::Sync(SyncError::timeout(Stage::Extract, "page fetch exceeded 60s"));
        let msg = format!("{err}");
        assert!(msg.contains("timeout"));
        assert!(msg.contains("TIMEOUT"));
        assert!(msg.contains("page fetch exceeded 60s"));
    }

    #[test]
    fn test_trace_includes_cause_chain() {
        let err = PipelineError::Infrastructure(
            anyhow::anyhow!("no such table: runs").context("complete_run failed"),
        );
        let trace = err.trace();
        assert!(trace.starts_with("complete_run failed"));
        assert!(trace.contains("caused by: no such table"));
    }

    #[test]
    fn test_backoff_fast() {
        assert_eq!(compute_backoff(BackoffClass::Fast, BASE, MAX, 1), Duration::from_millis(100));
        assert_eq!(compute_backoff(BackoffClass::Fast, BASE, MAX, 2), Duration::from_millis(200));
        assert_eq!(compute_backoff(BackoffClass::Fast, BASE, MAX, 3), Duration::from_millis(400));
    }

    #[test]
    fn test_backoff_normal() {
        assert_eq!(compute_backoff(BackoffClass::Normal, BASE, MAX, 1), Duration::from_millis(1000));
        assert_eq!(compute_backoff(BackoffClass::Normal, BASE, MAX, 2), Duration::from_millis(2000));
    }

    #[test]
    fn test_backoff_slow() {
        assert_eq!(compute_backoff(BackoffClass::Slow, BASE, MAX, 1), Duration::from_millis(5000));
        assert_eq!(compute_backoff(BackoffClass::Slow, BASE, MAX, 2), Duration::from_millis(10000));
    }

    #[test]
    fn test_backoff_capped() {
        assert_eq!(compute_backoff(BackoffClass::Normal, BASE, MAX, 20), MAX);
        assert_eq!(compute_backoff(BackoffClass::Slow, BASE, MAX, 64), MAX);
    }
}
