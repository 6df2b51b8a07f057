//! Structured error model for extract, transform, and load operations.
//!
//! [`SyncError`] carries classification and retry metadata. Construct via the
//! category-specific factory methods; the category decides whether the
//! scheduler may retry the run.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Broad classification of a sync error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Invalid mapping or component configuration.
    Config,
    /// Source or store unreachable (retryable).
    Connectivity,
    /// A blocking call exceeded its deadline (retryable).
    Timeout,
    /// Malformed query against the source.
    Query,
    /// Systemic transformer failure.
    Transform,
    /// Systemic persistence failure.
    Load,
    /// Invalid record data.
    Data,
    /// Internal error.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Config => "config",
            Self::Connectivity => "connectivity",
            Self::Timeout => "timeout",
            Self::Query => "query",
            Self::Transform => "transform",
            Self::Load => "load",
            Self::Data => "data",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Which pipeline stage raised the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Extract,
    Transform,
    Load,
    Engine,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Extract => "extract",
            Self::Transform => "transform",
            Self::Load => "load",
            Self::Engine => "engine",
        };
        f.write_str(s)
    }
}

/// Retry backoff strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffClass {
    /// Millisecond-scale retry.
    Fast,
    /// Second-scale retry.
    Normal,
    /// Minute-scale retry.
    Slow,
}

/// Structured error from a pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("[{stage}/{category}] {code}: {message}")]
pub struct SyncError {
    pub stage: Stage,
    pub category: ErrorCategory,
    pub code: String,
    pub message: String,
    pub retryable: bool,
    pub backoff_class: BackoffClass,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl SyncError {
    fn new(
        stage: Stage,
        category: ErrorCategory,
        retryable: bool,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            stage,
            category,
            code: code.into(),
            message: message.into(),
            retryable,
            backoff_class: BackoffClass::Normal,
            details: None,
        }
    }

    /// Configuration error (not retryable).
    #[must_use]
    pub fn config(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Stage::Engine, ErrorCategory::Config, false, code, message)
    }

    /// Source connectivity failure (retryable).
    #[must_use]
    pub fn extract_connect(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Stage::Extract, ErrorCategory::Connectivity, true, code, message)
    }

    /// Malformed query or missing source object (not retryable).
    #[must_use]
    pub fn extract_query(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Stage::Extract, ErrorCategory::Query, false, code, message)
    }

    /// Systemic transform failure (not retryable).
    #[must_use]
    pub fn transform(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Stage::Transform, ErrorCategory::Transform, false, code, message)
    }

    /// Systemic persistence failure (not retryable).
    #[must_use]
    pub fn load(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Stage::Load, ErrorCategory::Load, false, code, message)
    }

    /// Destination store unreachable or busy (retryable).
    #[must_use]
    pub fn load_connect(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Stage::Load, ErrorCategory::Connectivity, true, code, message)
    }

    /// Deadline exceeded in the given stage (retryable, fast backoff).
    #[must_use]
    pub fn timeout(stage: Stage, message: impl Into<String>) -> Self {
        let mut err = Self::new(stage, ErrorCategory::Timeout, true, "TIMEOUT", message);
        err.backoff_class = BackoffClass::Fast;
        err
    }

    /// Record-level data error (not retryable).
    #[must_use]
    pub fn data(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Stage::Transform, ErrorCategory::Data, false, code, message)
    }

    /// Internal error (not retryable).
    #[must_use]
    pub fn internal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Stage::Engine, ErrorCategory::Internal, false, code, message)
    }

    /// Attach structured diagnostic details.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Override the backoff class.
    #[must_use]
    pub fn with_backoff(mut self, class: BackoffClass) -> Self {
        self.backoff_class = class;
        self
    }

    /// Whether this error came from the extract stage.
    #[must_use]
    pub fn is_extract(&self) -> bool {
        self.stage == Stage::Extract
    }
}
