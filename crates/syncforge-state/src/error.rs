//! State backend error types.

/// Errors produced by [`StateBackend`](crate::StateBackend) operations.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Underlying `SQLite` failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// `SQLite` failure annotated with the operation that hit it.
    #[error("{context}: {source}")]
    Backend {
        context: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    /// File-system I/O failure (e.g. creating the database directory).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal mutex was poisoned by a panicked thread.
    #[error("state backend lock poisoned")]
    LockPoisoned,

    /// Attempt to finalize a run that is no longer running.
    #[error("run {0} is not running; run records are immutable once finished")]
    RunFinished(i64),

    /// Referenced row does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// Stored data could not be decoded.
    #[error("corrupt state: {0}")]
    Corrupt(String),
}

impl StateError {
    /// Wrap a `SQLite` error with operation context.
    #[must_use]
    pub fn backend_context(context: &'static str, source: rusqlite::Error) -> Self {
        Self::Backend { context, source }
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, StateError>;
