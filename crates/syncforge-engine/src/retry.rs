//! Retry policy and the generic run-with-retry wrapper.
//!
//! The policy is a plain value: attempt bound, backoff base and cap, and a
//! predicate deciding which errors are worth another attempt. By default
//! only transient errors (connectivity, timeout) qualify.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use syncforge_types::BackoffClass;

use crate::config::types::RetryConfig;
use crate::errors::{compute_backoff, PipelineError};
use crate::result::PipelineResult;

type RetryPredicate = Arc<dyn Fn(&PipelineError) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first; `1` disables retry.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    predicate: RetryPredicate,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish_non_exhaustive()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            predicate: Arc::new(PipelineError::is_retryable),
        }
    }

    #[must_use]
    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
    }

    /// Single attempt, never retried.
    #[must_use]
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    /// Replace the retryable-error predicate.
    #[must_use]
    pub fn with_predicate(
        mut self,
        predicate: impl Fn(&PipelineError) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.predicate = Arc::new(predicate);
        self
    }

    /// Whether `err`, raised by attempt number `attempt` (1-based), earns
    /// another attempt.
    #[must_use]
    pub fn should_retry(&self, err: &PipelineError, attempt: u32) -> bool {
        attempt < self.max_attempts && (self.predicate)(err)
    }

    /// Delay before the attempt following `attempt`.
    #[must_use]
    pub fn delay_for(&self, err: &PipelineError, attempt: u32) -> Duration {
        let class = err
            .as_sync_error()
            .map_or(BackoffClass::Normal, |e| e.backoff_class);
        compute_backoff(class, self.base_delay, self.max_delay, attempt)
    }
}

/// Something an attempt produces that may still carry a failure.
pub trait AttemptOutcome {
    fn failure(&self) -> Option<&PipelineError>;
}

impl AttemptOutcome for PipelineResult {
    fn failure(&self) -> Option<&PipelineError> {
        self.failure.as_ref()
    }
}

/// Every attempt made by [`run_with_retry`].
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub attempts: Vec<T>,
    /// Set when the last attempt could not produce an outcome at all.
    pub error: Option<PipelineError>,
}

/// Run `op` until it succeeds, fails with an error the policy will not
/// retry, or the attempt bound is reached. `op` receives the 1-based
/// attempt number.
pub async fn run_with_retry<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> RetryOutcome<T>
where
    T: AttemptOutcome,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, PipelineError>>,
{
    let max_attempts = policy.max_attempts;
    let mut attempts = Vec::new();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let delay = match op(attempt).await {
            Ok(outcome) => {
                let delay = match outcome.failure() {
                    None => None,
                    Some(err) if policy.should_retry(err, attempt) => {
                        Some(log_retry(policy, label, err, attempt))
                    }
                    Some(err) => {
                        log_final(label, err, attempt, max_attempts);
                        None
                    }
                };
                attempts.push(outcome);
                match delay {
                    Some(delay) => delay,
                    None => return RetryOutcome { attempts, error: None },
                }
            }
            Err(err) if policy.should_retry(&err, attempt) => log_retry(policy, label, &err, attempt),
            Err(err) => {
                log_final(label, &err, attempt, max_attempts);
                return RetryOutcome {
                    attempts,
                    error: Some(err),
                };
            }
        };
        tokio::time::sleep(delay).await;
    }
}

fn log_retry(policy: &RetryPolicy, label: &str, err: &PipelineError, attempt: u32) -> Duration {
    let delay = policy.delay_for(err, attempt);
    #[allow(clippy::cast_possible_truncation)]
    // Safety: delay is capped by max_delay, far below u64::MAX millis
    let delay_ms = delay.as_millis() as u64;
    let sync = err.as_sync_error();
    tracing::warn!(
        entity_type = label,
        attempt,
        max_attempts = policy.max_attempts,
        delay_ms,
        category = sync.map(|e| e.category.to_string()),
        code = sync.map(|e| e.code.as_str()),
        "Retryable error, will retry"
    );
    delay
}

fn log_final(label: &str, err: &PipelineError, attempt: u32, max_attempts: u32) {
    if err.is_retryable() {
        tracing::error!(
            entity_type = label,
            attempt,
            max_attempts,
            error = %err,
            "Max retries exceeded, giving up"
        );
    } else {
        tracing::error!(
            entity_type = label,
            attempt,
            error = %err,
            "Non-retryable error, giving up"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use syncforge_types::{Stage, SyncError};

    #[derive(Debug)]
    struct Attempt(Option<PipelineError>);

    impl AttemptOutcome for Attempt {
        fn failure(&self) -> Option<&PipelineError> {
            self.0.as_ref()
        }
    }

    fn transient() -> PipelineError {
        PipelineError::Sync(SyncError::extract_connect("SOURCE_BUSY", "database is locked"))
    }

    fn permanent() -> PipelineError {
        PipelineError::Sync(SyncError::extract_query("UNKNOWN_TABLE", "no such table: items"))
    }

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1), Duration::from_millis(5))
    }

    #[test]
    fn only_transient_errors_are_retried() {
        let policy = fast(3);
        assert!(policy.should_retry(&transient(), 1));
        assert!(policy.should_retry(
            &PipelineError::Sync(SyncError::timeout(Stage::Load, "commit exceeded 60s")),
            2
        ));
        assert!(!policy.should_retry(&permanent(), 1));
        assert!(!policy.should_retry(&PipelineError::Infrastructure(anyhow::anyhow!("x")), 1));
    }

    #[test]
    fn attempt_bound_is_inclusive_of_first_try() {
        let policy = fast(3);
        assert!(policy.should_retry(&transient(), 2));
        assert!(!policy.should_retry(&transient(), 3));
        assert!(!RetryPolicy::no_retry().should_retry(&transient(), 1));
    }

    #[test]
    fn custom_predicate_replaces_default() {
        let policy = fast(3).with_predicate(|_| true);
        assert!(policy.should_retry(&permanent(), 1));
    }

    #[test]
    fn delay_uses_backoff_class() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_secs(10));
        let slow = PipelineError::Sync(
            SyncError::extract_connect("SOURCE_BUSY", "locked").with_backoff(BackoffClass::Slow),
        );
        assert_eq!(policy.delay_for(&transient(), 1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(&transient(), 3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(&slow, 1), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let outcome = run_with_retry(&fast(3), "product", |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Ok(Attempt(Some(transient())))
                } else {
                    Ok(Attempt(None))
                }
            }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(outcome.attempts.len(), 3);
        assert!(outcome.attempts[2].0.is_none());
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn permanent_failure_stops_immediately() {
        let outcome = run_with_retry(&fast(5), "product", |_| async {
            Ok(Attempt(Some(permanent())))
        })
        .await;
        assert_eq!(outcome.attempts.len(), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let outcome = run_with_retry(&fast(2), "product", |_| async {
            Ok(Attempt(Some(transient())))
        })
        .await;
        assert_eq!(outcome.attempts.len(), 2);
        assert!(outcome.attempts.iter().all(|a| a.0.is_some()));
    }

    #[tokio::test]
    async fn hard_error_is_reported_without_outcome() {
        let outcome: RetryOutcome<Attempt> = run_with_retry(&fast(3), "product", |_| async {
            Err(PipelineError::Infrastructure(anyhow::anyhow!("state backend lock poisoned")))
        })
        .await;
        assert!(outcome.attempts.is_empty());
        assert!(outcome.error.is_some());
    }
}
