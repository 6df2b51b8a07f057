//! Pipeline orchestrator: extract, transform, and load one mapping once.
//!
//! A run moves `running -> {completed | partial | failed}`. Pages are
//! processed strictly in sequence: page N+1 is not fetched until page N has
//! been loaded, because upsert decisions may depend on records written
//! earlier in the same run.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use syncforge_state::{StateBackend, StateError};
use syncforge_types::state::{
    FailedRecord, MappingId, RunId, RunMode, RunStats, RunStatus, Watermark,
};
use syncforge_types::{Stage, SyncError};

use crate::config::SyncConfig;
use crate::errors::PipelineError;
use crate::extract::{Extractor, Filter, FilterOp, Query};
use crate::failed::{failed_record, orphan_failure, persist_failed_records};
use crate::load::{LoadSummary, Loader};
use crate::result::{PipelineResult, StageTiming};
use crate::transform::{Record, Transformer};

/// Parameters of one run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub mode: RunMode,
    /// Records per load sub-batch. Independent of the extractor's page size.
    pub batch_size: usize,
    /// Caller-supplied filters, merged with the incremental filter.
    pub filters: Query,
    /// 1-based attempt number recorded on the run.
    pub attempt: u32,
}

impl RunRequest {
    #[must_use]
    pub fn new(mode: RunMode, batch_size: usize) -> Self {
        Self {
            mode,
            batch_size,
            filters: Query::new(),
            attempt: 1,
        }
    }

    #[must_use]
    pub fn with_filters(mut self, filters: Query) -> Self {
        self.filters = filters;
        self
    }

    #[must_use]
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }
}

/// Run-wide knobs taken from the configuration.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub page_timeout: Duration,
    pub commit_timeout: Duration,
    /// How far back an incremental run reaches when no run has succeeded yet.
    pub incremental_window: chrono::Duration,
    /// Whether a `partial` run advances the successful watermark.
    pub partial_advances_watermark: bool,
}

impl PipelineSettings {
    #[must_use]
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            page_timeout: Duration::from_secs(config.defaults.page_timeout_seconds),
            commit_timeout: Duration::from_secs(config.defaults.commit_timeout_seconds),
            incremental_window: chrono::Duration::days(i64::from(
                config.defaults.incremental_window_days,
            )),
            partial_advances_watermark: config.scheduler.partial_advances_watermark,
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            page_timeout: Duration::from_secs(60),
            commit_timeout: Duration::from_secs(60),
            incremental_window: chrono::Duration::days(7),
            partial_advances_watermark: false,
        }
    }
}

/// The three stage components of a pipeline.
pub struct Components {
    pub extractor: Box<dyn Extractor>,
    pub transformer: Box<dyn Transformer>,
    pub loader: Box<dyn Loader>,
}

/// One mapping's pipeline instance.
pub struct Pipeline {
    mapping: MappingId,
    entity_type: String,
    components: Components,
    state: Arc<dyn StateBackend>,
    settings: PipelineSettings,
}

/// Counters and side-products accumulated while a run progresses.
#[derive(Default)]
struct Progress {
    stats: RunStats,
    failed: Vec<FailedRecord>,
    timing: StageTiming,
    last_key: Option<String>,
}

impl Pipeline {
    #[must_use]
    pub fn new(
        mapping: MappingId,
        entity_type: impl Into<String>,
        components: Components,
        state: Arc<dyn StateBackend>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            mapping,
            entity_type: entity_type.into(),
            components,
            state,
            settings,
        }
    }

    #[must_use]
    pub fn mapping_id(&self) -> MappingId {
        self.mapping
    }

    #[must_use]
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Execute one run and persist its record.
    ///
    /// Stage failures do not surface as `Err`: they end the run as `failed`
    /// and are returned in [`PipelineResult::failure`].
    ///
    /// # Errors
    ///
    /// Returns `Err` only when the run record itself cannot be created or
    /// finalized.
    pub async fn run(&mut self, request: &RunRequest) -> Result<PipelineResult, PipelineError> {
        let start = Instant::now();
        let started_at = Utc::now();
        let mapping = self.mapping;
        let mode = request.mode;
        let attempt = request.attempt;

        tracing::info!(
            mapping = %mapping,
            entity_type = self.entity_type,
            mode = %mode,
            attempt,
            batch_size = request.batch_size,
            "Starting pipeline run"
        );

        state_call(&self.state, "mark_sync_started", move |s| {
            s.mark_sync_started(mapping, started_at)
        })
        .await?;
        let run_id = state_call(&self.state, "start_run", move |s| {
            s.start_run(mapping, mode, attempt)
        })
        .await?;

        let mut progress = Progress::default();
        let failure = self
            .execute(request, started_at, &mut progress)
            .await
            .err();

        let Progress {
            mut stats,
            failed,
            timing,
            last_key,
        } = progress;

        let status = match &failure {
            Some(err) => {
                stats.error_message = Some(err.to_string());
                stats.error_trace = Some(err.trace());
                RunStatus::Failed
            }
            None if stats.records_failed == 0 => RunStatus::Completed,
            None => RunStatus::Partial,
        };

        if !failed.is_empty() {
            state_call(&self.state, "persist_failed_records", move |s| {
                persist_failed_records(s, mapping, run_id, &failed);
                Ok(())
            })
            .await?;
        }

        finalize_run(&self.state, mapping, run_id, status, stats.clone()).await?;

        let advance = match status {
            RunStatus::Completed => true,
            RunStatus::Partial => self.settings.partial_advances_watermark,
            _ => false,
        };
        let watermark_advanced = if advance {
            state_call(&self.state, "mark_sync_succeeded", move |s| {
                s.mark_sync_succeeded(mapping, started_at, last_key.as_deref())
            })
            .await?
        } else {
            if let Some(key) = last_key {
                state_call(&self.state, "record_last_seen", move |s| {
                    s.record_last_seen(mapping, &key)
                })
                .await?;
            }
            false
        };

        let run = state_call(&self.state, "get_run", move |s| s.get_run(run_id))
            .await?
            .ok_or_else(|| {
                PipelineError::Infrastructure(anyhow::anyhow!("run {run_id} vanished after completion"))
            })?;

        let duration = start.elapsed();
        match &failure {
            None => tracing::info!(
                mapping = %mapping,
                entity_type = self.entity_type,
                run = %run_id,
                status = %status,
                processed = stats.records_processed,
                created = stats.records_created,
                updated = stats.records_updated,
                unchanged = stats.records_unchanged,
                failed = stats.records_failed,
                skipped = stats.records_skipped,
                watermark_advanced,
                duration_secs = duration.as_secs_f64(),
                "Pipeline run finished"
            ),
            Some(err) => tracing::error!(
                mapping = %mapping,
                entity_type = self.entity_type,
                run = %run_id,
                processed = stats.records_processed,
                failed = stats.records_failed,
                retryable = err.is_retryable(),
                error = %err,
                duration_secs = duration.as_secs_f64(),
                "Pipeline run failed"
            ),
        }

        Ok(PipelineResult {
            run,
            timing,
            duration,
            watermark_advanced,
            failure,
        })
    }

    async fn execute(
        &mut self,
        request: &RunRequest,
        started_at: DateTime<Utc>,
        progress: &mut Progress,
    ) -> Result<(), PipelineError> {
        let mapping = self.mapping;
        let watermark =
            state_call(&self.state, "get_watermark", move |s| s.get_watermark(mapping)).await?;
        let query = effective_query(
            request,
            self.components.extractor.as_ref(),
            &watermark,
            started_at,
            self.settings.incremental_window,
        );
        tracing::debug!(
            mapping = %mapping,
            filters = query.filters.len(),
            since = ?watermark.last_successful_sync_time,
            "Effective extraction query"
        );

        let page_timeout = self.settings.page_timeout;
        let commit_timeout = self.settings.commit_timeout;

        let connect_start = Instant::now();
        with_timeout(page_timeout, Stage::Extract, "connect", self.components.extractor.connect())
            .await?;
        with_timeout(commit_timeout, Stage::Load, "prepare", self.components.loader.prepare())
            .await?;
        progress.timing.extract_secs += connect_start.elapsed().as_secs_f64();

        let batch_size = request.batch_size.max(1);
        let mut cursor: Option<String> = None;
        let mut offset = 0usize;
        loop {
            let fetch_start = Instant::now();
            let page = with_timeout(
                page_timeout,
                Stage::Extract,
                "page fetch",
                self.components.extractor.fetch_page(&query, cursor.as_deref()),
            )
            .await?;
            progress.timing.extract_secs += fetch_start.elapsed().as_secs_f64();
            progress.timing.pages += 1;

            let row_count = page.rows.len();
            let transform_start = Instant::now();
            let records = self.components.transformer.transform(page.rows, offset)?;
            progress.timing.transform_secs += transform_start.elapsed().as_secs_f64();
            if records.len() != row_count {
                return Err(SyncError::transform(
                    "RECORD_COUNT_MISMATCH",
                    format!(
                        "transformer '{}' returned {} records for {row_count} rows",
                        self.components.transformer.kind(),
                        records.len()
                    ),
                )
                .into());
            }
            offset += row_count;

            self.load_page(records, batch_size, commit_timeout, progress)
                .await?;

            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(())
    }

    async fn load_page(
        &mut self,
        records: Vec<Record>,
        batch_size: usize,
        commit_timeout: Duration,
        progress: &mut Progress,
    ) -> Result<(), PipelineError> {
        let mut pending = Vec::with_capacity(records.len());
        for record in records {
            if record.is_skipped() {
                tracing::debug!(
                    mapping = %self.mapping,
                    record = record.identity(),
                    reason = record.error_summary(),
                    "Row skipped"
                );
                progress.stats.records_skipped += 1;
            } else {
                pending.push(record);
            }
        }

        for chunk in pending.chunks(batch_size) {
            let load_start = Instant::now();
            let summary = with_timeout(
                commit_timeout,
                Stage::Load,
                "commit",
                self.components.loader.load(chunk),
            )
            .await?;
            progress.timing.load_secs += load_start.elapsed().as_secs_f64();
            progress.timing.batches += 1;
            self.absorb(chunk, &summary, progress);
        }
        Ok(())
    }

    fn absorb(&self, chunk: &[Record], summary: &LoadSummary, progress: &mut Progress) {
        let stats = &mut progress.stats;
        stats.records_created += summary.created;
        stats.records_updated += summary.updated;
        stats.records_unchanged += summary.unchanged;
        stats.records_failed += summary.failed();
        stats.records_processed += summary.succeeded() + summary.failed();

        for failure in &summary.failures {
            let record = chunk.iter().find(|r| r.index == failure.index);
            let identity = record.map_or_else(
                || format!("#{}", failure.index),
                Record::identity,
            );
            stats.push_error(format!("{identity}: {}", failure.message));
            progress.failed.push(match record {
                Some(record) => failed_record(record, failure),
                None => orphan_failure(failure),
            });
        }

        let warned = chunk.iter().filter(|r| !r.warnings.is_empty()).count();
        if warned > 0 {
            tracing::debug!(mapping = %self.mapping, records = warned, "Records loaded with warnings");
        }

        if let Some(key) = chunk
            .iter()
            .rev()
            .filter(|r| r.is_ok())
            .find_map(|r| r.natural_key.clone())
        {
            progress.last_key = Some(key);
        }
    }
}

/// Caller filters plus, for incremental runs, `modified_field >= since`
/// where `since` is the last successful sync or the fallback window.
pub(crate) fn effective_query(
    request: &RunRequest,
    extractor: &dyn Extractor,
    watermark: &Watermark,
    now: DateTime<Utc>,
    window: chrono::Duration,
) -> Query {
    let query = request.filters.clone();
    if request.mode == RunMode::Full {
        return query;
    }
    let Some(field) = extractor.modified_field() else {
        tracing::warn!(
            mapping = %watermark.mapping_id,
            extractor = extractor.kind(),
            "Source has no modified_field; incremental run reads every record"
        );
        return query;
    };
    let since = watermark
        .last_successful_sync_time
        .unwrap_or_else(|| now - window);
    query.with(Filter::new(field, FilterOp::Gte, extractor.watermark_value(since)))
}

/// Write the terminal status of a run. A failure here leaves the record in
/// `running`; it is logged with the run id before propagating.
async fn finalize_run(
    state: &Arc<dyn StateBackend>,
    mapping: MappingId,
    run_id: RunId,
    status: RunStatus,
    stats: RunStats,
) -> Result<(), PipelineError> {
    state_call(state, "complete_run", move |s| s.complete_run(run_id, status, &stats))
        .await
        .inspect_err(|e| {
            tracing::warn!(
                mapping = %mapping,
                run = %run_id,
                status = %status,
                error = %e,
                "Failed to finalize run record; it stays in running state"
            );
        })
}

/// Run a blocking state-backend call off the async runtime.
pub(crate) async fn state_call<T, F>(
    state: &Arc<dyn StateBackend>,
    op: &'static str,
    f: F,
) -> Result<T, PipelineError>
where
    T: Send + 'static,
    F: FnOnce(&dyn StateBackend) -> Result<T, StateError> + Send + 'static,
{
    let state = Arc::clone(state);
    tokio::task::spawn_blocking(move || f(state.as_ref()))
        .await
        .map_err(|e| PipelineError::Infrastructure(anyhow::anyhow!("{op} task panicked: {e}")))?
        .map_err(|e| PipelineError::Infrastructure(anyhow::Error::new(e).context(format!("{op} failed"))))
}

/// Bound a stage call; an expired deadline becomes a retryable timeout.
async fn with_timeout<T>(
    limit: Duration,
    stage: Stage,
    what: &str,
    fut: impl std::future::Future<Output = Result<T, SyncError>>,
) -> Result<T, PipelineError> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(PipelineError::Sync),
        Err(_) => Err(PipelineError::Sync(SyncError::timeout(
            stage,
            format!("{what} exceeded {}s", limit.as_secs_f64()),
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use syncforge_types::Value;

    use syncforge_state::SqliteStateBackend;

    use crate::extract::InlineExtractor;

    fn watermark(last_success: Option<DateTime<Utc>>) -> Watermark {
        Watermark {
            last_successful_sync_time: last_success,
            ..Watermark::empty(MappingId::new(1))
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn full_run_keeps_caller_filters_only() {
        let extractor = InlineExtractor::from_rows(Vec::new()).with_modified_field("modified_at");
        let request = RunRequest::new(RunMode::Full, 100)
            .with_filters(Query::new().with(Filter::new("status", FilterOp::Eq, "A")));
        let query = effective_query(
            &request,
            &extractor,
            &watermark(Some(now())),
            now(),
            chrono::Duration::days(7),
        );
        assert_eq!(query.filters.len(), 1);
        assert_eq!(query.filters[0].field, "status");
    }

    #[test]
    fn incremental_filters_from_last_success() {
        let extractor = InlineExtractor::from_rows(Vec::new()).with_modified_field("modified_at");
        let request = RunRequest::new(RunMode::Incremental, 100);
        let last = Utc.with_ymd_and_hms(2026, 3, 9, 8, 30, 0).unwrap();
        let query = effective_query(
            &request,
            &extractor,
            &watermark(Some(last)),
            now(),
            chrono::Duration::days(7),
        );
        assert_eq!(query.filters.len(), 1);
        let filter = &query.filters[0];
        assert_eq!(filter.field, "modified_at");
        assert_eq!(filter.op, FilterOp::Gte);
        assert_eq!(filter.value, Value::from("2026-03-09 08:30:00"));
    }

    #[test]
    fn incremental_without_prior_success_uses_window() {
        let extractor = InlineExtractor::from_rows(Vec::new()).with_modified_field("modified_at");
        let request = RunRequest::new(RunMode::Incremental, 100);
        let query = effective_query(
            &request,
            &extractor,
            &watermark(None),
            now(),
            chrono::Duration::days(7),
        );
        assert_eq!(query.filters[0].value, Value::from("2026-03-03 12:00:00"));
    }

    #[test]
    fn incremental_without_modified_field_reads_everything() {
        let extractor = InlineExtractor::from_rows(Vec::new());
        let request = RunRequest::new(RunMode::Incremental, 100);
        let query = effective_query(
            &request,
            &extractor,
            &watermark(Some(now())),
            now(),
            chrono::Duration::days(7),
        );
        assert!(query.is_empty());
    }

    #[tokio::test]
    async fn timeout_is_retryable() {
        let err = with_timeout(
            Duration::from_millis(10),
            Stage::Extract,
            "page fetch",
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<(), SyncError>(())
            },
        )
        .await
        .unwrap_err();
        assert!(err.is_retryable());
        let sync = err.as_sync_error().unwrap();
        assert_eq!(sync.stage, Stage::Extract);
        assert!(sync.message.starts_with("page fetch exceeded"));
    }

    #[tokio::test]
    async fn finalize_failure_propagates() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        let source = backend
            .upsert_source("legacy_erp", "inline", &serde_json::json!({}))
            .unwrap();
        let target = backend
            .upsert_target("products", "sqlite_table", Some("sku"), "source_wins")
            .unwrap();
        let mapping = backend
            .upsert_mapping(source, target, "product", true, &serde_json::json!({}))
            .unwrap();
        let run_id = backend.start_run(mapping, RunMode::Full, 1).unwrap();
        let state: Arc<dyn StateBackend> = Arc::new(backend);

        finalize_run(&state, mapping, run_id, RunStatus::Completed, RunStats::default())
            .await
            .unwrap();
        let err = finalize_run(&state, mapping, run_id, RunStatus::Failed, RunStats::default())
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("complete_run failed"));

        let missing = RunId::new(4242);
        assert!(finalize_run(&state, mapping, missing, RunStatus::Completed, RunStats::default())
            .await
            .is_err());
    }

    #[test]
    fn settings_follow_config() {
        let config = crate::config::parse_config_str(
            r#"
version: "1.0"
defaults: { page_timeout_seconds: 5, incremental_window_days: 2 }
scheduler: { partial_advances_watermark: true }
"#,
        )
        .unwrap();
        let settings = PipelineSettings::from_config(&config);
        assert_eq!(settings.page_timeout, Duration::from_secs(5));
        assert_eq!(settings.commit_timeout, Duration::from_secs(60));
        assert_eq!(settings.incremental_window, chrono::Duration::days(2));
        assert!(settings.partial_advances_watermark);
    }
}
