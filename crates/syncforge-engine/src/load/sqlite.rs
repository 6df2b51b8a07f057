//! `sqlite_table` loader: upserts records into the [`LocalStore`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::SecondsFormat;
use syncforge_types::value::row_to_json;
use syncforge_types::{ErrorCategory, SyncError, Value};

use super::store::{compare_modified, EntityWrite, LocalStore};
use super::{LoadFailure, LoadSummary, Loader};
use crate::config::types::{ConflictStrategy, LoaderConfig};
use crate::transform::Record;

/// Registry key.
pub const KIND: &str = "sqlite_table";

/// What a loader needs beyond its own config block.
#[derive(Clone)]
pub struct LoaderContext {
    pub store: Arc<LocalStore>,
    /// Destination of the mapping named by `parent_mapping`, resolved from
    /// the full configuration.
    pub parent_destination: Option<String>,
}

pub struct SqliteTableLoader {
    store: Arc<LocalStore>,
    destination: String,
    strategy: ConflictStrategy,
    timestamp_field: Option<String>,
    parent_field: Option<String>,
    parent_destination: Option<String>,
    /// Parent natural key to row id; rebuilt by every `prepare`.
    parent_lookup: Option<Arc<HashMap<String, i64>>>,
}

impl SqliteTableLoader {
    /// # Errors
    ///
    /// Returns a config error when `newest_wins` has no `timestamp_field`,
    /// or when `parent_field` is set but the parent destination is unknown.
    pub fn new(config: &LoaderConfig, ctx: LoaderContext) -> Result<Self, SyncError> {
        if config.destination.trim().is_empty() {
            return Err(SyncError::config("INVALID_LOADER_CONFIG", "destination must not be empty"));
        }
        if config.conflict_strategy == ConflictStrategy::NewestWins && config.timestamp_field.is_none() {
            return Err(SyncError::config(
                "INVALID_LOADER_CONFIG",
                format!("destination '{}': newest_wins requires timestamp_field", config.destination),
            ));
        }
        if config.parent_field.is_some() && ctx.parent_destination.is_none() {
            return Err(SyncError::config(
                "INVALID_LOADER_CONFIG",
                format!(
                    "destination '{}': parent_field needs a resolvable parent_mapping",
                    config.destination
                ),
            ));
        }
        Ok(Self {
            store: ctx.store,
            destination: config.destination.clone(),
            strategy: config.conflict_strategy,
            timestamp_field: config.timestamp_field.clone(),
            parent_field: config.parent_field.clone(),
            parent_destination: ctx.parent_destination,
            parent_lookup: None,
        })
    }

    /// Turn a record into a write, or explain why it cannot be written.
    fn plan(&self, record: &Record) -> Result<EntityWrite, LoadFailure> {
        let failure = |message: String, category: ErrorCategory| LoadFailure {
            index: record.index,
            natural_key: record.natural_key.clone(),
            message,
            category,
        };

        if record.is_failed() {
            return Err(failure(record.error_summary(), ErrorCategory::Data));
        }
        let natural_key = record.natural_key.clone().ok_or_else(|| {
            failure(
                format!("record #{} has no natural key", record.index),
                ErrorCategory::Data,
            )
        })?;

        let parent_id = match (&self.parent_field, &self.parent_lookup) {
            (Some(field), Some(lookup)) => match record.values.get(field).filter(|v| !v.is_empty()) {
                None => None,
                Some(parent_key) => {
                    let key = parent_key.to_string();
                    Some(*lookup.get(&key).ok_or_else(|| {
                        failure(
                            format!(
                                "parent '{key}' not found in {}",
                                self.parent_destination.as_deref().unwrap_or_default()
                            ),
                            ErrorCategory::Data,
                        )
                    })?)
                }
            },
            _ => None,
        };

        let source_modified_at = self
            .timestamp_field
            .as_ref()
            .and_then(|field| record.values.get(field))
            .filter(|v| !v.is_empty())
            .map(|v| match v {
                Value::DateTime(dt) => dt.to_rfc3339_opts(SecondsFormat::AutoSi, true),
                other => other.to_string(),
            });

        Ok(EntityWrite {
            natural_key,
            payload: row_to_json(&record.values),
            parent_id,
            source_modified_at,
        })
    }
}

impl SqliteTableLoader {
    fn supersedes(&self, incoming: &EntityWrite, kept: &EntityWrite) -> bool {
        if self.strategy != ConflictStrategy::NewestWins {
            return true;
        }
        match (incoming.source_modified_at.as_deref(), kept.source_modified_at.as_deref()) {
            (Some(incoming), Some(kept)) => compare_modified(incoming, kept).is_ge(),
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => true,
        }
    }
}

#[async_trait]
impl Loader for SqliteTableLoader {
    fn kind(&self) -> &'static str {
        KIND
    }

    async fn prepare(&mut self) -> Result<(), SyncError> {
        let Some(parent_destination) = self.parent_destination.clone() else {
            return Ok(());
        };
        let store = Arc::clone(&self.store);
        let lookup = tokio::task::spawn_blocking(move || store.key_index(&parent_destination))
            .await
            .map_err(|e| SyncError::internal("TASK_PANICKED", format!("prepare task panicked: {e}")))??;
        tracing::debug!(
            destination = %self.destination,
            parents = lookup.len(),
            "Built parent lookup"
        );
        self.parent_lookup = Some(Arc::new(lookup));
        Ok(())
    }

    async fn load(&mut self, records: &[Record]) -> Result<LoadSummary, SyncError> {
        let mut summary = LoadSummary::default();
        let mut writes: Vec<EntityWrite> = Vec::with_capacity(records.len());
        for record in records.iter().filter(|r| !r.is_skipped()) {
            match self.plan(record) {
                Ok(write) => writes.push(write),
                Err(failure) => summary.failures.push(failure),
            }
        }

        // One write per key. Under newest_wins the newer timestamp survives,
        // otherwise the later record does. The dropped duplicate counts as
        // unchanged.
        let mut positions: HashMap<String, usize> = HashMap::with_capacity(writes.len());
        let mut deduped: Vec<EntityWrite> = Vec::with_capacity(writes.len());
        for write in writes {
            if let Some(&pos) = positions.get(&write.natural_key) {
                if self.supersedes(&write, &deduped[pos]) {
                    deduped[pos] = write;
                }
                summary.unchanged += 1;
            } else {
                positions.insert(write.natural_key.clone(), deduped.len());
                deduped.push(write);
            }
        }

        if deduped.is_empty() {
            return Ok(summary);
        }

        let store = Arc::clone(&self.store);
        let destination = self.destination.clone();
        let strategy = self.strategy;
        let outcomes = tokio::task::spawn_blocking(move || {
            store.upsert_batch(&destination, &deduped, strategy)
        })
        .await
        .map_err(|e| SyncError::internal("TASK_PANICKED", format!("load task panicked: {e}")))??;

        for outcome in outcomes {
            summary.record(outcome);
        }
        Ok(summary)
    }
}
