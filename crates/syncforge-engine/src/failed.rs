//! Failed-record persistence helper used by the pipeline.

use chrono::Utc;
use syncforge_state::StateBackend;
use syncforge_types::state::{FailedRecord, MappingId, RunId};
use syncforge_types::value::row_to_json;
use syncforge_types::ErrorCategory;

use crate::load::LoadFailure;
use crate::transform::Record;

/// Build a log entry for a record the loader refused.
pub(crate) fn failed_record(record: &Record, failure: &LoadFailure) -> FailedRecord {
    let payload = serde_json::json!({
        "raw": row_to_json(&record.raw),
        "values": row_to_json(&record.values),
    });
    FailedRecord {
        record_key: failure
            .natural_key
            .clone()
            .or_else(|| Some(record.identity())),
        record_json: payload.to_string(),
        error_message: failure.message.clone(),
        error_category: failure.category,
        failed_at: Utc::now(),
    }
}

/// Log entry for a record whose index was reported without a matching
/// record (should not happen with the built-in loader).
pub(crate) fn orphan_failure(failure: &LoadFailure) -> FailedRecord {
    FailedRecord {
        record_key: failure
            .natural_key
            .clone()
            .or_else(|| Some(format!("#{}", failure.index))),
        record_json: "{}".to_string(),
        error_message: failure.message.clone(),
        error_category: ErrorCategory::Data,
        failed_at: Utc::now(),
    }
}

/// Persist collected failed records to the state backend.
///
/// Failures here are logged and swallowed; the run record already carries
/// the counts and the first error messages.
pub(crate) fn persist_failed_records(
    state: &dyn StateBackend,
    mapping: MappingId,
    run: RunId,
    records: &[FailedRecord],
) {
    if records.is_empty() {
        return;
    }

    let failed_count = records.len();

    match state.insert_failed_records(mapping, run, records) {
        Ok(inserted) => {
            tracing::info!(
                mapping = %mapping,
                run = %run,
                failed_records = inserted,
                "Persisted failed records to state backend"
            );
        }
        Err(e) => {
            tracing::error!(
                mapping = %mapping,
                run = %run,
                failed_count,
                error = %e,
                "Failed to persist failed records"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncforge_state::SqliteStateBackend;
    use syncforge_types::state::RunMode;
    use syncforge_types::Value;

    use crate::transform::RecordStatus;

    fn setup() -> (SqliteStateBackend, MappingId, RunId) {
        let state = SqliteStateBackend::in_memory().unwrap();
        let source = state
            .upsert_source("erp", "inline", &serde_json::json!({}))
            .unwrap();
        let target = state
            .upsert_target("products", "sqlite_table", Some("sku"), "source_wins")
            .unwrap();
        let mapping = state
            .upsert_mapping(source, target, "product", true, &serde_json::json!({}))
            .unwrap();
        let run = state.start_run(mapping, RunMode::Full, 1).unwrap();
        (state, mapping, run)
    }

    fn record() -> Record {
        let mut raw = syncforge_types::Row::new();
        raw.insert("ITEM_NO".into(), Value::from("A-1"));
        Record {
            index: 4,
            raw,
            values: syncforge_types::Row::new(),
            natural_key: None,
            status: RecordStatus::Failed(vec!["sku: This field is required.".into()]),
            warnings: Vec::new(),
        }
    }

    #[test]
    fn entry_keeps_raw_row_and_falls_back_to_position() {
        let record = record();
        let failure = LoadFailure {
            index: 4,
            natural_key: None,
            message: record.error_summary(),
            category: ErrorCategory::Data,
        };
        let entry = failed_record(&record, &failure);
        assert_eq!(entry.record_key.as_deref(), Some("#4"));
        assert!(entry.record_json.contains("\"ITEM_NO\":\"A-1\""));
        assert_eq!(entry.error_message, "sku: This field is required.");
    }

    #[test]
    fn persists_entries_for_run() {
        let (state, mapping, run) = setup();
        let failure = LoadFailure {
            index: 4,
            natural_key: Some("A-1".into()),
            message: "parent 'F9' not found in families".into(),
            category: ErrorCategory::Data,
        };
        persist_failed_records(&state, mapping, run, &[failed_record(&record(), &failure)]);
        let stored = state.list_failed_records(run).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].record_key.as_deref(), Some("A-1"));
    }

    #[test]
    fn empty_batch_is_noop() {
        let (state, mapping, run) = setup();
        persist_failed_records(&state, mapping, run, &[]);
        assert!(state.list_failed_records(run).unwrap().is_empty());
    }
}
