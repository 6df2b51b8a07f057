//! Integration tests for the full sync path: configuration, registry sync,
//! extract/transform/load, run log, watermarks, and retry.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use syncforge_engine::extract::{Extractor, InlineExtractor, Page, Query};
use syncforge_engine::load::LocalStore;
use syncforge_engine::{
    parse_config, parse_config_str, run_all, validate_config, ComponentRegistry, MappingSelector,
    RetryPolicy, RunRequest, SyncEngine,
};
use syncforge_state::{SqliteStateBackend, StateBackend};
use syncforge_types::state::{RunMode, RunStatus};
use syncforge_types::{SyncError, Value};

struct Harness {
    state: Arc<SqliteStateBackend>,
    store: Arc<LocalStore>,
}

impl Harness {
    fn new() -> Self {
        Self {
            state: Arc::new(SqliteStateBackend::in_memory().unwrap()),
            store: Arc::new(LocalStore::in_memory().unwrap()),
        }
    }

    fn engine(&self, yaml: &str) -> SyncEngine {
        self.engine_with(yaml, ComponentRegistry::with_builtins())
    }

    fn engine_with(&self, yaml: &str, registry: ComponentRegistry) -> SyncEngine {
        SyncEngine::new(
            parse_config_str(yaml).unwrap(),
            registry,
            self.state.clone(),
            self.store.clone(),
        )
        .unwrap()
        .with_retry_policy(RetryPolicy::no_retry())
    }
}

fn full() -> RunRequest {
    RunRequest::new(RunMode::Full, 100)
}

fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
}

fn product_yaml(records: &str, extra_transformer: &str) -> String {
    format!(
        r#"
version: "1.0"
mappings:
  - entity_type: product
    source:
      name: legacy_erp
      extractor: inline
      config:
        records: {records}
    transformer:
      field_mappings: {{ ITEM_NO: sku, NAME: name, PRICE: price, NOTES: notes, STATUS: status }}
      types: {{ price: decimal }}
      validation_rules:
        - required: [sku, name]
        - recommended: notes
      {extra_transformer}
    loader: {{ use: sqlite_table, destination: products, unique_field: sku }}
"#
    )
}

fn source_db(dir: &Path, rows: &[(&str, &str, &str)]) -> PathBuf {
    let path = dir.join("erp.db");
    let conn = rusqlite::Connection::open(&path).unwrap();
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS items (ITEM_NO TEXT, NAME TEXT, MODIFIED_AT TEXT);
         DELETE FROM items;",
    )
    .unwrap();
    for (sku, name, modified) in rows {
        conn.execute(
            "INSERT INTO items (ITEM_NO, NAME, MODIFIED_AT) VALUES (?1, ?2, ?3)",
            [sku, name, modified],
        )
        .unwrap();
    }
    path
}

fn sqlite_yaml(path: &Path) -> String {
    format!(
        r#"
version: "1.0"
mappings:
  - entity_type: product
    source:
      name: legacy_erp
      extractor: sqlite_table
      config:
        path: "{}"
        table: items
        page_size: 2
        modified_field: MODIFIED_AT
    transformer:
      field_mappings: {{ ITEM_NO: sku, NAME: name, MODIFIED_AT: modified_at }}
    loader: {{ use: sqlite_table, destination: products, unique_field: sku }}
"#,
        path.display()
    )
}

#[tokio::test]
async fn record_missing_required_field_makes_run_partial() {
    let harness = Harness::new();
    let engine = harness.engine(&product_yaml(
        r#"[{ITEM_NO: A1, NAME: Widget, NOTES: n}, {ITEM_NO: A2, NOTES: n}, {ITEM_NO: A3, NAME: Gadget, NOTES: n}]"#,
        "",
    ));
    let id = engine.mappings()[0].id;

    let outcome = engine.run_mapping(id, &full()).await;
    let result = outcome.last().unwrap();
    let stats = result.stats();

    assert_eq!(result.status(), RunStatus::Partial);
    assert_eq!(stats.records_processed, 3);
    assert_eq!(stats.records_succeeded(), 2);
    assert_eq!(stats.records_failed, 1);
    assert_eq!(stats.errors, vec!["A2: name: This field is required."]);
    assert_eq!(harness.store.count("products").unwrap(), 2);
    assert!(harness.store.get("products", "A2").unwrap().is_none());

    let failed = engine.failed_records(result.run.id).unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].record_key.as_deref(), Some("A2"));

    let watermark = harness.state.get_watermark(id).unwrap();
    assert!(watermark.last_sync_time.is_some());
    assert!(
        watermark.last_successful_sync_time.is_none(),
        "partial runs keep the watermark by default"
    );
}

#[tokio::test]
async fn partial_run_advances_watermark_when_configured() {
    let harness = Harness::new();
    let yaml = product_yaml(r#"[{ITEM_NO: A1, NOTES: n}]"#, "")
        .replacen(
        "\nmappings:",
        "\nscheduler: { partial_advances_watermark: true }\nmappings:",
        1,
    );
    let engine = harness.engine(&yaml);
    let id = engine.mappings()[0].id;

    let outcome = engine.run_mapping(id, &full()).await;
    assert_eq!(outcome.status(), RunStatus::Partial);
    assert!(outcome.last().unwrap().watermark_advanced);
    assert!(harness
        .state
        .get_watermark(id)
        .unwrap()
        .last_successful_sync_time
        .is_some());
}

#[tokio::test]
async fn upsert_by_natural_key_never_duplicates() {
    let harness = Harness::new();
    let ledger = |amount: i64| {
        format!(
            r#"
version: "1.0"
mappings:
  - entity_type: ledger
    source: {{ name: erp, extractor: inline, config: {{ records: [{{KEY: K1, AMOUNT: {amount}}}] }} }}
    transformer:
      field_mappings: {{ KEY: key, AMOUNT: amount }}
      types: {{ amount: int }}
    loader: {{ use: sqlite_table, destination: ledger, unique_field: key }}
"#
        )
    };

    let first = harness.engine(&ledger(10));
    let id = first.mappings()[0].id;
    let run_a = first.run_mapping(id, &full()).await;
    assert_eq!(run_a.last().unwrap().stats().records_created, 1);

    let second = harness.engine(&ledger(12));
    assert_eq!(second.mappings()[0].id, id);
    let run_b = second.run_mapping(id, &full()).await;
    let stats = run_b.last().unwrap().stats();
    assert_eq!(stats.records_created, 0);
    assert_eq!(stats.records_updated, 1);

    assert_eq!(harness.store.count("ledger").unwrap(), 1);
    let stored = harness.store.get("ledger", "K1").unwrap().unwrap();
    assert_eq!(stored.payload["amount"], serde_json::json!(12));

    let run_c = second.run_mapping(id, &full()).await;
    let stats = run_c.last().unwrap().stats();
    assert_eq!(stats.records_created, 0);
    assert_eq!(stats.records_unchanged, 1);
}

#[tokio::test]
async fn incremental_run_is_bounded_by_successful_watermark() {
    let dir = tempfile::tempdir().unwrap();
    let path = source_db(
        dir.path(),
        &[
            ("OLD", "Before", "2026-01-15 09:59:59"),
            ("NEW", "After", "2026-01-15 10:00:01"),
            ("EDGE", "Exactly", "2026-01-15 10:00:00"),
        ],
    );
    let harness = Harness::new();
    let engine = harness.engine(&sqlite_yaml(&path));
    let id = engine.mappings()[0].id;
    let watermark = at(2026, 1, 15, 10, 0, 0);
    harness.state.mark_sync_succeeded(id, watermark, None).unwrap();

    let outcome = engine
        .run_mapping(id, &RunRequest::new(RunMode::Incremental, 100))
        .await;
    let result = outcome.last().unwrap();
    assert_eq!(result.status(), RunStatus::Completed);
    assert_eq!(result.stats().records_created, 2);
    assert!(harness.store.get("products", "OLD").unwrap().is_none());
    assert!(harness.store.get("products", "NEW").unwrap().is_some());
    assert!(harness.store.get("products", "EDGE").unwrap().is_some());

    let after = harness.state.get_watermark(id).unwrap();
    assert!(after.last_successful_sync_time.unwrap() > watermark);
    assert_eq!(after.last_successful_id.as_deref(), Some("EDGE"));
}

#[tokio::test]
async fn full_run_ignores_watermark() {
    let dir = tempfile::tempdir().unwrap();
    let path = source_db(
        dir.path(),
        &[
            ("OLD", "Before", "2020-01-01 00:00:00"),
            ("NEW", "After", "2026-01-15 10:00:01"),
            ("MID", "Middle", "2024-06-01 00:00:00"),
        ],
    );
    let harness = Harness::new();
    let engine = harness.engine(&sqlite_yaml(&path));
    let id = engine.mappings()[0].id;
    harness
        .state
        .mark_sync_succeeded(id, at(2026, 1, 15, 10, 0, 0), None)
        .unwrap();

    let outcome = engine.run_mapping(id, &full()).await;
    let result = outcome.last().unwrap();
    assert_eq!(result.stats().records_created, 3);
    assert_eq!(result.timing.pages, 2);
}

#[tokio::test]
async fn caller_filters_narrow_extraction() {
    let harness = Harness::new();
    let engine = harness.engine(&product_yaml(
        r#"[{ITEM_NO: A1, NAME: Widget, NOTES: n, STATUS: A}, {ITEM_NO: A2, NAME: Gizmo, NOTES: n, STATUS: I}]"#,
        "",
    ));
    let id = engine.mappings()[0].id;
    let request = full().with_filters(Query::from_json_str(r#"{"STATUS": "A"}"#).unwrap());

    let outcome = engine.run_mapping(id, &request).await;
    assert_eq!(outcome.last().unwrap().stats().records_processed, 1);
    assert!(harness.store.get("products", "A1").unwrap().is_some());
    assert!(harness.store.get("products", "A2").unwrap().is_none());
}

#[tokio::test]
async fn strict_mode_turns_warnings_into_failures() {
    let records = r#"[{ITEM_NO: A1, NAME: Widget}]"#;

    let harness = Harness::new();
    let lenient = harness.engine(&product_yaml(records, "strict: false"));
    let outcome = lenient.run_mapping(lenient.mappings()[0].id, &full()).await;
    assert_eq!(outcome.status(), RunStatus::Completed);
    assert_eq!(outcome.last().unwrap().stats().records_created, 1);

    let harness = Harness::new();
    let strict = harness.engine(&product_yaml(records, "strict: true"));
    let outcome = strict.run_mapping(strict.mappings()[0].id, &full()).await;
    let stats = outcome.last().unwrap().stats();
    assert_eq!(outcome.status(), RunStatus::Partial);
    assert_eq!(stats.records_failed, 1);
    assert_eq!(
        stats.errors,
        vec!["A1: notes: This field is recommended but was not provided."]
    );
}

#[tokio::test]
async fn skipped_rows_are_excluded_from_counts_and_store() {
    let harness = Harness::new();
    let engine = harness.engine(&product_yaml(
        r#"[{ITEM_NO: A1, NAME: Widget, NOTES: n, STATUS: A}, {ITEM_NO: A2, NAME: Gone, NOTES: n, STATUS: D}, {ITEM_NO: A3, NAME: Gadget, NOTES: n, STATUS: A}]"#,
        r#"skip_when: [{ field: status, equals: D, reason: "deleted in source" }]"#,
    ));
    let outcome = engine.run_mapping(engine.mappings()[0].id, &full()).await;
    let stats = outcome.last().unwrap().stats();

    assert_eq!(outcome.status(), RunStatus::Completed);
    assert_eq!(stats.records_processed, 2);
    assert_eq!(stats.records_skipped, 1);
    assert_eq!(stats.records_failed, 0);
    assert!(harness.store.get("products", "A2").unwrap().is_none());
}

#[tokio::test]
async fn cross_field_rule_fails_otherwise_valid_row() {
    let harness = Harness::new();
    let engine = harness.engine(&product_yaml(
        r#"[{ITEM_NO: A1, NAME: Widget, NOTES: n, STATUS: I, PRICE: "9.50"}]"#,
        r#"cross_field: [{ forbid_when: { field: price, when: status, equals: I } }]"#,
    ));
    let outcome = engine.run_mapping(engine.mappings()[0].id, &full()).await;
    let stats = outcome.last().unwrap().stats();
    assert_eq!(stats.records_failed, 1);
    assert_eq!(stats.errors, vec!["A1: price: Must be empty when status is 'I'."]);
}

#[tokio::test]
async fn failed_run_never_moves_watermark_backward() {
    let dir = tempfile::tempdir().unwrap();
    let path = source_db(dir.path(), &[("A1", "Widget", "2026-01-15 10:00:00")]);
    let harness = Harness::new();
    let engine = harness.engine(&sqlite_yaml(&path));
    let id = engine.mappings()[0].id;

    let first = engine.run_mapping(id, &full()).await;
    assert_eq!(first.status(), RunStatus::Completed);
    let before = harness.state.get_watermark(id).unwrap();
    let success = before.last_successful_sync_time.unwrap();

    rusqlite::Connection::open(&path)
        .unwrap()
        .execute_batch("DROP TABLE items;")
        .unwrap();

    let second = engine.run_mapping(id, &full()).await;
    let result = second.last().unwrap();
    assert_eq!(result.status(), RunStatus::Failed);
    assert!(!result.watermark_advanced);
    let message = result.stats().error_message.clone().unwrap();
    assert!(message.contains("UNKNOWN_TABLE"), "{message}");
    assert!(result.stats().error_trace.is_some());

    let after = harness.state.get_watermark(id).unwrap();
    assert_eq!(after.last_successful_sync_time, Some(success));
    assert!(after.last_sync_time.unwrap() >= before.last_sync_time.unwrap());
}

#[tokio::test]
async fn unresolved_parent_fails_only_that_record() {
    let harness = Harness::new();
    let engine = harness.engine(
        r#"
version: "1.0"
mappings:
  - entity_type: family
    source: { name: erp, extractor: inline, config: { records: [{FAM: F1}] } }
    transformer: { field_mappings: { FAM: code } }
    loader: { use: sqlite_table, destination: families, unique_field: code }
  - entity_type: product
    source: { name: erp, extractor: inline, config: { records: [{ITEM_NO: A1, FAM: F1}, {ITEM_NO: A2, FAM: F9}] } }
    transformer: { field_mappings: { ITEM_NO: sku, FAM: family_code } }
    loader:
      use: sqlite_table
      destination: products
      unique_field: sku
      parent_field: family_code
      parent_mapping: family
"#,
    );
    let family = engine.mappings()[0].id;
    let product = engine.mappings()[1].id;

    assert_eq!(engine.run_mapping(family, &full()).await.status(), RunStatus::Completed);
    let outcome = engine.run_mapping(product, &full()).await;
    let stats = outcome.last().unwrap().stats();
    assert_eq!(outcome.status(), RunStatus::Partial);
    assert_eq!(stats.records_created, 1);
    assert_eq!(stats.errors, vec!["A2: parent 'F9' not found in families"]);

    let parent = harness.store.get("families", "F1").unwrap().unwrap();
    let child = harness.store.get("products", "A1").unwrap().unwrap();
    assert_eq!(child.parent_id, Some(parent.id));
}

/// Fails to connect a fixed number of times, then serves one row.
struct FlakyExtractor {
    failures_left: Arc<AtomicU32>,
}

#[async_trait]
impl Extractor for FlakyExtractor {
    fn kind(&self) -> &'static str {
        "flaky"
    }

    async fn connect(&mut self) -> Result<(), SyncError> {
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(SyncError::extract_connect("SOURCE_BUSY", "database is locked"));
        }
        Ok(())
    }

    async fn fetch_page(&mut self, _query: &Query, _cursor: Option<&str>) -> Result<Page, SyncError> {
        let mut row = syncforge_types::Row::new();
        row.insert("ITEM_NO".into(), Value::from("A1"));
        Ok(Page {
            rows: vec![row],
            next: None,
        })
    }
}

const FLAKY_YAML: &str = r#"
version: "1.0"
mappings:
  - entity_type: product
    source: { name: erp, extractor: flaky }
    transformer: { field_mappings: { ITEM_NO: sku } }
    loader: { use: sqlite_table, destination: products, unique_field: sku }
"#;

fn flaky_registry(failures: u32) -> ComponentRegistry {
    let failures_left = Arc::new(AtomicU32::new(failures));
    ComponentRegistry::with_builtins().with_extractor("flaky", move |_source| {
        Ok(Box::new(FlakyExtractor {
            failures_left: Arc::clone(&failures_left),
        }))
    })
}

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(max_attempts, Duration::from_millis(1), Duration::from_millis(10))
}

#[tokio::test]
async fn transient_failures_are_retried_with_a_run_per_attempt() {
    let harness = Harness::new();
    let engine = harness
        .engine_with(FLAKY_YAML, flaky_registry(2))
        .with_retry_policy(fast_retry(3));
    let id = engine.mappings()[0].id;

    let outcome = engine.run_mapping(id, &full()).await;
    assert_eq!(outcome.attempts.len(), 3);
    assert_eq!(outcome.retry_count(), 2);
    assert_eq!(outcome.status(), RunStatus::Completed);

    let runs = engine.runs(Some(id), 10).unwrap();
    assert_eq!(runs.len(), 3);
    let mut attempts: Vec<(u32, RunStatus)> = runs.iter().map(|r| (r.attempt, r.status)).collect();
    attempts.sort_by_key(|(attempt, _)| *attempt);
    assert_eq!(
        attempts,
        vec![
            (1, RunStatus::Failed),
            (2, RunStatus::Failed),
            (3, RunStatus::Completed)
        ]
    );
}

#[tokio::test]
async fn retries_stop_at_attempt_bound() {
    let harness = Harness::new();
    let engine = harness
        .engine_with(FLAKY_YAML, flaky_registry(10))
        .with_retry_policy(fast_retry(2));
    let outcome = engine.run_mapping(engine.mappings()[0].id, &full()).await;
    assert_eq!(outcome.attempts.len(), 2);
    assert_eq!(outcome.status(), RunStatus::Failed);
    assert!(outcome.error_message().unwrap().contains("SOURCE_BUSY"));
}

#[tokio::test]
async fn run_all_isolates_failing_mappings() {
    let harness = Harness::new();
    let engine = Arc::new(harness.engine(
        r#"
version: "1.0"
scheduler: { workers: 2 }
mappings:
  - entity_type: customer
    source:
      name: crm
      extractor: sqlite_table
      config: { path: /nonexistent/syncforge/crm.db, table: customers }
    transformer: { field_mappings: { NO: code } }
    loader: { use: sqlite_table, destination: customers, unique_field: code }
  - entity_type: product
    source: { name: erp, extractor: inline, config: { records: [{ITEM_NO: A1}, {ITEM_NO: A2}] } }
    transformer: { field_mappings: { ITEM_NO: sku } }
    loader: { use: sqlite_table, destination: products, unique_field: sku }
"#,
    ));

    let outcomes = run_all(Arc::clone(&engine), &MappingSelector::All, &full()).await;
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].entity_type, "customer");
    assert_eq!(outcomes[0].status(), RunStatus::Failed);
    assert!(outcomes[0].last().unwrap().is_retryable());
    assert_eq!(outcomes[1].entity_type, "product");
    assert_eq!(outcomes[1].status(), RunStatus::Completed);
    assert_eq!(harness.store.count("products").unwrap(), 2);
}

#[tokio::test]
async fn inline_extractor_pages_through_all_rows() {
    let mut extractor = InlineExtractor::from_rows(vec![
        [("A".to_string(), Value::Int(1))].into_iter().collect(),
        [("A".to_string(), Value::Int(2))].into_iter().collect(),
    ])
    .with_page_size(1);
    let rows = extractor.extract(&Query::new()).await.unwrap();
    assert_eq!(rows.len(), 2);
}

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("tests/fixtures")
        .join(name)
}

#[test]
fn catalog_fixture_parses_and_validates() {
    std::env::set_var("SF_TEST_ERP_DB", "/var/lib/erp/erp.db");
    let config = parse_config(&fixture("catalog_sync.yaml")).unwrap();
    assert_eq!(config.mappings.len(), 3);
    assert_eq!(config.mappings[0].source.config["environments"]["prod"], "/var/lib/erp/erp.db");
    validate_config(&config, &ComponentRegistry::with_builtins()).unwrap();
    std::env::remove_var("SF_TEST_ERP_DB");
}

#[test]
fn invalid_fixture_reports_every_problem() {
    let config = parse_config(&fixture("invalid_sync.yaml")).unwrap();
    let err = validate_config(&config, &ComponentRegistry::with_builtins())
        .unwrap_err()
        .to_string();
    assert!(err.starts_with("Sync configuration validation failed:"), "{err}");
    assert!(err.contains("unknown extractor 'legacy_api'"), "{err}");
    assert!(err.contains("conflict_strategy 'newest_wins' requires timestamp_field"), "{err}");
    assert!(err.contains("parent_mapping 'family' is not a configured entity type"), "{err}");
}
