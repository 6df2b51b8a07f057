use std::time::Duration;

use proptest::prelude::*;
use syncforge_engine::config::parser;
use syncforge_engine::config::validator;
use syncforge_engine::errors::{compute_backoff, PipelineError};
use syncforge_engine::{ComponentRegistry, RetryPolicy};
use syncforge_types::{BackoffClass, SyncError};

fn backoff_class() -> impl Strategy<Value = BackoffClass> {
    prop_oneof![
        Just(BackoffClass::Fast),
        Just(BackoffClass::Normal),
        Just(BackoffClass::Slow),
    ]
}

fn transient() -> PipelineError {
    PipelineError::Sync(SyncError::extract_connect("SOURCE_BUSY", "database is locked"))
}

proptest! {
    #[test]
    fn backoff_never_exceeds_cap(
        class in backoff_class(),
        base_ms in 0_u64..10_000,
        max_ms in 0_u64..120_000,
        attempt in 0_u32..64,
    ) {
        let max = Duration::from_millis(max_ms);
        let delay = compute_backoff(class, Duration::from_millis(base_ms), max, attempt);
        prop_assert!(delay <= max);
    }

    #[test]
    fn backoff_is_monotonic_in_attempt(
        class in backoff_class(),
        base_ms in 1_u64..5_000,
        attempt in 1_u32..40,
    ) {
        let base = Duration::from_millis(base_ms);
        let max = Duration::from_secs(3_600);
        prop_assert!(
            compute_backoff(class, base, max, attempt) <= compute_backoff(class, base, max, attempt + 1)
        );
    }

    #[test]
    fn retry_stops_at_attempt_bound(max_attempts in 1_u32..10, attempt in 1_u32..20) {
        let policy = RetryPolicy::new(max_attempts, Duration::from_millis(1), Duration::from_millis(10));
        prop_assert_eq!(policy.should_retry(&transient(), attempt), attempt < max_attempts);
    }

    #[test]
    fn permanent_errors_are_never_retried(max_attempts in 1_u32..10, attempt in 1_u32..10) {
        let policy = RetryPolicy::new(max_attempts, Duration::from_millis(1), Duration::from_millis(10));
        let permanent = PipelineError::Sync(SyncError::extract_query("UNKNOWN_TABLE", "no such table"));
        prop_assert!(!policy.should_retry(&permanent, attempt));
    }

    #[test]
    fn newest_wins_requires_timestamp_field(with_timestamp in any::<bool>()) {
        let timestamp_yaml = if with_timestamp { "timestamp_field: modified_at" } else { "" };
        let yaml = format!(
            r#"
version: "1.0"
mappings:
  - entity_type: product
    source: {{ name: erp, extractor: inline, config: {{ records: [] }} }}
    transformer: {{ field_mappings: {{ ITEM_NO: sku, MODIFIED_AT: modified_at }} }}
    loader:
      use: sqlite_table
      destination: products
      unique_field: sku
      conflict_strategy: newest_wins
      {timestamp_yaml}
"#
        );
        let config = parser::parse_config_str(&yaml).expect("fixture should parse");
        let result = validator::validate_config(&config, &ComponentRegistry::with_builtins());
        prop_assert_eq!(result.is_ok(), with_timestamp);
    }

    #[test]
    fn batch_size_must_be_positive(batch_size in 0_usize..5) {
        let yaml = format!(
            r#"
version: "1.0"
defaults: {{ batch_size: {batch_size} }}
mappings:
  - entity_type: product
    source: {{ name: erp, extractor: inline, config: {{ records: [] }} }}
    transformer: {{ field_mappings: {{ ITEM_NO: sku }} }}
    loader: {{ use: sqlite_table, destination: products, unique_field: sku }}
"#
        );
        let config = parser::parse_config_str(&yaml).expect("fixture should parse");
        let result = validator::validate_config(&config, &ComponentRegistry::with_builtins());
        prop_assert_eq!(result.is_ok(), batch_size > 0);
    }

    #[test]
    fn at_most_one_active_mapping_per_entity_type(active in 0_usize..4) {
        let mut yaml = String::from("version: \"1.0\"\nmappings:\n");
        for i in 0..3 {
            yaml.push_str(&format!(
                r#"
  - entity_type: product
    active: {}
    source: {{ name: erp_{i}, extractor: inline, config: {{ records: [] }} }}
    transformer: {{ field_mappings: {{ ITEM_NO: sku }} }}
    loader: {{ use: sqlite_table, destination: products, unique_field: sku }}
"#,
                i < active
            ));
        }
        let config = parser::parse_config_str(&yaml).expect("fixture should parse");
        let result = validator::validate_config(&config, &ComponentRegistry::with_builtins());
        prop_assert_eq!(result.is_ok(), active <= 1);
    }
}
