//! Configuration types deserialized from the sync YAML file.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level sync configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub version: String,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub mappings: Vec<MappingConfig>,
}

impl SyncConfig {
    /// Find the mapping configured for `entity_type`.
    #[must_use]
    pub fn mapping_for(&self, entity_type: &str) -> Option<&MappingConfig> {
        self.mappings
            .iter()
            .find(|m| m.entity_type == entity_type && m.active)
            .or_else(|| self.mappings.iter().find(|m| m.entity_type == entity_type))
    }
}

/// Location of the registry / watermark / run-log database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    #[serde(default = "default_state_path")]
    pub path: PathBuf,
}

fn default_state_path() -> PathBuf {
    PathBuf::from("./state/syncforge.db")
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
        }
    }
}

/// Location of the local destination store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("./data/local.db")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

/// Run parameters used when the caller does not override them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_window_days")]
    pub incremental_window_days: u32,
    #[serde(default = "default_timeout_seconds")]
    pub page_timeout_seconds: u64,
    #[serde(default = "default_timeout_seconds")]
    pub commit_timeout_seconds: u64,
}

fn default_batch_size() -> usize {
    500
}
fn default_window_days() -> u32 {
    7
}
fn default_timeout_seconds() -> u64 {
    60
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            incremental_window_days: default_window_days(),
            page_timeout_seconds: default_timeout_seconds(),
            commit_timeout_seconds: default_timeout_seconds(),
        }
    }
}

/// Bounded retry for transient failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    60_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum mapping runs in flight at once.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Whether a `partial` run advances the successful watermark.
    #[serde(default)]
    pub partial_advances_watermark: bool,
}

fn default_workers() -> usize {
    4
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            partial_advances_watermark: false,
        }
    }
}

/// One (source, target, entity type) sync unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingConfig {
    pub entity_type: String,
    #[serde(default = "default_active")]
    pub active: bool,
    pub source: SourceConfig,
    #[serde(default)]
    pub transformer: TransformerConfig,
    pub loader: LoaderConfig,
    #[serde(default)]
    pub schedule: Option<ScheduleConfig>,
}

fn default_active() -> bool {
    true
}

impl MappingConfig {
    /// Scheduling family; falls back to the entity type.
    #[must_use]
    pub fn family(&self) -> &str {
        self.schedule
            .as_ref()
            .and_then(|s| s.family.as_deref())
            .unwrap_or(&self.entity_type)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub extractor: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformerConfig {
    #[serde(rename = "use", default = "default_transformer")]
    pub use_ref: String,
    /// Implementation-specific options, everything except `use`.
    #[serde(flatten)]
    pub options: serde_json::Map<String, serde_json::Value>,
}

fn default_transformer() -> String {
    "field_map".to_string()
}

impl Default for TransformerConfig {
    fn default() -> Self {
        Self {
            use_ref: default_transformer(),
            options: serde_json::Map::new(),
        }
    }
}

/// Which side wins when a record already exists in the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// Incoming record always overwrites.
    #[default]
    SourceWins,
    /// Overwrite only when the incoming timestamp is at least the stored one.
    NewestWins,
    /// Never overwrite an existing record.
    KeepExisting,
}

impl ConflictStrategy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SourceWins => "source_wins",
            Self::NewestWins => "newest_wins",
            Self::KeepExisting => "keep_existing",
        }
    }
}

impl std::fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    #[serde(rename = "use")]
    pub use_ref: String,
    pub destination: String,
    #[serde(default)]
    pub unique_field: Option<String>,
    #[serde(default)]
    pub parent_field: Option<String>,
    /// Entity type whose destination resolves `parent_field`.
    #[serde(default)]
    pub parent_mapping: Option<String>,
    #[serde(default)]
    pub conflict_strategy: ConflictStrategy,
    #[serde(default)]
    pub timestamp_field: Option<String>,
}

/// Cadence hints for the scheduler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub family: Option<String>,
    #[serde(default)]
    pub incremental_every: Option<String>,
    #[serde(default)]
    pub full_every: Option<String>,
}

/// Parse a duration string like `"90s"`, `"15m"`, `"24h"` or `"7d"`.
/// A bare number is taken as seconds.
///
/// # Errors
///
/// Returns an error if the string is empty, has an unknown suffix, or
/// evaluates to zero.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim().to_lowercase();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }
    let (num_str, multiplier) = if let Some(n) = s.strip_suffix("ms") {
        (n, 0)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60)
    } else if let Some(n) = s.strip_suffix('h') {
        (n, 3_600)
    } else if let Some(n) = s.strip_suffix('d') {
        (n, 86_400)
    } else {
        (s.as_str(), 1)
    };
    let num: u64 = num_str
        .trim()
        .parse()
        .map_err(|e| format!("invalid duration '{s}': {e}"))?;
    let duration = if multiplier == 0 {
        Duration::from_millis(num)
    } else {
        Duration::from_secs(num.saturating_mul(multiplier))
    };
    if duration.is_zero() {
        return Err(format!("duration '{s}' must be greater than zero"));
    }
    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_minimal_config() {
        let yaml = r#"
version: "1.0"
mappings:
  - entity_type: product
    source:
      name: legacy_erp
      extractor: sqlite_table
      config:
        path: ./erp.db
        table: items
    loader:
      use: sqlite_table
      destination: products
      unique_field: sku
"#;
        let config: SyncConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.mappings.len(), 1);
        let mapping = &config.mappings[0];
        assert!(mapping.active);
        assert_eq!(mapping.transformer.use_ref, "field_map");
        assert!(mapping.transformer.options.is_empty());
        assert_eq!(mapping.loader.conflict_strategy, ConflictStrategy::SourceWins);
        assert_eq!(mapping.source.config["table"], "items");
        assert_eq!(mapping.family(), "product");
        // Defaults applied
        assert_eq!(config.defaults.batch_size, 500);
        assert_eq!(config.defaults.incremental_window_days, 7);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.scheduler.workers, 4);
        assert!(!config.scheduler.partial_advances_watermark);
        assert_eq!(config.state.path, PathBuf::from("./state/syncforge.db"));
    }

    #[test]
    fn test_transformer_options_are_flattened() {
        let yaml = r#"
version: "1.0"
mappings:
  - entity_type: product
    source: { name: erp, extractor: inline }
    transformer:
      use: field_map
      strict: true
      field_mappings: { ITEM_NO: sku }
    loader: { use: sqlite_table, destination: products, conflict_strategy: newest_wins, timestamp_field: modified_at }
    schedule: { family: catalog, incremental_every: 15m }
"#;
        let config: SyncConfig = serde_yaml::from_str(yaml).unwrap();
        let mapping = &config.mappings[0];
        assert_eq!(mapping.transformer.options["strict"], serde_json::json!(true));
        assert_eq!(
            mapping.transformer.options["field_mappings"]["ITEM_NO"],
            serde_json::json!("sku")
        );
        assert!(!mapping.transformer.options.contains_key("use"));
        assert_eq!(mapping.loader.conflict_strategy, ConflictStrategy::NewestWins);
        assert_eq!(mapping.family(), "catalog");
    }

    #[test]
    fn test_unknown_conflict_strategy_rejected() {
        let yaml = r#"
version: "1.0"
mappings:
  - entity_type: product
    source: { name: erp, extractor: inline }
    loader: { use: sqlite_table, destination: products, conflict_strategy: whoever }
"#;
        let err = serde_yaml::from_str::<SyncConfig>(yaml).unwrap_err();
        assert!(err.to_string().contains("unknown variant"));
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("90s"), Ok(Duration::from_secs(90)));
        assert_eq!(parse_duration("15m"), Ok(Duration::from_secs(900)));
        assert_eq!(parse_duration("24h"), Ok(Duration::from_secs(86_400)));
        assert_eq!(parse_duration("2d"), Ok(Duration::from_secs(172_800)));
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration("30"), Ok(Duration::from_secs(30)));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("0m").is_err());
        assert!(parse_duration("fortnight").is_err());
    }

    #[test]
    fn test_mapping_for_prefers_active() {
        let yaml = r#"
version: "1.0"
mappings:
  - entity_type: product
    active: false
    source: { name: old_erp, extractor: inline }
    loader: { use: sqlite_table, destination: products }
  - entity_type: product
    source: { name: erp, extractor: inline }
    loader: { use: sqlite_table, destination: products }
"#;
        let config: SyncConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.mapping_for("product").unwrap().source.name, "erp");
        assert!(config.mapping_for("brand").is_none());
    }
}
