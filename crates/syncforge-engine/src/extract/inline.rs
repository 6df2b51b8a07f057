//! `inline` extractor: records embedded directly in the mapping config.
//! Used for reference data and fixtures.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use syncforge_types::value::row_from_json;
use syncforge_types::{Row, SyncError, Value};

use super::{Extractor, Page, Query, DEFAULT_MODIFIED_FORMAT, DEFAULT_PAGE_SIZE};
use crate::config::types::SourceConfig;

/// Registry key.
pub const KIND: &str = "inline";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct InlineSourceConfig {
    records: Vec<serde_json::Map<String, serde_json::Value>>,
    #[serde(default = "default_page_size")]
    page_size: usize,
    #[serde(default)]
    modified_field: Option<String>,
    #[serde(default = "default_modified_format")]
    modified_format: String,
    #[serde(default)]
    filters: serde_json::Value,
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_modified_format() -> String {
    DEFAULT_MODIFIED_FORMAT.to_string()
}

pub struct InlineExtractor {
    rows: Vec<Row>,
    page_size: usize,
    modified_field: Option<String>,
    modified_format: String,
    static_query: Query,
}

impl InlineExtractor {
    /// # Errors
    ///
    /// Returns a config error for malformed options.
    pub fn from_config(source: &SourceConfig) -> Result<Self, SyncError> {
        let config: InlineSourceConfig = serde_json::from_value(source.config.clone())
            .map_err(|e| {
                SyncError::config(
                    "INVALID_SOURCE_CONFIG",
                    format!("source '{}': {e}", source.name),
                )
            })?;
        if config.page_size == 0 {
            return Err(SyncError::config("INVALID_PAGE_SIZE", "page_size must be at least 1"));
        }
        Ok(Self {
            rows: config.records.iter().map(row_from_json).collect(),
            page_size: config.page_size,
            modified_field: config.modified_field,
            modified_format: config.modified_format,
            static_query: Query::from_json(&config.filters)?,
        })
    }

    /// Build directly from rows.
    #[must_use]
    pub fn from_rows(rows: Vec<Row>) -> Self {
        Self {
            rows,
            page_size: DEFAULT_PAGE_SIZE,
            modified_field: None,
            modified_format: DEFAULT_MODIFIED_FORMAT.to_string(),
            static_query: Query::new(),
        }
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    #[must_use]
    pub fn with_modified_field(mut self, field: impl Into<String>) -> Self {
        self.modified_field = Some(field.into());
        self
    }
}

#[async_trait]
impl Extractor for InlineExtractor {
    fn kind(&self) -> &'static str {
        KIND
    }

    async fn connect(&mut self) -> Result<(), SyncError> {
        Ok(())
    }

    async fn fetch_page(&mut self, query: &Query, cursor: Option<&str>) -> Result<Page, SyncError> {
        let offset = match cursor {
            Some(raw) => raw.parse::<usize>().map_err(|_| {
                SyncError::internal("BAD_CURSOR", format!("invalid page cursor '{raw}'"))
            })?,
            None => 0,
        };

        let mut rows = Vec::with_capacity(self.page_size);
        let mut position = offset;
        for row in self.rows.iter().skip(offset) {
            position += 1;
            if self.static_query.matches(row) && query.matches(row) {
                rows.push(row.clone());
                if rows.len() == self.page_size {
                    break;
                }
            }
        }

        let next = (position < self.rows.len() && rows.len() == self.page_size)
            .then(|| position.to_string());
        Ok(Page { rows, next })
    }

    fn modified_field(&self) -> Option<&str> {
        self.modified_field.as_deref()
    }

    fn watermark_value(&self, at: DateTime<Utc>) -> Value {
        Value::Text(at.format(&self.modified_format).to_string())
    }
}
