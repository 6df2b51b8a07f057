//! Extractors: produce raw records from an external source.
//!
//! An [`Extractor`] is connected once per run, then asked for pages until it
//! reports no next cursor. Page size is internal to the extractor and
//! independent of the loader's batch size.

mod filter;
pub mod inline;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use syncforge_types::{Row, SyncError, Value};

pub use filter::{Filter, FilterOp, Query};
pub use inline::InlineExtractor;
pub use sqlite::SqliteTableExtractor;

/// Default `modified_format` for sources that store timestamps as text.
/// Whole seconds: rows earlier in the watermark's own second are fetched
/// again on the next run. Sources with sub-second text timestamps should
/// configure a format such as `%Y-%m-%d %H:%M:%S%.6f`.
pub const DEFAULT_MODIFIED_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Default number of rows per page.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// One page of raw records, in source order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub rows: Vec<Row>,
    /// Opaque cursor for the following page; `None` on the last page.
    pub next: Option<String>,
}

#[async_trait]
pub trait Extractor: Send + Sync {
    /// Registry key this extractor was built from.
    fn kind(&self) -> &'static str;

    /// Establish and verify connectivity. Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns a retryable connectivity error when the source cannot be
    /// reached, or a query error when the configured object does not exist.
    async fn connect(&mut self) -> Result<(), SyncError>;

    /// Fetch the page after `cursor` (the first page when `None`).
    ///
    /// # Errors
    ///
    /// Any failure aborts extraction for the run; partial pages are never
    /// returned.
    async fn fetch_page(&mut self, query: &Query, cursor: Option<&str>) -> Result<Page, SyncError>;

    /// Field holding the record's last-modified time, used for incremental
    /// filters. `None` means the source cannot be read incrementally.
    fn modified_field(&self) -> Option<&str> {
        None
    }

    /// Express a watermark instant in the form the source compares against.
    fn watermark_value(&self, at: DateTime<Utc>) -> Value {
        Value::DateTime(at)
    }

    /// Read every page for `query`.
    ///
    /// # Errors
    ///
    /// Propagates the first connect or page failure.
    async fn extract(&mut self, query: &Query) -> Result<Vec<Row>, SyncError> {
        self.connect().await?;
        let mut rows = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self.fetch_page(query, cursor.as_deref()).await?;
            rows.extend(page.rows);
            match page.next {
                Some(next) => cursor = Some(next),
                None => return Ok(rows),
            }
        }
    }
}

/// Validate a SQL identifier (table or column name).
pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
