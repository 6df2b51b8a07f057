//! `sqlite_table` extractor: pages through one table of a legacy `SQLite`
//! database with keyset paging on `rowid`.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, OpenFlags};
use serde::Deserialize;
use syncforge_types::{Row, SyncError, Value};

use super::{
    is_identifier, Extractor, FilterOp, Page, Query, DEFAULT_MODIFIED_FORMAT, DEFAULT_PAGE_SIZE,
};
use crate::config::types::SourceConfig;

/// Registry key.
pub const KIND: &str = "sqlite_table";

const ROWID_ALIAS: &str = "__sf_rowid";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SqliteSourceConfig {
    /// Direct database path. Takes precedence over `environment`.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default)]
    pub environments: BTreeMap<String, PathBuf>,
    pub table: String,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default)]
    pub modified_field: Option<String>,
    /// `strftime` layout of `modified_field`; watermarks are rendered with
    /// it, so its precision bounds how finely incremental runs cut off.
    #[serde(default = "default_modified_format")]
    pub modified_format: String,
    /// Static filters in the caller JSON form.
    #[serde(default)]
    pub filters: serde_json::Value,
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_modified_format() -> String {
    DEFAULT_MODIFIED_FORMAT.to_string()
}

impl SqliteSourceConfig {
    fn resolve_path(&self) -> Result<PathBuf, SyncError> {
        if let Some(path) = &self.path {
            return Ok(path.clone());
        }
        let environment = self.environment.as_deref().ok_or_else(|| {
            SyncError::config("MISSING_PATH", "sqlite_table needs `path` or `environment`")
        })?;
        self.environments.get(environment).cloned().ok_or_else(|| {
            SyncError::config(
                "UNKNOWN_ENVIRONMENT",
                format!(
                    "environment '{environment}' is not listed in `environments` (known: {})",
                    self.environments.keys().cloned().collect::<Vec<_>>().join(", ")
                ),
            )
        })
    }
}

pub struct SqliteTableExtractor {
    config: SqliteSourceConfig,
    path: PathBuf,
    static_query: Query,
    conn: Option<Arc<Mutex<Connection>>>,
}

impl SqliteTableExtractor {
    /// Build from a mapping's source block. Does not touch the database.
    ///
    /// # Errors
    ///
    /// Returns a config error for malformed options, unsafe identifiers, or
    /// an unresolvable environment.
    pub fn from_config(source: &SourceConfig) -> Result<Self, SyncError> {
        let config: SqliteSourceConfig = serde_json::from_value(source.config.clone())
            .map_err(|e| {
                SyncError::config(
                    "INVALID_SOURCE_CONFIG",
                    format!("source '{}': {e}", source.name),
                )
            })?;
        if !is_identifier(&config.table) {
            return Err(SyncError::config(
                "INVALID_IDENTIFIER",
                format!("table name '{}' is not a plain identifier", config.table),
            ));
        }
        if let Some(field) = &config.modified_field {
            if !is_identifier(field) {
                return Err(SyncError::config(
                    "INVALID_IDENTIFIER",
                    format!("modified_field '{field}' is not a plain identifier"),
                ));
            }
        }
        if config.page_size == 0 {
            return Err(SyncError::config("INVALID_PAGE_SIZE", "page_size must be at least 1"));
        }
        let static_query = Query::from_json(&config.filters)?;
        check_filter_fields(&static_query)?;
        let path = config.resolve_path()?;
        Ok(Self {
            config,
            path,
            static_query,
            conn: None,
        })
    }

    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

fn check_filter_fields(query: &Query) -> Result<(), SyncError> {
    match query.filters.iter().find(|f| !is_identifier(&f.field)) {
        Some(bad) => Err(SyncError::extract_query(
            "INVALID_IDENTIFIER",
            format!("filter field '{}' is not a plain identifier", bad.field),
        )),
        None => Ok(()),
    }
}

/// Map a driver error to the extract taxonomy: lock contention is
/// transient, everything else is a query problem.
fn classify(context: &str, e: &rusqlite::Error) -> SyncError {
    let busy = matches!(
        e.sqlite_error_code(),
        Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
    );
    if busy {
        SyncError::extract_connect("SOURCE_BUSY", format!("{context}: {e}"))
    } else {
        SyncError::extract_query("QUERY_FAILED", format!("{context}: {e}"))
    }
}

fn to_sql(value: &Value, datetime_format: &str) -> SqlValue {
    match value {
        Value::Null | Value::List(_) => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Int(i) => SqlValue::Integer(*i),
        Value::Float(f) => SqlValue::Real(*f),
        Value::Decimal(d) => d
            .to_string()
            .parse::<f64>()
            .map_or_else(|_| SqlValue::Text(d.to_string()), SqlValue::Real),
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Date(d) => SqlValue::Text(d.format("%Y-%m-%d").to_string()),
        Value::DateTime(dt) => SqlValue::Text(dt.format(datetime_format).to_string()),
        Value::Json(j) => SqlValue::Text(j.to_string()),
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(t) | ValueRef::Blob(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
    }
}

/// Build the page query and its bound parameters.
fn build_select(
    table: &str,
    query: &Query,
    after_rowid: i64,
    page_size: usize,
    datetime_format: &str,
) -> (String, Vec<SqlValue>) {
    let mut clauses = vec!["rowid > ?".to_string()];
    let mut params = vec![SqlValue::Integer(after_rowid)];

    for filter in &query.filters {
        match (&filter.op, &filter.value) {
            (FilterOp::In, Value::List(items)) if items.is_empty() => {
                clauses.push("0".to_string());
            }
            (FilterOp::In, Value::List(items)) => {
                let marks = vec!["?"; items.len()].join(", ");
                clauses.push(format!("\"{}\" IN ({marks})", filter.field));
                params.extend(items.iter().map(|v| to_sql(v, datetime_format)));
            }
            (op, value) => {
                let op = if *op == FilterOp::In { "=" } else { op.sql() };
                clauses.push(format!("\"{}\" {op} ?", filter.field));
                params.push(to_sql(value, datetime_format));
            }
        }
    }

    #[allow(clippy::cast_possible_wrap)]
    params.push(SqlValue::Integer(page_size as i64));
    let sql = format!(
        "SELECT rowid AS {ROWID_ALIAS}, * FROM \"{table}\" WHERE {} ORDER BY rowid LIMIT ?",
        clauses.join(" AND ")
    );
    (sql, params)
}

fn run_page(
    conn: &Connection,
    sql: &str,
    params: &[SqlValue],
) -> Result<(Vec<Row>, Option<i64>), SyncError> {
    let mut stmt = conn.prepare(sql).map_err(|e| classify("prepare page query", &e))?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| (*c).to_string()).collect();
    let mut rows = stmt
        .query(rusqlite::params_from_iter(params.iter()))
        .map_err(|e| classify("run page query", &e))?;

    let mut out = Vec::new();
    let mut last_rowid = None;
    while let Some(row) = rows.next().map_err(|e| classify("read page row", &e))? {
        let rowid: i64 = row.get(0).map_err(|e| classify("read rowid", &e))?;
        last_rowid = Some(rowid);
        let mut record = Row::with_capacity(columns.len().saturating_sub(1));
        for (idx, name) in columns.iter().enumerate().skip(1) {
            let value = row.get_ref(idx).map_err(|e| classify("read column", &e))?;
            record.insert(name.clone(), from_sql(value));
        }
        out.push(record);
    }
    Ok((out, last_rowid))
}

fn open_and_check(
    path: &std::path::Path,
    table: &str,
    modified_field: Option<&str>,
) -> Result<Connection, SyncError> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| {
        SyncError::extract_connect("OPEN_FAILED", format!("{}: {e}", path.display()))
            .with_details(serde_json::json!({ "path": path.display().to_string() }))
    })?;

    let mut stmt = conn
        .prepare("SELECT name FROM pragma_table_info(?1)")
        .map_err(|e| classify("inspect table", &e))?;
    let columns: Vec<String> = stmt
        .query_map([table], |row| row.get(0))
        .map_err(|e| classify("inspect table", &e))?
        .collect::<Result<_, _>>()
        .map_err(|e| classify("inspect table", &e))?;
    drop(stmt);

    if columns.is_empty() {
        return Err(SyncError::extract_query(
            "UNKNOWN_TABLE",
            format!("no such table: {table}"),
        ));
    }
    if let Some(field) = modified_field {
        if !columns.iter().any(|c| c == field) {
            return Err(SyncError::extract_query(
                "UNKNOWN_COLUMN",
                format!("table '{table}' has no column '{field}'"),
            ));
        }
    }
    Ok(conn)
}

#[async_trait]
impl Extractor for SqliteTableExtractor {
    fn kind(&self) -> &'static str {
        KIND
    }

    async fn connect(&mut self) -> Result<(), SyncError> {
        if self.conn.is_some() {
            return Ok(());
        }
        let path = self.path.clone();
        let table = self.config.table.clone();
        let modified_field = self.config.modified_field.clone();
        let conn = tokio::task::spawn_blocking(move || {
            open_and_check(&path, &table, modified_field.as_deref())
        })
        .await
        .map_err(|e| SyncError::internal("TASK_PANICKED", format!("connect task panicked: {e}")))??;

        tracing::debug!(path = %self.path.display(), table = %self.config.table, "Connected to source");
        self.conn = Some(Arc::new(Mutex::new(conn)));
        Ok(())
    }

    async fn fetch_page(&mut self, query: &Query, cursor: Option<&str>) -> Result<Page, SyncError> {
        self.connect().await?;
        let conn = self
            .conn
            .clone()
            .ok_or_else(|| SyncError::internal("NOT_CONNECTED", "extractor is not connected"))?;

        let after_rowid = match cursor {
            Some(raw) => raw.parse::<i64>().map_err(|_| {
                SyncError::internal("BAD_CURSOR", format!("invalid page cursor '{raw}'"))
            })?,
            None => 0,
        };
        let effective = self.static_query.clone().merge(query.clone());
        check_filter_fields(&effective)?;
        let (sql, params) = build_select(
            &self.config.table,
            &effective,
            after_rowid,
            self.config.page_size,
            &self.config.modified_format,
        );

        let (rows, last_rowid) = tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| SyncError::internal("LOCK_POISONED", "source connection lock poisoned"))?;
            run_page(&guard, &sql, &params)
        })
        .await
        .map_err(|e| SyncError::internal("TASK_PANICKED", format!("page task panicked: {e}")))??;

        let next = if rows.len() == self.config.page_size {
            last_rowid.map(|id| id.to_string())
        } else {
            None
        };
        Ok(Page { rows, next })
    }

    fn modified_field(&self) -> Option<&str> {
        self.config.modified_field.as_deref()
    }

    fn watermark_value(&self, at: DateTime<Utc>) -> Value {
        Value::Text(at.format(&self.config.modified_format).to_string())
    }
}
