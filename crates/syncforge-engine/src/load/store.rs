//! Local destination store: one generic entity table keyed by
//! `(destination, natural_key)`.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use syncforge_types::SyncError;

use crate::config::types::ConflictStrategy;

const TIMESTAMP_FMT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

const CREATE_TABLES: &str = r"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS entities (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    destination TEXT NOT NULL,
    natural_key TEXT NOT NULL,
    payload TEXT NOT NULL,
    parent_id INTEGER REFERENCES entities(id),
    source_modified_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (destination, natural_key)
);

CREATE INDEX IF NOT EXISTS idx_entities_parent ON entities (parent_id);
";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{context}: {source}")]
    Sqlite {
        context: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("local store lock poisoned")]
    LockPoisoned,

    #[error("stored payload for {0} is not valid JSON")]
    Corrupt(String),
}

impl StoreError {
    fn sqlite(context: &'static str) -> impl FnOnce(rusqlite::Error) -> Self {
        move |source| Self::Sqlite { context, source }
    }

    fn is_busy(&self) -> bool {
        match self {
            Self::Sqlite { source, .. } => matches!(
                source.sqlite_error_code(),
                Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
            ),
            _ => false,
        }
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        if err.is_busy() {
            SyncError::load_connect("STORE_BUSY", err.to_string())
        } else {
            SyncError::load("STORE_WRITE_FAILED", err.to_string())
        }
    }
}

/// One record ready to persist.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityWrite {
    pub natural_key: String,
    pub payload: serde_json::Value,
    pub parent_id: Option<i64>,
    /// Comparable rendering of the record's timestamp field.
    pub source_modified_at: Option<String>,
}

/// What happened to one write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Created,
    Updated,
    /// Identical payload, or the conflict strategy kept the stored record.
    Unchanged,
}

/// A persisted entity.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntity {
    pub id: i64,
    pub natural_key: String,
    pub payload: serde_json::Value,
    pub parent_id: Option<i64>,
    pub source_modified_at: Option<String>,
}

pub struct LocalStore {
    conn: Mutex<Connection>,
}

impl LocalStore {
    /// Open or create the store at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or database cannot be created.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(StoreError::sqlite("open"))?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(StoreError::sqlite("open: busy_timeout"))?;
        Self::init(conn)
    }

    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(StoreError::sqlite("open_in_memory"))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(CREATE_TABLES)
            .map_err(StoreError::sqlite("create tables"))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// Natural key to row id for every entity in `destination`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn key_index(&self, destination: &str) -> Result<HashMap<String, i64>, StoreError> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare("SELECT natural_key, id FROM entities WHERE destination = ?1")
            .map_err(StoreError::sqlite("key_index: prepare"))?;
        let index: HashMap<String, i64> = stmt
            .query_map([destination], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(StoreError::sqlite("key_index: query"))?
            .collect::<Result<_, _>>()
            .map_err(StoreError::sqlite("key_index: read"))?;
        Ok(index)
    }

    /// # Errors
    ///
    /// Returns an error if the query fails or the stored payload is corrupt.
    pub fn get(&self, destination: &str, natural_key: &str) -> Result<Option<StoredEntity>, StoreError> {
        let conn = self.lock_conn()?;
        let row = conn
            .query_row(
                "SELECT id, natural_key, payload, parent_id, source_modified_at \
                 FROM entities WHERE destination = ?1 AND natural_key = ?2",
                params![destination, natural_key],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<i64>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                },
            )
            .optional()
            .map_err(StoreError::sqlite("get"))?;

        row.map(|(id, natural_key, payload, parent_id, source_modified_at)| {
            let payload = serde_json::from_str(&payload)
                .map_err(|_| StoreError::Corrupt(natural_key.clone()))?;
            Ok(StoredEntity {
                id,
                natural_key,
                payload,
                parent_id,
                source_modified_at,
            })
        })
        .transpose()
    }

    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn count(&self, destination: &str) -> Result<u64, StoreError> {
        let conn = self.lock_conn()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM entities WHERE destination = ?1",
                [destination],
                |row| row.get(0),
            )
            .map_err(StoreError::sqlite("count"))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Apply `writes` to `destination` in one transaction. Either every
    /// write commits or none does.
    ///
    /// # Errors
    ///
    /// Returns an error (and rolls back) if any statement fails.
    pub fn upsert_batch(
        &self,
        destination: &str,
        writes: &[EntityWrite],
        strategy: ConflictStrategy,
    ) -> Result<Vec<WriteOutcome>, StoreError> {
        let mut conn = self.lock_conn()?;
        let tx = conn
            .transaction()
            .map_err(StoreError::sqlite("upsert: begin"))?;
        let now = Utc::now().format(TIMESTAMP_FMT).to_string();
        let mut outcomes = Vec::with_capacity(writes.len());

        for write in writes {
            let existing: Option<(i64, String, Option<i64>, Option<String>)> = tx
                .query_row(
                    "SELECT id, payload, parent_id, source_modified_at FROM entities \
                     WHERE destination = ?1 AND natural_key = ?2",
                    params![destination, write.natural_key],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )
                .optional()
                .map_err(StoreError::sqlite("upsert: lookup"))?;

            let payload = write.payload.to_string();
            let outcome = match existing {
                None => {
                    tx.execute(
                        "INSERT INTO entities \
                         (destination, natural_key, payload, parent_id, source_modified_at, created_at, updated_at) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                        params![
                            destination,
                            write.natural_key,
                            payload,
                            write.parent_id,
                            write.source_modified_at,
                            now
                        ],
                    )
                    .map_err(StoreError::sqlite("upsert: insert"))?;
                    WriteOutcome::Created
                }
                Some((id, stored_payload, stored_parent, stored_modified)) => {
                    let identical = stored_parent == write.parent_id
                        && serde_json::from_str::<serde_json::Value>(&stored_payload)
                            .is_ok_and(|stored| stored == write.payload);
                    if identical || !should_overwrite(strategy, stored_modified.as_deref(), write) {
                        WriteOutcome::Unchanged
                    } else {
                        tx.execute(
                            "UPDATE entities SET payload = ?2, parent_id = ?3, \
                             source_modified_at = ?4, updated_at = ?5 WHERE id = ?1",
                            params![id, payload, write.parent_id, write.source_modified_at, now],
                        )
                        .map_err(StoreError::sqlite("upsert: update"))?;
                        WriteOutcome::Updated
                    }
                }
            };
            outcomes.push(outcome);
        }

        tx.commit().map_err(StoreError::sqlite("upsert: commit"))?;
        Ok(outcomes)
    }
}

fn should_overwrite(strategy: ConflictStrategy, stored_modified: Option<&str>, write: &EntityWrite) -> bool {
    match strategy {
        ConflictStrategy::SourceWins => true,
        ConflictStrategy::KeepExisting => false,
        ConflictStrategy::NewestWins => match (stored_modified, write.source_modified_at.as_deref()) {
            (Some(stored), Some(incoming)) => compare_modified(incoming, stored) != Ordering::Less,
            (None, _) => true,
            (Some(_), None) => false,
        },
    }
}

/// Parsed form of a rendered source timestamp.
#[derive(Debug)]
enum ModifiedKey<'a> {
    Number(f64),
    Instant(NaiveDateTime),
    Text(&'a str),
}

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

impl<'a> ModifiedKey<'a> {
    fn parse(raw: &'a str) -> Self {
        let trimmed = raw.trim();
        if let Ok(n) = trimmed.parse::<f64>() {
            return Self::Number(n);
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
            return Self::Instant(dt.naive_utc());
        }
        for format in NAIVE_FORMATS {
            if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, format) {
                return Self::Instant(dt);
            }
        }
        if let Some(dt) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
        {
            return Self::Instant(dt);
        }
        Self::Text(raw)
    }
}

/// Order two rendered `source_modified_at` values. Numbers compare
/// numerically and date/time strings as instants (naive ones read as UTC);
/// anything else, or a mix of kinds, falls back to text order.
pub(crate) fn compare_modified(a: &str, b: &str) -> Ordering {
    match (ModifiedKey::parse(a), ModifiedKey::parse(b)) {
        (ModifiedKey::Number(x), ModifiedKey::Number(y)) => x.total_cmp(&y),
        (ModifiedKey::Instant(x), ModifiedKey::Instant(y)) => x.cmp(&y),
        _ => a.cmp(b),
    }
}
