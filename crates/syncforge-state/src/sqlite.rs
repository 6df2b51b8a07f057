//! `SQLite`-backed implementation of [`StateBackend`].
//!
//! Uses a single `Mutex<Connection>` for thread safety.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row as SqlRow};
use syncforge_types::error::ErrorCategory;
use syncforge_types::state::{
    FailedRecord, MappingId, MappingRecord, RunId, RunMode, RunRecord, RunStats, RunStatus,
    Watermark, MAX_RUN_ERRORS,
};

use crate::backend::{MappingFilter, StateBackend};
use crate::error::{self, StateError};

/// Fixed-width UTC timestamp format. Lexical order matches time order, which
/// the monotonic watermark update relies on.
const TIMESTAMP_FMT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Idempotent DDL for state tables.
const CREATE_TABLES: &str = r"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS sources (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    extractor TEXT NOT NULL,
    config TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS targets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    loader TEXT NOT NULL,
    unique_field TEXT,
    conflict_strategy TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS mappings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_id INTEGER NOT NULL REFERENCES sources(id),
    target_id INTEGER NOT NULL REFERENCES targets(id),
    entity_type TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 1,
    config TEXT NOT NULL DEFAULT '{}',
    updated_at TEXT NOT NULL,
    UNIQUE (source_id, target_id, entity_type)
);

CREATE TABLE IF NOT EXISTS watermarks (
    mapping_id INTEGER PRIMARY KEY REFERENCES mappings(id),
    last_sync_time TEXT,
    last_successful_sync_time TEXT,
    last_sync_id TEXT,
    last_successful_id TEXT
);

CREATE TABLE IF NOT EXISTS sync_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    mapping_id INTEGER NOT NULL REFERENCES mappings(id),
    mode TEXT NOT NULL,
    status TEXT NOT NULL,
    attempt INTEGER NOT NULL DEFAULT 1,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    records_processed INTEGER NOT NULL DEFAULT 0,
    records_created INTEGER NOT NULL DEFAULT 0,
    records_updated INTEGER NOT NULL DEFAULT 0,
    records_unchanged INTEGER NOT NULL DEFAULT 0,
    records_failed INTEGER NOT NULL DEFAULT 0,
    records_skipped INTEGER NOT NULL DEFAULT 0,
    errors TEXT NOT NULL DEFAULT '[]',
    error_message TEXT,
    error_trace TEXT
);

CREATE INDEX IF NOT EXISTS idx_sync_runs_mapping ON sync_runs (mapping_id, id);

CREATE TABLE IF NOT EXISTS failed_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    mapping_id INTEGER NOT NULL REFERENCES mappings(id),
    run_id INTEGER NOT NULL REFERENCES sync_runs(id),
    record_key TEXT,
    record_json TEXT NOT NULL,
    error_message TEXT NOT NULL,
    error_category TEXT NOT NULL,
    failed_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_failed_records_run ON failed_records (run_id);
";

const RUN_COLUMNS: &str = "id, mapping_id, mode, status, attempt, started_at, finished_at, \
     records_processed, records_created, records_updated, records_unchanged, \
     records_failed, records_skipped, errors, error_message, error_trace";

const MAPPING_SELECT: &str = "SELECT m.id, s.name, t.name, m.entity_type, m.active, m.config \
     FROM mappings m \
     JOIN sources s ON s.id = m.source_id \
     JOIN targets t ON t.id = m.target_id";

/// `SQLite`-backed state storage.
///
/// Create with [`SqliteStateBackend::open`] for file-backed persistence
/// or [`SqliteStateBackend::in_memory`] for tests.
pub struct SqliteStateBackend {
    conn: Mutex<Connection>,
}

impl SqliteStateBackend {
    /// Open or create a `SQLite` state database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the directory can't be created,
    /// or [`StateError::Backend`] if the database can't be opened.
    pub fn open(path: &Path) -> error::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(|e| StateError::backend_context("open", e))?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| StateError::backend_context("open: busy_timeout", e))?;
        Self::init(conn)
    }

    /// Create an in-memory `SQLite` backend (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Backend`] if the in-memory database can't
    /// be initialized.
    pub fn in_memory() -> error::Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StateError::backend_context("open_in_memory", e))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> error::Result<Self> {
        conn.execute_batch(CREATE_TABLES)
            .map_err(|e| StateError::backend_context("create tables", e))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the connection lock.
    fn lock_conn(&self) -> error::Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StateError::LockPoisoned)
    }

    fn format_ts(at: DateTime<Utc>) -> String {
        at.format(TIMESTAMP_FMT).to_string()
    }

    fn parse_ts(raw: &str) -> error::Result<DateTime<Utc>> {
        NaiveDateTime::parse_from_str(raw, TIMESTAMP_FMT)
            .map(|ndt| ndt.and_utc())
            .map_err(|e| StateError::Corrupt(format!("timestamp '{raw}': {e}")))
    }

    fn parse_opt_ts(raw: Option<String>) -> error::Result<Option<DateTime<Utc>>> {
        raw.as_deref().map(Self::parse_ts).transpose()
    }

    fn parse_json(raw: &str) -> error::Result<serde_json::Value> {
        serde_json::from_str(raw).map_err(|e| StateError::Corrupt(format!("json column: {e}")))
    }

    fn to_json_text(value: &serde_json::Value) -> String {
        value.to_string()
    }

    fn parse_category(raw: &str) -> ErrorCategory {
        serde_json::from_value(serde_json::Value::String(raw.to_string()))
            .unwrap_or(ErrorCategory::Internal)
    }

    fn mapping_from_row(row: &SqlRow<'_>) -> rusqlite::Result<(i64, String, String, String, bool, String)> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
        ))
    }

    fn build_mapping(
        (id, source, target, entity_type, active, config): (i64, String, String, String, bool, String),
    ) -> error::Result<MappingRecord> {
        Ok(MappingRecord {
            id: MappingId::new(id),
            source,
            target,
            entity_type,
            active,
            config: Self::parse_json(&config)?,
        })
    }

    #[allow(clippy::type_complexity)]
    fn run_from_row(
        row: &SqlRow<'_>,
    ) -> rusqlite::Result<(
        (i64, i64, String, String, u32, String, Option<String>),
        [i64; 6],
        (String, Option<String>, Option<String>),
    )> {
        Ok((
            (
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
            ),
            [
                row.get(7)?,
                row.get(8)?,
                row.get(9)?,
                row.get(10)?,
                row.get(11)?,
                row.get(12)?,
            ],
            (row.get(13)?, row.get(14)?, row.get(15)?),
        ))
    }

    #[allow(clippy::cast_sign_loss, clippy::type_complexity)]
    fn build_run(
        raw: (
            (i64, i64, String, String, u32, String, Option<String>),
            [i64; 6],
            (String, Option<String>, Option<String>),
        ),
    ) -> error::Result<RunRecord> {
        let ((id, mapping_id, mode, status, attempt, started_at, finished_at), counts, text) = raw;
        let (errors, error_message, error_trace) = text;
        let errors: Vec<String> = serde_json::from_str(&errors)
            .map_err(|e| StateError::Corrupt(format!("run {id} errors: {e}")))?;
        Ok(RunRecord {
            id: RunId::new(id),
            mapping_id: MappingId::new(mapping_id),
            mode: RunMode::parse(&mode),
            status: RunStatus::parse(&status),
            attempt,
            started_at: Self::parse_ts(&started_at)?,
            finished_at: Self::parse_opt_ts(finished_at)?,
            stats: RunStats {
                records_processed: counts[0] as u64,
                records_created: counts[1] as u64,
                records_updated: counts[2] as u64,
                records_unchanged: counts[3] as u64,
                records_failed: counts[4] as u64,
                records_skipped: counts[5] as u64,
                errors,
                error_message,
                error_trace,
            },
        })
    }

    /// Ensure a watermark row exists for `mapping`.
    fn ensure_watermark(conn: &Connection, mapping: MappingId) -> error::Result<()> {
        conn.execute(
            "INSERT OR IGNORE INTO watermarks (mapping_id) VALUES (?1)",
            [mapping.get()],
        )
        .map_err(|e| StateError::backend_context("ensure_watermark", e))?;
        Ok(())
    }

    #[cfg(test)]
    fn count_rows(&self, table: &str) -> error::Result<i64> {
        let conn = self.lock_conn()?;
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .map_err(StateError::from)
    }
}

impl StateBackend for SqliteStateBackend {
    fn upsert_source(
        &self,
        name: &str,
        extractor: &str,
        config: &serde_json::Value,
    ) -> error::Result<i64> {
        let conn = self.lock_conn()?;
        conn.query_row(
            "INSERT INTO sources (name, extractor, config) VALUES (?1, ?2, ?3) \
             ON CONFLICT(name) DO UPDATE SET extractor = ?2, config = ?3 \
             RETURNING id",
            params![name, extractor, Self::to_json_text(config)],
            |row| row.get(0),
        )
        .map_err(|e| StateError::backend_context("upsert_source", e))
    }

    fn upsert_target(
        &self,
        name: &str,
        loader: &str,
        unique_field: Option<&str>,
        conflict_strategy: &str,
    ) -> error::Result<i64> {
        let conn = self.lock_conn()?;
        conn.query_row(
            "INSERT INTO targets (name, loader, unique_field, conflict_strategy) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(name) DO UPDATE SET loader = ?2, unique_field = ?3, conflict_strategy = ?4 \
             RETURNING id",
            params![name, loader, unique_field, conflict_strategy],
            |row| row.get(0),
        )
        .map_err(|e| StateError::backend_context("upsert_target", e))
    }

    fn upsert_mapping(
        &self,
        source_id: i64,
        target_id: i64,
        entity_type: &str,
        active: bool,
        config: &serde_json::Value,
    ) -> error::Result<MappingId> {
        let conn = self.lock_conn()?;
        let id: i64 = conn
            .query_row(
                "INSERT INTO mappings (source_id, target_id, entity_type, active, config, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
                 ON CONFLICT(source_id, target_id, entity_type) \
                 DO UPDATE SET active = ?4, config = ?5, updated_at = ?6 \
                 RETURNING id",
                params![
                    source_id,
                    target_id,
                    entity_type,
                    active,
                    Self::to_json_text(config),
                    Self::format_ts(Utc::now()),
                ],
                |row| row.get(0),
            )
            .map_err(|e| StateError::backend_context("upsert_mapping", e))?;
        let mapping = MappingId::new(id);
        Self::ensure_watermark(&conn, mapping)?;
        Ok(mapping)
    }

    fn get_mapping(&self, id: MappingId) -> error::Result<Option<MappingRecord>> {
        let conn = self.lock_conn()?;
        let raw = conn
            .query_row(
                &format!("{MAPPING_SELECT} WHERE m.id = ?1"),
                [id.get()],
                Self::mapping_from_row,
            )
            .optional()
            .map_err(|e| StateError::backend_context("get_mapping", e))?;
        raw.map(Self::build_mapping).transpose()
    }

    fn list_mappings(&self, filter: &MappingFilter) -> error::Result<Vec<MappingRecord>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "{MAPPING_SELECT} \
                 WHERE (?1 IS NULL OR m.entity_type = ?1) \
                   AND (?2 IS NULL OR s.name = ?2) \
                   AND (?3 IS NULL OR t.name = ?3) \
                   AND (?4 = 0 OR m.active = 1) \
                 ORDER BY m.id"
            ))
            .map_err(|e| StateError::backend_context("list_mappings: prepare", e))?;
        let rows = stmt
            .query_map(
                params![
                    filter.entity_type,
                    filter.source,
                    filter.target,
                    filter.active_only
                ],
                Self::mapping_from_row,
            )
            .map_err(|e| StateError::backend_context("list_mappings: query", e))?;

        let mut mappings = Vec::new();
        for raw in rows {
            let raw = raw.map_err(|e| StateError::backend_context("list_mappings: row", e))?;
            mappings.push(Self::build_mapping(raw)?);
        }
        Ok(mappings)
    }

    fn deactivate_except(&self, keep: &[MappingId]) -> error::Result<u64> {
        let conn = self.lock_conn()?;
        let keep_json = serde_json::Value::from(keep.iter().map(|m| m.get()).collect::<Vec<_>>());
        let changed = conn
            .execute(
                "UPDATE mappings SET active = 0, updated_at = ?2 \
                 WHERE active = 1 AND id NOT IN (SELECT value FROM json_each(?1))",
                params![keep_json.to_string(), Self::format_ts(Utc::now())],
            )
            .map_err(|e| StateError::backend_context("deactivate_except", e))?;
        Ok(changed as u64)
    }

    fn duplicate_active_mappings(&self) -> error::Result<Vec<(String, Vec<MappingId>)>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT entity_type, id FROM mappings \
                 WHERE active = 1 AND entity_type IN ( \
                     SELECT entity_type FROM mappings WHERE active = 1 \
                     GROUP BY entity_type HAVING COUNT(*) > 1) \
                 ORDER BY entity_type, id",
            )
            .map_err(|e| StateError::backend_context("duplicate_active_mappings: prepare", e))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .map_err(|e| StateError::backend_context("duplicate_active_mappings: query", e))?;

        let mut duplicates: Vec<(String, Vec<MappingId>)> = Vec::new();
        for row in rows {
            let (entity_type, id) =
                row.map_err(|e| StateError::backend_context("duplicate_active_mappings: row", e))?;
            match duplicates.last_mut() {
                Some((current, ids)) if *current == entity_type => ids.push(MappingId::new(id)),
                _ => duplicates.push((entity_type, vec![MappingId::new(id)])),
            }
        }
        Ok(duplicates)
    }

    fn get_watermark(&self, mapping: MappingId) -> error::Result<Watermark> {
        let conn = self.lock_conn()?;
        let raw = conn
            .query_row(
                "SELECT last_sync_time, last_successful_sync_time, last_sync_id, last_successful_id \
                 FROM watermarks WHERE mapping_id = ?1",
                [mapping.get()],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| StateError::backend_context("get_watermark", e))?;

        match raw {
            Some((started, succeeded, last_sync_id, last_successful_id)) => Ok(Watermark {
                mapping_id: mapping,
                last_sync_time: Self::parse_opt_ts(started)?,
                last_successful_sync_time: Self::parse_opt_ts(succeeded)?,
                last_sync_id,
                last_successful_id,
            }),
            None => Ok(Watermark::empty(mapping)),
        }
    }

    fn mark_sync_started(&self, mapping: MappingId, at: DateTime<Utc>) -> error::Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO watermarks (mapping_id, last_sync_time) VALUES (?1, ?2) \
             ON CONFLICT(mapping_id) DO UPDATE SET last_sync_time = ?2",
            params![mapping.get(), Self::format_ts(at)],
        )
        .map_err(|e| StateError::backend_context("mark_sync_started", e))?;
        Ok(())
    }

    fn record_last_seen(&self, mapping: MappingId, last_id: &str) -> error::Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO watermarks (mapping_id, last_sync_id) VALUES (?1, ?2) \
             ON CONFLICT(mapping_id) DO UPDATE SET last_sync_id = ?2",
            params![mapping.get(), last_id],
        )
        .map_err(|e| StateError::backend_context("record_last_seen", e))?;
        Ok(())
    }

    fn mark_sync_succeeded(
        &self,
        mapping: MappingId,
        at: DateTime<Utc>,
        last_id: Option<&str>,
    ) -> error::Result<bool> {
        let conn = self.lock_conn()?;
        Self::ensure_watermark(&conn, mapping)?;
        let changed = conn
            .execute(
                "UPDATE watermarks \
                 SET last_successful_sync_time = ?2, \
                     last_successful_id = COALESCE(?3, last_successful_id) \
                 WHERE mapping_id = ?1 \
                   AND (last_successful_sync_time IS NULL OR last_successful_sync_time <= ?2)",
                params![mapping.get(), Self::format_ts(at), last_id],
            )
            .map_err(|e| StateError::backend_context("mark_sync_succeeded", e))?;
        if changed == 0 {
            tracing::warn!(
                mapping = %mapping,
                attempted = %at,
                "Refusing to move successful watermark backward"
            );
        }
        Ok(changed > 0)
    }

    fn start_run(&self, mapping: MappingId, mode: RunMode, attempt: u32) -> error::Result<RunId> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO sync_runs (mapping_id, mode, status, attempt, started_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                mapping.get(),
                mode.as_str(),
                RunStatus::Running.as_str(),
                attempt,
                Self::format_ts(Utc::now()),
            ],
        )
        .map_err(|e| StateError::backend_context("start_run", e))?;
        Ok(RunId::new(conn.last_insert_rowid()))
    }

    #[allow(clippy::cast_possible_wrap)]
    fn complete_run(&self, run: RunId, status: RunStatus, stats: &RunStats) -> error::Result<()> {
        let errors: Vec<&String> = stats.errors.iter().take(MAX_RUN_ERRORS).collect();
        let errors_json = serde_json::to_string(&errors)
            .map_err(|e| StateError::Corrupt(format!("run {run} errors: {e}")))?;

        let conn = self.lock_conn()?;
        let changed = conn
            .execute(
                "UPDATE sync_runs SET status = ?1, finished_at = ?2, \
                 records_processed = ?3, records_created = ?4, records_updated = ?5, \
                 records_unchanged = ?6, records_failed = ?7, records_skipped = ?8, \
                 errors = ?9, error_message = ?10, error_trace = ?11 \
                 WHERE id = ?12 AND status = ?13",
                params![
                    status.as_str(),
                    Self::format_ts(Utc::now()),
                    stats.records_processed as i64,
                    stats.records_created as i64,
                    stats.records_updated as i64,
                    stats.records_unchanged as i64,
                    stats.records_failed as i64,
                    stats.records_skipped as i64,
                    errors_json,
                    stats.error_message,
                    stats.error_trace,
                    run.get(),
                    RunStatus::Running.as_str(),
                ],
            )
            .map_err(|e| StateError::backend_context("complete_run", e))?;

        if changed == 0 {
            let exists: bool = conn
                .query_row("SELECT EXISTS(SELECT 1 FROM sync_runs WHERE id = ?1)", [run.get()], |row| {
                    row.get(0)
                })
                .map_err(|e| StateError::backend_context("complete_run: lookup", e))?;
            return Err(if exists {
                StateError::RunFinished(run.get())
            } else {
                StateError::NotFound(format!("run {run}"))
            });
        }
        Ok(())
    }

    fn get_run(&self, run: RunId) -> error::Result<Option<RunRecord>> {
        let conn = self.lock_conn()?;
        let raw = conn
            .query_row(
                &format!("SELECT {RUN_COLUMNS} FROM sync_runs WHERE id = ?1"),
                [run.get()],
                Self::run_from_row,
            )
            .optional()
            .map_err(|e| StateError::backend_context("get_run", e))?;
        raw.map(Self::build_run).transpose()
    }

    #[allow(clippy::cast_possible_wrap)]
    fn list_runs(
        &self,
        mapping: Option<MappingId>,
        limit: usize,
    ) -> error::Result<Vec<RunRecord>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {RUN_COLUMNS} FROM sync_runs \
                 WHERE (?1 IS NULL OR mapping_id = ?1) \
                 ORDER BY id DESC LIMIT ?2"
            ))
            .map_err(|e| StateError::backend_context("list_runs: prepare", e))?;
        let rows = stmt
            .query_map(
                params![mapping.map(MappingId::get), limit as i64],
                Self::run_from_row,
            )
            .map_err(|e| StateError::backend_context("list_runs: query", e))?;

        let mut runs = Vec::new();
        for raw in rows {
            let raw = raw.map_err(|e| StateError::backend_context("list_runs: row", e))?;
            runs.push(Self::build_run(raw)?);
        }
        Ok(runs)
    }

    fn insert_failed_records(
        &self,
        mapping: MappingId,
        run: RunId,
        records: &[FailedRecord],
    ) -> error::Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let conn = self.lock_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| StateError::backend_context("insert_failed_records: begin tx", e))?;
        let mut stmt = tx
            .prepare(
                "INSERT INTO failed_records \
                 (mapping_id, run_id, record_key, record_json, error_message, error_category, failed_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )
            .map_err(|e| StateError::backend_context("insert_failed_records: prepare", e))?;

        let mut count = 0u64;
        for record in records {
            stmt.execute(params![
                mapping.get(),
                run.get(),
                record.record_key,
                record.record_json,
                record.error_message,
                record.error_category.to_string(),
                Self::format_ts(record.failed_at),
            ])
            .map_err(|e| StateError::backend_context("insert_failed_records: execute", e))?;
            count += 1;
        }
        drop(stmt);
        tx.commit()
            .map_err(|e| StateError::backend_context("insert_failed_records: commit", e))?;

        Ok(count)
    }

    fn list_failed_records(&self, run: RunId) -> error::Result<Vec<FailedRecord>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT record_key, record_json, error_message, error_category, failed_at \
                 FROM failed_records WHERE run_id = ?1 ORDER BY id",
            )
            .map_err(|e| StateError::backend_context("list_failed_records: prepare", e))?;
        let rows = stmt
            .query_map([run.get()], |row| {
                Ok((
                    row.get::<_, Option<String>>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .map_err(|e| StateError::backend_context("list_failed_records: query", e))?;

        let mut records = Vec::new();
        for row in rows {
            let (record_key, record_json, error_message, category, failed_at) =
                row.map_err(|e| StateError::backend_context("list_failed_records: row", e))?;
            records.push(FailedRecord {
                record_key,
                record_json,
                error_message,
                error_category: Self::parse_category(&category),
                failed_at: Self::parse_ts(&failed_at)?,
            });
        }
        Ok(records)
    }
}
