//! Durable state store backed by SQLite
//!
//! - `work_units` - work unit rows and the status audit log
//! - `conflicts` - memoized conflict-oracle verdicts keyed by unordered chunk pair
//!
//! `StateStore` owns one connection behind a mutex; every public call is atomic
//! and multi-statement writes run inside a single transaction.

pub mod conflicts;
pub mod work_units;

use crate::models::state_machine::StateTransitionError;
use crate::models::{
    ConflictAnalysis, ConflictVerdict, StatusLogEntry, WorkUnit, WorkUnitStatus,
};
use crate::utils::lock_mutex_recover;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

const SCHEMA_VERSION: i32 = 2;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Work unit already exists: {0}")]
    AlreadyExists(String),

    #[error("Work unit not found: {0}")]
    NotFound(String),

    #[error("Work unit {chunk}: {source}")]
    InvalidTransition {
        chunk: String,
        #[source]
        source: StateTransitionError,
    },

    #[error(
        "Database schema version {found} is newer than supported version {supported}. Please upgrade."
    )]
    SchemaTooNew { found: i32, supported: i32 },

    #[error("Invalid stored value: {0}")]
    InvalidValue(String),

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

pub struct StateStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl StateStore {
    /// Open (or create) the database at `path` and bring its schema up to date.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&path)?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        conn.busy_timeout(Duration::from_secs(5))?;

        let store = Self {
            conn: Mutex::new(conn),
            path,
        };
        store.init()?;
        log::debug!("[StateStore] Opened {:?}", store.path);
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Idempotent against an up-to-date database.
    pub fn init(&self) -> StoreResult<()> {
        let conn = lock_mutex_recover(&self.conn);
        create_metadata_table(&conn)?;
        let version = get_schema_version(&conn)?;

        // Refuse databases written by a newer build
        if version > SCHEMA_VERSION {
            return Err(StoreError::SchemaTooNew {
                found: version,
                supported: SCHEMA_VERSION,
            });
        }

        if version < SCHEMA_VERSION {
            log::info!(
                "[StateStore] Migrating schema from v{} to v{}",
                version,
                SCHEMA_VERSION
            );
            run_migrations(&conn, version)?;
        }

        Ok(())
    }

    pub fn schema_version(&self) -> StoreResult<i32> {
        let conn = lock_mutex_recover(&self.conn);
        get_schema_version(&conn)
    }

    // ---------------------------------------------------------------------
    // Work units
    // ---------------------------------------------------------------------

    pub fn create(&self, unit: &WorkUnit) -> StoreResult<()> {
        let mut conn = lock_mutex_recover(&self.conn);
        let tx = conn.transaction()?;
        if work_units::get_work_unit(&tx, &unit.chunk)?.is_some() {
            return Err(StoreError::AlreadyExists(unit.chunk.clone()));
        }
        work_units::insert_work_unit(&tx, unit)?;
        tx.commit()?;
        Ok(())
    }

    pub fn get(&self, chunk: &str) -> StoreResult<Option<WorkUnit>> {
        let conn = lock_mutex_recover(&self.conn);
        work_units::get_work_unit(&conn, chunk)
    }

    /// Persist the full row, validating the status transition against the stored
    /// value and appending a log entry when the status actually changes.
    /// Returns the unit as stored (with a fresh `updated_at`).
    pub fn update(&self, unit: &WorkUnit) -> StoreResult<WorkUnit> {
        let mut conn = lock_mutex_recover(&self.conn);
        let tx = conn.transaction()?;
        let stored = work_units::get_work_unit(&tx, &unit.chunk)?
            .ok_or_else(|| StoreError::NotFound(unit.chunk.clone()))?;
        let updated = work_units::update_work_unit(&tx, &stored, unit)?;
        tx.commit()?;
        Ok(updated)
    }

    /// Deletes the unit together with its status log.
    pub fn delete(&self, chunk: &str) -> StoreResult<bool> {
        let mut conn = lock_mutex_recover(&self.conn);
        let tx = conn.transaction()?;
        let deleted = work_units::delete_work_unit(&tx, chunk)?;
        tx.commit()?;
        Ok(deleted)
    }

    /// Ordered by creation time, insertion order breaking ties.
    pub fn list(&self, status: Option<WorkUnitStatus>) -> StoreResult<Vec<WorkUnit>> {
        let conn = lock_mutex_recover(&self.conn);
        work_units::list_work_units(&conn, status)
    }

    /// Counts for every status, zeros included.
    pub fn count_by_status(&self) -> StoreResult<BTreeMap<String, i64>> {
        let conn = lock_mutex_recover(&self.conn);
        work_units::count_by_status(&conn)
    }

    pub fn count_with_status(&self, status: WorkUnitStatus) -> StoreResult<usize> {
        let conn = lock_mutex_recover(&self.conn);
        work_units::count_with_status(&conn, status)
    }

    pub fn get_status_history(&self, chunk: &str) -> StoreResult<Vec<StatusLogEntry>> {
        let conn = lock_mutex_recover(&self.conn);
        work_units::get_status_history(&conn, chunk)
    }

    // ---------------------------------------------------------------------
    // Conflict cache
    // ---------------------------------------------------------------------

    pub fn save_conflict_analysis(&self, analysis: &ConflictAnalysis) -> StoreResult<()> {
        let conn = lock_mutex_recover(&self.conn);
        conflicts::save_conflict_analysis(&conn, analysis)
    }

    /// Order-independent lookup.
    pub fn get_conflict_analysis(
        &self,
        chunk_a: &str,
        chunk_b: &str,
    ) -> StoreResult<Option<ConflictAnalysis>> {
        let conn = lock_mutex_recover(&self.conn);
        conflicts::get_conflict_analysis(&conn, chunk_a, chunk_b)
    }

    pub fn list_conflicts_for_chunk(&self, chunk: &str) -> StoreResult<Vec<ConflictAnalysis>> {
        let conn = lock_mutex_recover(&self.conn);
        conflicts::list_conflicts_for_chunk(&conn, chunk)
    }

    pub fn clear_conflicts_for_chunk(&self, chunk: &str) -> StoreResult<usize> {
        let conn = lock_mutex_recover(&self.conn);
        conflicts::clear_conflicts_for_chunk(&conn, chunk)
    }

    pub fn list_all_conflicts(
        &self,
        verdict: Option<ConflictVerdict>,
    ) -> StoreResult<Vec<ConflictAnalysis>> {
        let conn = lock_mutex_recover(&self.conn);
        conflicts::list_all_conflicts(&conn, verdict)
    }
}

fn create_metadata_table(conn: &Connection) -> StoreResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_metadata (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;
    Ok(())
}

fn get_schema_version(conn: &Connection) -> StoreResult<i32> {
    let version: Option<String> = conn
        .query_row(
            "SELECT value FROM schema_metadata WHERE key = 'version'",
            [],
            |row| row.get(0),
        )
        .optional()?;

    match version {
        Some(v) => v
            .parse()
            .map_err(|_| StoreError::InvalidValue(format!("schema version '{}'", v))),
        None => {
            conn.execute(
                "INSERT INTO schema_metadata (key, value) VALUES ('version', '0')",
                [],
            )?;
            Ok(0)
        }
    }
}

fn set_schema_version(conn: &Connection, version: i32) -> StoreResult<()> {
    conn.execute(
        "UPDATE schema_metadata SET value = ?1 WHERE key = 'version'",
        params![version.to_string()],
    )?;
    Ok(())
}

fn run_migrations(conn: &Connection, from_version: i32) -> StoreResult<()> {
    if from_version < 1 {
        migrate_to_v1(conn)?;
    }
    if from_version < 2 {
        migrate_to_v2(conn)?;
    }
    Ok(())
}

fn migrate_to_v1(conn: &Connection) -> StoreResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS work_units (
            chunk TEXT PRIMARY KEY,
            phase TEXT NOT NULL,
            status TEXT NOT NULL,
            priority INTEGER NOT NULL DEFAULT 0,
            blocked_by TEXT NOT NULL DEFAULT '[]',
            worktree TEXT,
            session_id TEXT,
            attention_reason TEXT,
            displaced_chunk TEXT,
            completion_retries INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS status_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            chunk TEXT NOT NULL,
            old_status TEXT NOT NULL,
            new_status TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            FOREIGN KEY (chunk) REFERENCES work_units(chunk) ON DELETE CASCADE
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_work_units_status ON work_units(status)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_status_log_chunk ON status_log(chunk)",
        [],
    )?;

    set_schema_version(conn, 1)?;
    Ok(())
}

fn migrate_to_v2(conn: &Connection) -> StoreResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS conflict_analyses (
            chunk_a TEXT NOT NULL,
            chunk_b TEXT NOT NULL,
            verdict TEXT NOT NULL,
            confidence REAL NOT NULL,
            reason TEXT NOT NULL,
            analysis_stage TEXT NOT NULL,
            overlapping_files TEXT NOT NULL DEFAULT '[]',
            overlapping_symbols TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            PRIMARY KEY (chunk_a, chunk_b)
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_conflicts_chunk_b ON conflict_analyses(chunk_b)",
        [],
    )?;

    set_schema_version(conn, 2)?;
    Ok(())
}

/// Timestamps are stored as fixed-width RFC 3339 so lexical order is time order.
pub(crate) fn format_timestamp(ts: &chrono::DateTime<chrono::Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

/// Parse a text column through `FromStr`, surfacing unknown values as conversion errors.
pub(crate) fn parse_column<T>(idx: usize, raw: &str) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    raw.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
        )
    })
}

pub(crate) fn parse_json_list(idx: usize, raw: &str) -> rusqlite::Result<Vec<String>> {
    serde_json::from_str(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_directory() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join(".ve").join("orchestrator.db");
        let store = StateStore::open(&db_path).unwrap();
        assert!(db_path.exists());
        assert_eq!(store.schema_version().unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_init_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("orchestrator.db");
        let store = StateStore::open(&db_path).unwrap();
        store.create(&WorkUnit::new("keep_me")).unwrap();

        store.init().unwrap();
        store.init().unwrap();
        drop(store);

        let reopened = StateStore::open(&db_path).unwrap();
        assert!(reopened.get("keep_me").unwrap().is_some());
        assert_eq!(reopened.schema_version().unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_refuses_newer_schema() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("orchestrator.db");
        {
            let store = StateStore::open(&db_path).unwrap();
            let conn = store.conn.lock().unwrap();
            set_schema_version(&conn, SCHEMA_VERSION + 1).unwrap();
        }

        match StateStore::open(&db_path) {
            Err(StoreError::SchemaTooNew { found, supported }) => {
                assert_eq!(found, SCHEMA_VERSION + 1);
                assert_eq!(supported, SCHEMA_VERSION);
            }
            other => panic!("expected SchemaTooNew, got {:?}", other.map(|_| ())),
        }
    }
}
