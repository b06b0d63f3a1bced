//! SQLite-based session storage and statistics.
//!
//! Provides persistent storage for:
//! - Session records written by the ledger (finished and abandoned runs)
//! - Session statistics (daily and all-time)
//! - Key-value store for application state (the CLI keeps its engine here)

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::{data_dir, SessionStore};
use crate::error::{CoreError, DatabaseError, PersistenceError};
use crate::ledger::SessionRecord;
use crate::timer::SessionType;

const SESSION_COLUMNS: &str = "id, task_id, task_title, start_time, end_time, duration_secs,
     session_type, session_index, completed, notes";

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Stats {
    pub total_sessions: u64,
    pub completed_focus_sessions: u64,
    pub abandoned_sessions: u64,
    pub focus_secs: u64,
    pub break_secs: u64,
    pub today_focus_sessions: u64,
    pub today_focus_secs: u64,
}

/// SQLite database for session storage.
///
/// The connection sits behind a shared mutex. Clones are cheap and talk to
/// the same connection, which is how the async store hands work to tokio's
/// blocking pool.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open the database at `~/.config/cadence/cadence.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the data directory cannot be created or the
    /// database cannot be opened or migrated.
    pub fn open() -> Result<Self, CoreError> {
        let path = data_dir()?.join("cadence.db");
        Ok(Self::open_at(&path)?)
    }

    pub fn open_at(path: &Path) -> Result<Self, DatabaseError> {
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database (for tests).
    pub fn open_memory() -> Result<Self, DatabaseError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, DatabaseError> {
        migrate(&conn).map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a session record. Re-inserting the same id is a no-op, which
    /// makes retried writes safe.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    pub fn insert_session(&self, record: &SessionRecord) -> Result<String, DatabaseError> {
        self.conn().execute(
            "INSERT OR IGNORE INTO sessions (id, task_id, task_title, start_time, end_time,
                 duration_secs, session_type, session_index, completed, notes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                record.id,
                record.task_id,
                record.task_title,
                timestamp(record.start_time),
                timestamp(record.end_time),
                to_i64(record.duration_secs),
                record.session_type.as_str(),
                record.session_index,
                record.completed,
                record.notes,
            ],
        )?;
        Ok(record.id.clone())
    }

    pub fn get_session(&self, id: &str) -> Result<Option<SessionRecord>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"))?;
        Ok(stmt.query_row(params![id], row_to_record).optional()?)
    }

    pub fn sessions_for_task(&self, task_id: &str) -> Result<Vec<SessionRecord>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE task_id = ?1 ORDER BY start_time"
        ))?;
        let rows = stmt.query_map(params![task_id], row_to_record)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn total_duration_for_task(&self, task_id: &str) -> Result<u64, DatabaseError> {
        let total: i64 = self.conn().query_row(
            "SELECT COALESCE(SUM(duration_secs), 0) FROM sessions WHERE task_id = ?1",
            params![task_id],
            |row| row.get(0),
        )?;
        Ok(from_i64(total))
    }

    /// Most recent sessions first.
    pub fn recent_sessions(&self, limit: usize) -> Result<Vec<SessionRecord>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions ORDER BY end_time DESC LIMIT ?1"
        ))?;
        let rows = stmt.query_map(params![to_i64(limit as u64)], row_to_record)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn stats_today(&self) -> Result<Stats, DatabaseError> {
        let mut stats = self.aggregate(Some(start_of_today()))?;
        stats.today_focus_sessions = stats.completed_focus_sessions;
        stats.today_focus_secs = stats.focus_secs;
        Ok(stats)
    }

    pub fn stats_all(&self) -> Result<Stats, DatabaseError> {
        let mut stats = self.aggregate(None)?;
        let today = self.aggregate(Some(start_of_today()))?;
        stats.today_focus_sessions = today.completed_focus_sessions;
        stats.today_focus_secs = today.focus_secs;
        Ok(stats)
    }

    fn aggregate(&self, since: Option<DateTime<Utc>>) -> Result<Stats, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT session_type, completed, COUNT(*), COALESCE(SUM(duration_secs), 0)
             FROM sessions
             WHERE end_time >= ?1
             GROUP BY session_type, completed",
        )?;

        // An empty lower bound sorts before every RFC 3339 timestamp.
        let lower = since.map(timestamp).unwrap_or_default();
        let rows = stmt.query_map(params![lower], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, bool>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;

        let mut stats = Stats::default();
        for row in rows {
            let (session_type, completed, count, secs) = row?;
            let (count, secs) = (from_i64(count), from_i64(secs));
            stats.total_sessions += count;
            if !completed {
                stats.abandoned_sessions += count;
            }
            match SessionType::parse(&session_type) {
                Some(SessionType::Focus) => {
                    if completed {
                        stats.completed_focus_sessions += count;
                    }
                    stats.focus_secs += secs;
                }
                Some(SessionType::Break) => stats.break_secs += secs,
                None => {}
            }
        }
        Ok(stats)
    }

    /// Get a value from the kv store.
    pub fn kv_get(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        let value = self
            .conn()
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(value)
    }

    /// Set a value in the kv store.
    pub fn kv_set(&self, key: &str, value: &str) -> Result<(), DatabaseError> {
        self.conn().execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }
}

impl Database {
    /// Run a blocking query on tokio's blocking pool against a clone of this
    /// handle, keeping SQLite I/O off the async workers.
    async fn blocking<T, F>(&self, query: F) -> Result<T, PersistenceError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T, DatabaseError> + Send + 'static,
    {
        let db = self.clone();
        let result = tokio::task::spawn_blocking(move || query(&db))
            .await
            .map_err(|e| PersistenceError::Unavailable(e.to_string()))?;
        Ok(result?)
    }
}

#[async_trait]
impl SessionStore for Database {
    async fn create_session(&self, record: &SessionRecord) -> Result<String, PersistenceError> {
        let owned = record.clone();
        self.blocking(move |db| db.insert_session(&owned))
            .await
            .map_err(|e| PersistenceError::WriteFailed {
                session_id: record.id.clone(),
                message: e.to_string(),
            })
    }

    async fn sessions_for_task(&self, task_id: &str) -> Result<Vec<SessionRecord>, PersistenceError> {
        let task_id = task_id.to_owned();
        self.blocking(move |db| Database::sessions_for_task(db, &task_id))
            .await
    }

    async fn total_duration_for_task(&self, task_id: &str) -> Result<u64, PersistenceError> {
        let task_id = task_id.to_owned();
        self.blocking(move |db| Database::total_duration_for_task(db, &task_id))
            .await
    }
}

fn migrate(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS sessions (
            id            TEXT PRIMARY KEY,
            task_id       TEXT,
            task_title    TEXT,
            start_time    TEXT NOT NULL,
            end_time      TEXT NOT NULL,
            duration_secs INTEGER NOT NULL,
            session_type  TEXT NOT NULL,
            session_index INTEGER NOT NULL,
            completed     INTEGER NOT NULL,
            notes         TEXT
        );

        CREATE TABLE IF NOT EXISTS kv (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_sessions_task_id ON sessions(task_id);
        CREATE INDEX IF NOT EXISTS idx_sessions_end_time ON sessions(end_time);",
    )
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<SessionRecord> {
    Ok(SessionRecord {
        id: row.get(0)?,
        task_id: row.get(1)?,
        task_title: row.get(2)?,
        start_time: parse_timestamp(row, 3)?,
        end_time: parse_timestamp(row, 4)?,
        duration_secs: from_i64(row.get(5)?),
        session_type: parse_session_type(row, 6)?,
        session_index: row.get(7)?,
        completed: row.get(8)?,
        notes: row.get(9)?,
    })
}

fn parse_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_session_type(row: &Row<'_>, idx: usize) -> rusqlite::Result<SessionType> {
    let raw: String = row.get(idx)?;
    SessionType::parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unknown session type '{raw}'").into(),
        )
    })
}

/// Fixed-width UTC timestamps so that text comparison orders by time.
fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn start_of_today() -> DateTime<Utc> {
    Utc::now()
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
        .unwrap_or_else(Utc::now)
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_i64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}
