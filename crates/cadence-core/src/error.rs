//! Core error types for cadence-core.
//!
//! Transitions of the timer engine never fail. Everything in here belongs to
//! the collaborators around it: the session store, the alarm gateway and the
//! configuration file. The controller catches the first two at its boundary
//! and routes them to `tracing`; only setup code (opening the database,
//! loading config) hands them back to a caller.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error for fallible setup APIs.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Database-specific errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// A stored column could not be mapped back into a record field
    #[error("Corrupt value in column {column}: {message}")]
    CorruptRow { column: usize, message: String },

    /// Database is locked
    #[error("Database is locked")]
    Locked,
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(ref code, _)
                if code.code == rusqlite::ErrorCode::DatabaseBusy
                    || code.code == rusqlite::ErrorCode::DatabaseLocked =>
            {
                DatabaseError::Locked
            }
            rusqlite::Error::FromSqlConversionFailure(column, _, source) => {
                DatabaseError::CorruptRow {
                    column,
                    message: source.to_string(),
                }
            }
            other => DatabaseError::QueryFailed(other.to_string()),
        }
    }
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Could not resolve the data directory
    #[error("Could not prepare data directory {path}: {source}")]
    DataDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Unknown configuration key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),
}

/// A session record could not be written to durable storage.
///
/// Never fatal: the record is already in the in-process ledger by the time
/// this is produced.
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// The store rejected or failed the write
    #[error("Failed to write session {session_id}: {message}")]
    WriteFailed { session_id: String, message: String },

    /// The store could not be reached at all
    #[error("Session store unavailable: {0}")]
    Unavailable(String),

    /// Underlying database failure
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// The background alarm gateway refused or failed a request.
///
/// Transient by definition: the foreground tick loop keeps working while the
/// process is active, so these are logged and dropped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulingError {
    /// The OS or user denied permission to post alarms
    #[error("Alarm permission denied: {0}")]
    PermissionDenied(String),

    /// The gateway is not available (shut down, not initialised)
    #[error("Alarm gateway unavailable: {0}")]
    Unavailable(String),
}
