mod config;
pub mod database;

pub use config::{Config, StorageConfig, TimerConfig};
pub use database::{Database, Stats};

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::{ConfigError, PersistenceError};
use crate::ledger::SessionRecord;

/// Durable session storage consumed by the controller.
///
/// `create_session` must tolerate the caller retrying a write whose first
/// attempt actually succeeded; records carry a stable id for that purpose.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, record: &SessionRecord) -> Result<String, PersistenceError>;

    async fn sessions_for_task(&self, task_id: &str) -> Result<Vec<SessionRecord>, PersistenceError>;

    async fn total_duration_for_task(&self, task_id: &str) -> Result<u64, PersistenceError>;
}

/// Returns `~/.config/cadence[-dev]/` based on CADENCE_ENV.
///
/// Set CADENCE_ENV=dev to use development data directory.
///
/// # Errors
/// Returns an error if creating the config directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("CADENCE_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("cadence-dev")
    } else {
        base_dir.join("cadence")
    };

    std::fs::create_dir_all(&dir).map_err(|source| ConfigError::DataDir {
        path: dir.clone(),
        source,
    })?;
    Ok(dir)
}
