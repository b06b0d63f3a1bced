//! Session ledger.
//!
//! Turns a terminating run into a [`SessionRecord`]. The in-process ledger
//! is updated synchronously and optimistically; the durable write happens
//! afterwards through a [`SessionStore`] and is allowed to fail. The
//! guarantee is "at least attempted", not "at least persisted".

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::PersistenceError;
use crate::storage::SessionStore;
use crate::timer::{SessionType, TimerRun};

/// One finished or abandoned run, as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// UUID assigned at build time; stable across write retries.
    pub id: String,
    pub task_id: Option<String>,
    pub task_title: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_secs: u64,
    pub session_type: SessionType,
    pub session_index: u32,
    pub completed: bool,
    #[serde(default)]
    pub notes: Option<String>,
}

impl SessionRecord {
    /// Build a record for `run` ending at `now`.
    ///
    /// The duration is `total - remaining`, so an abandoned run records only
    /// the time actually spent.
    pub fn from_run(run: &TimerRun, completed: bool, now: DateTime<Utc>) -> Self {
        let task = run.task.as_ref();
        Self {
            id: Uuid::new_v4().to_string(),
            task_id: task.map(|t| t.id.clone()),
            task_title: task.and_then(|t| t.title.clone()),
            start_time: run.started_at.unwrap_or(now),
            end_time: now,
            duration_secs: run.elapsed_secs(),
            session_type: run.phase.into(),
            session_index: run.session_index,
            completed,
            notes: None,
        }
    }
}

/// In-process session history.
#[derive(Debug, Clone, Default)]
pub struct SessionLedger {
    records: Vec<SessionRecord>,
}

impl SessionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `run` and return the record for durable persistence.
    pub fn write(&mut self, run: &TimerRun, completed: bool, now: DateTime<Utc>) -> SessionRecord {
        let record = SessionRecord::from_run(run, completed, now);
        debug!(
            session_id = %record.id,
            duration_secs = record.duration_secs,
            completed,
            "session added to ledger"
        );
        self.records.push(record.clone());
        record
    }

    pub fn records(&self) -> &[SessionRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn for_task<'a>(&'a self, task_id: &'a str) -> impl Iterator<Item = &'a SessionRecord> + 'a {
        self.records
            .iter()
            .filter(move |r| r.task_id.as_deref() == Some(task_id))
    }

    pub fn total_duration_for_task(&self, task_id: &str) -> u64 {
        self.for_task(task_id).map(|r| r.duration_secs).sum()
    }
}

/// How hard to try a durable write before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(250),
        }
    }
}

/// Write `record` to `store`, retrying with linear backoff.
///
/// Safe to retry because the store inserts by record id.
pub async fn persist_with_retry(
    store: &dyn SessionStore,
    record: &SessionRecord,
    policy: RetryPolicy,
) -> Result<String, PersistenceError> {
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match store.create_session(record).await {
            Ok(id) => return Ok(id),
            Err(err) if attempt < attempts => {
                warn!(
                    session_id = %record.id,
                    attempt,
                    error = %err,
                    "session write failed, retrying"
                );
                tokio::time::sleep(policy.backoff * attempt).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
