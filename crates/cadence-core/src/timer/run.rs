use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::phase::{TimerPhase, TimerStatus};

/// Task a run is attributed to. The title is a snapshot taken when the
/// task is attached; later renames do not rewrite history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRef {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
}

impl TaskRef {
    pub fn new(id: impl Into<String>, title: Option<String>) -> Self {
        Self {
            id: id.into(),
            title,
        }
    }
}

/// The one in-memory timer run.
///
/// Only [`TimerEngine`](super::TimerEngine) mutates it; everyone else sees it
/// through a shared reference or a snapshot event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerRun {
    pub phase: TimerPhase,
    pub status: TimerStatus,
    pub remaining_secs: u64,
    pub total_secs: u64,
    pub started_at: Option<DateTime<Utc>>,
    /// Absolute deadline; `Some` exactly while `status == Running`.
    pub target_end_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub task: Option<TaskRef>,
    /// Position in the focus cycle, `1..=N`.
    pub session_index: u32,
}

impl TimerRun {
    pub fn idle(phase: TimerPhase, total_secs: u64, session_index: u32) -> Self {
        Self {
            phase,
            status: TimerStatus::Idle,
            remaining_secs: total_secs,
            total_secs,
            started_at: None,
            target_end_at: None,
            task: None,
            session_index,
        }
    }

    /// Seconds actually spent in this run so far.
    pub fn elapsed_secs(&self) -> u64 {
        self.total_secs.saturating_sub(self.remaining_secs)
    }

    pub fn task_id(&self) -> Option<&str> {
        self.task.as_ref().map(|t| t.id.as_str())
    }

    /// 0.0 .. 1.0 progress within the run.
    pub fn progress(&self) -> f64 {
        if self.total_secs == 0 {
            return 0.0;
        }
        self.elapsed_secs() as f64 / self.total_secs as f64
    }
}
