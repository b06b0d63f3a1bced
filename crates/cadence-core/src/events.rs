use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::timer::{TimerPhase, TimerStatus};

/// Every state change in the timer produces an Event.
/// Front ends render them; the controller broadcasts them to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    TimerStarted {
        phase: TimerPhase,
        session_index: u32,
        duration_secs: u64,
        target_end_at: DateTime<Utc>,
        at: DateTime<Utc>,
    },
    TimerPaused {
        remaining_secs: u64,
        at: DateTime<Utc>,
    },
    TimerResumed {
        remaining_secs: u64,
        target_end_at: DateTime<Utc>,
        at: DateTime<Utc>,
    },
    /// A run reached zero, via tick or reconciliation.
    TimerCompleted {
        phase: TimerPhase,
        session_index: u32,
        session_id: String,
        at: DateTime<Utc>,
    },
    TimerSkipped {
        from_phase: TimerPhase,
        session_index: u32,
        at: DateTime<Utc>,
    },
    TimerReset {
        /// Id of the partial session recorded on the way out, if any.
        recorded_session: Option<String>,
        at: DateTime<Utc>,
    },
    /// The engine moved to a new phase and is waiting to be started.
    PhaseEntered {
        phase: TimerPhase,
        session_index: u32,
        duration_secs: u64,
        at: DateTime<Utc>,
    },
    /// Remaining time was corrected from the wall clock.
    Reconciled {
        remaining_secs: u64,
        /// Positive when the tick loop had fallen behind.
        drift_secs: i64,
        at: DateTime<Utc>,
    },
    /// Settings changed the length of the idle run.
    DurationUpdated {
        phase: TimerPhase,
        total_secs: u64,
        at: DateTime<Utc>,
    },
    StateSnapshot {
        phase: TimerPhase,
        status: TimerStatus,
        session_index: u32,
        remaining_secs: u64,
        total_secs: u64,
        target_end_at: Option<DateTime<Utc>>,
        task_id: Option<String>,
        progress: f64,
        at: DateTime<Utc>,
    },
}

impl Event {
    pub fn is_completion(&self) -> bool {
        matches!(self, Event::TimerCompleted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_tagged_by_type() {
        let event = Event::TimerPaused {
            remaining_secs: 1400,
            at: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "TimerPaused");
        assert_eq!(json["remaining_secs"], 1400);
    }
}
