use serde::{Deserialize, Serialize};

/// Which part of the focus/break cycle the timer represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerPhase {
    #[default]
    Focus,
    ShortBreak,
    LongBreak,
}

impl TimerPhase {
    pub fn is_break(self) -> bool {
        matches!(self, TimerPhase::ShortBreak | TimerPhase::LongBreak)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerStatus {
    #[default]
    Idle,
    Running,
    Paused,
    Completed,
}

/// Session kind as stored in the ledger. Both break phases collapse to `Break`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionType {
    Focus,
    Break,
}

impl SessionType {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionType::Focus => "focus",
            SessionType::Break => "break",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "focus" => Some(SessionType::Focus),
            "break" => Some(SessionType::Break),
            _ => None,
        }
    }
}

impl From<TimerPhase> for SessionType {
    fn from(phase: TimerPhase) -> Self {
        if phase.is_break() {
            SessionType::Break
        } else {
            SessionType::Focus
        }
    }
}
