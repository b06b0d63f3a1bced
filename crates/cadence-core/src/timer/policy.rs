//! Phase and session-count policy.
//!
//! Pure mapping from the current session index to the break that follows
//! it and to the next index. The long break is fixed at twice the short
//! break and is not configurable on its own.

use serde::{Deserialize, Serialize};

use super::phase::TimerPhase;

pub const DEFAULT_SESSIONS_BEFORE_LONG_BREAK: u32 = 4;
pub const DEFAULT_FOCUS_MIN: u32 = 25;
pub const DEFAULT_BREAK_MIN: u32 = 5;
const LONG_BREAK_MULTIPLIER: u64 = 2;

/// Break that follows the focus run at `session_index` in a cycle of `sessions`.
pub fn break_type(session_index: u32, sessions: u32) -> TimerPhase {
    if session_index >= sessions.max(1) {
        TimerPhase::LongBreak
    } else {
        TimerPhase::ShortBreak
    }
}

/// Index of the next focus run; wraps back to 1 after `sessions`.
pub fn next_index(session_index: u32, sessions: u32) -> u32 {
    if session_index < sessions.max(1) {
        session_index + 1
    } else {
        1
    }
}

/// Phase lengths in seconds plus the cycle length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Durations {
    focus_secs: u64,
    short_break_secs: u64,
    sessions_before_long_break: u32,
}

impl Durations {
    /// All values are clamped to at least 1 so a run always has a deadline
    /// in the future.
    pub fn new(focus_secs: u64, short_break_secs: u64, sessions_before_long_break: u32) -> Self {
        Self {
            focus_secs: focus_secs.max(1),
            short_break_secs: short_break_secs.max(1),
            sessions_before_long_break: sessions_before_long_break.max(1),
        }
    }

    pub fn from_minutes(focus_min: u32, break_min: u32, sessions_before_long_break: u32) -> Self {
        Self::new(
            u64::from(focus_min).saturating_mul(60),
            u64::from(break_min).saturating_mul(60),
            sessions_before_long_break,
        )
    }

    pub fn focus_secs(&self) -> u64 {
        self.focus_secs
    }

    pub fn short_break_secs(&self) -> u64 {
        self.short_break_secs
    }

    pub fn long_break_secs(&self) -> u64 {
        self.short_break_secs.saturating_mul(LONG_BREAK_MULTIPLIER)
    }

    pub fn sessions_before_long_break(&self) -> u32 {
        self.sessions_before_long_break
    }

    pub fn for_phase(&self, phase: TimerPhase) -> u64 {
        match phase {
            TimerPhase::Focus => self.focus_secs,
            TimerPhase::ShortBreak => self.short_break_secs,
            TimerPhase::LongBreak => self.long_break_secs(),
        }
    }
}

impl Default for Durations {
    fn default() -> Self {
        Self::from_minutes(
            DEFAULT_FOCUS_MIN,
            DEFAULT_BREAK_MIN,
            DEFAULT_SESSIONS_BEFORE_LONG_BREAK,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_break_only_after_last_session() {
        assert_eq!(break_type(1, 4), TimerPhase::ShortBreak);
        assert_eq!(break_type(2, 4), TimerPhase::ShortBreak);
        assert_eq!(break_type(3, 4), TimerPhase::ShortBreak);
        assert_eq!(break_type(4, 4), TimerPhase::LongBreak);
    }

    #[test]
    fn index_wraps_after_cycle() {
        assert_eq!(next_index(1, 4), 2);
        assert_eq!(next_index(3, 4), 4);
        assert_eq!(next_index(4, 4), 1);
    }

    #[test]
    fn single_session_cycle_is_always_long() {
        assert_eq!(break_type(1, 1), TimerPhase::LongBreak);
        assert_eq!(next_index(1, 1), 1);
        // zero is treated as a cycle of one
        assert_eq!(break_type(1, 0), TimerPhase::LongBreak);
        assert_eq!(next_index(1, 0), 1);
    }

    #[test]
    fn long_break_is_twice_short_break() {
        let d = Durations::from_minutes(50, 10, 4);
        assert_eq!(d.for_phase(TimerPhase::Focus), 3000);
        assert_eq!(d.for_phase(TimerPhase::ShortBreak), 600);
        assert_eq!(d.for_phase(TimerPhase::LongBreak), 1200);
    }

    #[test]
    fn zero_durations_are_clamped() {
        let d = Durations::new(0, 0, 0);
        assert_eq!(d.focus_secs(), 1);
        assert_eq!(d.short_break_secs(), 1);
        assert_eq!(d.sessions_before_long_break(), 1);
    }

    #[test]
    fn defaults_match_classic_pomodoro() {
        let d = Durations::default();
        assert_eq!(d.focus_secs(), 25 * 60);
        assert_eq!(d.short_break_secs(), 5 * 60);
        assert_eq!(d.long_break_secs(), 10 * 60);
        assert_eq!(d.sessions_before_long_break(), 4);
    }
}
