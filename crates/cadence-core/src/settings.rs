//! Read-only view of the user's timer settings.
//!
//! The engine never writes settings. Whoever owns the settings notices a
//! change and pushes it into the engine with `apply_settings`, which only
//! resizes the current run while it is idle.

use crate::timer::policy::{DEFAULT_BREAK_MIN, DEFAULT_FOCUS_MIN, DEFAULT_SESSIONS_BEFORE_LONG_BREAK};
use crate::timer::Durations;

pub trait SettingsProvider {
    /// Focus length in minutes.
    fn focus_duration_min(&self) -> u32;

    /// Short break length in minutes. Long breaks are twice this.
    fn break_duration_min(&self) -> u32;

    fn sessions_before_long_break(&self) -> u32 {
        DEFAULT_SESSIONS_BEFORE_LONG_BREAK
    }

    fn durations(&self) -> Durations {
        Durations::from_minutes(
            self.focus_duration_min(),
            self.break_duration_min(),
            self.sessions_before_long_break(),
        )
    }
}

/// Fixed settings, for embedding and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticSettings {
    pub focus_min: u32,
    pub break_min: u32,
    pub sessions_before_long_break: u32,
}

impl Default for StaticSettings {
    fn default() -> Self {
        Self {
            focus_min: DEFAULT_FOCUS_MIN,
            break_min: DEFAULT_BREAK_MIN,
            sessions_before_long_break: DEFAULT_SESSIONS_BEFORE_LONG_BREAK,
        }
    }
}

impl SettingsProvider for StaticSettings {
    fn focus_duration_min(&self) -> u32 {
        self.focus_min
    }

    fn break_duration_min(&self) -> u32 {
        self.break_min
    }

    fn sessions_before_long_break(&self) -> u32 {
        self.sessions_before_long_break
    }
}
