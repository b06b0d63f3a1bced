//! Wall-clock reconciliation.
//!
//! The foreground tick loop decrements one second per tick, which drifts or
//! stalls whenever the process is suspended. While a run is active the
//! engine also holds an absolute deadline, and this module recomputes the
//! remaining time from it. Clock changes on the device are not handled;
//! a deadline in the past simply clamps to zero.

use chrono::{DateTime, Utc};

/// Outcome of reconciling a run against its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// No deadline is armed; the last known value stands.
    NotRunning(u64),
    /// The deadline is still ahead; remaining time is this many seconds.
    Adjusted(u64),
    /// The deadline has passed. The caller must drive the completion path.
    Expired,
}

impl Reconciliation {
    pub fn remaining_secs(self) -> u64 {
        match self {
            Reconciliation::NotRunning(secs) | Reconciliation::Adjusted(secs) => secs,
            Reconciliation::Expired => 0,
        }
    }

    pub fn is_expired(self) -> bool {
        matches!(self, Reconciliation::Expired)
    }
}

/// Recompute remaining seconds from `target_end_at`.
///
/// Rounds to the nearest whole second, so a deadline less than half a
/// second away already counts as expired.
pub fn reconcile(
    now: DateTime<Utc>,
    target_end_at: Option<DateTime<Utc>>,
    last_known_remaining: u64,
) -> Reconciliation {
    let Some(target) = target_end_at else {
        return Reconciliation::NotRunning(last_known_remaining);
    };

    let remaining = rounded_secs((target - now).num_milliseconds());
    if remaining == 0 {
        Reconciliation::Expired
    } else {
        Reconciliation::Adjusted(remaining)
    }
}

fn rounded_secs(millis: i64) -> u64 {
    if millis <= 0 {
        return 0;
    }
    (millis.saturating_add(500) / 1000) as u64
}
