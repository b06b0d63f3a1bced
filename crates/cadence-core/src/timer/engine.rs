//! Timer engine implementation.
//!
//! The timer engine is a wall-clock-anchored state machine. It does not use
//! internal threads and performs no I/O: the caller invokes `tick()` once a
//! second and `reconcile()` whenever the tick loop may have missed time.
//! Work for the outside world (arming alarms, persisting sessions) is queued
//! as [`Effect`]s and drained with [`TimerEngine::take_effects`].
//!
//! ## State Transitions
//!
//! ```text
//! Idle --start--> Running --tick/reconcile--> Completed --(delay)--> Idle(next phase)
//!                  |   ^
//!            pause |   | resume
//!                  v   |
//!                 Paused
//!
//! reset: any -> Idle(Focus, #1)      skip: any -> Idle(Focus, next #)
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let mut engine = TimerEngine::new(Durations::default());
//! engine.start();
//! // once a second:
//! engine.tick(); // Returns Some(Event::TimerCompleted) when the run finishes
//! for effect in engine.take_effects() { /* arm, cancel, persist */ }
//! ```

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::phase::{TimerPhase, TimerStatus};
use super::policy::{self, Durations};
use super::reconcile::{reconcile, Reconciliation};
use super::run::{TaskRef, TimerRun};
use crate::alarm::AlarmPayload;
use crate::clock::{system_clock, Clock};
use crate::events::Event;
use crate::ledger::{SessionLedger, SessionRecord};
use crate::settings::SettingsProvider;

/// Work the engine needs done outside of itself.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Ask the background gateway to fire at `at`.
    ArmAlarm { at: DateTime<Utc>, payload: AlarmPayload },
    /// Drop whatever alarm is armed.
    CancelAlarm,
    /// Durably store a record already present in the in-memory ledger.
    PersistSession(SessionRecord),
    /// Call `advance_after_completion` after the completion delay, if the
    /// engine is still on this run generation.
    ScheduleAdvance { generation: u64 },
}

/// Core timer engine.
///
/// Operates on wall-clock deltas -- no internal thread.
/// The caller is responsible for calling `tick()` periodically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerEngine {
    run: TimerRun,
    durations: Durations,
    /// Incremented for every started run; tags alarms and delayed advances.
    generation: u64,
    /// One-shot guard for the completion path of the current run.
    /// Set when a record is written; cleared by `start()` and `reset()`.
    completion_dispatched: bool,
    #[serde(skip)]
    ledger: SessionLedger,
    #[serde(skip)]
    effects: Vec<Effect>,
    #[serde(skip, default = "system_clock")]
    clock: Arc<dyn Clock>,
}

impl Default for TimerEngine {
    fn default() -> Self {
        Self::new(Durations::default())
    }
}

impl TimerEngine {
    /// Create an engine at `Idle/Focus`, session 1, using the system clock.
    pub fn new(durations: Durations) -> Self {
        Self::with_clock(durations, system_clock())
    }

    pub fn with_clock(durations: Durations, clock: Arc<dyn Clock>) -> Self {
        Self {
            run: TimerRun::idle(TimerPhase::Focus, durations.focus_secs(), 1),
            durations,
            generation: 0,
            completion_dispatched: false,
            ledger: SessionLedger::new(),
            effects: Vec::new(),
            clock,
        }
    }

    /// Replace the clock, e.g. after deserialising a saved engine.
    pub fn set_clock(&mut self, clock: Arc<dyn Clock>) {
        self.clock = clock;
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn run(&self) -> &TimerRun {
        &self.run
    }

    pub fn status(&self) -> TimerStatus {
        self.run.status
    }

    pub fn phase(&self) -> TimerPhase {
        self.run.phase
    }

    pub fn remaining_secs(&self) -> u64 {
        self.run.remaining_secs
    }

    pub fn total_secs(&self) -> u64 {
        self.run.total_secs
    }

    pub fn session_index(&self) -> u32 {
        self.run.session_index
    }

    pub fn durations(&self) -> Durations {
        self.durations
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn completion_dispatched(&self) -> bool {
        self.completion_dispatched
    }

    pub fn ledger(&self) -> &SessionLedger {
        &self.ledger
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Drain queued effects in the order they were produced.
    pub fn take_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    /// Build a full state snapshot event.
    pub fn snapshot(&self) -> Event {
        Event::StateSnapshot {
            phase: self.run.phase,
            status: self.run.status,
            session_index: self.run.session_index,
            remaining_secs: self.run.remaining_secs,
            total_secs: self.run.total_secs,
            target_end_at: self.run.target_end_at,
            task_id: self.run.task_id().map(str::to_owned),
            progress: self.run.progress(),
            at: self.clock.now(),
        }
    }

    // ── Commands ─────────────────────────────────────────────────────

    pub fn start(&mut self) -> Option<Event> {
        match self.run.status {
            TimerStatus::Idle | TimerStatus::Completed => Some(self.begin_run()),
            TimerStatus::Paused => self.resume(),
            TimerStatus::Running => None, // Already running.
        }
    }

    pub fn pause(&mut self) -> Option<Event> {
        if self.run.status != TimerStatus::Running {
            debug!(status = ?self.run.status, "pause ignored");
            return None;
        }
        self.run.status = TimerStatus::Paused;
        self.run.target_end_at = None;
        self.effects.push(Effect::CancelAlarm);
        debug!(remaining = self.run.remaining_secs, "timer paused");
        Some(Event::TimerPaused {
            remaining_secs: self.run.remaining_secs,
            at: self.clock.now(),
        })
    }

    pub fn resume(&mut self) -> Option<Event> {
        if self.run.status != TimerStatus::Paused {
            debug!(status = ?self.run.status, "resume ignored");
            return None;
        }
        let now = self.clock.now();
        let target = now + secs(self.run.remaining_secs);
        self.run.status = TimerStatus::Running;
        self.run.target_end_at = Some(target);
        self.arm(target);
        debug!(remaining = self.run.remaining_secs, "timer resumed");
        Some(Event::TimerResumed {
            remaining_secs: self.run.remaining_secs,
            target_end_at: target,
            at: now,
        })
    }

    /// Call once a second. Returns `Some(Event::TimerCompleted)` when the run finishes.
    pub fn tick(&mut self) -> Option<Event> {
        if self.run.status != TimerStatus::Running {
            return None;
        }
        self.run.remaining_secs = self.run.remaining_secs.saturating_sub(1);
        if self.run.remaining_secs == 0 {
            let now = self.clock.now();
            return self.complete(now);
        }
        None
    }

    /// Re-anchor remaining time on the armed deadline.
    ///
    /// Drives the same completion path as `tick()` when the deadline has
    /// passed. Returns `None` when nothing changed.
    pub fn reconcile(&mut self) -> Option<Event> {
        let now = self.clock.now();
        match reconcile(now, self.run.target_end_at, self.run.remaining_secs) {
            Reconciliation::NotRunning(_) => None,
            Reconciliation::Adjusted(secs) => {
                let corrected = secs.min(self.run.total_secs);
                if corrected == self.run.remaining_secs {
                    return None;
                }
                let drift_secs = self.run.remaining_secs as i64 - corrected as i64;
                self.run.remaining_secs = corrected;
                debug!(remaining = corrected, drift_secs, "remaining time reconciled");
                Some(Event::Reconciled {
                    remaining_secs: corrected,
                    drift_secs,
                    at: now,
                })
            }
            Reconciliation::Expired => {
                if self.run.status != TimerStatus::Running {
                    return None;
                }
                self.run.remaining_secs = 0;
                self.complete(now)
            }
        }
    }

    /// Return to `Idle/Focus` at session 1.
    ///
    /// A run that had consumed any time is recorded as not completed first.
    pub fn reset(&mut self) -> Option<Event> {
        let now = self.clock.now();
        let mut recorded_session = None;

        if self.run.status != TimerStatus::Idle {
            if !self.completion_dispatched && self.run.elapsed_secs() > 0 {
                self.completion_dispatched = true;
                let record = self.ledger.write(&self.run, false, now);
                recorded_session = Some(record.id.clone());
                self.effects.push(Effect::PersistSession(record));
            }
            self.effects.push(Effect::CancelAlarm);
        }

        let task = self.run.task.take();
        self.run = TimerRun::idle(TimerPhase::Focus, self.durations.focus_secs(), 1);
        self.run.task = task;
        self.completion_dispatched = false;
        debug!(?recorded_session, "timer reset");
        Some(Event::TimerReset {
            recorded_session,
            at: now,
        })
    }

    /// Abandon the current phase without recording it and move to the next
    /// focus session.
    pub fn skip(&mut self) -> Option<Event> {
        let now = self.clock.now();
        let from_phase = self.run.phase;
        if self.run.status != TimerStatus::Idle {
            self.effects.push(Effect::CancelAlarm);
        }
        let next = policy::next_index(
            self.run.session_index,
            self.durations.sessions_before_long_break(),
        );
        let task = self.run.task.take();
        self.run = TimerRun::idle(TimerPhase::Focus, self.durations.focus_secs(), next);
        self.run.task = task;
        debug!(?from_phase, session_index = next, "phase skipped");
        Some(Event::TimerSkipped {
            from_phase,
            session_index: next,
            at: now,
        })
    }

    /// The delayed follow-up to a completed run.
    ///
    /// A finished focus run enters its break (not started); a finished break
    /// completes the cycle step via [`complete_break`](Self::complete_break).
    pub fn advance_after_completion(&mut self) -> Option<Event> {
        if self.run.status != TimerStatus::Completed {
            return None;
        }
        if self.run.phase.is_break() {
            return self.complete_break();
        }
        let phase = policy::break_type(
            self.run.session_index,
            self.durations.sessions_before_long_break(),
        );
        Some(self.enter_phase(phase, self.run.session_index))
    }

    /// Close a completed break: advance the session index and go to `Idle/Focus`.
    pub fn complete_break(&mut self) -> Option<Event> {
        if self.run.status != TimerStatus::Completed || !self.run.phase.is_break() {
            return None;
        }
        let next = policy::next_index(
            self.run.session_index,
            self.durations.sessions_before_long_break(),
        );
        Some(self.enter_phase(TimerPhase::Focus, next))
    }

    /// Adopt new focus/break lengths (minutes).
    ///
    /// The lengths are kept for future runs either way, but the current run
    /// is only resized while idle.
    pub fn update_timer_duration(&mut self, focus_min: u32, break_min: u32) -> Option<Event> {
        self.durations = Durations::from_minutes(
            focus_min,
            break_min,
            self.durations.sessions_before_long_break(),
        );
        self.resize_idle_run()
    }

    /// Pull durations and cycle length from a settings provider.
    ///
    /// A shorter cycle only pulls the session index back while Idle; an
    /// active run keeps the index it was started with until its break.
    pub fn apply_settings(&mut self, settings: &dyn SettingsProvider) -> Option<Event> {
        self.durations = settings.durations();
        let sessions = self.durations.sessions_before_long_break();
        if self.run.status == TimerStatus::Idle && self.run.session_index > sessions {
            self.run.session_index = sessions;
        }
        self.resize_idle_run()
    }

    /// Attribute the current and following runs to `task`.
    pub fn attach_task(&mut self, task: Option<TaskRef>) {
        self.run.task = task;
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn begin_run(&mut self) -> Event {
        let now = self.clock.now();
        let total = self.durations.for_phase(self.run.phase);
        let target = now + secs(total);

        self.generation += 1;
        self.completion_dispatched = false;
        self.run.status = TimerStatus::Running;
        self.run.total_secs = total;
        self.run.remaining_secs = total;
        self.run.started_at = Some(now);
        self.run.target_end_at = Some(target);
        self.arm(target);

        debug!(
            phase = ?self.run.phase,
            session_index = self.run.session_index,
            total,
            generation = self.generation,
            "run started"
        );
        Event::TimerStarted {
            phase: self.run.phase,
            session_index: self.run.session_index,
            duration_secs: total,
            target_end_at: target,
            at: now,
        }
    }

    /// Single-shot completion shared by `tick()` and `reconcile()`.
    fn complete(&mut self, now: DateTime<Utc>) -> Option<Event> {
        if self.completion_dispatched {
            return None;
        }
        self.completion_dispatched = true;
        self.run.target_end_at = None;
        self.run.remaining_secs = 0;
        self.run.status = TimerStatus::Completed;

        let record = self.ledger.write(&self.run, true, now);
        let session_id = record.id.clone();
        self.effects.push(Effect::PersistSession(record));
        self.effects.push(Effect::ScheduleAdvance {
            generation: self.generation,
        });

        info!(
            phase = ?self.run.phase,
            session_index = self.run.session_index,
            %session_id,
            "run completed"
        );
        Some(Event::TimerCompleted {
            phase: self.run.phase,
            session_index: self.run.session_index,
            session_id,
            at: now,
        })
    }

    fn enter_phase(&mut self, phase: TimerPhase, session_index: u32) -> Event {
        let total = self.durations.for_phase(phase);
        let task = self.run.task.take();
        self.run = TimerRun::idle(phase, total, session_index);
        self.run.task = task;
        debug!(?phase, session_index, "phase entered");
        Event::PhaseEntered {
            phase,
            session_index,
            duration_secs: total,
            at: self.clock.now(),
        }
    }

    fn resize_idle_run(&mut self) -> Option<Event> {
        if self.run.status != TimerStatus::Idle {
            debug!(status = ?self.run.status, "duration change deferred until idle");
            return None;
        }
        let total = self.durations.for_phase(self.run.phase);
        self.run.total_secs = total;
        self.run.remaining_secs = total;
        Some(Event::DurationUpdated {
            phase: self.run.phase,
            total_secs: total,
            at: self.clock.now(),
        })
    }

    fn arm(&mut self, at: DateTime<Utc>) {
        self.effects.push(Effect::ArmAlarm {
            at,
            payload: AlarmPayload {
                run_id: self.generation,
                phase: self.run.phase,
                session_index: self.run.session_index,
            },
        });
    }
}

fn secs(value: u64) -> Duration {
    Duration::seconds(i64::try_from(value).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn engine(focus: u64, short_break: u64) -> (TimerEngine, ManualClock) {
        let clock = ManualClock::new(Utc::now());
        let engine =
            TimerEngine::with_clock(Durations::new(focus, short_break, 4), Arc::new(clock.clone()));
        (engine, clock)
    }

    fn tick_n(engine: &mut TimerEngine, clock: &ManualClock, n: u64) -> Vec<Event> {
        let mut events = Vec::new();
        for _ in 0..n {
            clock.advance_secs(1);
            events.extend(engine.tick());
        }
        events
    }

    fn persisted(effects: &[Effect]) -> usize {
        effects
            .iter()
            .filter(|e| matches!(e, Effect::PersistSession(_)))
            .count()
    }

    #[test]
    fn start_pause_resume() {
        let (mut engine, _clock) = engine(1500, 300);
        assert_eq!(engine.status(), TimerStatus::Idle);

        assert!(engine.start().is_some());
        assert_eq!(engine.status(), TimerStatus::Running);
        assert!(engine.run().target_end_at.is_some());

        assert!(engine.pause().is_some());
        assert_eq!(engine.status(), TimerStatus::Paused);
        assert!(engine.run().target_end_at.is_none());

        assert!(engine.resume().is_some());
        assert_eq!(engine.status(), TimerStatus::Running);
        assert!(engine.run().target_end_at.is_some());
    }

    #[test]
    fn start_arms_alarm_at_deadline() {
        let (mut engine, clock) = engine(1500, 300);
        let now = clock.now();
        engine.start();
        let effects = engine.take_effects();
        assert_eq!(
            effects,
            vec![Effect::ArmAlarm {
                at: now + Duration::seconds(1500),
                payload: AlarmPayload {
                    run_id: 1,
                    phase: TimerPhase::Focus,
                    session_index: 1,
                },
            }]
        );
    }

    #[test]
    fn pause_queues_cancel() {
        let (mut engine, _clock) = engine(1500, 300);
        engine.start();
        engine.take_effects();
        engine.pause();
        assert_eq!(engine.take_effects(), vec![Effect::CancelAlarm]);
    }

    #[test]
    fn invalid_transitions_are_noops() {
        let (mut engine, _clock) = engine(1500, 300);
        assert!(engine.pause().is_none());
        assert!(engine.resume().is_none());
        assert!(engine.tick().is_none());
        assert!(engine.reconcile().is_none());
        assert!(engine.complete_break().is_none());
        assert!(engine.advance_after_completion().is_none());
        assert!(engine.take_effects().is_empty());

        engine.start();
        assert!(engine.start().is_none());
    }

    #[test]
    fn ticking_to_zero_completes_once() {
        let (mut engine, clock) = engine(5, 300);
        engine.start();
        let events = tick_n(&mut engine, &clock, 5);
        assert_eq!(events.len(), 1);
        assert!(events[0].is_completion());
        assert_eq!(engine.status(), TimerStatus::Completed);
        assert_eq!(engine.remaining_secs(), 0);
        assert!(engine.run().target_end_at.is_none());
        assert_eq!(engine.ledger().len(), 1);
        assert_eq!(engine.ledger().records()[0].duration_secs, 5);
        assert!(engine.ledger().records()[0].completed);

        // Further ticks and reconciles do nothing.
        assert!(engine.tick().is_none());
        clock.advance_secs(100);
        assert!(engine.reconcile().is_none());
        assert_eq!(engine.ledger().len(), 1);
    }

    #[test]
    fn completion_queues_persist_then_advance() {
        let (mut engine, clock) = engine(2, 300);
        engine.start();
        engine.take_effects();
        tick_n(&mut engine, &clock, 2);
        let effects = engine.take_effects();
        assert_eq!(effects.len(), 2);
        assert!(matches!(effects[0], Effect::PersistSession(_)));
        assert_eq!(effects[1], Effect::ScheduleAdvance { generation: 1 });
    }

    #[test]
    fn pause_resume_roundtrip_keeps_remaining() {
        let (mut engine, clock) = engine(1500, 300);
        engine.start();
        tick_n(&mut engine, &clock, 100);
        assert_eq!(engine.remaining_secs(), 1400);

        engine.pause();
        clock.advance_secs(5);
        assert!(engine.reconcile().is_none());
        assert_eq!(engine.remaining_secs(), 1400);

        engine.resume();
        tick_n(&mut engine, &clock, 1);
        assert_eq!(engine.remaining_secs(), 1399);
    }

    #[test]
    fn reconcile_corrects_after_suspension() {
        let (mut engine, clock) = engine(1500, 300);
        engine.start();
        tick_n(&mut engine, &clock, 10);
        clock.advance_secs(300);
        let event = engine.reconcile().unwrap();
        assert_eq!(engine.remaining_secs(), 1190);
        match event {
            Event::Reconciled { drift_secs, .. } => assert_eq!(drift_secs, 300),
            other => panic!("unexpected event {other:?}"),
        }
        // Idempotent for the same instant.
        assert!(engine.reconcile().is_none());
        assert_eq!(engine.remaining_secs(), 1190);
    }

    #[test]
    fn reconcile_past_deadline_completes() {
        let (mut engine, clock) = engine(60, 300);
        engine.start();
        engine.take_effects();
        clock.advance_secs(65);
        let event = engine.reconcile().unwrap();
        assert!(event.is_completion());
        assert_eq!(engine.status(), TimerStatus::Completed);
        let record = &engine.ledger().records()[0];
        assert_eq!(record.duration_secs, 60);
        assert!(record.completed);
        assert_eq!(persisted(&engine.take_effects()), 1);
    }

    #[test]
    fn tick_after_reconcile_completion_does_not_double_count() {
        let (mut engine, clock) = engine(3, 300);
        engine.start();
        clock.advance_secs(3);
        assert!(engine.reconcile().is_some());
        assert!(engine.tick().is_none());
        assert_eq!(engine.ledger().len(), 1);
    }

    #[test]
    fn reset_records_partial_run() {
        let (mut engine, clock) = engine(1500, 300);
        engine.skip(); // session 2
        engine.start();
        tick_n(&mut engine, &clock, 10);
        engine.take_effects();

        match engine.reset().unwrap() {
            Event::TimerReset { recorded_session, .. } => assert!(recorded_session.is_some()),
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(engine.status(), TimerStatus::Idle);
        assert_eq!(engine.session_index(), 1);
        assert_eq!(engine.ledger().len(), 1);
        let record = &engine.ledger().records()[0];
        assert_eq!(record.duration_secs, 10);
        assert!(!record.completed);

        let effects = engine.take_effects();
        assert_eq!(persisted(&effects), 1);
        assert_eq!(effects.last(), Some(&Effect::CancelAlarm));
    }

    #[test]
    fn reset_without_elapsed_time_records_nothing() {
        let (mut engine, _clock) = engine(1500, 300);
        engine.start();
        engine.reset();
        assert!(engine.ledger().is_empty());
    }

    #[test]
    fn reset_after_completion_does_not_write_again() {
        let (mut engine, clock) = engine(2, 300);
        engine.start();
        tick_n(&mut engine, &clock, 2);
        engine.reset();
        assert_eq!(engine.ledger().len(), 1);
        assert!(engine.ledger().records()[0].completed);
    }

    #[test]
    fn skip_writes_nothing_and_advances_index() {
        let (mut engine, clock) = engine(1500, 300);
        engine.start();
        tick_n(&mut engine, &clock, 5);
        engine.take_effects();
        engine.skip();
        assert!(engine.ledger().is_empty());
        assert_eq!(engine.status(), TimerStatus::Idle);
        assert_eq!(engine.phase(), TimerPhase::Focus);
        assert_eq!(engine.session_index(), 2);
        assert_eq!(engine.take_effects(), vec![Effect::CancelAlarm]);
    }

    #[test]
    fn completed_start_restarts_same_phase() {
        let (mut engine, clock) = engine(3, 300);
        engine.start();
        tick_n(&mut engine, &clock, 3);
        assert!(engine.completion_dispatched());
        engine.start();
        assert_eq!(engine.status(), TimerStatus::Running);
        assert_eq!(engine.phase(), TimerPhase::Focus);
        assert_eq!(engine.remaining_secs(), 3);
        assert_eq!(engine.generation(), 2);
        assert!(!engine.completion_dispatched());
    }

    #[test]
    fn full_cycle_places_long_break_after_fourth_focus() {
        let (mut engine, clock) = engine(2, 1);
        let mut breaks = Vec::new();
        for _ in 0..4 {
            engine.start();
            tick_n(&mut engine, &clock, 2);
            engine.advance_after_completion();
            breaks.push(engine.phase());
            assert_eq!(engine.status(), TimerStatus::Idle);

            let break_len = engine.total_secs();
            engine.start();
            tick_n(&mut engine, &clock, break_len);
            engine.advance_after_completion();
            assert_eq!(engine.phase(), TimerPhase::Focus);
        }
        assert_eq!(
            breaks,
            vec![
                TimerPhase::ShortBreak,
                TimerPhase::ShortBreak,
                TimerPhase::ShortBreak,
                TimerPhase::LongBreak
            ]
        );
        assert_eq!(engine.session_index(), 1);
        assert_eq!(engine.ledger().len(), 8);
    }

    #[test]
    fn long_break_is_twice_as_long() {
        let (mut engine, clock) = engine(2, 30);
        for _ in 0..3 {
            engine.skip();
        }
        assert_eq!(engine.session_index(), 4);
        engine.start();
        tick_n(&mut engine, &clock, 2);
        engine.advance_after_completion();
        assert_eq!(engine.phase(), TimerPhase::LongBreak);
        assert_eq!(engine.total_secs(), 60);
    }

    #[test]
    fn duration_update_only_resizes_idle_run() {
        let (mut engine, _clock) = engine(1500, 300);
        assert!(engine.update_timer_duration(50, 10).is_some());
        assert_eq!(engine.total_secs(), 3000);

        engine.start();
        assert!(engine.update_timer_duration(20, 5).is_none());
        assert_eq!(engine.total_secs(), 3000);
        assert_eq!(engine.remaining_secs(), 3000);

        // Next run uses the new lengths.
        engine.reset();
        assert_eq!(engine.total_secs(), 1200);
    }

    #[test]
    fn task_snapshot_survives_phase_changes() {
        let (mut engine, clock) = engine(2, 1);
        engine.attach_task(Some(TaskRef::new("t-9", Some("Draft".into()))));
        engine.start();
        tick_n(&mut engine, &clock, 2);
        engine.advance_after_completion();
        assert_eq!(engine.run().task_id(), Some("t-9"));
        assert_eq!(engine.ledger().records()[0].task_title.as_deref(), Some("Draft"));
    }

    #[test]
    fn engine_survives_serde_roundtrip() {
        let (mut engine, clock) = engine(1500, 300);
        engine.start();
        tick_n(&mut engine, &clock, 20);
        let json = serde_json::to_string(&engine).unwrap();
        let mut restored: TimerEngine = serde_json::from_str(&json).unwrap();
        restored.set_clock(Arc::new(clock.clone()));
        assert_eq!(restored.run(), engine.run());
        assert_eq!(restored.generation(), 1);
        assert!(restored.take_effects().is_empty());
        clock.advance_secs(30);
        restored.reconcile();
        assert_eq!(restored.remaining_secs(), 1450);
    }

    #[test]
    fn snapshot_returns_valid_event() {
        let (engine, _clock) = engine(1500, 300);
        match engine.snapshot() {
            Event::StateSnapshot {
                status,
                session_index,
                remaining_secs,
                ..
            } => {
                assert_eq!(status, TimerStatus::Idle);
                assert_eq!(session_index, 1);
                assert_eq!(remaining_secs, 1500);
            }
            _ => panic!("Expected StateSnapshot"),
        }
    }
}
