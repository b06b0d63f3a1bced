//! Async host for a [`TimerEngine`].
//!
//! The controller owns the engine behind a mutex and turns the engine's
//! queued [`Effect`]s into real work: alarm requests go to a single gateway
//! worker, session records are written in the background with retries, and
//! the post-completion advance runs after a short delay. While a run is
//! active a ticker task drives `tick()` once per interval and falls back to
//! `reconcile()` when it notices the wall clock jumped (host sleep).
//!
//! Commands are synchronous: they mutate the engine, hand effects off and
//! return the resulting event without waiting for any I/O.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::alarm::{spawn_alarm_worker, AlarmCommand, AlarmGateway, AlarmPayload};
use crate::error::PersistenceError;
use crate::events::Event;
use crate::ledger::{persist_with_retry, RetryPolicy, SessionRecord};
use crate::settings::SettingsProvider;
use crate::storage::{Config, SessionStore};
use crate::timer::{Effect, TaskRef, TimerEngine, TimerStatus};

const EVENT_CAPACITY: usize = 64;

/// Timing knobs for the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerOptions {
    pub tick_interval: Duration,
    /// Wait between a completed run and the automatic advance.
    pub completion_delay: Duration,
    pub retry: RetryPolicy,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            completion_delay: Duration::from_millis(1500),
            retry: RetryPolicy::default(),
        }
    }
}

impl ControllerOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            tick_interval: config.tick_interval(),
            completion_delay: config.completion_delay(),
            retry: config.retry_policy(),
        }
    }
}

/// Cloneable handle to a running timer.
///
/// Must be created inside a tokio runtime.
#[derive(Clone)]
pub struct TimerController {
    engine: Arc<Mutex<TimerEngine>>,
    store: Arc<dyn SessionStore>,
    alarms: mpsc::UnboundedSender<AlarmCommand>,
    writes: Arc<Mutex<JoinSet<()>>>,
    ticker: Arc<Mutex<Option<JoinHandle<()>>>>,
    events: broadcast::Sender<Event>,
    options: ControllerOptions,
}

impl TimerController {
    pub fn new(
        engine: TimerEngine,
        store: Arc<dyn SessionStore>,
        gateway: Arc<dyn AlarmGateway>,
        options: ControllerOptions,
    ) -> Self {
        let (alarms, _worker) = spawn_alarm_worker(gateway);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let controller = Self {
            engine: Arc::new(Mutex::new(engine)),
            store,
            alarms,
            writes: Arc::new(Mutex::new(JoinSet::new())),
            ticker: Arc::new(Mutex::new(None)),
            events,
            options,
        };
        // A restored engine may already be mid-run.
        if controller.lock().status() == TimerStatus::Running {
            controller.ensure_ticker();
        }
        controller
    }

    pub fn options(&self) -> ControllerOptions {
        self.options
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    // ── Commands ─────────────────────────────────────────────────────

    pub fn start(&self) -> Option<Event> {
        self.apply(TimerEngine::start)
    }

    pub fn pause(&self) -> Option<Event> {
        self.apply(TimerEngine::pause)
    }

    pub fn resume(&self) -> Option<Event> {
        self.apply(TimerEngine::resume)
    }

    pub fn reset(&self) -> Option<Event> {
        self.apply(TimerEngine::reset)
    }

    pub fn skip(&self) -> Option<Event> {
        self.apply(TimerEngine::skip)
    }

    pub fn tick(&self) -> Option<Event> {
        self.apply(TimerEngine::tick)
    }

    pub fn reconcile(&self) -> Option<Event> {
        self.apply(TimerEngine::reconcile)
    }

    /// Call when the host comes back to the foreground or wakes from sleep.
    pub fn on_resume(&self) -> Option<Event> {
        let event = self.reconcile();
        if let Some(event) = &event {
            info!(?event, "timer reconciled on resume");
        }
        event
    }

    /// Reconcile in response to a fired alarm. Alarms from older runs are ignored.
    pub fn handle_alarm(&self, payload: &AlarmPayload) -> Option<Event> {
        self.apply(|engine| {
            if payload.run_id != engine.generation() {
                debug!(
                    run_id = payload.run_id,
                    current = engine.generation(),
                    "stale alarm ignored"
                );
                return None;
            }
            engine.reconcile()
        })
    }

    pub fn advance(&self) -> Option<Event> {
        self.apply(TimerEngine::advance_after_completion)
    }

    pub fn complete_break(&self) -> Option<Event> {
        self.apply(TimerEngine::complete_break)
    }

    pub fn update_timer_duration(&self, focus_min: u32, break_min: u32) -> Option<Event> {
        self.apply(|engine| engine.update_timer_duration(focus_min, break_min))
    }

    pub fn apply_settings(&self, settings: &dyn SettingsProvider) -> Option<Event> {
        self.apply(|engine| engine.apply_settings(settings))
    }

    pub fn attach_task(&self, task: Option<TaskRef>) {
        self.lock().attach_task(task);
    }

    /// Feed fired alarms from a gateway channel into [`handle_alarm`](Self::handle_alarm).
    pub fn listen_for_alarms(&self, mut fired: mpsc::UnboundedReceiver<AlarmPayload>) -> JoinHandle<()> {
        let controller = self.clone();
        tokio::spawn(async move {
            while let Some(payload) = fired.recv().await {
                controller.handle_alarm(&payload);
            }
        })
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn snapshot(&self) -> Event {
        self.lock().snapshot()
    }

    pub fn status(&self) -> TimerStatus {
        self.lock().status()
    }

    /// Sessions recorded by this process, persisted or not.
    pub fn records(&self) -> Vec<SessionRecord> {
        self.lock().ledger().records().to_vec()
    }

    /// Copy of the engine, for saving between processes.
    pub fn engine_state(&self) -> TimerEngine {
        self.lock().clone()
    }

    pub async fn total_duration_for_task(&self, task_id: &str) -> Result<u64, PersistenceError> {
        self.store.total_duration_for_task(task_id).await
    }

    /// Stop the ticker and wait for every pending session write.
    pub async fn shutdown(&self) {
        let ticker = self.ticker_slot().take();
        if let Some(ticker) = ticker {
            ticker.abort();
        }
        let mut writes = std::mem::take(&mut *self.lock_writes());
        while let Some(res) = writes.join_next().await {
            if let Err(err) = res {
                warn!(error = %err, "session write task failed");
            }
        }
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn lock(&self) -> MutexGuard<'_, TimerEngine> {
        self.engine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_writes(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.writes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ticker_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.ticker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply<F>(&self, command: F) -> Option<Event>
    where
        F: FnOnce(&mut TimerEngine) -> Option<Event>,
    {
        let (event, effects, status) = {
            let mut engine = self.lock();
            let event = command(&mut *engine);
            (event, engine.take_effects(), engine.status())
        };
        self.dispatch(effects);
        if status == TimerStatus::Running {
            self.ensure_ticker();
        }
        if let Some(event) = &event {
            // No subscribers is fine.
            let _ = self.events.send(event.clone());
        }
        event
    }

    fn dispatch(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::ArmAlarm { at, payload } => self.send_alarm(AlarmCommand::Arm { at, payload }),
                Effect::CancelAlarm => self.send_alarm(AlarmCommand::Cancel),
                Effect::PersistSession(record) => self.spawn_write(record),
                Effect::ScheduleAdvance { generation } => self.schedule_advance(generation),
            }
        }
    }

    fn send_alarm(&self, command: AlarmCommand) {
        if self.alarms.send(command).is_err() {
            warn!("alarm worker stopped; request dropped");
        }
    }

    fn spawn_write(&self, record: SessionRecord) {
        let store = Arc::clone(&self.store);
        let policy = self.options.retry;
        let mut writes = self.lock_writes();
        while writes.try_join_next().is_some() {}
        writes.spawn(async move {
            match persist_with_retry(store.as_ref(), &record, policy).await {
                Ok(id) => info!(
                    session_id = %id,
                    duration_secs = record.duration_secs,
                    completed = record.completed,
                    "session persisted"
                ),
                Err(err) => error!(
                    session_id = %record.id,
                    error = %err,
                    "session could not be persisted; kept in memory only"
                ),
            }
        });
    }

    fn schedule_advance(&self, generation: u64) {
        let controller = self.clone();
        let delay = self.options.completion_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            controller.apply(|engine| {
                if engine.generation() != generation {
                    debug!(generation, "advance dropped: run superseded");
                    return None;
                }
                engine.advance_after_completion()
            });
        });
    }

    fn ensure_ticker(&self) {
        let mut slot = self.ticker_slot();
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        let controller = self.clone();
        *slot = Some(tokio::spawn(controller.run_ticker()));
    }

    /// Clears the ticker slot and returns false once the run is no longer active.
    ///
    /// Checked under the slot lock so a concurrent `start` either sees the
    /// old ticker still registered or finds the slot empty and spawns anew.
    fn keep_ticking(&self) -> bool {
        let mut slot = self.ticker_slot();
        if self.lock().status() == TimerStatus::Running {
            return true;
        }
        *slot = None;
        false
    }

    async fn run_ticker(self) {
        let period = self.options.tick_interval;
        let gap_limit = chrono::Duration::from_std(period * 3 / 2)
            .unwrap_or_else(|_| chrono::Duration::seconds(2));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_wall = self.lock().now();
        interval.tick().await;
        debug!(?period, "ticker started");

        loop {
            interval.tick().await;
            let now = self.lock().now();
            if now - last_wall > gap_limit {
                debug!(gap_ms = (now - last_wall).num_milliseconds(), "wall clock jumped");
                self.reconcile();
            } else {
                self.tick();
            }
            last_wall = now;
            if !self.keep_ticking() {
                break;
            }
        }
        debug!("ticker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::SchedulingError;
    use crate::storage::Database;
    use crate::timer::{Durations, TimerPhase};
    use crate::alarm::AlarmHandle;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

    #[derive(Default)]
    struct RecordingGateway {
        calls: Mutex<Vec<String>>,
        next: AtomicU64,
        fail: bool,
    }

    impl RecordingGateway {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AlarmGateway for RecordingGateway {
        async fn schedule_at(
            &self,
            _at: DateTime<Utc>,
            payload: AlarmPayload,
        ) -> Result<AlarmHandle, SchedulingError> {
            if self.fail {
                return Err(SchedulingError::PermissionDenied("alarms disabled".into()));
            }
            self.calls.lock().unwrap().push(format!("arm:{}", payload.run_id));
            Ok(AlarmHandle(self.next.fetch_add(1, Ordering::SeqCst)))
        }

        async fn cancel(&self, _handle: AlarmHandle) -> Result<(), SchedulingError> {
            self.calls.lock().unwrap().push("cancel".into());
            Ok(())
        }
    }

    #[derive(Default)]
    struct FailingStore {
        attempts: AtomicU32,
    }

    #[async_trait]
    impl SessionStore for FailingStore {
        async fn create_session(&self, record: &SessionRecord) -> Result<String, PersistenceError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(PersistenceError::WriteFailed {
                session_id: record.id.clone(),
                message: "disk full".into(),
            })
        }

        async fn sessions_for_task(&self, _task_id: &str) -> Result<Vec<SessionRecord>, PersistenceError> {
            Ok(Vec::new())
        }

        async fn total_duration_for_task(&self, _task_id: &str) -> Result<u64, PersistenceError> {
            Ok(0)
        }
    }

    struct Harness {
        controller: TimerController,
        clock: ManualClock,
        db: Arc<Database>,
        gateway: Arc<RecordingGateway>,
    }

    fn harness(focus: u64, short_break: u64) -> Harness {
        harness_with(focus, short_break, RecordingGateway::default())
    }

    fn harness_with(focus: u64, short_break: u64, gateway: RecordingGateway) -> Harness {
        let clock = ManualClock::new(Utc::now());
        let engine = TimerEngine::with_clock(
            Durations::new(focus, short_break, 4),
            Arc::new(clock.clone()),
        );
        let db = Arc::new(Database::open_memory().unwrap());
        let gateway = Arc::new(gateway);
        let controller = TimerController::new(
            engine,
            db.clone(),
            gateway.clone(),
            ControllerOptions::default(),
        );
        Harness {
            controller,
            clock,
            db,
            gateway,
        }
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pause_cancels_the_alarm_armed_by_start() {
        let h = harness(1500, 300);
        h.controller.start();
        h.controller.pause();
        settle().await;
        assert_eq!(h.gateway.calls(), vec!["arm:1".to_string(), "cancel".to_string()]);
        assert_eq!(h.controller.status(), TimerStatus::Paused);
    }

    #[tokio::test(start_paused = true)]
    async fn gateway_failure_does_not_block_transition() {
        let h = harness_with(
            1500,
            300,
            RecordingGateway {
                fail: true,
                ..RecordingGateway::default()
            },
        );
        assert!(matches!(h.controller.start(), Some(Event::TimerStarted { .. })));
        settle().await;
        assert_eq!(h.controller.status(), TimerStatus::Running);
        assert!(h.gateway.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_completes_run_then_enters_break() {
        let h = harness(3, 2);
        h.controller.start();
        tokio::time::sleep(Duration::from_millis(3100)).await;

        assert_eq!(h.controller.status(), TimerStatus::Completed);
        let records = h.controller.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].duration_secs, 3);
        assert!(records[0].completed);

        tokio::time::sleep(Duration::from_secs(2)).await;
        let engine = h.controller.engine_state();
        assert_eq!(engine.phase(), TimerPhase::ShortBreak);
        assert_eq!(engine.status(), TimerStatus::Idle);
        assert_eq!(engine.remaining_secs(), 2);

        h.controller.shutdown().await;
        let stored = h.db.recent_sessions(10).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, records[0].id);
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_reconciles_after_wall_clock_jump() {
        let h = harness(600, 300);
        h.controller.start();
        settle().await;
        h.clock.advance_secs(300);
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(h.controller.engine_state().remaining_secs(), 300);
        assert_eq!(h.controller.status(), TimerStatus::Running);
        h.controller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn persistence_failure_keeps_in_memory_record() {
        let clock = ManualClock::new(Utc::now());
        let engine = TimerEngine::with_clock(Durations::new(3, 1, 4), Arc::new(clock.clone()));
        let store = Arc::new(FailingStore::default());
        let options = ControllerOptions {
            retry: RetryPolicy {
                attempts: 2,
                backoff: Duration::from_millis(10),
            },
            ..ControllerOptions::default()
        };
        let controller = TimerController::new(
            engine,
            store.clone(),
            Arc::new(RecordingGateway::default()),
            options,
        );

        controller.start();
        for _ in 0..3 {
            controller.tick();
        }
        assert_eq!(controller.status(), TimerStatus::Completed);
        controller.shutdown().await;

        assert_eq!(store.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(controller.records().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn background_expiry_is_recorded_once() {
        let h = harness(60, 10);
        h.controller.start();
        settle().await;
        h.clock.advance_secs(65);

        assert!(matches!(h.controller.on_resume(), Some(Event::TimerCompleted { .. })));
        assert!(h.controller.on_resume().is_none());
        let payload = AlarmPayload {
            run_id: 1,
            phase: TimerPhase::Focus,
            session_index: 1,
        };
        assert!(h.controller.handle_alarm(&payload).is_none());

        h.controller.shutdown().await;
        let stored = h.db.recent_sessions(10).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].duration_secs, 60);
    }

    #[tokio::test(start_paused = true)]
    async fn alarm_from_previous_run_is_ignored() {
        let h = harness(60, 10);
        h.controller.start();
        h.controller.reset();
        h.controller.start();
        h.clock.advance_secs(61);

        let stale = AlarmPayload {
            run_id: 1,
            phase: TimerPhase::Focus,
            session_index: 1,
        };
        assert!(h.controller.handle_alarm(&stale).is_none());
        assert_eq!(h.controller.status(), TimerStatus::Running);

        let current = AlarmPayload { run_id: 2, ..stale };
        assert!(h.controller.handle_alarm(&current).is_some());
        assert_eq!(h.controller.status(), TimerStatus::Completed);
        h.controller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn reset_cancels_pending_advance() {
        let h = harness(2, 1);
        h.controller.start();
        h.controller.tick();
        h.controller.tick();
        assert_eq!(h.controller.status(), TimerStatus::Completed);
        h.controller.reset();

        tokio::time::sleep(Duration::from_secs(3)).await;
        let engine = h.controller.engine_state();
        assert_eq!(engine.phase(), TimerPhase::Focus);
        assert_eq!(engine.status(), TimerStatus::Idle);
        assert_eq!(engine.session_index(), 1);
        h.controller.shutdown().await;
        assert_eq!(h.db.recent_sessions(10).unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn subscribers_receive_command_events() {
        let h = harness(1500, 300);
        let mut rx = h.controller.subscribe();
        h.controller.start();
        h.controller.pause();
        assert!(matches!(rx.try_recv().unwrap(), Event::TimerStarted { .. }));
        assert!(matches!(rx.try_recv().unwrap(), Event::TimerPaused { .. }));
        assert!(h.controller.pause().is_none());
        assert!(rx.try_recv().is_err());
    }
}
