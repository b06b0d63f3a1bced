//! # Cadence Core Library
//!
//! This library provides the focus/break interval timer behind the `cadence`
//! CLI. The CLI is a thin layer: every operation it exposes lives here so
//! that other front ends can drive the same engine.
//!
//! ## Architecture
//!
//! - **Timer Engine**: A wall-clock-anchored state machine that requires the
//!   caller to invoke `tick()` once a second and `reconcile()` after gaps
//! - **Controller**: Async host that runs the tick loop, talks to the alarm
//!   gateway and writes session records in the background
//! - **Ledger**: In-process session history plus retrying durable writes
//! - **Storage**: SQLite-based session storage and TOML-based configuration
//!
//! ## Key Components
//!
//! - [`TimerEngine`]: Core timer state machine
//! - [`TimerController`]: Tick loop, alarms and persistence around an engine
//! - [`Database`]: Session and statistics persistence
//! - [`Config`]: Application configuration management
//! - [`AlarmGateway`]: Trait for background wake-ups

pub mod alarm;
pub mod clock;
pub mod controller;
pub mod error;
pub mod events;
pub mod ledger;
pub mod settings;
pub mod storage;
pub mod timer;

pub use alarm::{AlarmGateway, AlarmHandle, AlarmPayload, NoopAlarmGateway, TokioAlarmGateway};
pub use clock::{Clock, ManualClock, SystemClock};
pub use controller::{ControllerOptions, TimerController};
pub use error::{
    ConfigError, CoreError, DatabaseError, PersistenceError, SchedulingError,
};
pub use events::Event;
pub use ledger::{RetryPolicy, SessionLedger, SessionRecord};
pub use settings::{SettingsProvider, StaticSettings};
pub use storage::{Config, Database, SessionStore, Stats};
pub use timer::{
    Durations, Effect, Reconciliation, SessionType, TaskRef, TimerEngine, TimerPhase, TimerRun,
    TimerStatus,
};
