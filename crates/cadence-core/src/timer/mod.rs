mod engine;
mod phase;
pub mod policy;
pub mod reconcile;
mod run;

pub use engine::{Effect, TimerEngine};
pub use phase::{SessionType, TimerPhase, TimerStatus};
pub use policy::{break_type, next_index, Durations};
pub use reconcile::{reconcile, Reconciliation};
pub use run::{TaskRef, TimerRun};
