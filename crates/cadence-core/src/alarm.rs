//! Background alarm gateway.
//!
//! The gateway is whatever the platform offers for "wake me at time T even
//! if the tick loop is not running": an OS notification scheduler on a
//! desktop, a sleeping tokio task in-process. It never touches timer state.
//! When an alarm fires the owner of the engine runs a reconciliation pass.
//!
//! All gateway traffic from the controller goes through a single worker task
//! so that arm and cancel requests reach the gateway in transition order and
//! the worker alone owns the live handle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::SchedulingError;
use crate::timer::TimerPhase;

/// Data delivered back when an alarm fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmPayload {
    /// Generation of the run that armed the alarm.
    pub run_id: u64,
    pub phase: TimerPhase,
    pub session_index: u32,
}

/// Opaque handle for a scheduled alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlarmHandle(pub u64);

#[async_trait]
pub trait AlarmGateway: Send + Sync {
    async fn schedule_at(
        &self,
        at: DateTime<Utc>,
        payload: AlarmPayload,
    ) -> Result<AlarmHandle, SchedulingError>;

    async fn cancel(&self, handle: AlarmHandle) -> Result<(), SchedulingError>;
}

/// In-process gateway backed by sleeping tokio tasks.
///
/// Fired payloads are sent on the channel returned from [`TokioAlarmGateway::new`].
pub struct TokioAlarmGateway {
    next_id: AtomicU64,
    alarms: Arc<Mutex<HashMap<u64, JoinHandle<()>>>>,
    fired: mpsc::UnboundedSender<AlarmPayload>,
}

impl TokioAlarmGateway {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AlarmPayload>) {
        let (fired, rx) = mpsc::unbounded_channel();
        let gateway = Self {
            next_id: AtomicU64::new(1),
            alarms: Arc::new(Mutex::new(HashMap::new())),
            fired,
        };
        (gateway, rx)
    }

    /// Number of alarms scheduled and not yet fired or cancelled.
    pub fn pending(&self) -> usize {
        self.alarms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|h| !h.is_finished())
            .count()
    }
}

#[async_trait]
impl AlarmGateway for TokioAlarmGateway {
    async fn schedule_at(
        &self,
        at: DateTime<Utc>,
        payload: AlarmPayload,
    ) -> Result<AlarmHandle, SchedulingError> {
        if self.fired.is_closed() {
            return Err(SchedulingError::Unavailable(
                "alarm receiver dropped".into(),
            ));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let delay = (at - Utc::now()).to_std().unwrap_or_default();
        let fired = self.fired.clone();
        let alarms = Arc::clone(&self.alarms);

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            alarms
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);
            let _ = fired.send(payload);
        });
        self.alarms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, handle);
        Ok(AlarmHandle(id))
    }

    async fn cancel(&self, handle: AlarmHandle) -> Result<(), SchedulingError> {
        let removed = self
            .alarms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle.0);
        match removed {
            Some(task) => task.abort(),
            None => debug!(handle = handle.0, "alarm already fired or cancelled"),
        }
        Ok(())
    }
}

/// Gateway for processes that exit before any alarm could fire.
#[derive(Debug, Default)]
pub struct NoopAlarmGateway {
    next_id: AtomicU64,
}

#[async_trait]
impl AlarmGateway for NoopAlarmGateway {
    async fn schedule_at(
        &self,
        at: DateTime<Utc>,
        payload: AlarmPayload,
    ) -> Result<AlarmHandle, SchedulingError> {
        debug!(%at, run_id = payload.run_id, "alarm not armed: no background scheduler");
        Ok(AlarmHandle(self.next_id.fetch_add(1, Ordering::Relaxed)))
    }

    async fn cancel(&self, _handle: AlarmHandle) -> Result<(), SchedulingError> {
        Ok(())
    }
}

#[derive(Debug)]
pub(crate) enum AlarmCommand {
    Arm {
        at: DateTime<Utc>,
        payload: AlarmPayload,
    },
    Cancel,
}

/// Spawn the task that serialises gateway calls.
///
/// The worker exits when every sender has been dropped. Failures are logged
/// and never reported back: a missing alarm only costs the user a
/// notification while the foreground loop keeps counting.
pub(crate) fn spawn_alarm_worker(
    gateway: Arc<dyn AlarmGateway>,
) -> (mpsc::UnboundedSender<AlarmCommand>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<AlarmCommand>();
    let handle = tokio::spawn(async move {
        let mut armed: Option<AlarmHandle> = None;
        while let Some(command) = rx.recv().await {
            match command {
                AlarmCommand::Arm { at, payload } => {
                    if let Some(stale) = armed.take() {
                        cancel_logged(gateway.as_ref(), stale).await;
                    }
                    let run_id = payload.run_id;
                    match gateway.schedule_at(at, payload).await {
                        Ok(handle) => {
                            debug!(handle = handle.0, run_id, %at, "alarm armed");
                            armed = Some(handle);
                        }
                        Err(err) => {
                            warn!(run_id, error = %err, "failed to arm alarm");
                        }
                    }
                }
                AlarmCommand::Cancel => {
                    if let Some(handle) = armed.take() {
                        cancel_logged(gateway.as_ref(), handle).await;
                    }
                }
            }
        }
    });
    (tx, handle)
}

async fn cancel_logged(gateway: &dyn AlarmGateway, handle: AlarmHandle) {
    match gateway.cancel(handle).await {
        Ok(()) => debug!(handle = handle.0, "alarm cancelled"),
        Err(err) => warn!(handle = handle.0, error = %err, "failed to cancel alarm"),
    }
}
