use std::sync::Arc;
use std::time::Duration;

use cadence_core::storage::{Database, SessionStore};
use cadence_core::{
    Config, ControllerOptions, Event, NoopAlarmGateway, SettingsProvider, TaskRef,
    TimerController, TimerEngine, TimerStatus, TokioAlarmGateway,
};
use clap::Subcommand;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

const ENGINE_KEY: &str = "timer_engine";
const STATUS_EVERY: Duration = Duration::from_secs(60);

#[derive(Subcommand)]
pub enum TimerAction {
    /// Start the current phase (resumes when paused)
    Start {
        /// Task ID to attribute sessions to
        #[arg(long)]
        task_id: Option<String>,
        /// Task title
        #[arg(long)]
        title: Option<String>,
    },
    /// Pause the running phase
    Pause,
    /// Resume a paused phase
    Resume,
    /// Abandon the current phase and move to the next focus session
    Skip,
    /// Return to the first focus session, recording any partial run
    Reset,
    /// Print current timer state as JSON
    Status,
    /// Run the timer in the foreground until the current phase ends
    Run,
}

fn load_engine(db: &Database, config: &Config) -> TimerEngine {
    match db.kv_get(ENGINE_KEY) {
        Ok(Some(json)) => match serde_json::from_str::<TimerEngine>(&json) {
            Ok(engine) => return engine,
            Err(e) => warn!(error = %e, "saved timer state unreadable, starting fresh"),
        },
        Ok(None) => {}
        Err(e) => warn!(error = %e, "could not read saved timer state"),
    }
    TimerEngine::new(config.durations())
}

fn save_engine(db: &Database, engine: &TimerEngine) -> Result<(), Box<dyn std::error::Error>> {
    let json = serde_json::to_string(engine)?;
    db.kv_set(ENGINE_KEY, &json)?;
    Ok(())
}

/// Bring a restored timer up to date with time spent while no process ran.
///
/// Returns the events produced on the way, oldest first.
fn catch_up(controller: &TimerController) -> Vec<Event> {
    let mut events: Vec<Event> = controller.on_resume().into_iter().collect();
    // The completion delay is long over by the time anyone asks.
    if controller.status() == TimerStatus::Completed {
        events.extend(controller.advance());
    }
    events
}

pub fn run(action: TimerAction) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let db = Arc::new(Database::open()?);
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(execute(action, config, db))
}

async fn execute(
    action: TimerAction,
    config: Config,
    db: Arc<Database>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut engine = load_engine(&db, &config);
    engine.apply_settings(&config);
    let options = ControllerOptions::from_config(&config);
    let store: Arc<dyn SessionStore> = db.clone();

    if let TimerAction::Run = action {
        return run_foreground(engine, store, &db, options).await;
    }

    let controller = TimerController::new(engine, store, Arc::new(NoopAlarmGateway::default()), options);
    catch_up(&controller);

    let event = match action {
        TimerAction::Start { task_id, title } => {
            if let Some(id) = task_id {
                controller.attach_task(Some(TaskRef::new(id, title)));
            }
            controller.start()
        }
        TimerAction::Pause => controller.pause(),
        TimerAction::Resume => controller.resume(),
        TimerAction::Skip => controller.skip(),
        TimerAction::Reset => controller.reset(),
        TimerAction::Status | TimerAction::Run => None,
    };
    let out = event.unwrap_or_else(|| controller.snapshot());
    println!("{}", serde_json::to_string_pretty(&out)?);

    controller.shutdown().await;
    save_engine(&db, &controller.engine_state())?;
    Ok(())
}

/// Drive ticks in-process and print every event as a JSON line.
///
/// Returns once the finished phase has been followed by the next one.
async fn run_foreground(
    engine: TimerEngine,
    store: Arc<dyn SessionStore>,
    db: &Database,
    options: ControllerOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let (gateway, fired) = TokioAlarmGateway::new();
    let controller = TimerController::new(engine, store, Arc::new(gateway), options);
    let _alarms = controller.listen_for_alarms(fired);

    // Catch-up events belong to phases that ended before this run; print them
    // but keep them out of the stream that decides when to stop.
    let mut earlier = catch_up(&controller);
    if controller.status() != TimerStatus::Running {
        earlier.extend(controller.start());
    }
    for event in &earlier {
        println!("{}", serde_json::to_string(event)?);
    }
    save_engine(db, &controller.engine_state())?;
    println!("{}", serde_json::to_string(&controller.snapshot())?);
    let mut events = controller.subscribe();

    let mut status = tokio::time::interval(STATUS_EVERY);
    status.tick().await;
    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(event) => {
                    println!("{}", serde_json::to_string(&event)?);
                    save_engine(db, &controller.engine_state())?;
                    if matches!(event, Event::PhaseEntered { .. }) {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event stream lagged"),
                Err(RecvError::Closed) => break,
            },
            _ = status.tick() => {
                println!("{}", serde_json::to_string(&controller.snapshot())?);
            }
        }
    }

    controller.shutdown().await;
    save_engine(db, &controller.engine_state())?;
    Ok(())
}
