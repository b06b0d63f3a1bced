use clap::Subcommand;
use cadence_core::storage::Database;

#[derive(Subcommand)]
pub enum SessionsAction {
    /// List recent sessions, newest first
    List {
        /// Maximum number of sessions to print
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Sessions and total tracked time for one task
    Task {
        /// Task ID
        task_id: String,
    },
}

pub fn run(action: SessionsAction) -> Result<(), Box<dyn std::error::Error>> {
    let db = Database::open()?;

    match action {
        SessionsAction::List { limit } => {
            let sessions = db.recent_sessions(limit)?;
            println!("{}", serde_json::to_string_pretty(&sessions)?);
        }
        SessionsAction::Task { task_id } => {
            let sessions = db.sessions_for_task(&task_id)?;
            let total = db.total_duration_for_task(&task_id)?;
            let out = serde_json::json!({
                "task_id": task_id,
                "sessions": sessions,
                "total_duration_secs": total,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
    }
    Ok(())
}
