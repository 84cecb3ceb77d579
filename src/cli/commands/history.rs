//! History command implementation.

use super::open_database;
use crate::error::Result;
use colored::Colorize;
use std::path::PathBuf;

/// Execute the history command.
///
/// # Errors
///
/// Returns an error if the run history cannot be read.
pub fn execute(limit: usize, db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let db = open_database(db_path)?;
    let runs = db.recent_runs(limit)?;

    if json {
        let output = serde_json::json!({ "count": runs.len(), "runs": runs });
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!("No sync runs recorded.");
        return Ok(());
    }

    println!(
        "{:<16} {:<19} {:<15} {:>6} {:>6} {:>8} {:>9}",
        "RUN", "FINISHED", "OUTCOME", "SYNCED", "FAILED", "DEFERRED", "DURATION"
    );
    for run in &runs {
        let duration = (run.finished_at - run.started_at).num_milliseconds();
        println!(
            "{:<16} {:<19} {:<15} {:>6} {:>6} {:>8} {:>7}ms",
            run.id,
            run.finished_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            run.outcome,
            run.synced,
            run.failed,
            run.deferred,
            duration
        );
        for error in &run.errors {
            println!(
                "  {} {} {}",
                "•".red(),
                error.change_id.dimmed(),
                error.reason
            );
        }
    }
    Ok(())
}
