//! Status command implementation.

use super::{load_config, open_database, open_queue};
use crate::error::Result;
use crate::model::{PendingChange, Priority};
use crate::storage::SyncRun;
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;

/// Output for status command.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusOutput {
    queue_depth: usize,
    priorities: PriorityBreakdown,
    oldest: Option<PendingChange>,
    last_run: Option<SyncRun>,
    endpoint: Option<String>,
    device_id: Option<String>,
}

#[derive(Serialize, Default)]
struct PriorityBreakdown {
    high: usize,
    normal: usize,
    low: usize,
}

/// Execute status command.
///
/// # Errors
///
/// Returns an error if the database or config cannot be read.
pub fn execute(db_path: Option<&PathBuf>, config_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let (config, _) = load_config(config_path)?;
    let db = open_database(db_path)?;
    let queue = open_queue(&db)?;

    let changes = queue.snapshot();
    let mut priorities = PriorityBreakdown::default();
    for change in &changes {
        match change.priority {
            Priority::High => priorities.high += 1,
            Priority::Normal => priorities.normal += 1,
            Priority::Low => priorities.low += 1,
        }
    }
    let oldest = changes
        .iter()
        .min_by(|a, b| a.entity_order(b))
        .cloned();
    let last_run = db.recent_runs(1)?.into_iter().next();

    let output = StatusOutput {
        queue_depth: changes.len(),
        priorities,
        oldest,
        last_run,
        endpoint: config.remote.endpoint.clone(),
        device_id: config.device_id.clone(),
    };

    if json {
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }

    println!("{}", "pantry-sync status".cyan().bold());
    println!();
    match &output.endpoint {
        Some(endpoint) => println!("Remote:  {endpoint}"),
        None => println!("Remote:  {}", "not configured".yellow()),
    }
    if let Some(device) = &output.device_id {
        println!("Device:  {device}");
    }
    println!();

    println!("Pending changes: {}", output.queue_depth);
    if output.queue_depth > 0 {
        println!("  High:   {}", output.priorities.high);
        println!("  Normal: {}", output.priorities.normal);
        println!("  Low:    {}", output.priorities.low);
    }
    if let Some(oldest) = &output.oldest {
        println!(
            "  Oldest: {} {} {} {}",
            oldest.id,
            oldest.change_kind(),
            oldest.entity_kind(),
            format!("queued {}", oldest.enqueued_at.format("%Y-%m-%d %H:%M:%S")).dimmed()
        );
    }
    println!();

    match &output.last_run {
        Some(run) => {
            println!(
                "Last sync: {} ({})",
                run.finished_at.format("%Y-%m-%d %H:%M:%S"),
                run.outcome
            );
            println!(
                "  {} synced, {} failed, {} deferred",
                run.synced, run.failed, run.deferred
            );
        }
        None => {
            println!("No sync recorded yet.");
            if output.endpoint.is_none() {
                println!();
                println!("Configure a remote with: psync config set remote.endpoint <url>");
            }
        }
    }
    Ok(())
}
