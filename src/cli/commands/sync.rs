//! Sync command implementation.
//!
//! Runs exactly one cycle over the queue against the configured HTTP remote
//! and records it in the run history. Nothing is scheduled afterwards; use
//! `psync watch` for continuous syncing.

use super::{load_config, open_database, open_queue, require_endpoint, runtime};
use crate::error::{Error, Result};
use crate::storage::SyncRun;
use crate::sync::{
    probe, BatchProcessor, ConflictResolver, Connectivity, HttpRemote, SyncError, SyncOutcome,
    SyncResult,
};
use chrono::Utc;
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Execute the sync command.
///
/// # Errors
///
/// Returns an error if no remote is configured, the remote is unreachable,
/// or the cycle aborts on a persistence failure.
pub fn execute(db_path: Option<&PathBuf>, config_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let (config, _) = load_config(config_path)?;
    let endpoint = require_endpoint(&config)?;
    config.sync.validate().map_err(SyncError::InvalidConfig)?;

    let db = open_database(db_path)?;
    let queue = Arc::new(open_queue(&db)?);
    let started_at = Utc::now();

    if queue.is_empty() {
        let result = SyncResult::default();
        let run = SyncRun::new(started_at, Utc::now(), "completed", Some(&result));
        db.record_run(&run)?;
        return print_result(&run.id, &SyncOutcome::Completed(result), json);
    }

    let health_url = (!config.remote.health_path.trim().is_empty())
        .then(|| config.remote.health_url())
        .flatten();

    let rt = runtime()?;
    let cycle = rt.block_on(async {
        if let Some(url) = &health_url {
            if probe(&reqwest::Client::new(), url).await == Connectivity::Offline {
                return Err(Error::RemoteUnreachable {
                    endpoint: endpoint.clone(),
                });
            }
        }

        let remote = HttpRemote::new(
            endpoint.clone(),
            config.remote.api_token.clone(),
            config.sync.call_timeout(),
        );
        let processor = BatchProcessor::new(
            Arc::clone(&queue),
            Arc::new(remote),
            Arc::new(ConflictResolver::new()),
        );
        info!(%endpoint, pending = queue.len(), "Starting sync");
        Ok(processor.run_cycle(&config.sync).await)
    });

    let finished_at = Utc::now();
    match cycle? {
        Ok(result) => {
            let outcome = SyncOutcome::Completed(result);
            let run = SyncRun::new(started_at, finished_at, outcome.label(), outcome.result());
            db.record_run(&run)?;
            print_result(&run.id, &outcome, json)
        }
        Err(err) => {
            warn!(error = %err, "Sync cycle aborted");
            let run = SyncRun::new(started_at, finished_at, "aborted", None);
            if let Err(record_err) = db.record_run(&run) {
                warn!(error = %record_err, "Could not record aborted run");
            }
            Err(SyncError::CycleAborted(err.to_string()).into())
        }
    }
}

fn print_result(run_id: &str, outcome: &SyncOutcome, json: bool) -> Result<()> {
    let result = outcome.result().cloned().unwrap_or_default();

    if json {
        let output = serde_json::json!({
            "runId": run_id,
            "outcome": outcome.label(),
            "result": result,
        });
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }

    if result.synced == 0 && result.failed == 0 && result.deferred == 0 {
        println!("Nothing to sync.");
        return Ok(());
    }

    if result.is_clean() {
        println!("{}", "Sync complete".green().bold());
    } else {
        println!("{}", "Sync finished with problems".yellow().bold());
    }
    println!("  Synced:    {}", result.synced);
    if result.conflicts_resolved > 0 {
        println!("  Conflicts: {} resolved", result.conflicts_resolved);
    }
    if result.deferred > 0 {
        println!("  Deferred:  {} (will retry)", result.deferred.to_string().yellow());
    }
    if result.failed > 0 {
        println!("  Failed:    {}", result.failed.to_string().red());
        for error in &result.errors {
            println!(
                "    {} {} {} {}",
                "•".red(),
                error.change_id,
                format!("[{} {}]", error.entity, error.entity_id).dimmed(),
                error.reason
            );
        }
    }
    if result.aborted {
        println!("  {}", "Stopped before the queue was exhausted".yellow());
    }
    println!("  {}", format!("{} ms", result.duration_ms).dimmed());
    Ok(())
}
