//! Queue command implementations.

use super::{open_database, open_queue};
use crate::cli::QueueCommands;
use crate::error::{Error, Result};
use crate::model::PendingChange;
use crate::storage::{DurableStorage, PersistenceError};
use crate::sync::QUEUE_KEY;
use crate::validate::find_similar_ids;
use colored::Colorize;
use std::path::PathBuf;
use tracing::warn;

/// Execute queue commands.
///
/// # Errors
///
/// Returns an error if the queue cannot be read or written.
pub fn execute(command: &QueueCommands, db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    match command {
        QueueCommands::List { limit } => list(*limit, db_path, json),
        QueueCommands::Drop { id } => drop_change(id, db_path, json),
        QueueCommands::Clear { force } => clear(*force, db_path, json),
    }
}

fn list(limit: usize, db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let db = open_database(db_path)?;
    let queue = open_queue(&db)?;
    let total = queue.len();
    let shown: Vec<PendingChange> = queue.dequeue_batch(limit);

    if json {
        let output = serde_json::json!({
            "total": total,
            "changes": shown,
        });
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }

    if total == 0 {
        println!("No pending changes.");
        return Ok(());
    }

    println!("{}", format!("Pending changes ({total})").cyan().bold());
    println!();
    println!(
        "{:<16} {:<8} {:<7} {:<13} {:<20} {:>7}  {}",
        "ID", "PRIORITY", "OP", "ENTITY", "ENTITY ID", "RETRIES", "ENQUEUED"
    );
    for change in &shown {
        println!(
            "{:<16} {:<8} {:<7} {:<13} {:<20} {:>7}  {}",
            change.id,
            change.priority.as_str(),
            change.change_kind().as_str(),
            change.entity_kind().as_str(),
            truncate(&change.entity_id, 20),
            change.retry_count,
            change.enqueued_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed()
        );
    }
    if shown.len() < total {
        println!();
        println!("{}", format!("... {} more", total - shown.len()).dimmed());
    }
    Ok(())
}

fn drop_change(id: &str, db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let db = open_database(db_path)?;
    let queue = open_queue(&db)?;

    if !queue.remove(id)? {
        let ids: Vec<String> = queue.snapshot().into_iter().map(|c| c.id).collect();
        let similar = find_similar_ids(id, &ids, 3);
        return Err(if similar.is_empty() {
            Error::ChangeNotFound { id: id.to_string() }
        } else {
            Error::ChangeNotFoundSimilar {
                id: id.to_string(),
                similar,
            }
        });
    }

    if json {
        let output = serde_json::json!({ "dropped": id, "queueDepth": queue.len() });
        println!("{output}");
    } else {
        println!("Dropped {id} ({} pending)", queue.len());
    }
    Ok(())
}

fn clear(force: bool, db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let db = open_database(db_path)?;

    let cleared = match open_queue(&db) {
        Ok(queue) => {
            if !force && !queue.is_empty() {
                return Err(Error::InvalidArgument(format!(
                    "refusing to drop {} pending changes without --force",
                    queue.len()
                )));
            }
            queue.clear()?
        }
        Err(Error::Persistence(err)) if force && is_unreadable(&err) => {
            warn!(error = %err, "Discarding unreadable queue");
            db.delete(QUEUE_KEY)?;
            0
        }
        Err(err) => return Err(err),
    };

    if json {
        let output = serde_json::json!({ "cleared": cleared });
        println!("{output}");
    } else if cleared == 0 {
        println!("Queue is empty.");
    } else {
        println!("Dropped {cleared} pending changes.");
    }
    Ok(())
}

const fn is_unreadable(err: &PersistenceError) -> bool {
    matches!(
        err,
        PersistenceError::UnsupportedSchema { .. }
            | PersistenceError::ChecksumMismatch { .. }
            | PersistenceError::Migration { .. }
            | PersistenceError::Encode(_)
    )
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let kept: String = s.chars().take(max.saturating_sub(1)).collect();
    format!("{kept}…")
}
