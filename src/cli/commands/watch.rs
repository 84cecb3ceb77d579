//! Watch command implementation.
//!
//! Runs the full engine against the HTTP remote, with connectivity taken
//! from periodic health checks, and prints every published state until
//! Ctrl-C.

use super::{load_config, open_database, require_endpoint, resolve_origin, runtime};
use crate::error::{Error, Result};
use crate::storage::DurableStorage;
use crate::sync::{HttpProbe, HttpRemote, NetworkSource, SyncEngine, SyncState};
use chrono::Local;
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Execute the watch command.
///
/// # Errors
///
/// Returns an error if no remote is configured or the engine cannot start.
pub fn execute(
    db_path: Option<&PathBuf>,
    config_path: Option<&PathBuf>,
    user: Option<&str>,
    device: Option<&str>,
    json: bool,
) -> Result<()> {
    let (mut config, config_path) = load_config(config_path)?;
    let endpoint = require_endpoint(&config)?;
    let (user, device) = resolve_origin(user, device, &mut config, &config_path)?;
    let health_url = config
        .remote
        .health_url()
        .ok_or(Error::NoRemote)?;

    let db = open_database(db_path)?;
    let storage: Arc<dyn DurableStorage> = db;

    let rt = runtime()?;
    rt.block_on(async {
        let network: Arc<dyn NetworkSource> = Arc::new(
            HttpProbe::connect(
                health_url,
                Duration::from_millis(config.remote.probe_interval_ms),
            )
            .await,
        );
        let remote = HttpRemote::new(
            endpoint.clone(),
            config.remote.api_token.clone(),
            config.sync.call_timeout(),
        );

        let engine = SyncEngine::builder(storage, network)
            .config(config.sync.clone())
            .origin(user, device)
            .start(remote)?;

        print_state(&engine.current_state(), json);
        let subscription = engine.subscribe(move |state: &SyncState| print_state(state, json));
        info!(%endpoint, "Watching; press Ctrl-C to stop");

        tokio::signal::ctrl_c().await?;

        subscription.unsubscribe();
        let partial = engine.shutdown().await;
        if !json {
            match partial {
                Some(result) => println!(
                    "Stopped mid-cycle ({} synced, {} still queued)",
                    result.synced,
                    engine.pending_changes().len()
                ),
                None => println!("Stopped ({} pending)", engine.pending_changes().len()),
            }
        }
        Ok::<(), Error>(())
    })
}

fn print_state(state: &SyncState, json: bool) {
    if json {
        if let Ok(line) = serde_json::to_string(state) {
            println!("{line}");
        }
        return;
    }

    let time = Local::now().format("%H:%M:%S").to_string();
    let connectivity = if state.connectivity.is_online() {
        state.connectivity.to_string().green()
    } else {
        state.connectivity.to_string().red()
    };
    let backlog = if state.has_pending() {
        format!("{} pending", state.queue_depth)
    } else {
        "up to date".to_string()
    };
    let mut line = format!(
        "{} {} {} {}",
        time.dimmed(),
        connectivity,
        state.phase.to_string().cyan(),
        backlog
    );
    if let Some(next) = state.next_attempt_at {
        line.push_str(&format!(
            ", retry at {}",
            next.with_timezone(&Local).format("%H:%M:%S")
        ));
    }
    if let Some(error) = state.recent_errors.last() {
        line.push_str(&format!(" {}", format!("last error: {}", error.message).yellow()));
    }
    println!("{line}");
}
