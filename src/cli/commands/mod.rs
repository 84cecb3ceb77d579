//! Command implementations.

pub mod completions;
pub mod config;
pub mod enqueue;
pub mod history;
pub mod queue;
pub mod status;
pub mod sync;
pub mod version;
pub mod watch;

use crate::config::{default_user, resolve_config_path, resolve_db_path, AppConfig};
use crate::error::{Error, Result};
use crate::storage::{DurableStorage, SqliteStore};
use crate::sync::ChangeStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Open the SQLite database that backs the queue and the run history.
fn open_database(db_path: Option<&PathBuf>) -> Result<Arc<SqliteStore>> {
    let path = resolve_db_path(db_path.map(PathBuf::as_path)).ok_or_else(|| {
        Error::Config("Could not determine the home directory; pass --db".to_string())
    })?;
    Ok(Arc::new(SqliteStore::open(&path)?))
}

/// Load the change queue persisted in `db`.
fn open_queue(db: &Arc<SqliteStore>) -> Result<ChangeStore> {
    let storage: Arc<dyn DurableStorage> = Arc::clone(db) as Arc<dyn DurableStorage>;
    Ok(ChangeStore::open(storage)?)
}

/// Load `config.json` with environment overrides applied.
fn load_config(config_path: Option<&PathBuf>) -> Result<(AppConfig, PathBuf)> {
    let path = resolve_config_path(config_path.map(PathBuf::as_path)).ok_or_else(|| {
        Error::Config("Could not determine the home directory; pass --config".to_string())
    })?;
    let config = AppConfig::load(&path)?.with_env_overrides();
    Ok((config, path))
}

/// Resolve the origin stamped on new changes.
fn resolve_origin(
    user: Option<&str>,
    device: Option<&str>,
    config: &mut AppConfig,
    config_path: &Path,
) -> Result<(String, String)> {
    let user = default_user(user);
    let device = match device.filter(|d| !d.trim().is_empty()) {
        Some(device) => device.to_string(),
        None => config.ensure_device_id(config_path)?,
    };
    Ok((user, device))
}

/// Require a configured remote endpoint.
fn require_endpoint(config: &AppConfig) -> Result<String> {
    config
        .remote
        .endpoint
        .clone()
        .filter(|e| !e.trim().is_empty())
        .ok_or(Error::NoRemote)
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Runtime::new()?)
}
