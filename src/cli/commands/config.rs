//! Config command implementations.

use super::load_config;
use crate::cli::ConfigCommands;
use crate::config::{AppConfig, SyncConfigPatch};
use crate::error::{Error, Result};
use crate::validate::levenshtein_distance;
use colored::Colorize;
use std::path::{Path, PathBuf};
use tracing::info;

/// Execute config commands.
///
/// # Errors
///
/// Returns an error if the config file cannot be read or written, or a
/// setting is rejected.
pub fn execute(command: &ConfigCommands, config_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let (config, path) = load_config(config_path)?;
    match command {
        ConfigCommands::Show => show(&config, &path, json),
        ConfigCommands::Set { key, value } => set(config, &path, key, value, json),
        ConfigCommands::Reset => reset(config, &path, json),
    }
}

fn show(config: &AppConfig, path: &Path, json: bool) -> Result<()> {
    if json {
        let output = serde_json::json!({
            "path": path.display().to_string(),
            "config": config.redacted(),
        });
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }

    println!("{}", path.display().to_string().dimmed());
    println!("{}", serde_json::to_string_pretty(&config.redacted())?);
    Ok(())
}

fn set(mut config: AppConfig, path: &Path, key: &str, value: &str, json: bool) -> Result<()> {
    config.set(key, value).map_err(|err| match suggest_key(key) {
        Some(similar) if !is_known_key(key) => {
            Error::Config(format!("unknown setting '{key}' (did you mean '{similar}'?)"))
        }
        _ => err,
    })?;
    config.save(path)?;
    info!(key, "Setting updated");

    if json {
        let output = serde_json::json!({ "key": key, "config": config.redacted() });
        println!("{}", serde_json::to_string(&output)?);
    } else {
        println!("Set {key}");
    }
    Ok(())
}

fn reset(mut config: AppConfig, path: &Path, json: bool) -> Result<()> {
    config.reset();
    config.save(path)?;

    if json {
        let output = serde_json::json!({ "reset": true, "config": config.redacted() });
        println!("{}", serde_json::to_string(&output)?);
    } else {
        println!("Configuration reset to defaults.");
    }
    Ok(())
}

fn all_keys() -> impl Iterator<Item = &'static str> {
    SyncConfigPatch::KEYS
        .iter()
        .chain(AppConfig::REMOTE_KEYS)
        .copied()
}

fn is_known_key(key: &str) -> bool {
    all_keys().any(|k| k == key) || key.starts_with("strategy.")
}

/// Closest known key within edit distance 3.
fn suggest_key(key: &str) -> Option<&'static str> {
    all_keys()
        .map(|k| (levenshtein_distance(key, k), k))
        .filter(|(dist, _)| *dist <= 3)
        .min_by_key(|(dist, _)| *dist)
        .map(|(_, k)| k)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suggest_key() {
        assert_eq!(suggest_key("maxRetry"), Some("maxRetries"));
        assert_eq!(suggest_key("remote.endpont"), Some("remote.endpoint"));
        assert_eq!(suggest_key("completely-different"), None);
    }
}
