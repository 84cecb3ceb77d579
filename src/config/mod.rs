//! Configuration management.
//!
//! This module resolves pantry-sync directories and the database path, and
//! loads the application config file.
//!
//! # Layout
//!
//! Everything lives under `~/.pantry-sync/`:
//! - **Database**: `data/pantry-sync.db` (queue + sync history)
//! - **Test database**: `test/pantry-sync.db` when `PANTRY_SYNC_TEST=1`
//! - **Config**: `config.json` ([`AppConfig`])

mod settings;

pub use settings::{SyncConfig, SyncConfigPatch};

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Get the global pantry-sync directory location (`~/.pantry-sync/`).
#[must_use]
pub fn global_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().join(".pantry-sync"))
}

/// Check if test mode is enabled.
///
/// Test mode is enabled by setting `PANTRY_SYNC_TEST=1` (or any non-empty
/// value other than `0`/`false`). This redirects the database to an
/// isolated location.
#[must_use]
pub fn is_test_mode() -> bool {
    std::env::var("PANTRY_SYNC_TEST").is_ok_and(|v| is_truthy(&v))
}

fn is_truthy(value: &str) -> bool {
    !value.is_empty() && value != "0" && !value.eq_ignore_ascii_case("false")
}

/// Get the test database path (`~/.pantry-sync/test/pantry-sync.db`).
#[must_use]
pub fn test_db_path() -> Option<PathBuf> {
    global_dir().map(|dir| dir.join("test").join("pantry-sync.db"))
}

fn env_path(var: &str) -> Option<PathBuf> {
    std::env::var(var)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
}

/// Resolve the database path.
///
/// Priority:
/// 1. If `explicit_path` is provided, use it directly
/// 2. `PANTRY_SYNC_DB` environment variable
/// 3. `PANTRY_SYNC_TEST` → test database
/// 4. Global location: `~/.pantry-sync/data/pantry-sync.db`
#[must_use]
pub fn resolve_db_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return Some(path.to_path_buf());
    }
    if let Some(path) = env_path("PANTRY_SYNC_DB") {
        return Some(path);
    }
    if is_test_mode() {
        return test_db_path();
    }
    global_dir().map(|dir| dir.join("data").join("pantry-sync.db"))
}

/// Resolve the config file path.
///
/// Priority: explicit path, `PANTRY_SYNC_CONFIG`, `~/.pantry-sync/config.json`.
#[must_use]
pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return Some(path.to_path_buf());
    }
    env_path("PANTRY_SYNC_CONFIG").or_else(|| global_dir().map(|dir| dir.join("config.json")))
}

/// Get the default origin user.
///
/// Priority:
/// 1. Explicit `--user`
/// 2. `PANTRY_SYNC_USER` environment variable
/// 3. System username
/// 4. "unknown"
#[must_use]
pub fn default_user(explicit: Option<&str>) -> String {
    if let Some(user) = explicit.filter(|u| !u.is_empty()) {
        return user.to_string();
    }
    for var in ["PANTRY_SYNC_USER", "USER"] {
        if let Ok(user) = std::env::var(var) {
            if !user.is_empty() {
                return user;
            }
        }
    }
    "unknown".to_string()
}

/// Write content to a file atomically.
///
/// Writes a sibling `.tmp` file, syncs it to disk, then renames it over
/// `path`. If any step fails, the original file (if any) remains untouched.
///
/// # Errors
///
/// Returns an error if any file operation fails.
pub fn atomic_write(path: &Path, content: &str) -> std::io::Result<()> {
    let temp_path = path.with_extension("json.tmp");

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    {
        let file = File::create(&temp_path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(content.as_bytes())?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }

    fs::rename(&temp_path, path)
}

// ── Application config file ──────────────────────────────────

/// HTTP remote settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RemoteSettings {
    /// Base URL; `None` disables syncing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
    /// Path probed by `watch` to detect connectivity.
    pub health_path: String,
    pub probe_interval_ms: u64,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_token: None,
            health_path: "/health".to_string(),
            probe_interval_ms: 10_000,
        }
    }
}

impl RemoteSettings {
    /// Full URL of the health check, if an endpoint is configured.
    #[must_use]
    pub fn health_url(&self) -> Option<String> {
        let base = self.endpoint.as_deref()?.trim_end_matches('/');
        let path = self.health_path.trim_start_matches('/');
        Some(format!("{base}/{path}"))
    }
}

/// Contents of `config.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub sync: SyncConfig,
    pub remote: RemoteSettings,
    /// Generated on first use and kept stable afterwards.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

impl AppConfig {
    /// Keys accepted by [`AppConfig::set`] besides the sync settings.
    pub const REMOTE_KEYS: &'static [&'static str] = &[
        "remote.endpoint",
        "remote.apiToken",
        "remote.healthPath",
        "remote.probeIntervalMs",
        "deviceId",
    ];

    /// Load the config file; a missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "No config file; using defaults");
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    /// Write the config file atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        atomic_write(path, &content)?;
        debug!(path = %path.display(), "Config saved");
        Ok(())
    }

    /// Apply `PANTRY_SYNC_ENDPOINT` and `PANTRY_SYNC_TOKEN` over the file.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(endpoint) = std::env::var("PANTRY_SYNC_ENDPOINT") {
            if !endpoint.trim().is_empty() {
                self.remote.endpoint = Some(endpoint);
            }
        }
        if let Ok(token) = std::env::var("PANTRY_SYNC_TOKEN") {
            if !token.is_empty() {
                self.remote.api_token = Some(token);
            }
        }
        self
    }

    /// Return the device id, generating and persisting one if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if a new id cannot be saved.
    pub fn ensure_device_id(&mut self, path: &Path) -> Result<String> {
        if let Some(id) = &self.device_id {
            return Ok(id.clone());
        }
        let id = format!("dev_{}", &uuid::Uuid::new_v4().simple().to_string()[..12]);
        self.device_id = Some(id.clone());
        self.save(path)?;
        Ok(id)
    }

    /// Set one setting by key.
    ///
    /// Accepts the sync keys of [`SyncConfigPatch::set`] plus
    /// [`AppConfig::REMOTE_KEYS`]. The result is validated before it is kept.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for unknown keys, bad values, or a sync
    /// config that would no longer validate.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let optional = |v: &str| (!v.trim().is_empty()).then(|| v.trim().to_string());
        match key {
            "remote.endpoint" => self.remote.endpoint = optional(value),
            "remote.apiToken" => self.remote.api_token = optional(value),
            "remote.healthPath" => self.remote.health_path = value.trim().to_string(),
            "remote.probeIntervalMs" => {
                self.remote.probe_interval_ms = value
                    .trim()
                    .parse()
                    .map_err(|_| Error::Config(format!("invalid value '{value}' for {key}")))?;
            }
            "deviceId" => self.device_id = optional(value),
            _ => {
                let mut patch = SyncConfigPatch::default();
                patch.set(key, value).map_err(Error::Config)?;
                self.sync = patch.applied_to(&self.sync).map_err(Error::Config)?;
            }
        }
        Ok(())
    }

    /// Reset everything except the device id.
    pub fn reset(&mut self) {
        *self = Self {
            device_id: self.device_id.take(),
            ..Self::default()
        };
    }

    /// JSON view with the API token masked.
    #[must_use]
    pub fn redacted(&self) -> serde_json::Value {
        let mut copy = self.clone();
        if copy.remote.api_token.is_some() {
            copy.remote.api_token = Some("********".to_string());
        }
        serde_json::to_value(copy).unwrap_or_default()
    }
}
