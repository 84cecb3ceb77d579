//! Engine tuning knobs.
//!
//! [`SyncConfig`] is snapshotted at the start of every cycle and may be
//! replaced between cycles through [`SyncConfigPatch`].

use crate::model::EntityKind;
use crate::sync::ConflictStrategy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Sync engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    /// Run the periodic timer.
    pub auto_sync: bool,
    /// Try a cycle right after a successful enqueue while online.
    pub sync_on_enqueue: bool,
    pub sync_interval_ms: u64,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub batch_size: usize,
    /// Upper bound on a single remote call.
    pub call_timeout_ms: u64,
    /// How long a raw connectivity state must hold before it is emitted.
    pub settle_window_ms: u64,
    /// Concurrent remote calls within one batch.
    pub worker_concurrency: usize,
    pub recent_error_limit: usize,
    pub conflict_strategy: ConflictStrategy,
    /// Per-kind strategy, overriding `conflict_strategy`.
    pub strategy_overrides: BTreeMap<EntityKind, ConflictStrategy>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            auto_sync: true,
            sync_on_enqueue: true,
            sync_interval_ms: 30_000,
            max_retries: 3,
            base_delay_ms: 5_000,
            max_delay_ms: 300_000,
            batch_size: 10,
            call_timeout_ms: 15_000,
            settle_window_ms: 1_500,
            worker_concurrency: 4,
            recent_error_limit: 20,
            conflict_strategy: ConflictStrategy::LocalWins,
            strategy_overrides: BTreeMap::new(),
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub const fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    #[must_use]
    pub const fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    #[must_use]
    pub const fn settle_window(&self) -> Duration {
        Duration::from_millis(self.settle_window_ms)
    }

    /// Strategy for conflicts on `kind`.
    #[must_use]
    pub fn strategy_for(&self, kind: EntityKind) -> ConflictStrategy {
        self.strategy_overrides
            .get(&kind)
            .copied()
            .unwrap_or(self.conflict_strategy)
    }

    /// `min(base * 2^retries, max)`.
    #[must_use]
    pub fn backoff_delay(&self, retries: u32) -> Duration {
        let factor = 1u64.checked_shl(retries).unwrap_or(u64::MAX);
        let delay = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(delay)
    }

    /// Reject settings the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns a message naming the first invalid setting.
    pub fn validate(&self) -> Result<(), String> {
        if self.batch_size == 0 {
            return Err("batchSize must be at least 1".to_string());
        }
        if self.max_retries == 0 {
            return Err("maxRetries must be at least 1".to_string());
        }
        if self.worker_concurrency == 0 {
            return Err("workerConcurrency must be at least 1".to_string());
        }
        if self.sync_interval_ms == 0 {
            return Err("syncIntervalMs must be greater than 0".to_string());
        }
        if self.call_timeout_ms == 0 {
            return Err("callTimeoutMs must be greater than 0".to_string());
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(format!(
                "baseDelayMs ({}) must not exceed maxDelayMs ({})",
                self.base_delay_ms, self.max_delay_ms
            ));
        }
        Ok(())
    }
}

/// Partial update applied with [`SyncConfigPatch::apply`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfigPatch {
    pub auto_sync: Option<bool>,
    pub sync_on_enqueue: Option<bool>,
    pub sync_interval_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub batch_size: Option<usize>,
    pub call_timeout_ms: Option<u64>,
    pub settle_window_ms: Option<u64>,
    pub worker_concurrency: Option<usize>,
    pub recent_error_limit: Option<usize>,
    pub conflict_strategy: Option<ConflictStrategy>,
    pub strategy_overrides: Option<BTreeMap<EntityKind, ConflictStrategy>>,
}

fn parse_field<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, String> {
    value
        .trim()
        .parse()
        .map_err(|_| format!("invalid value '{value}' for {key}"))
}

impl SyncConfigPatch {
    /// Keys accepted by [`SyncConfigPatch::set`].
    pub const KEYS: &'static [&'static str] = &[
        "autoSync",
        "syncOnEnqueue",
        "syncIntervalMs",
        "maxRetries",
        "baseDelayMs",
        "maxDelayMs",
        "batchSize",
        "callTimeoutMs",
        "settleWindowMs",
        "workerConcurrency",
        "recentErrorLimit",
        "conflictStrategy",
    ];

    /// Set one field from its camelCase key and a string value.
    ///
    /// Per-kind strategies use `strategy.<kind>`, e.g. `strategy.recipe`.
    ///
    /// # Errors
    ///
    /// Returns a message for unknown keys or unparseable values.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), String> {
        match key {
            "autoSync" => self.auto_sync = Some(parse_field(key, value)?),
            "syncOnEnqueue" => self.sync_on_enqueue = Some(parse_field(key, value)?),
            "syncIntervalMs" => self.sync_interval_ms = Some(parse_field(key, value)?),
            "maxRetries" => self.max_retries = Some(parse_field(key, value)?),
            "baseDelayMs" => self.base_delay_ms = Some(parse_field(key, value)?),
            "maxDelayMs" => self.max_delay_ms = Some(parse_field(key, value)?),
            "batchSize" => self.batch_size = Some(parse_field(key, value)?),
            "callTimeoutMs" => self.call_timeout_ms = Some(parse_field(key, value)?),
            "settleWindowMs" => self.settle_window_ms = Some(parse_field(key, value)?),
            "workerConcurrency" => self.worker_concurrency = Some(parse_field(key, value)?),
            "recentErrorLimit" => self.recent_error_limit = Some(parse_field(key, value)?),
            "conflictStrategy" => self.conflict_strategy = Some(value.trim().parse()?),
            other => {
                let Some(kind) = other.strip_prefix("strategy.") else {
                    return Err(format!(
                        "unknown config key '{other}' (valid: {}, strategy.<kind>)",
                        Self::KEYS.join(", ")
                    ));
                };
                let kind: EntityKind = kind.parse()?;
                let strategy: ConflictStrategy = value.trim().parse()?;
                self.strategy_overrides
                    .get_or_insert_with(BTreeMap::new)
                    .insert(kind, strategy);
            }
        }
        Ok(())
    }

    /// Overwrite every field present in the patch.
    pub fn apply(&self, config: &mut SyncConfig) {
        if let Some(v) = self.auto_sync {
            config.auto_sync = v;
        }
        if let Some(v) = self.sync_on_enqueue {
            config.sync_on_enqueue = v;
        }
        if let Some(v) = self.sync_interval_ms {
            config.sync_interval_ms = v;
        }
        if let Some(v) = self.max_retries {
            config.max_retries = v;
        }
        if let Some(v) = self.base_delay_ms {
            config.base_delay_ms = v;
        }
        if let Some(v) = self.max_delay_ms {
            config.max_delay_ms = v;
        }
        if let Some(v) = self.batch_size {
            config.batch_size = v;
        }
        if let Some(v) = self.call_timeout_ms {
            config.call_timeout_ms = v;
        }
        if let Some(v) = self.settle_window_ms {
            config.settle_window_ms = v;
        }
        if let Some(v) = self.worker_concurrency {
            config.worker_concurrency = v;
        }
        if let Some(v) = self.recent_error_limit {
            config.recent_error_limit = v;
        }
        if let Some(v) = self.conflict_strategy {
            config.conflict_strategy = v;
        }
        if let Some(overrides) = &self.strategy_overrides {
            config
                .strategy_overrides
                .extend(overrides.iter().map(|(k, v)| (*k, *v)));
        }
    }

    /// Apply onto a copy of `config` and validate the result.
    ///
    /// # Errors
    ///
    /// Returns the validation message if the patched config is unusable.
    pub fn applied_to(&self, config: &SyncConfig) -> Result<SyncConfig, String> {
        let mut next = config.clone();
        self.apply(&mut next);
        next.validate()?;
        Ok(next)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
