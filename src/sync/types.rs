//! Type definitions for the sync engine.
//!
//! This module defines the published [`SyncState`] snapshot, per-cycle
//! [`SyncResult`], per-change failure reasons and the engine error type.

use crate::model::EntityKind;
use crate::storage::PersistenceError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Observed network reachability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    Online,
    Offline,
}

impl Connectivity {
    #[must_use]
    pub const fn is_online(self) -> bool {
        matches!(self, Self::Online)
    }
}

impl fmt::Display for Connectivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Online => "online",
            Self::Offline => "offline",
        })
    }
}

/// Scheduler phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Syncing,
    Backoff,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Syncing => "syncing",
            Self::Backoff => "backoff",
        })
    }
}

/// Why a change left the queue without being applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum FailureReason {
    /// The remote rejected the change as invalid.
    Validation { message: String },
    /// Retryable failures reached the configured ceiling.
    #[serde(rename_all = "camelCase")]
    MaxRetriesExceeded { attempts: u32, last_error: String },
    /// `Manual` conflict strategy with no resolver registered for the kind.
    MissingResolver { entity: EntityKind },
    /// The manual resolver returned an error.
    ResolverFailed { message: String },
    /// Local and remote records were of different kinds.
    KindMismatch {
        local: EntityKind,
        remote: EntityKind,
    },
    /// The conflict could not be settled (delete conflicts, repeated conflicts).
    ConflictUnresolved { message: String },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation { message } => write!(f, "validation failed: {message}"),
            Self::MaxRetriesExceeded {
                attempts,
                last_error,
            } => write!(f, "gave up after {attempts} attempts: {last_error}"),
            Self::MissingResolver { entity } => {
                write!(f, "no manual conflict resolver registered for {entity}")
            }
            Self::ResolverFailed { message } => write!(f, "conflict resolver failed: {message}"),
            Self::KindMismatch { local, remote } => {
                write!(f, "conflict between {local} and {remote} records")
            }
            Self::ConflictUnresolved { message } => write!(f, "conflict unresolved: {message}"),
        }
    }
}

/// Terminal outcome for one change in a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeError {
    pub change_id: String,
    pub entity: EntityKind,
    pub entity_id: String,
    pub reason: FailureReason,
}

/// Bounded error history entry carried in [`SyncState`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentError {
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_id: Option<String>,
    pub message: String,
}

/// Snapshot published to listeners after every meaningful transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub connectivity: Connectivity,
    pub phase: Phase,
    pub queue_depth: usize,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub recent_errors: Vec<RecentError>,
    /// When the pending backoff will fire, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_attempt_at: Option<DateTime<Utc>>,
}

impl SyncState {
    #[must_use]
    pub const fn new(connectivity: Connectivity, queue_depth: usize) -> Self {
        Self {
            connectivity,
            phase: Phase::Idle,
            queue_depth,
            last_sync_at: None,
            recent_errors: Vec::new(),
            next_attempt_at: None,
        }
    }

    /// Whether local changes are still waiting to reach the remote.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.queue_depth > 0
    }

    /// Append an error, keeping at most `limit` entries (newest last).
    pub fn push_error(&mut self, error: RecentError, limit: usize) {
        self.recent_errors.push(error);
        if self.recent_errors.len() > limit {
            let excess = self.recent_errors.len() - limit;
            self.recent_errors.drain(..excess);
        }
    }
}

/// Outcome of one sync cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    /// Changes applied remotely and removed.
    pub synced: usize,
    /// Changes removed with a terminal error.
    pub failed: usize,
    /// Changes left queued after a retryable failure.
    pub deferred: usize,
    /// Synced changes that went through the conflict resolver.
    pub conflicts_resolved: usize,
    pub errors: Vec<ChangeError>,
    pub duration_ms: u64,
    /// A stop request ended the cycle before the queue was exhausted.
    pub aborted: bool,
}

impl SyncResult {
    #[must_use]
    pub const fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.failed == 0 && self.deferred == 0
    }
}

/// What `force_sync` did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncOutcome {
    Completed(SyncResult),
    AlreadySyncing,
    Offline,
}

impl SyncOutcome {
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Completed(result) if result.aborted => "aborted",
            Self::Completed(_) => "completed",
            Self::AlreadySyncing => "already_syncing",
            Self::Offline => "offline",
        }
    }

    #[must_use]
    pub const fn result(&self) -> Option<&SyncResult> {
        match self {
            Self::Completed(result) => Some(result),
            Self::AlreadySyncing | Self::Offline => None,
        }
    }
}

/// Engine-level errors.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("Invalid change: {0}")]
    InvalidChange(String),

    #[error("Change {0} is already queued")]
    DuplicateChange(String),

    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    #[error("Sync cycle aborted: {0}")]
    CycleAborted(String),

    #[error("Sync engine requires a running Tokio runtime")]
    NoRuntime,

    #[error("Sync engine has stopped")]
    Stopped,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn err(n: i64) -> RecentError {
        RecentError {
            at: Utc.timestamp_opt(n, 0).unwrap(),
            change_id: None,
            message: format!("e{n}"),
        }
    }

    #[test]
    fn test_recent_errors_are_bounded() {
        let mut state = SyncState::new(Connectivity::Online, 0);
        for n in 0..5 {
            state.push_error(err(n), 3);
        }
        let messages: Vec<_> = state.recent_errors.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["e2", "e3", "e4"]);
    }

    #[test]
    fn test_pending_and_clean_flags() {
        assert!(!SyncState::new(Connectivity::Online, 0).has_pending());
        assert!(SyncState::new(Connectivity::Offline, 2).has_pending());

        assert!(SyncResult::default().is_clean());
        let deferred = SyncResult {
            synced: 3,
            deferred: 1,
            ..SyncResult::default()
        };
        assert!(!deferred.is_clean());
    }

    #[test]
    fn test_failure_reason_serialization() {
        let reason = FailureReason::MaxRetriesExceeded {
            attempts: 3,
            last_error: "timeout".into(),
        };
        let value = serde_json::to_value(&reason).unwrap();
        assert_eq!(value["kind"], "maxRetriesExceeded");
        assert_eq!(value["lastError"], "timeout");
        assert_eq!(reason.to_string(), "gave up after 3 attempts: timeout");
    }

    #[test]
    fn test_outcome_labels() {
        let aborted = SyncResult {
            aborted: true,
            ..SyncResult::default()
        };
        assert_eq!(SyncOutcome::Completed(aborted).label(), "aborted");
        assert_eq!(SyncOutcome::Offline.label(), "offline");
        assert!(SyncOutcome::AlreadySyncing.result().is_none());
    }
}
