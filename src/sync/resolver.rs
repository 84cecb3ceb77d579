//! Conflict resolution between local and remote records.
//!
//! [`ConflictResolver::resolve`] is a pure function of its inputs (plus the
//! manual resolvers registered at construction): the same local, remote and
//! strategy always yield the same record.

use super::types::FailureReason;
use crate::model::{EntityKind, EntityRecord};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// How a conflict between local and remote versions is settled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConflictStrategy {
    /// Keep the local record.
    #[default]
    LocalWins,
    /// Take the remote record.
    RemoteWins,
    /// Overlay remote fields when the remote record is newer.
    ///
    /// Newer means a later whole-record `updatedAt`; there is no per-field
    /// history, so a newer remote also overwrites unrelated local edits.
    Merge,
    /// Delegate to a resolver registered for the entity kind.
    Manual,
}

impl ConflictStrategy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LocalWins => "localWins",
            Self::RemoteWins => "remoteWins",
            Self::Merge => "merge",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['_', '-'], "").as_str() {
            "localwins" | "local" => Ok(Self::LocalWins),
            "remotewins" | "remote" | "server" => Ok(Self::RemoteWins),
            "merge" => Ok(Self::Merge),
            "manual" => Ok(Self::Manual),
            _ => Err(format!(
                "Unknown conflict strategy: {s} (valid: localWins, remoteWins, merge, manual)"
            )),
        }
    }
}

/// Caller-supplied resolution for the `Manual` strategy.
pub type ManualResolveFn =
    Arc<dyn Fn(&EntityRecord, &EntityRecord) -> Result<EntityRecord, String> + Send + Sync>;

/// Resolution failures.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("no manual resolver registered for {0}")]
    MissingResolver(EntityKind),

    #[error("cannot resolve {local} against {remote}")]
    KindMismatch {
        local: EntityKind,
        remote: EntityKind,
    },

    #[error("manual resolver failed: {0}")]
    Rejected(String),

    #[error("merge failed: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<ResolveError> for FailureReason {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::MissingResolver(entity) => Self::MissingResolver { entity },
            ResolveError::KindMismatch { local, remote } => Self::KindMismatch { local, remote },
            ResolveError::Rejected(message) => Self::ResolverFailed { message },
            ResolveError::Encode(e) => Self::ResolverFailed {
                message: e.to_string(),
            },
        }
    }
}

/// Applies a [`ConflictStrategy`] to a local/remote pair.
#[derive(Clone, Default)]
pub struct ConflictResolver {
    manual: HashMap<EntityKind, ManualResolveFn>,
}

impl ConflictResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the `Manual` resolver for `kind`, replacing any previous one.
    #[must_use]
    pub fn with_manual<F>(mut self, kind: EntityKind, resolve: F) -> Self
    where
        F: Fn(&EntityRecord, &EntityRecord) -> Result<EntityRecord, String> + Send + Sync + 'static,
    {
        self.manual.insert(kind, Arc::new(resolve));
        self
    }

    #[must_use]
    pub fn has_manual(&self, kind: EntityKind) -> bool {
        self.manual.contains_key(&kind)
    }

    /// Produce the record that should win.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::KindMismatch`] when the records differ in kind,
    /// [`ResolveError::MissingResolver`] for `Manual` without a registered
    /// resolver, and [`ResolveError::Rejected`] when that resolver fails.
    pub fn resolve(
        &self,
        local: &EntityRecord,
        remote: &EntityRecord,
        strategy: ConflictStrategy,
    ) -> Result<EntityRecord, ResolveError> {
        if local.kind() != remote.kind() {
            return Err(ResolveError::KindMismatch {
                local: local.kind(),
                remote: remote.kind(),
            });
        }

        match strategy {
            ConflictStrategy::LocalWins => Ok(local.clone()),
            ConflictStrategy::RemoteWins => Ok(remote.clone()),
            ConflictStrategy::Merge => merge_records(local, remote),
            ConflictStrategy::Manual => {
                let resolve = self
                    .manual
                    .get(&local.kind())
                    .ok_or(ResolveError::MissingResolver(local.kind()))?;
                let resolved = resolve(local, remote).map_err(ResolveError::Rejected)?;
                if resolved.kind() != local.kind() {
                    return Err(ResolveError::KindMismatch {
                        local: local.kind(),
                        remote: resolved.kind(),
                    });
                }
                Ok(resolved)
            }
        }
    }
}

impl fmt::Debug for ConflictResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.manual.keys().copied().collect();
        kinds.sort();
        f.debug_struct("ConflictResolver")
            .field("manual", &kinds)
            .finish()
    }
}

/// Whole-record timestamp merge.
///
/// Starts from `local`; when `remote.updatedAt` is newer (or either side is
/// unstamped) every non-null remote field overwrites the local one.
///
/// # Errors
///
/// Returns an error if the merged fields no longer form a valid record.
pub fn merge_records(
    local: &EntityRecord,
    remote: &EntityRecord,
) -> Result<EntityRecord, ResolveError> {
    if local.kind() != remote.kind() {
        return Err(ResolveError::KindMismatch {
            local: local.kind(),
            remote: remote.kind(),
        });
    }

    let remote_newer = match (local.updated_at(), remote.updated_at()) {
        (Some(l), Some(r)) => r > l,
        _ => true,
    };
    if !remote_newer {
        return Ok(local.clone());
    }

    let mut merged = local.to_value()?;
    let remote_value = remote.to_value()?;
    if let (Some(merged_fields), Some(remote_fields)) =
        (merged.as_object_mut(), remote_value.as_object())
    {
        for (key, value) in remote_fields {
            if !value.is_null() {
                merged_fields.insert(key.clone(), value.clone());
            }
        }
    }

    Ok(EntityRecord::from_value(local.kind(), merged)?)
}
