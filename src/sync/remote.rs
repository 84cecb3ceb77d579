//! Remote data service contract.

use crate::model::{EntityKind, EntityRecord};
use std::future::Future;

/// Failure of a single remote call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RemoteError {
    /// Network-level failure worth retrying.
    #[error("transient network failure: {0}")]
    Transient(String),

    /// The call did not finish in time.
    #[error("remote call timed out")]
    Timeout,

    /// The remote rejected the change; retrying will not help.
    #[error("rejected by remote: {0}")]
    Validation(String),

    /// The remote holds a conflicting version of the record.
    #[error("conflict with remote {} {}", .remote.kind(), .remote.id())]
    Conflict { remote: EntityRecord },
}

impl RemoteError {
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout)
    }
}

/// The remote store changes are applied to.
///
/// Implementations must be safe to call concurrently for different
/// entities.
pub trait RemoteDataService: Send + Sync + 'static {
    /// Create the record remotely; returns the id the remote assigned.
    fn create_entity(
        &self,
        record: &EntityRecord,
    ) -> impl Future<Output = Result<String, RemoteError>> + Send;

    /// Replace the remote record with id `id`.
    fn update_entity(
        &self,
        id: &str,
        record: &EntityRecord,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// Delete the remote record of `kind` with id `id`.
    fn delete_entity(
        &self,
        kind: EntityKind,
        id: &str,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;
}
