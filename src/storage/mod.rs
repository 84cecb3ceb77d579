//! Durable storage layer for pantry-sync.
//!
//! The engine persists its queue through the narrow [`DurableStorage`]
//! key/value contract. Two backends are provided:
//!
//! - [`sqlite`] - SQLite with WAL and `synchronous=FULL`, plus cycle history
//! - [`memory`] - process-local map with write-failure injection
//!
//! # Submodules
//!
//! - [`schema`] - Database schema definitions
//! - [`migrations`] - Incremental schema migrations

pub mod memory;
pub mod migrations;
pub mod schema;
pub mod sqlite;

pub use memory::MemoryStorage;
pub use sqlite::{SqliteStore, SyncRun};

/// Errors raised by durable storage and by queue (de)serialization.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Unsupported queue schema version {found} (this build reads up to {supported})")]
    UnsupportedSchema { found: u32, supported: u32 },

    #[error("Queue checksum mismatch: expected {expected}, found {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Queue migration from v{from} failed at entry {index}: {reason}")]
    Migration {
        from: u32,
        index: usize,
        reason: String,
    },

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Storage lock poisoned")]
    Poisoned,
}

/// Minimal key/value contract the change store persists through.
///
/// `set` must not return until the value is durable.
pub trait DurableStorage: Send + Sync {
    /// Read the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError>;

    /// Durably write `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the write could not be flushed.
    fn set(&self, key: &str, value: &[u8]) -> Result<(), PersistenceError>;

    /// Remove `key`; removing an absent key succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the delete.
    fn delete(&self, key: &str) -> Result<(), PersistenceError>;
}
