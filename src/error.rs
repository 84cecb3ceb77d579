//! Crate-wide error type and its machine-readable face.
//!
//! Every failure maps to an [`ErrorCode`]; the code fixes the process exit
//! status and whether retrying can help. `psync --json` prints errors as a
//! single JSON object on stderr.

use crate::storage::PersistenceError;
use crate::sync::SyncError;
use thiserror::Error;

/// Result type alias for pantry-sync operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Machine-readable error codes grouped by category.
///
/// Each code maps to a SCREAMING_SNAKE string and a category-based
/// exit code. Scripts match on the string or on the exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Database / persistence (exit 2)
    DatabaseError,
    PersistenceError,
    QueueCorrupt,

    // Not Found (exit 3)
    ChangeNotFound,

    // Validation (exit 4)
    InvalidEntity,
    InvalidOperation,
    InvalidPriority,
    InvalidArgument,
    InvalidChange,

    // Sync (exit 6)
    SyncError,

    // Config (exit 7)
    ConfigError,

    // I/O (exit 8)
    IoError,
    JsonError,

    // Remote (exit 9)
    RemoteError,
    RemoteUnreachable,

    // Internal (exit 1)
    InternalError,
}

impl ErrorCode {
    /// Machine-readable SCREAMING_SNAKE code string.
    #[must_use]
    pub const fn as_str(&self) -> &str {
        match self {
            Self::DatabaseError => "DATABASE_ERROR",
            Self::PersistenceError => "PERSISTENCE_ERROR",
            Self::QueueCorrupt => "QUEUE_CORRUPT",
            Self::ChangeNotFound => "CHANGE_NOT_FOUND",
            Self::InvalidEntity => "INVALID_ENTITY",
            Self::InvalidOperation => "INVALID_OPERATION",
            Self::InvalidPriority => "INVALID_PRIORITY",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::InvalidChange => "INVALID_CHANGE",
            Self::SyncError => "SYNC_ERROR",
            Self::ConfigError => "CONFIG_ERROR",
            Self::IoError => "IO_ERROR",
            Self::JsonError => "JSON_ERROR",
            Self::RemoteError => "REMOTE_ERROR",
            Self::RemoteUnreachable => "REMOTE_UNREACHABLE",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Category-based exit code (1-9).
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::InternalError => 1,
            Self::DatabaseError | Self::PersistenceError | Self::QueueCorrupt => 2,
            Self::ChangeNotFound => 3,
            Self::InvalidEntity
            | Self::InvalidOperation
            | Self::InvalidPriority
            | Self::InvalidArgument
            | Self::InvalidChange => 4,
            Self::SyncError => 6,
            Self::ConfigError => 7,
            Self::IoError | Self::JsonError => 8,
            Self::RemoteError | Self::RemoteUnreachable => 9,
        }
    }

    /// Whether retrying (possibly with corrected input) can succeed.
    ///
    /// True for validation errors and for transient database or remote
    /// failures. False for corrupt queues, not-found, or internal errors.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::InvalidEntity
                | Self::InvalidOperation
                | Self::InvalidPriority
                | Self::InvalidArgument
                | Self::InvalidChange
                | Self::DatabaseError
                | Self::RemoteError
                | Self::RemoteUnreachable
        )
    }
}

/// Errors that can occur in pantry-sync CLI operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Change not found: {id}")]
    ChangeNotFound { id: String },

    #[error("Change not found: {id} (did you mean: {}?)", similar.join(", "))]
    ChangeNotFoundSimilar { id: String, similar: Vec<String> },

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("No remote endpoint configured")]
    NoRemote,

    #[error("Remote {endpoint} is unreachable")]
    RemoteUnreachable { endpoint: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

const fn persistence_code(err: &PersistenceError) -> ErrorCode {
    match err {
        PersistenceError::UnsupportedSchema { .. }
        | PersistenceError::ChecksumMismatch { .. }
        | PersistenceError::Migration { .. } => ErrorCode::QueueCorrupt,
        PersistenceError::Database(_) => ErrorCode::DatabaseError,
        PersistenceError::Io(_)
        | PersistenceError::Encode(_)
        | PersistenceError::Unavailable(_)
        | PersistenceError::Poisoned => ErrorCode::PersistenceError,
    }
}

impl Error {
    /// Map this error to its structured `ErrorCode`.
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::ChangeNotFound { .. } | Self::ChangeNotFoundSimilar { .. } => {
                ErrorCode::ChangeNotFound
            }
            Self::Sync(err) => match err {
                SyncError::Persistence(inner) => persistence_code(inner),
                SyncError::InvalidChange(_) | SyncError::DuplicateChange(_) => {
                    ErrorCode::InvalidChange
                }
                SyncError::InvalidConfig(_) => ErrorCode::ConfigError,
                SyncError::CycleAborted(_) => ErrorCode::SyncError,
                SyncError::NoRuntime | SyncError::Stopped => ErrorCode::InternalError,
            },
            Self::Persistence(err) => persistence_code(err),
            Self::Database(_) => ErrorCode::DatabaseError,
            Self::Io(_) => ErrorCode::IoError,
            Self::Json(_) => ErrorCode::JsonError,
            Self::Http(_) => ErrorCode::RemoteError,
            Self::NoRemote | Self::Config(_) => ErrorCode::ConfigError,
            Self::RemoteUnreachable { .. } => ErrorCode::RemoteUnreachable,
            Self::InvalidArgument(msg) => invalid_argument_code(msg.as_bytes()),
            Self::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Category-based exit code, delegating to the `ErrorCode`.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        self.error_code().exit_code()
    }

    /// Context-aware recovery hint.
    ///
    /// Returns `None` if no actionable suggestion exists.
    #[must_use]
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::ChangeNotFound { id } => Some(format!(
                "No queued change with ID '{id}'. Use `psync queue list` to see pending changes."
            )),
            Self::ChangeNotFoundSimilar { similar, .. } => {
                Some(format!("Did you mean: {}?", similar.join(", ")))
            }

            Self::Sync(SyncError::Persistence(err)) | Self::Persistence(err) => {
                persistence_hint(err)
            }
            Self::Sync(SyncError::InvalidConfig(_)) => Some(
                "Inspect settings with `psync config show`, or restore defaults with `psync config reset`"
                    .to_string(),
            ),
            Self::Sync(SyncError::CycleAborted(_)) => Some(
                "The queue is unchanged. Check disk space and permissions, then retry `psync sync`"
                    .to_string(),
            ),

            Self::NoRemote => Some(
                "Set one: psync config set remote.endpoint https://api.example.com\n  \
                 Or export PANTRY_SYNC_ENDPOINT"
                    .to_string(),
            ),
            Self::RemoteUnreachable { .. } => Some(
                "Changes stay queued. Retry when the network is back, or run `psync watch` \
                 to sync automatically once it is."
                    .to_string(),
            ),

            Self::InvalidArgument(msg) => {
                if msg.contains("entity") {
                    Some(
                        "Valid entities: product, recipe, shoppingList. \
                         Synonyms: list→shoppingList, shopping→shoppingList"
                            .to_string(),
                    )
                } else if msg.contains("operation") {
                    Some(
                        "Valid operations: create, update, delete. \
                         Synonyms: add→create, edit→update, rm→delete"
                            .to_string(),
                    )
                } else if msg.contains("priority") {
                    Some("Valid priorities: high, normal, low. Synonyms: urgent→high".to_string())
                } else {
                    None
                }
            }

            Self::Sync(_)
            | Self::Database(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::Http(_)
            | Self::Config(_)
            | Self::Other(_) => None,
        }
    }

    /// Structured JSON representation for machine consumption.
    ///
    /// Includes error code, message, retryability, exit code, and
    /// optional recovery hint.
    #[must_use]
    pub fn to_structured_json(&self) -> serde_json::Value {
        let code = self.error_code();
        let mut obj = serde_json::json!({
            "error": {
                "code": code.as_str(),
                "message": self.to_string(),
                "retryable": code.is_retryable(),
                "exit_code": code.exit_code(),
            }
        });

        if let Some(hint) = self.hint() {
            obj["error"]["hint"] = serde_json::Value::String(hint);
        }

        obj
    }
}

/// Pick a specific validation code from the message prefix.
const fn invalid_argument_code(msg: &[u8]) -> ErrorCode {
    if starts_with(msg, b"Invalid entity") {
        ErrorCode::InvalidEntity
    } else if starts_with(msg, b"Invalid operation") {
        ErrorCode::InvalidOperation
    } else if starts_with(msg, b"Invalid priority") {
        ErrorCode::InvalidPriority
    } else {
        ErrorCode::InvalidArgument
    }
}

const fn starts_with(haystack: &[u8], prefix: &[u8]) -> bool {
    if haystack.len() < prefix.len() {
        return false;
    }
    let mut i = 0;
    while i < prefix.len() {
        if haystack[i] != prefix[i] {
            return false;
        }
        i += 1;
    }
    true
}

fn persistence_hint(err: &PersistenceError) -> Option<String> {
    match err {
        PersistenceError::ChecksumMismatch { .. } | PersistenceError::Migration { .. } => Some(
            "The stored queue failed verification and was left untouched.\n  \
             Back up the database, then discard it with `psync queue clear --force`"
                .to_string(),
        ),
        PersistenceError::UnsupportedSchema { .. } => {
            Some("The queue was written by a newer pantry-sync; upgrade this binary".to_string())
        }
        PersistenceError::Database(_) | PersistenceError::Io(_) => {
            Some("Check that the database path is writable (see `--db`)".to_string())
        }
        PersistenceError::Encode(_)
        | PersistenceError::Unavailable(_)
        | PersistenceError::Poisoned => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_by_category() {
        assert_eq!(Error::ChangeNotFound { id: "chg_1".into() }.exit_code(), 3);
        assert_eq!(Error::NoRemote.exit_code(), 7);
        assert_eq!(
            Error::RemoteUnreachable {
                endpoint: "http://x".into()
            }
            .exit_code(),
            9
        );
        assert_eq!(Error::Other("boom".into()).exit_code(), 1);
        assert_eq!(
            Error::Sync(SyncError::InvalidChange("empty id".into())).exit_code(),
            4
        );
        assert_eq!(
            Error::Persistence(PersistenceError::ChecksumMismatch {
                expected: "a".into(),
                actual: "b".into()
            })
            .error_code(),
            ErrorCode::QueueCorrupt
        );
    }

    #[test]
    fn test_invalid_argument_codes() {
        let err = Error::InvalidArgument("Invalid entity 'fridge'".into());
        assert_eq!(err.error_code(), ErrorCode::InvalidEntity);
        assert!(err.hint().unwrap().contains("shoppingList"));

        let err = Error::InvalidArgument("Invalid priority 'asap'".into());
        assert_eq!(err.error_code(), ErrorCode::InvalidPriority);

        let err = Error::InvalidArgument("--data and --file are exclusive".into());
        assert_eq!(err.error_code(), ErrorCode::InvalidArgument);
    }

    #[test]
    fn test_structured_json() {
        let err = Error::ChangeNotFoundSimilar {
            id: "chg_abc".into(),
            similar: vec!["chg_abd".into()],
        };
        let json = err.to_structured_json();
        assert_eq!(json["error"]["code"], "CHANGE_NOT_FOUND");
        assert_eq!(json["error"]["exit_code"], 3);
        assert_eq!(json["error"]["retryable"], false);
        assert_eq!(json["error"]["hint"], "Did you mean: chg_abd?");
    }
}
