//! Error types for the sync engine.

use thiserror::Error;
use tidedb_core::StoreError;
use tidedb_sync_protocol::ProtocolError;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    /// The pull or push transport failed.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The remote sent a malformed payload.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The pull strategy does not fit the schema.
    #[error("invalid pull strategy: {0}")]
    InvalidPullStrategy(String),

    /// Migration syncs are misconfigured.
    #[error("invalid migration sync configuration: {0}")]
    InvalidMigrationConfig(String),

    /// Another sync committed since this one started.
    #[error("concurrent synchronization detected: {0}")]
    ConcurrentSync(String),

    /// The store was reset since this sync started.
    #[error("database was reset during synchronization")]
    DatabaseReset,

    /// Local store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The consistency check found server changes it could not rule out.
    #[error("inconsistent sync: {0}")]
    InconsistentSync(String),
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates an invalid pull strategy error.
    pub fn invalid_strategy(message: impl Into<String>) -> Self {
        Self::InvalidPullStrategy(message.into())
    }

    /// Creates an invalid migration configuration error.
    pub fn invalid_migration(message: impl Into<String>) -> Self {
        Self::InvalidMigrationConfig(message.into())
    }

    /// Returns true if the sync aborted because its start state moved.
    ///
    /// The caller should simply run the sync again later.
    pub fn is_guard_abort(&self) -> bool {
        matches!(self, Self::ConcurrentSync(_) | Self::DatabaseReset)
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::ConcurrentSync(_) | SyncError::DatabaseReset => true,
            SyncError::InconsistentSync(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection lost").is_retryable());
        assert!(!SyncError::transport_fatal("invalid certificate").is_retryable());
        assert!(SyncError::DatabaseReset.is_retryable());
        assert!(!SyncError::invalid_strategy("bad").is_retryable());
        assert!(!SyncError::Store(StoreError::unknown_table("x")).is_retryable());
    }

    #[test]
    fn guard_aborts() {
        assert!(SyncError::ConcurrentSync("cursor moved".into()).is_guard_abort());
        assert!(SyncError::DatabaseReset.is_guard_abort());
        assert!(!SyncError::transport_retryable("x").is_guard_abort());
    }

    #[test]
    fn error_display() {
        let err = SyncError::from(ProtocolError::invalid_record("tasks", "record has no id"));
        assert_eq!(
            err.to_string(),
            "protocol error: invalid raw record in table tasks: record has no id"
        );
        assert_eq!(
            SyncError::DatabaseReset.to_string(),
            "database was reset during synchronization"
        );
    }
}
