//! Error types for the sync protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while validating or encoding sync payloads.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A raw record received from the remote is malformed.
    #[error("invalid raw record in table {table}: {message}")]
    InvalidRecord {
        /// Table the record was listed under.
        table: String,
        /// Description of the problem.
        message: String,
    },

    /// The same id is listed more than once in a table change set.
    #[error("record {id} appears more than once in the change set for table {table}")]
    DuplicateId {
        /// Table containing the duplicate.
        table: String,
        /// The repeated record id.
        id: String,
    },

    /// The pull cursor returned by the remote is unusable.
    #[error("invalid sync cursor {cursor:?}: {message}")]
    InvalidCursor {
        /// The rejected cursor.
        cursor: String,
        /// Why it was rejected.
        message: String,
    },

    /// Failed to encode a payload.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to decode a payload.
    #[error("decoding failed: {message}")]
    DecodingFailed {
        /// Description of the decoding error.
        message: String,
    },
}

impl ProtocolError {
    /// Creates an invalid record error.
    pub fn invalid_record(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidRecord {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid cursor error.
    pub fn invalid_cursor(cursor: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidCursor {
            cursor: cursor.into(),
            message: message.into(),
        }
    }

    /// Creates an encoding error.
    pub fn encoding(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }

    /// Creates a decoding error.
    pub fn decoding(message: impl Into<String>) -> Self {
        Self::DecodingFailed {
            message: message.into(),
        }
    }
}
