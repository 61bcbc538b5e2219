//! Error types for TideDB core.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in local store operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Table is not part of the schema.
    #[error("unknown table: {table}")]
    UnknownTable {
        /// Name of the table.
        table: String,
    },

    /// Column is not part of the table schema.
    #[error("unknown column {column} in table {table}")]
    UnknownColumn {
        /// Name of the table.
        table: String,
        /// Name of the column.
        column: String,
    },

    /// Record not found.
    #[error("record {id} not found in table {table}")]
    RecordNotFound {
        /// The table searched.
        table: String,
        /// The record id.
        id: String,
    },

    /// A record with the same id already exists.
    #[error("record {id} already exists in table {table}")]
    RecordAlreadyExists {
        /// The table.
        table: String,
        /// The record id.
        id: String,
    },

    /// The id is tombstoned and cannot be reused until the tombstone is purged.
    #[error("record {id} in table {table} is tombstoned")]
    Tombstoned {
        /// The table.
        table: String,
        /// The record id.
        id: String,
    },

    /// The schema definition is invalid.
    #[error("invalid schema: {message}")]
    InvalidSchema {
        /// Description of the problem.
        message: String,
    },

    /// The migration definitions are invalid.
    #[error("invalid migrations: {message}")]
    InvalidMigrations {
        /// Description of the problem.
        message: String,
    },

    /// Transaction was aborted.
    #[error("transaction aborted: {reason}")]
    TransactionAborted {
        /// Reason for abort.
        reason: String,
    },
}

impl StoreError {
    /// Creates an unknown table error.
    pub fn unknown_table(table: impl Into<String>) -> Self {
        Self::UnknownTable {
            table: table.into(),
        }
    }

    /// Creates a record not found error.
    pub fn not_found(table: impl Into<String>, id: impl Into<String>) -> Self {
        Self::RecordNotFound {
            table: table.into(),
            id: id.into(),
        }
    }

    /// Creates an invalid schema error.
    pub fn invalid_schema(message: impl Into<String>) -> Self {
        Self::InvalidSchema {
            message: message.into(),
        }
    }

    /// Creates an invalid migrations error.
    pub fn invalid_migrations(message: impl Into<String>) -> Self {
        Self::InvalidMigrations {
            message: message.into(),
        }
    }

    /// Creates a transaction aborted error.
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::TransactionAborted {
            reason: reason.into(),
        }
    }
}
