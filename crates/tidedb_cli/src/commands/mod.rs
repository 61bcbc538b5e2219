//! CLI command implementations.

pub mod convert;
pub mod migration_info;
pub mod validate;

use std::path::{Path, PathBuf};
use thiserror::Error;
use tidedb_core::StoreError;
use tidedb_sync_engine::SyncError;
use tidedb_sync_protocol::ProtocolError;

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;

/// Errors reported by CLI commands.
#[derive(Error, Debug)]
pub enum CliError {
    /// A file could not be read or written.
    #[error("{}: {source}", path.display())]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// A file does not hold valid JSON of the expected shape.
    #[error("{}: {source}", path.display())]
    Json {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        source: serde_json::Error,
    },

    /// Invalid change set or codec failure.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Invalid migrations.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Migration planning failed.
    #[error(transparent)]
    Sync(#[from] SyncError),
}

pub(crate) fn read(path: &Path) -> CliResult<Vec<u8>> {
    std::fs::read(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub(crate) fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> CliResult<T> {
    let bytes = read(path)?;
    serde_json::from_slice(&bytes).map_err(|source| CliError::Json {
        path: path.to_path_buf(),
        source,
    })
}

pub(crate) fn write(path: &Path, bytes: &[u8]) -> CliResult<()> {
    std::fs::write(path, bytes).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })
}
