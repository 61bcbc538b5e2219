//! # TideDB Sync Protocol
//!
//! Data types exchanged between the TideDB sync engine and a remote.
//!
//! This crate provides:
//! - Raw records and per-table change sets (`created`, `updated`, `deleted`)
//! - Rejected ids reported by a push
//! - The pull cursor
//! - The migration descriptor sent with a pull
//! - CBOR and JSON codecs
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change_set;
mod codec;
mod cursor;
mod error;
mod migration;

pub use change_set::{
    is_local_only_field, raw_id, validate_remote_raw, ChangeSet, DirtyRaw, RecordId,
    RejectedIds, SchemaVersion, TableChangeSet, TableName, CHANGED_FIELD, ID_FIELD,
    STATUS_FIELD,
};
pub use codec::{from_cbor, from_json, to_cbor, to_json};
pub use cursor::SyncCursor;
pub use error::{ProtocolError, ProtocolResult};
pub use migration::{MigrationSyncChanges, TableColumns};
