//! # TideDB Core
//!
//! Local-store side of TideDB synchronization.
//!
//! This crate provides:
//! - The record status model (`created`, `updated`, `synced`, `deleted`)
//! - The application schema and raw record sanitization
//! - Validated schema migrations
//! - The [`LocalStore`] / [`StoreTxn`] interface consumed by the sync engine
//! - [`MemoryStore`], a transactional in-memory store
//!
//! ## Record lifecycle
//!
//! Records are created and changed by the application at any time. The
//! sync engine only moves their sync state: it never invents business
//! fields, and it erases tombstones only after the remote has been told
//! about them.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod memory;
mod migrations;
mod record;
mod schema;
mod store;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use migrations::{
    add_columns, create_table, unsafe_execute_sql, Migration, MigrationStep, SchemaMigrations,
};
pub use record::{RawRecord, RecordStatus};
pub use schema::{AppSchema, ColumnSchema, ColumnType, TableSchema};
pub use store::{LocalStore, StoreTxn};

// Re-export the protocol types the store interface speaks in.
pub use tidedb_sync_protocol::{DirtyRaw, RecordId, SchemaVersion, TableName};
