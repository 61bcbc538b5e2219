//! # TideDB Sync Engine
//!
//! Pull/push synchronization between a TideDB local store and a remote.
//!
//! This crate provides:
//! - The sync state machine ([`SyncEngine`], [`SyncPhase`], [`SyncLog`])
//! - Incremental, replacement and partial replacement pulls
//! - Conflict resolution where locally changed columns win
//! - Optimistic marking of pushed records as synced
//! - Migration-aware pulls
//! - Transport abstraction with a scripted [`MockTransport`]
//! - A consistency check for debugging sync backends
//!
//! ## Architecture
//!
//! The sync engine implements a **pull-then-push** model:
//! 1. Pull remote changes since the last cursor
//! 2. Apply them locally, together with the new cursor, in one transaction
//! 3. Push local changes
//! 4. Mark the pushed records synced, in one transaction
//!
//! ## Key Invariants
//!
//! - Pull always happens before push
//! - A cursor is stored only with the changes it was pulled with
//! - A record edited during a push stays pending
//! - A tombstone is erased only after the remote accepted it
//! - Only one sync can commit for a given start state

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod apply;
mod bookkeeping;
mod config;
mod diagnostics;
mod error;
mod local;
mod log;
mod migration;
mod resolver;
mod state;
mod strategy;
mod transport;

pub use apply::{
    apply_remote_changes, apply_remote_changes_in, ApplyAnomaly, ApplyOptions, ApplyReport,
};
pub use bookkeeping::{last_pulled_at, last_pulled_schema_version, sync_sequence};
pub use config::{
    SyncConfig, LAST_PULLED_AT_KEY, LAST_PULLED_SCHEMA_VERSION_KEY, SYNC_SEQUENCE_KEY,
};
pub use diagnostics::{
    diagnose_sync_consistency, AllowExcess, AllowInconsistent, AllowMissing,
    ConsistencyOptions, ConsistencyReport,
};
pub use error::{SyncError, SyncResult};
pub use local::{
    fetch_local_changes, has_unsynced_changes, mark_local_changes_as_synced, LocalChanges,
    RecordSnapshot,
};
pub use log::{SyncLog, SyncPhase};
pub use migration::{get_migration_info, get_sync_changes, MigrationInfo};
pub use resolver::{resolve_conflict, ConflictResolver, SyncConflict};
pub use state::{SyncEngine, SyncStats};
pub use strategy::{PullStrategy, ReplacementOptions, ScopePredicate, TableStrategy};
pub use transport::{
    FnTransport, MockTransport, PullArgs, PullResult, PushArgs, PushResult, SyncTransport,
};
