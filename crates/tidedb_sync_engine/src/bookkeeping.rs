//! Sync bookkeeping stored in the local key-value store.
//!
//! Unreadable values are treated as absent.

use crate::config::{LAST_PULLED_AT_KEY, LAST_PULLED_SCHEMA_VERSION_KEY, SYNC_SEQUENCE_KEY};
use tidedb_core::{LocalStore, StoreTxn};
use tidedb_sync_protocol::{SchemaVersion, SyncCursor};

fn parse_cursor(value: Option<String>) -> Option<SyncCursor> {
    value
        .map(SyncCursor::new)
        .filter(|cursor| cursor.validate().is_ok())
}

fn parse_version(value: Option<String>) -> Option<SchemaVersion> {
    value.and_then(|v| v.parse().ok())
}

/// Cursor of the last successful pull.
pub fn last_pulled_at<S: LocalStore>(store: &S) -> Option<SyncCursor> {
    parse_cursor(store.get_local(LAST_PULLED_AT_KEY))
}

/// Cursor of the last successful pull, read inside a transaction.
pub fn last_pulled_at_in(txn: &dyn StoreTxn) -> Option<SyncCursor> {
    parse_cursor(txn.get_local(LAST_PULLED_AT_KEY))
}

/// Stores the pull cursor.
pub fn set_last_pulled_at_in(txn: &mut dyn StoreTxn, cursor: &SyncCursor) {
    txn.set_local(LAST_PULLED_AT_KEY, cursor.as_str());
}

/// Schema version of the last successful pull.
pub fn last_pulled_schema_version<S: LocalStore>(store: &S) -> Option<SchemaVersion> {
    parse_version(store.get_local(LAST_PULLED_SCHEMA_VERSION_KEY))
}

/// Stores the schema version of the pull.
pub fn set_last_pulled_schema_version_in(txn: &mut dyn StoreTxn, version: SchemaVersion) {
    txn.set_local(LAST_PULLED_SCHEMA_VERSION_KEY, &version.to_string());
}

/// Number of syncs that committed pulled changes to this store.
pub fn sync_sequence<S: LocalStore>(store: &S) -> u64 {
    store
        .get_local(SYNC_SEQUENCE_KEY)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

/// Sync sequence, read inside a transaction.
pub fn sync_sequence_in(txn: &dyn StoreTxn) -> u64 {
    txn.get_local(SYNC_SEQUENCE_KEY)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

/// Stores the sync sequence.
pub fn set_sync_sequence_in(txn: &mut dyn StoreTxn, sequence: u64) {
    txn.set_local(SYNC_SEQUENCE_KEY, &sequence.to_string());
}
