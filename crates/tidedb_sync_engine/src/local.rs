//! Collecting local changes and marking them synced.
//!
//! The collector snapshots every pending record by value. After the push,
//! a record is marked synced only if its live content still equals the
//! snapshot, so edits made while the push was in flight are kept for the
//! next sync.

use crate::error::SyncResult;
use tidedb_core::{LocalStore, RawRecord, RecordStatus, StoreTxn};
use tidedb_sync_protocol::{ChangeSet, RecordId, RejectedIds, TableChangeSet, TableName};
use tracing::{debug, warn};

/// A record as it was when local changes were collected.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSnapshot {
    /// Table of the record.
    pub table: TableName,
    /// Record content at collection time.
    pub record: RawRecord,
}

/// Local changes ready to push.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalChanges {
    /// Change set to push, with an entry for every schema table.
    pub changes: ChangeSet,
    /// Snapshots of the created and updated records in `changes`.
    pub affected_records: Vec<RecordSnapshot>,
}

impl LocalChanges {
    /// Returns true if there is nothing to push.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Collects pending records and tombstones of every schema table.
pub fn fetch_local_changes<S: LocalStore>(store: &S) -> SyncResult<LocalChanges> {
    store.read(fetch_local_changes_in)
}

/// Collects local changes through a store view.
pub fn fetch_local_changes_in(txn: &dyn StoreTxn) -> SyncResult<LocalChanges> {
    let mut local = LocalChanges::default();
    for table in txn.schema().tables() {
        let mut changes = TableChangeSet::new();
        for record in txn.query_by_status(&table.name, &RecordStatus::PENDING)? {
            match record.status {
                RecordStatus::Created => changes.created.push(record.to_dirty_raw()),
                _ => changes.updated.push(record.to_dirty_raw()),
            }
            local.affected_records.push(RecordSnapshot {
                table: table.name.clone(),
                record,
            });
        }
        changes.deleted = txn.tombstone_ids(&table.name)?;
        local.changes.insert(table.name.clone(), changes);
    }
    debug!(count = local.changes.count(), "fetched local changes");
    Ok(local)
}

/// Marks pushed changes as synced in a single transaction.
pub fn mark_local_changes_as_synced<S: LocalStore>(
    store: &S,
    local: &LocalChanges,
    rejected: Option<&RejectedIds>,
) -> SyncResult<usize> {
    store.transaction(|txn| mark_local_changes_as_synced_in(txn, local, rejected))
}

/// Marks pushed changes as synced inside an open transaction.
///
/// A record is marked only if it was not rejected and its live content
/// still equals its snapshot. Pushed tombstones that were not rejected are
/// erased. Returns the number of records marked.
pub fn mark_local_changes_as_synced_in(
    txn: &mut dyn StoreTxn,
    local: &LocalChanges,
    rejected: Option<&RejectedIds>,
) -> SyncResult<usize> {
    let is_rejected = |table: &str, id: &str| rejected.is_some_and(|r| r.contains(table, id));
    let mut marked = 0;

    for snapshot in &local.affected_records {
        let table = snapshot.table.as_str();
        let id = snapshot.record.id.as_str();
        if is_rejected(table, id) {
            continue;
        }
        match txn.find(table, id)? {
            Some(live) if live == snapshot.record => {
                let mut synced = live;
                synced.mark_synced();
                txn.update_record(table, synced)?;
                marked += 1;
            }
            Some(_) => {
                debug!(table, id, "record changed during push, keeping it pending");
            }
            None => {
                warn!(table, id, "pushed record is gone, it will not be marked as synced");
            }
        }
    }

    for (table, changes) in local.changes.iter() {
        let purge: Vec<RecordId> = changes
            .deleted
            .iter()
            .filter(|id| !is_rejected(table.as_str(), id.as_str()))
            .cloned()
            .collect();
        if !purge.is_empty() {
            txn.purge_tombstones(table, &purge)?;
        }
    }

    Ok(marked)
}

/// Returns true if any record is pending or any tombstone is unpushed.
pub fn has_unsynced_changes<S: LocalStore>(store: &S) -> SyncResult<bool> {
    store.read(|txn| {
        for table in txn.schema().tables() {
            if !txn.query_by_status(&table.name, &RecordStatus::PENDING)?.is_empty()
                || !txn.tombstone_ids(&table.name)?.is_empty()
            {
                return Ok(true);
            }
        }
        Ok(false)
    })
}
