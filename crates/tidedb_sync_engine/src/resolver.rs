//! Per-column conflict resolution.
//!
//! A pulled record is a full snapshot from the remote, but it predates the
//! push of any local edits. The merge therefore keeps the local value of
//! every locally changed column and takes everything else from the remote.

use tidedb_core::{RawRecord, RecordStatus};
use tidedb_sync_protocol::{is_local_only_field, DirtyRaw, TableName, ID_FIELD};

/// Merges a pulled record into its local counterpart.
///
/// Sync state is never changed by the merge: the result carries the local
/// status and changed set. A deleted local record is returned unchanged.
pub fn resolve_conflict(local: &RawRecord, remote: &DirtyRaw) -> RawRecord {
    if local.status == RecordStatus::Deleted {
        return local.clone();
    }

    // local columns are kept when the remote omits them
    let mut resolved = local.clone();
    for (name, value) in remote {
        if name == ID_FIELD || is_local_only_field(name) {
            continue;
        }
        resolved.columns.insert(name.clone(), value.clone());
    }

    for column in &local.changed {
        match local.columns.get(column) {
            Some(value) => {
                resolved.columns.insert(column.clone(), value.clone());
            }
            None => {
                resolved.columns.remove(column);
            }
        }
    }

    resolved.status = local.status;
    resolved.changed = local.changed.clone();
    resolved
}

/// Custom conflict resolution hook.
///
/// Receives the table, the local record, the pulled record and the default
/// merge, and returns the record to store. The returned columns win over
/// the default merge; its `status` and `changed` are reset to the local ones.
pub trait ConflictResolver: Send + Sync {
    /// Produces the record to store.
    fn resolve(
        &self,
        table: &str,
        local: &RawRecord,
        remote: &DirtyRaw,
        resolved: RawRecord,
    ) -> RawRecord;
}

impl<F> ConflictResolver for F
where
    F: Fn(&str, &RawRecord, &DirtyRaw, RawRecord) -> RawRecord + Send + Sync,
{
    fn resolve(
        &self,
        table: &str,
        local: &RawRecord,
        remote: &DirtyRaw,
        resolved: RawRecord,
    ) -> RawRecord {
        self(table, local, remote, resolved)
    }
}

/// A record that had local changes when a pulled version arrived.
///
/// Kept for diagnostics only.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConflict {
    /// Table of the record.
    pub table: TableName,
    /// Local record before the merge.
    pub local: RawRecord,
    /// Pulled record.
    pub remote: DirtyRaw,
    /// Record that was stored.
    pub resolved: RawRecord,
}
