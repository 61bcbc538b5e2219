//! Records and their sync status.
//!
//! Every record carries a [`RecordStatus`] and the set of columns changed
//! since the last successful sync. The transitions below are the only way
//! sync state moves:
//!
//! - [`RawRecord::mark_changed`] dirties a column. A `created` record stays
//!   `created`, anything else becomes `updated`.
//! - [`RawRecord::mark_synced`] clears the changed set and sets `synced`.
//! - [`RawRecord::mark_deleted`] turns the record into a tombstone.
//!
//! A `synced` record always has an empty changed set.

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use tidedb_sync_protocol::{DirtyRaw, RecordId, CHANGED_FIELD, ID_FIELD, STATUS_FIELD};

/// Sync status of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordStatus {
    /// Created locally, never pushed.
    Created,
    /// Changed locally since the last sync.
    Updated,
    /// In sync with the remote.
    Synced,
    /// Deleted locally, tombstone not yet pushed.
    Deleted,
}

impl RecordStatus {
    /// Statuses that make a record part of the outgoing change set.
    pub const PENDING: [RecordStatus; 2] = [RecordStatus::Created, RecordStatus::Updated];

    /// Wire name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Synced => "synced",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "updated" => Ok(Self::Updated),
            "synced" => Ok(Self::Synced),
            "deleted" => Ok(Self::Deleted),
            other => Err(format!("unknown record status: {other}")),
        }
    }
}

/// A record as stored locally: id, sync state and column values.
///
/// `RawRecord` is a plain value. Cloning it yields an independent snapshot,
/// which the sync engine relies on for its optimistic concurrency checks.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    /// Record id, unique within its table.
    pub id: RecordId,
    /// Sync status.
    pub status: RecordStatus,
    /// Columns changed since the last sync.
    pub changed: BTreeSet<String>,
    /// Column values, excluding id and sync state.
    pub columns: BTreeMap<String, Value>,
}

impl RawRecord {
    /// Creates a locally created record with no column values.
    pub fn new_created(id: impl Into<RecordId>) -> Self {
        Self {
            id: id.into(),
            status: RecordStatus::Created,
            changed: BTreeSet::new(),
            columns: BTreeMap::new(),
        }
    }

    /// Creates a synced record with no column values.
    pub fn new_synced(id: impl Into<RecordId>) -> Self {
        Self {
            status: RecordStatus::Synced,
            ..Self::new_created(id)
        }
    }

    /// Returns a column value.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(column)
    }

    /// Sets a column value, marking it changed if the value differs.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        let column = column.into();
        let value = value.into();
        if self.columns.get(&column) == Some(&value) {
            return;
        }
        self.columns.insert(column.clone(), value);
        self.mark_changed(column);
    }

    /// Sets a column value without touching sync state.
    pub fn set_raw(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.columns.insert(column.into(), value.into());
    }

    /// Adds a column to the changed set.
    ///
    /// The status becomes `updated` unless the record is still `created`.
    /// Deleted records are left untouched.
    pub fn mark_changed(&mut self, column: impl Into<String>) {
        match self.status {
            RecordStatus::Deleted => {}
            RecordStatus::Created => {
                self.changed.insert(column.into());
            }
            RecordStatus::Updated | RecordStatus::Synced => {
                self.changed.insert(column.into());
                self.status = RecordStatus::Updated;
            }
        }
    }

    /// Clears the changed set and marks the record synced.
    pub fn mark_synced(&mut self) {
        self.changed.clear();
        self.status = RecordStatus::Synced;
    }

    /// Marks the record as a tombstone and discards its content.
    pub fn mark_deleted(&mut self) {
        self.status = RecordStatus::Deleted;
        self.changed.clear();
        self.columns.clear();
    }

    /// Returns true if the record has local changes to push.
    pub fn is_pending(&self) -> bool {
        RecordStatus::PENDING.contains(&self.status)
    }

    /// Wire form of the record, including local sync fields.
    pub fn to_dirty_raw(&self) -> DirtyRaw {
        let mut raw = self.columns_raw();
        raw.insert(
            STATUS_FIELD.to_string(),
            Value::String(self.status.as_str().to_string()),
        );
        let changed: Vec<&str> = self.changed.iter().map(String::as_str).collect();
        raw.insert(CHANGED_FIELD.to_string(), Value::String(changed.join(",")));
        raw
    }

    /// Wire form of the record without local sync fields.
    pub fn columns_raw(&self) -> DirtyRaw {
        let mut raw = DirtyRaw::new();
        raw.insert(ID_FIELD.to_string(), Value::String(self.id.clone()));
        for (name, value) in &self.columns {
            raw.insert(name.clone(), value.clone());
        }
        raw
    }
}
