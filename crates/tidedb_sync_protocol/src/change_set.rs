//! Change sets exchanged with the remote.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Record identifier, unique within its table.
pub type RecordId = String;

/// Table name.
pub type TableName = String;

/// Schema version number.
pub type SchemaVersion = u32;

/// An unsanitized raw record as it travels over the wire.
pub type DirtyRaw = serde_json::Map<String, Value>;

/// Column holding the record id.
pub const ID_FIELD: &str = "id";

/// Local-only column holding the sync status.
pub const STATUS_FIELD: &str = "_status";

/// Local-only column holding the comma-separated changed column names.
pub const CHANGED_FIELD: &str = "_changed";

/// Returns true for column names that carry local sync state.
pub fn is_local_only_field(name: &str) -> bool {
    name == STATUS_FIELD || name == CHANGED_FIELD
}

/// Returns the id of a raw record if it is a string.
pub fn raw_id(raw: &DirtyRaw) -> Option<&str> {
    raw.get(ID_FIELD).and_then(Value::as_str)
}

/// Checks a raw record received from the remote.
///
/// The record must carry a string `id` and must not carry local-only
/// sync fields.
pub fn validate_remote_raw(table: &str, raw: &DirtyRaw) -> ProtocolResult<()> {
    match raw.get(ID_FIELD) {
        Some(Value::String(id)) if !id.is_empty() => {}
        Some(_) => {
            return Err(ProtocolError::invalid_record(
                table,
                "record id must be a non-empty string",
            ))
        }
        None => return Err(ProtocolError::invalid_record(table, "record has no id")),
    }
    if let Some(field) = raw.keys().find(|k| is_local_only_field(k)) {
        return Err(ProtocolError::invalid_record(
            table,
            format!(
                "record {} carries local-only field {field}",
                raw_id(raw).unwrap_or_default()
            ),
        ));
    }
    Ok(())
}

/// Changes for a single table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableChangeSet {
    /// Records created since the cursor.
    pub created: Vec<DirtyRaw>,
    /// Records updated since the cursor.
    pub updated: Vec<DirtyRaw>,
    /// Ids of records deleted since the cursor.
    pub deleted: Vec<RecordId>,
}

impl TableChangeSet {
    /// Creates an empty table change set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if nothing changed.
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    /// Total number of listed changes.
    pub fn count(&self) -> usize {
        self.created.len() + self.updated.len() + self.deleted.len()
    }

    /// Iterates over every id named by this change set.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.created
            .iter()
            .chain(self.updated.iter())
            .filter_map(raw_id)
            .chain(self.deleted.iter().map(String::as_str))
    }

    /// Validates records received from the remote.
    ///
    /// Every raw record must pass [`validate_remote_raw`] and no id may
    /// appear twice across the three lists.
    pub fn validate_remote(&self, table: &str) -> ProtocolResult<()> {
        for raw in self.created.iter().chain(self.updated.iter()) {
            validate_remote_raw(table, raw)?;
        }
        self.check_unique_ids(table)
    }

    /// Checks that no id appears more than once across the three lists.
    pub fn check_unique_ids(&self, table: &str) -> ProtocolResult<()> {
        let mut seen = BTreeSet::new();
        for id in self.ids() {
            if !seen.insert(id) {
                return Err(ProtocolError::DuplicateId {
                    table: table.to_string(),
                    id: id.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Changes for every table, keyed by table name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeSet(BTreeMap<TableName, TableChangeSet>);

impl ChangeSet {
    /// Creates an empty change set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the changes for a table.
    pub fn table(&self, table: &str) -> Option<&TableChangeSet> {
        self.0.get(table)
    }

    /// Returns the changes for a table, inserting an empty entry if needed.
    pub fn table_mut(&mut self, table: &str) -> &mut TableChangeSet {
        self.0.entry(table.to_string()).or_default()
    }

    /// Sets the changes for a table.
    pub fn insert(&mut self, table: impl Into<TableName>, changes: TableChangeSet) {
        self.0.insert(table.into(), changes);
    }

    /// Builder-style variant of [`ChangeSet::insert`].
    pub fn with_table(mut self, table: impl Into<TableName>, changes: TableChangeSet) -> Self {
        self.insert(table, changes);
        self
    }

    /// Iterates over tables in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&TableName, &TableChangeSet)> {
        self.0.iter()
    }

    /// Table names present in the change set.
    pub fn table_names(&self) -> impl Iterator<Item = &TableName> {
        self.0.keys()
    }

    /// Returns true if no table has any change.
    pub fn is_empty(&self) -> bool {
        self.0.values().all(TableChangeSet::is_empty)
    }

    /// Total number of changes across tables.
    pub fn count(&self) -> usize {
        self.0.values().map(TableChangeSet::count).sum()
    }

    /// Validates every table as a remote payload.
    pub fn validate_remote(&self) -> ProtocolResult<()> {
        for (table, changes) in &self.0 {
            changes.validate_remote(table)?;
        }
        Ok(())
    }
}

impl FromIterator<(TableName, TableChangeSet)> for ChangeSet {
    fn from_iter<I: IntoIterator<Item = (TableName, TableChangeSet)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for ChangeSet {
    type Item = (TableName, TableChangeSet);
    type IntoIter = std::collections::btree_map::IntoIter<TableName, TableChangeSet>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Ids the remote declined to accept during a push, per table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RejectedIds(BTreeMap<TableName, BTreeSet<RecordId>>);

impl RejectedIds {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a rejected id.
    pub fn insert(&mut self, table: impl Into<TableName>, id: impl Into<RecordId>) {
        self.0.entry(table.into()).or_default().insert(id.into());
    }

    /// Builder-style variant of [`RejectedIds::insert`].
    pub fn with(mut self, table: impl Into<TableName>, id: impl Into<RecordId>) -> Self {
        self.insert(table, id);
        self
    }

    /// Returns true if the id was rejected for the table.
    pub fn contains(&self, table: &str, id: &str) -> bool {
        self.0.get(table).is_some_and(|ids| ids.contains(id))
    }

    /// Returns true if nothing was rejected.
    pub fn is_empty(&self) -> bool {
        self.0.values().all(BTreeSet::is_empty)
    }

    /// Number of rejected ids across tables.
    pub fn count(&self) -> usize {
        self.0.values().map(BTreeSet::len).sum()
    }

    /// Iterates over `(table, ids)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&TableName, &BTreeSet<RecordId>)> {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: Value) -> DirtyRaw {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn validates_remote_records() {
        assert!(validate_remote_raw("tasks", &raw(json!({"id": "t1", "name": "a"}))).is_ok());
        assert!(validate_remote_raw("tasks", &raw(json!({"name": "a"}))).is_err());
        assert!(validate_remote_raw("tasks", &raw(json!({"id": 5}))).is_err());
        assert!(validate_remote_raw("tasks", &raw(json!({"id": ""}))).is_err());
        assert!(validate_remote_raw("tasks", &raw(json!({"id": "t1", "_status": "synced"}))).is_err());
        assert!(validate_remote_raw("tasks", &raw(json!({"id": "t1", "_changed": ""}))).is_err());
    }

    #[test]
    fn duplicate_ids_across_lists() {
        let changes = TableChangeSet {
            created: vec![raw(json!({"id": "t1"}))],
            updated: vec![],
            deleted: vec!["t1".into()],
        };
        assert_eq!(
            changes.validate_remote("tasks"),
            Err(ProtocolError::DuplicateId {
                table: "tasks".into(),
                id: "t1".into()
            })
        );
    }

    #[test]
    fn empty_and_count() {
        let mut set = ChangeSet::new();
        assert!(set.is_empty());
        set.table_mut("tasks");
        assert!(set.is_empty());

        set.table_mut("tasks").deleted.push("t1".into());
        set.table_mut("projects")
            .created
            .push(raw(json!({"id": "p1"})));
        assert!(!set.is_empty());
        assert_eq!(set.count(), 2);
        assert_eq!(
            set.table_names().cloned().collect::<Vec<_>>(),
            vec!["projects".to_string(), "tasks".to_string()]
        );
    }

    #[test]
    fn missing_lists_default_to_empty() {
        let set: ChangeSet =
            serde_json::from_value(json!({"tasks": {"deleted": ["t1"]}})).unwrap();
        let tasks = set.table("tasks").unwrap();
        assert!(tasks.created.is_empty());
        assert_eq!(tasks.deleted, vec!["t1".to_string()]);
    }

    #[test]
    fn rejected_ids() {
        let rejected = RejectedIds::new().with("tasks", "t1").with("tasks", "t2");
        assert!(rejected.contains("tasks", "t1"));
        assert!(!rejected.contains("projects", "t1"));
        assert_eq!(rejected.count(), 2);

        let parsed: RejectedIds = serde_json::from_value(json!({"tasks": ["t1"]})).unwrap();
        assert!(parsed.contains("tasks", "t1"));
    }
}
