//! In-memory local store.
//!
//! `MemoryStore` keeps every table in memory behind a single mutex.
//! A transaction works on a copy of the state and swaps it in on success,
//! so a failed transaction leaves no trace.

use crate::error::{StoreError, StoreResult};
use crate::migrations::SchemaMigrations;
use crate::record::{RawRecord, RecordStatus};
use crate::schema::AppSchema;
use crate::store::{LocalStore, StoreTxn};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tidedb_sync_protocol::{RecordId, TableName};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct TableData {
    records: BTreeMap<RecordId, RawRecord>,
    tombstones: BTreeSet<RecordId>,
}

#[derive(Debug, Clone, Default)]
struct StoreState {
    tables: BTreeMap<TableName, TableData>,
    local: BTreeMap<String, String>,
    generation: u64,
}

impl StoreState {
    fn empty(schema: &AppSchema, generation: u64) -> Self {
        Self {
            tables: schema
                .tables()
                .map(|t| (t.name.clone(), TableData::default()))
                .collect(),
            local: BTreeMap::new(),
            generation,
        }
    }
}

/// Transactional in-memory implementation of [`LocalStore`].
pub struct MemoryStore {
    schema: AppSchema,
    migrations: Option<SchemaMigrations>,
    state: Mutex<StoreState>,
    writes: AtomicU64,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new(schema: AppSchema) -> Self {
        let state = StoreState::empty(&schema, 0);
        Self {
            schema,
            migrations: None,
            state: Mutex::new(state),
            writes: AtomicU64::new(0),
        }
    }

    /// Creates an empty store with schema migrations.
    pub fn with_migrations(schema: AppSchema, migrations: SchemaMigrations) -> Self {
        Self {
            migrations: Some(migrations),
            ..Self::new(schema)
        }
    }

    fn write<R>(&self, f: impl FnOnce(&mut MemoryTxn<'_>) -> StoreResult<R>) -> StoreResult<R> {
        self.commit(f)
    }

    fn commit<R, E>(&self, f: impl FnOnce(&mut MemoryTxn<'_>) -> Result<R, E>) -> Result<R, E> {
        let mut guard = self.state.lock();
        let mut working = guard.clone();
        let mut txn = MemoryTxn {
            schema: &self.schema,
            state: &mut working,
            writes: 0,
        };
        let result = f(&mut txn);
        let writes = txn.writes;
        match result {
            Ok(value) => {
                *guard = working;
                self.writes.fetch_add(writes, Ordering::SeqCst);
                Ok(value)
            }
            Err(e) => {
                debug!(discarded_writes = writes, "transaction rolled back");
                Err(e)
            }
        }
    }

    /// Creates a record with a random id unless `build` sets one.
    ///
    /// The record starts as `created` with an empty changed set.
    pub fn create<F>(&self, table: &str, build: F) -> StoreResult<RawRecord>
    where
        F: FnOnce(&mut RawRecord),
    {
        self.write(|txn| {
            let mut record = RawRecord::new_created(Uuid::new_v4().to_string());
            build(&mut record);
            record.status = RecordStatus::Created;
            record.changed.clear();
            txn.create_record(table, record.clone())?;
            Ok(record)
        })
    }

    /// Inserts a record that is already in sync with the remote.
    pub fn insert_synced<F>(&self, table: &str, id: &str, build: F) -> StoreResult<RawRecord>
    where
        F: FnOnce(&mut RawRecord),
    {
        self.write(|txn| {
            let mut record = RawRecord::new_synced(id);
            build(&mut record);
            record.id = id.to_string();
            record.mark_synced();
            txn.create_record(table, record.clone())?;
            Ok(record)
        })
    }

    /// Updates a record through `change`.
    ///
    /// Values set with [`RawRecord::set`] are tracked as changed columns.
    pub fn update<F>(&self, table: &str, id: &str, change: F) -> StoreResult<RawRecord>
    where
        F: FnOnce(&mut RawRecord),
    {
        self.write(|txn| {
            let mut record = txn
                .find(table, id)?
                .ok_or_else(|| StoreError::not_found(table, id))?;
            change(&mut record);
            record.id = id.to_string();
            txn.update_record(table, record.clone())?;
            Ok(record)
        })
    }

    /// Deletes a record, leaving a tombstone to be pushed.
    pub fn mark_as_deleted(&self, table: &str, id: &str) -> StoreResult<()> {
        self.write(|txn| {
            if !txn.destroy_permanently(table, id)? {
                return Err(StoreError::not_found(table, id));
            }
            txn.add_tombstone(table, id)
        })
    }

    /// Removes a record without leaving a tombstone.
    pub fn destroy_permanently(&self, table: &str, id: &str) -> StoreResult<()> {
        self.write(|txn| {
            if txn.destroy_permanently(table, id)? {
                Ok(())
            } else {
                Err(StoreError::not_found(table, id))
            }
        })
    }

    /// Looks up a live record.
    pub fn find(&self, table: &str, id: &str) -> StoreResult<Option<RawRecord>> {
        self.read(|txn| txn.find(table, id))
    }

    /// Every live record of a table, ordered by id.
    pub fn all(&self, table: &str) -> StoreResult<Vec<RawRecord>> {
        self.read(|txn| txn.query_all(table))
    }

    /// Tombstoned ids of a table.
    pub fn tombstones(&self, table: &str) -> StoreResult<Vec<RecordId>> {
        self.read(|txn| txn.tombstone_ids(table))
    }

    /// Writes a bookkeeping value.
    pub fn set_local(&self, key: &str, value: &str) {
        self.state.lock().local.insert(key.to_string(), value.to_string());
    }

    /// Removes a bookkeeping value.
    pub fn remove_local(&self, key: &str) {
        self.state.lock().local.remove(key);
    }

    /// Wipes every record, tombstone and bookkeeping value.
    ///
    /// The store generation is bumped so that an in-flight sync notices.
    pub fn unsafe_reset(&self) {
        let mut state = self.state.lock();
        let generation = state.generation + 1;
        *state = StoreState::empty(&self.schema, generation);
        debug!(generation, "store reset");
    }

    /// Number of committed record and tombstone mutations.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("schema_version", &self.schema.version())
            .field("generation", &self.generation())
            .field("writes", &self.write_count())
            .finish()
    }
}

impl LocalStore for MemoryStore {
    fn schema(&self) -> &AppSchema {
        &self.schema
    }

    fn migrations(&self) -> Option<&SchemaMigrations> {
        self.migrations.as_ref()
    }

    fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    fn get_local(&self, key: &str) -> Option<String> {
        self.state.lock().local.get(key).cloned()
    }

    fn transaction<R, E, F>(&self, f: F) -> Result<R, E>
    where
        E: From<StoreError>,
        F: FnOnce(&mut dyn StoreTxn) -> Result<R, E>,
    {
        self.commit(|txn| f(txn))
    }

    fn read<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&dyn StoreTxn) -> R,
    {
        let mut guard = self.state.lock();
        let txn = MemoryTxn {
            schema: &self.schema,
            state: &mut *guard,
            writes: 0,
        };
        f(&txn)
    }
}

struct MemoryTxn<'a> {
    schema: &'a AppSchema,
    state: &'a mut StoreState,
    writes: u64,
}

impl MemoryTxn<'_> {
    fn table(&self, name: &str) -> StoreResult<&TableData> {
        self.state
            .tables
            .get(name)
            .ok_or_else(|| StoreError::unknown_table(name))
    }

    fn table_mut(&mut self, name: &str) -> StoreResult<&mut TableData> {
        self.state
            .tables
            .get_mut(name)
            .ok_or_else(|| StoreError::unknown_table(name))
    }

    fn add_tombstone(&mut self, table: &str, id: &str) -> StoreResult<()> {
        if self.table_mut(table)?.tombstones.insert(id.to_string()) {
            self.writes += 1;
        }
        Ok(())
    }
}

impl StoreTxn for MemoryTxn<'_> {
    fn schema(&self) -> &AppSchema {
        self.schema
    }

    fn generation(&self) -> u64 {
        self.state.generation
    }

    fn get_local(&self, key: &str) -> Option<String> {
        self.state.local.get(key).cloned()
    }

    fn set_local(&mut self, key: &str, value: &str) {
        self.state.local.insert(key.to_string(), value.to_string());
    }

    fn query_by_status(
        &self,
        table: &str,
        statuses: &[RecordStatus],
    ) -> StoreResult<Vec<RawRecord>> {
        Ok(self
            .table(table)?
            .records
            .values()
            .filter(|r| statuses.contains(&r.status))
            .cloned()
            .collect())
    }

    fn query_by_ids(&self, table: &str, ids: &[RecordId]) -> StoreResult<Vec<RawRecord>> {
        let data = self.table(table)?;
        Ok(ids
            .iter()
            .filter_map(|id| data.records.get(id))
            .cloned()
            .collect())
    }

    fn query_all(&self, table: &str) -> StoreResult<Vec<RawRecord>> {
        Ok(self.table(table)?.records.values().cloned().collect())
    }

    fn tombstone_ids(&self, table: &str) -> StoreResult<Vec<RecordId>> {
        Ok(self.table(table)?.tombstones.iter().cloned().collect())
    }

    fn purge_tombstones(&mut self, table: &str, ids: &[RecordId]) -> StoreResult<usize> {
        let data = self.table_mut(table)?;
        let removed = ids.iter().filter(|id| data.tombstones.remove(*id)).count();
        self.writes += removed as u64;
        Ok(removed)
    }

    fn create_record(&mut self, table: &str, record: RawRecord) -> StoreResult<()> {
        self.schema
            .require_table(table)?
            .check_columns(record.columns.keys())?;
        let data = self.table_mut(table)?;
        if data.tombstones.contains(&record.id) {
            return Err(StoreError::Tombstoned {
                table: table.to_string(),
                id: record.id,
            });
        }
        if data.records.contains_key(&record.id) {
            return Err(StoreError::RecordAlreadyExists {
                table: table.to_string(),
                id: record.id,
            });
        }
        data.records.insert(record.id.clone(), record);
        self.writes += 1;
        Ok(())
    }

    fn update_record(&mut self, table: &str, record: RawRecord) -> StoreResult<()> {
        self.schema
            .require_table(table)?
            .check_columns(record.columns.keys())?;
        let data = self.table_mut(table)?;
        match data.records.get_mut(&record.id) {
            Some(existing) => *existing = record,
            None => return Err(StoreError::not_found(table, record.id)),
        }
        self.writes += 1;
        Ok(())
    }

    fn destroy_permanently(&mut self, table: &str, id: &str) -> StoreResult<bool> {
        let removed = self.table_mut(table)?.records.remove(id).is_some();
        if removed {
            self.writes += 1;
        }
        Ok(removed)
    }

    fn is_tombstoned(&self, table: &str, id: &str) -> StoreResult<bool> {
        Ok(self.table(table)?.tombstones.contains(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnSchema, TableSchema};
    use serde_json::json;

    fn store() -> MemoryStore {
        let schema = AppSchema::new(
            1,
            [TableSchema::new(
                "tasks",
                [ColumnSchema::string("name"), ColumnSchema::boolean("done")],
            )],
        )
        .unwrap();
        MemoryStore::new(schema)
    }

    #[test]
    fn create_update_delete_lifecycle() {
        let store = store();
        let created = store.create("tasks", |r| r.set("name", "a")).unwrap();
        assert_eq!(created.status, RecordStatus::Created);
        assert!(created.changed.is_empty());

        let updated = store
            .update("tasks", &created.id, |r| r.set("done", true))
            .unwrap();
        assert_eq!(updated.status, RecordStatus::Created);

        store.mark_as_deleted("tasks", &created.id).unwrap();
        assert!(store.find("tasks", &created.id).unwrap().is_none());
        assert_eq!(store.tombstones("tasks").unwrap(), vec![created.id.clone()]);
        assert_eq!(store.write_count(), 4);
    }

    #[test]
    fn synced_record_becomes_updated() {
        let store = store();
        store.insert_synced("tasks", "t1", |r| r.set("name", "a")).unwrap();
        let record = store.find("tasks", "t1").unwrap().unwrap();
        assert_eq!(record.status, RecordStatus::Synced);

        let record = store.update("tasks", "t1", |r| r.set("name", "b")).unwrap();
        assert_eq!(record.status, RecordStatus::Updated);
        assert_eq!(record.changed.iter().collect::<Vec<_>>(), vec!["name"]);
        assert_eq!(record.get("name"), Some(&json!("b")));
    }

    #[test]
    fn failed_transaction_rolls_back() {
        let store = store();
        let result: StoreResult<()> = store.transaction(|txn| {
            txn.create_record("tasks", RawRecord::new_synced("t1"))?;
            txn.set_local("key", "value");
            Err(StoreError::aborted("test"))
        });
        assert!(result.is_err());
        assert!(store.find("tasks", "t1").unwrap().is_none());
        assert_eq!(store.get_local("key"), None);
        assert_eq!(store.write_count(), 0);
    }

    #[test]
    fn rejects_unknown_tables_and_columns() {
        let store = store();
        assert!(matches!(
            store.create("nope", |_| {}),
            Err(StoreError::UnknownTable { .. })
        ));
        assert!(matches!(
            store.create("tasks", |r| r.set("bogus", 1)),
            Err(StoreError::UnknownColumn { .. })
        ));
    }

    #[test]
    fn tombstoned_ids_cannot_be_recreated() {
        let store = store();
        store.insert_synced("tasks", "t1", |_| {}).unwrap();
        store.mark_as_deleted("tasks", "t1").unwrap();
        let err = store.insert_synced("tasks", "t1", |_| {}).unwrap_err();
        assert!(matches!(err, StoreError::Tombstoned { .. }));
    }

    #[test]
    fn reset_bumps_generation() {
        let store = store();
        store.insert_synced("tasks", "t1", |_| {}).unwrap();
        store.set_local("cursor", "10");
        assert_eq!(store.generation(), 0);

        store.unsafe_reset();
        assert_eq!(store.generation(), 1);
        assert!(store.all("tasks").unwrap().is_empty());
        assert_eq!(store.get_local("cursor"), None);
    }

    #[test]
    fn bookkeeping_writes_are_not_counted() {
        let store = store();
        store.set_local("cursor", "10");
        store
            .transaction::<_, StoreError, _>(|txn| {
                txn.set_local("cursor", "20");
                Ok(())
            })
            .unwrap();
        assert_eq!(store.get_local("cursor").as_deref(), Some("20"));
        assert_eq!(store.write_count(), 0);
    }
}
