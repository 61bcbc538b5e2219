//! Integration tests for the local store interface.

use serde_json::json;
use tidedb_core::{
    add_columns, AppSchema, ColumnSchema, LocalStore, MemoryStore, Migration, RawRecord,
    RecordStatus, SchemaMigrations, StoreError, StoreTxn, TableSchema,
};

fn schema() -> AppSchema {
    AppSchema::new(
        2,
        [
            TableSchema::new(
                "tasks",
                [ColumnSchema::string("name"), ColumnSchema::boolean("done")],
            ),
            TableSchema::new("projects", [ColumnSchema::string("name").indexed()]),
        ],
    )
    .unwrap()
}

#[derive(Debug, PartialEq)]
enum AppError {
    Store(StoreError),
    Cancelled,
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

/// Writes a record and a bookkeeping value, then fails if asked to.
fn write_then<S: LocalStore>(store: &S, fail: bool) -> Result<(), AppError> {
    store.transaction(|txn| -> Result<(), AppError> {
        let mut record = RawRecord::new_synced("t1");
        record.set_raw("name", "from remote");
        txn.create_record("tasks", record)?;
        txn.set_local("cursor", "10");
        if fail {
            return Err(AppError::Cancelled);
        }
        Ok(())
    })
}

#[test]
fn transactions_are_all_or_nothing() {
    let store = MemoryStore::new(schema());

    assert_eq!(write_then(&store, true), Err(AppError::Cancelled));
    assert!(store.find("tasks", "t1").unwrap().is_none());
    assert_eq!(store.get_local("cursor"), None);
    assert_eq!(store.write_count(), 0);

    write_then(&store, false).unwrap();
    assert_eq!(store.get_local("cursor"), Some("10".into()));
    assert_eq!(store.write_count(), 1);
    assert_eq!(
        write_then(&store, false),
        Err(AppError::Store(StoreError::RecordAlreadyExists {
            table: "tasks".into(),
            id: "t1".into(),
        }))
    );
}

#[test]
fn reads_see_a_consistent_view() {
    let store = MemoryStore::new(schema());
    store.insert_synced("tasks", "t1", |r| r.set_raw("name", "a")).unwrap();
    store.create("tasks", |r| r.id = "t2".into()).unwrap();
    store.insert_synced("tasks", "t3", |_| {}).unwrap();
    store.update("tasks", "t3", |r| r.set("done", true)).unwrap();
    store.insert_synced("projects", "p1", |_| {}).unwrap();
    store.mark_as_deleted("projects", "p1").unwrap();

    store.read(|txn: &dyn StoreTxn| {
        let pending = txn.query_by_status("tasks", &RecordStatus::PENDING).unwrap();
        let ids: Vec<&str> = pending.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["t2", "t3"]);

        let found = txn
            .query_by_ids("tasks", &["t1".to_string(), "missing".to_string()])
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].get("name"), Some(&json!("a")));

        assert_eq!(txn.tombstone_ids("projects").unwrap(), vec!["p1".to_string()]);
        assert!(txn.is_tombstoned("projects", "p1").unwrap());
        assert!(txn.query_all("projects").unwrap().is_empty());
        assert!(txn.query_all("comments").is_err());
    });
}

#[test]
fn synced_tombstones_can_be_purged_and_recreated() {
    let store = MemoryStore::new(schema());
    store.insert_synced("tasks", "t1", |_| {}).unwrap();
    store.mark_as_deleted("tasks", "t1").unwrap();
    assert!(store.insert_synced("tasks", "t1", |_| {}).is_err());

    store
        .transaction(|txn| -> Result<(), StoreError> {
            assert_eq!(txn.purge_tombstones("tasks", &["t1".to_string()])?, 1);
            assert_eq!(txn.purge_tombstones("tasks", &["t1".to_string()])?, 0);
            Ok(())
        })
        .unwrap();

    let record = store.insert_synced("tasks", "t1", |_| {}).unwrap();
    assert_eq!(record.status, RecordStatus::Synced);
}

#[test]
fn migrations_travel_with_the_store() {
    let migrations = SchemaMigrations::new(vec![Migration::new(
        2,
        vec![add_columns("tasks", vec![ColumnSchema::boolean("done")])],
    )])
    .unwrap();
    let store = MemoryStore::with_migrations(schema(), migrations);

    let migrations = store.migrations().unwrap();
    assert_eq!(migrations.min_version(), 1);
    assert_eq!(migrations.max_version(), store.schema().version());
    assert_eq!(migrations.steps_for_migration(1, 2).unwrap().len(), 1);
}
