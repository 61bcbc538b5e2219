//! Local store interface used by the sync engine.
//!
//! The engine never touches storage directly. It reads and writes through
//! a [`StoreTxn`] handed out by [`LocalStore::transaction`], which commits
//! all of its writes or none of them.

use crate::error::{StoreError, StoreResult};
use crate::migrations::SchemaMigrations;
use crate::record::{RawRecord, RecordStatus};
use crate::schema::AppSchema;
use tidedb_sync_protocol::RecordId;

/// Operations available inside a store transaction.
pub trait StoreTxn {
    /// Schema of the store.
    fn schema(&self) -> &AppSchema;

    /// Store generation, bumped whenever the store is wiped.
    fn generation(&self) -> u64;

    /// Reads a bookkeeping value.
    fn get_local(&self, key: &str) -> Option<String>;

    /// Writes a bookkeeping value.
    fn set_local(&mut self, key: &str, value: &str);

    /// Records of a table whose status is one of `statuses`.
    fn query_by_status(&self, table: &str, statuses: &[RecordStatus])
        -> StoreResult<Vec<RawRecord>>;

    /// Records of a table with the given ids. Missing ids are skipped.
    fn query_by_ids(&self, table: &str, ids: &[RecordId]) -> StoreResult<Vec<RawRecord>>;

    /// Every live record of a table.
    fn query_all(&self, table: &str) -> StoreResult<Vec<RawRecord>>;

    /// Ids of the table's tombstones.
    fn tombstone_ids(&self, table: &str) -> StoreResult<Vec<RecordId>>;

    /// Erases tombstones. Returns how many were removed.
    fn purge_tombstones(&mut self, table: &str, ids: &[RecordId]) -> StoreResult<usize>;

    /// Inserts a new record.
    fn create_record(&mut self, table: &str, record: RawRecord) -> StoreResult<()>;

    /// Replaces an existing record.
    fn update_record(&mut self, table: &str, record: RawRecord) -> StoreResult<()>;

    /// Removes a record without leaving a tombstone. Returns false if absent.
    fn destroy_permanently(&mut self, table: &str, id: &str) -> StoreResult<bool>;

    /// Looks up a single record.
    fn find(&self, table: &str, id: &str) -> StoreResult<Option<RawRecord>> {
        Ok(self
            .query_by_ids(table, &[id.to_string()])?
            .into_iter()
            .next())
    }

    /// Returns true if the id is tombstoned.
    fn is_tombstoned(&self, table: &str, id: &str) -> StoreResult<bool> {
        Ok(self.tombstone_ids(table)?.iter().any(|t| t == id))
    }
}

/// A local store the sync engine can synchronize.
pub trait LocalStore: Send + Sync {
    /// Schema of the store.
    fn schema(&self) -> &AppSchema;

    /// Schema migrations, if the application defines any.
    fn migrations(&self) -> Option<&SchemaMigrations>;

    /// Current store generation.
    fn generation(&self) -> u64;

    /// Reads a bookkeeping value outside of a transaction.
    fn get_local(&self, key: &str) -> Option<String>;

    /// Runs `f` atomically.
    ///
    /// Writes made through the transaction are committed only if `f`
    /// returns `Ok`.
    fn transaction<R, E, F>(&self, f: F) -> Result<R, E>
    where
        E: From<StoreError>,
        F: FnOnce(&mut dyn StoreTxn) -> Result<R, E>;

    /// Runs a read-only closure against a consistent view of the store.
    fn read<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&dyn StoreTxn) -> R;
}
