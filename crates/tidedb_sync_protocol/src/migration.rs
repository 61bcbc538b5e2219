//! Migration descriptor sent with a pull request.

use crate::change_set::{SchemaVersion, TableName};
use serde::{Deserialize, Serialize};

/// Columns newly added to a pre-existing table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableColumns {
    /// The table that gained columns.
    pub table: TableName,
    /// Names of the added columns.
    pub columns: Vec<String>,
}

/// What the client schema gained since the last synced schema version.
///
/// The remote can use this to send data for tables and columns the client
/// could not store before.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationSyncChanges {
    /// Version the client migrated from.
    pub from: SchemaVersion,
    /// Tables created since `from`.
    pub tables: Vec<TableName>,
    /// Columns added to tables that already existed at `from`.
    pub columns: Vec<TableColumns>,
}

impl MigrationSyncChanges {
    /// Returns the added columns for a table.
    pub fn columns_for(&self, table: &str) -> Option<&[String]> {
        self.columns
            .iter()
            .find(|c| c.table == table)
            .map(|c| c.columns.as_slice())
    }

    /// Returns true if nothing was added.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty() && self.columns.is_empty()
    }
}
