//! Schema migrations.
//!
//! Migrations are declared as an ordered list of steps per target version.
//! They must cover a contiguous range of versions, with no gaps or
//! duplicates, starting at version 2 or later.
//!
//! ## Usage
//!
//! ```ignore
//! use tidedb_core::{add_columns, create_table, ColumnSchema, Migration, SchemaMigrations, TableSchema};
//!
//! let migrations = SchemaMigrations::new(vec![
//!     Migration::new(2, vec![add_columns("posts", vec![ColumnSchema::string("subtitle")])]),
//!     Migration::new(3, vec![create_table(TableSchema::new("comments", []))]),
//! ])?;
//! assert_eq!(migrations.min_version(), 1);
//! ```

use crate::error::{StoreError, StoreResult};
use crate::schema::{ColumnSchema, TableSchema};
use serde::{Deserialize, Serialize};
use tidedb_sync_protocol::{SchemaVersion, TableName};

/// A single migration step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MigrationStep {
    /// Creates a new table.
    CreateTable {
        /// Schema of the new table.
        schema: TableSchema,
    },
    /// Adds columns to an existing table.
    AddColumns {
        /// Table gaining the columns.
        table: TableName,
        /// The new columns.
        columns: Vec<ColumnSchema>,
    },
    /// Runs raw SQL against the storage engine.
    Sql {
        /// Statement to execute.
        sql: String,
    },
}

impl MigrationStep {
    /// Short name of the step type.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateTable { .. } => "create_table",
            Self::AddColumns { .. } => "add_columns",
            Self::Sql { .. } => "sql",
        }
    }
}

/// Creates a create-table step.
pub fn create_table(schema: TableSchema) -> MigrationStep {
    MigrationStep::CreateTable { schema }
}

/// Creates an add-columns step.
pub fn add_columns(table: impl Into<TableName>, columns: Vec<ColumnSchema>) -> MigrationStep {
    MigrationStep::AddColumns {
        table: table.into(),
        columns,
    }
}

/// Creates a raw SQL step.
pub fn unsafe_execute_sql(sql: impl Into<String>) -> MigrationStep {
    MigrationStep::Sql { sql: sql.into() }
}

/// Steps that bring the schema to `to_version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Migration {
    /// Version reached after the steps run.
    pub to_version: SchemaVersion,
    /// Steps in execution order.
    pub steps: Vec<MigrationStep>,
}

impl Migration {
    /// Creates a migration.
    pub fn new(to_version: SchemaVersion, steps: Vec<MigrationStep>) -> Self {
        Self { to_version, steps }
    }
}

/// A validated, sorted list of migrations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "MigrationsDef", into = "MigrationsDef")]
pub struct SchemaMigrations {
    sorted: Vec<Migration>,
    min_version: SchemaVersion,
    max_version: SchemaVersion,
}

#[derive(Serialize, Deserialize)]
struct MigrationsDef {
    migrations: Vec<Migration>,
}

impl TryFrom<MigrationsDef> for SchemaMigrations {
    type Error = StoreError;

    fn try_from(def: MigrationsDef) -> StoreResult<Self> {
        Self::new(def.migrations)
    }
}

impl From<SchemaMigrations> for MigrationsDef {
    fn from(migrations: SchemaMigrations) -> Self {
        Self {
            migrations: migrations.sorted,
        }
    }
}

impl SchemaMigrations {
    /// Validates and sorts migrations.
    ///
    /// Fails if any migration targets a version below 2, or if the versions
    /// have gaps or duplicates once sorted.
    pub fn new(migrations: Vec<Migration>) -> StoreResult<Self> {
        if let Some(m) = migrations.iter().find(|m| m.to_version < 2) {
            return Err(StoreError::invalid_migrations(format!(
                "invalid migration to version {}, minimum possible migration version is 2",
                m.to_version
            )));
        }

        let mut sorted = migrations;
        sorted.sort_by_key(|m| m.to_version);

        let min_version = sorted.first().map_or(1, |m| m.to_version - 1);
        let max_version = sorted.last().map_or(1, |m| m.to_version);

        for pair in sorted.windows(2) {
            let (covered, next) = (pair[0].to_version, pair[1].to_version);
            if next != covered + 1 {
                return Err(StoreError::invalid_migrations(format!(
                    "migrations cover versions {min_version} to {covered}, but the next migration \
                     is to version {next}; migrations must be listed without gaps or duplicates"
                )));
            }
        }

        Ok(Self {
            sorted,
            min_version,
            max_version,
        })
    }

    /// Oldest version that can be migrated from.
    pub fn min_version(&self) -> SchemaVersion {
        self.min_version
    }

    /// Newest version that can be migrated to.
    pub fn max_version(&self) -> SchemaVersion {
        self.max_version
    }

    /// Migrations sorted by target version.
    pub fn migrations(&self) -> &[Migration] {
        &self.sorted
    }

    /// Returns true if no migration is defined.
    pub fn is_empty(&self) -> bool {
        self.sorted.is_empty()
    }

    /// Steps needed to go from `from` to `to`, in order.
    ///
    /// Returns `None` when the range is not covered by the migrations.
    pub fn steps_for_migration(
        &self,
        from: SchemaVersion,
        to: SchemaVersion,
    ) -> Option<Vec<&MigrationStep>> {
        if from < self.min_version || to > self.max_version {
            return None;
        }
        Some(
            self.sorted
                .iter()
                .filter(|m| m.to_version > from && m.to_version <= to)
                .flat_map(|m| m.steps.iter())
                .collect(),
        )
    }
}
