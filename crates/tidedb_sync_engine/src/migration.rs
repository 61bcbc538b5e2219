//! Migration-aware pulls.
//!
//! When the local schema gained tables or columns since the last pull, the
//! remote is told which ones, so it can send data the client could not
//! store before.

use crate::error::{SyncError, SyncResult};
use tidedb_core::{AppSchema, MigrationStep, SchemaMigrations};
use tidedb_sync_protocol::{MigrationSyncChanges, SchemaVersion, SyncCursor, TableColumns, TableName};

/// What to tell the remote about the schema on the next pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationInfo {
    /// Current schema version.
    pub schema_version: SchemaVersion,
    /// Tables and columns gained since the last pull, if any.
    pub migration: Option<MigrationSyncChanges>,
    /// Whether the schema version must be stored with the new cursor.
    pub should_save_schema_version: bool,
}

/// Replays migration steps into the tables created and columns added.
///
/// Columns added to a table created within the same steps are omitted.
/// Only create-table and add-columns steps can be replayed.
pub fn get_sync_changes(
    steps: &[&MigrationStep],
) -> SyncResult<(Vec<TableName>, Vec<TableColumns>)> {
    let mut tables: Vec<TableName> = Vec::new();
    for step in steps {
        match step {
            MigrationStep::CreateTable { schema } => {
                if !tables.contains(&schema.name) {
                    tables.push(schema.name.clone());
                }
            }
            MigrationStep::AddColumns { .. } => {}
            other => {
                return Err(SyncError::invalid_migration(format!(
                    "migration step type {} cannot be replayed for a migration sync",
                    other.kind()
                )))
            }
        }
    }

    let mut columns: Vec<TableColumns> = Vec::new();
    for step in steps {
        let MigrationStep::AddColumns { table, columns: added } = step else {
            continue;
        };
        if tables.contains(table) {
            continue;
        }
        let index = match columns.iter().position(|c| &c.table == table) {
            Some(index) => index,
            None => {
                columns.push(TableColumns {
                    table: table.clone(),
                    columns: Vec::new(),
                });
                columns.len() - 1
            }
        };
        let entry = &mut columns[index].columns;
        for column in added {
            if !entry.contains(&column.name) {
                entry.push(column.name.clone());
            }
        }
    }

    Ok((tables, columns))
}

/// Computes the schema part of a pull request.
///
/// On the first sync, or when migration syncs are disabled, no descriptor
/// is produced. Otherwise the steps between the last pulled schema version
/// (or the version migration syncs were enabled at) and the current version
/// are replayed.
pub fn get_migration_info(
    schema: &AppSchema,
    migrations: Option<&SchemaMigrations>,
    last_pulled_at: Option<&SyncCursor>,
    last_pulled_schema_version: Option<SchemaVersion>,
    migrations_enabled_at_version: Option<SchemaVersion>,
) -> SyncResult<MigrationInfo> {
    let schema_version = schema.version();
    let is_first_sync = last_pulled_at.is_none();
    let enabled_at = match migrations_enabled_at_version {
        Some(enabled_at) => enabled_at,
        None => {
            return Ok(MigrationInfo {
                schema_version,
                migration: None,
                should_save_schema_version: is_first_sync,
            })
        }
    };

    if enabled_at > schema_version {
        return Err(SyncError::invalid_migration(format!(
            "migrations enabled at version {enabled_at}, which is greater than the current \
             schema version {schema_version}"
        )));
    }
    let migrations = migrations.ok_or_else(|| {
        SyncError::invalid_migration("migration syncs cannot be enabled on a store without migrations")
    })?;
    if enabled_at < migrations.min_version() {
        return Err(SyncError::invalid_migration(format!(
            "migrations enabled at version {enabled_at} is too low: migrations only cover \
             versions from {}",
            migrations.min_version()
        )));
    }
    if let Some(last) = last_pulled_schema_version {
        if last > schema_version {
            return Err(SyncError::invalid_migration(format!(
                "Last synced schema version ({last}) is greater than current schema version \
                 ({schema_version}). This suggests the database was downgraded, which is not \
                 supported"
            )));
        }
    }

    let should_save_schema_version =
        is_first_sync || last_pulled_schema_version != Some(schema_version);

    let from = last_pulled_schema_version.unwrap_or(enabled_at);
    let migration = if !is_first_sync && from < schema_version {
        let steps = migrations
            .steps_for_migration(from, schema_version)
            .ok_or_else(|| {
                SyncError::invalid_migration(format!(
                    "migrations from version {from} to {schema_version} are not available"
                ))
            })?;
        let (tables, columns) = get_sync_changes(&steps)?;
        Some(MigrationSyncChanges {
            from,
            tables,
            columns,
        })
    } else {
        None
    };

    Ok(MigrationInfo {
        schema_version,
        migration,
        should_save_schema_version,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidedb_core::{
        add_columns, create_table, unsafe_execute_sql, ColumnSchema, Migration, TableSchema,
    };

    fn schema(version: SchemaVersion) -> AppSchema {
        AppSchema::new(
            version,
            [
                TableSchema::new("posts", [ColumnSchema::string("subtitle")]),
                TableSchema::new("comments", [ColumnSchema::string("body")]),
            ],
        )
        .unwrap()
    }

    fn migrations() -> SchemaMigrations {
        SchemaMigrations::new(vec![
            Migration::new(
                3,
                vec![create_table(TableSchema::new("comments", [ColumnSchema::string("body")]))],
            ),
            Migration::new(2, vec![add_columns("posts", vec![ColumnSchema::string("subtitle")])]),
        ])
        .unwrap()
    }

    fn cursor() -> SyncCursor {
        SyncCursor::timestamp(1000)
    }

    #[test]
    fn diffs_from_version_one() {
        let info =
            get_migration_info(&schema(3), Some(&migrations()), Some(&cursor()), Some(1), Some(1))
                .unwrap();
        let migration = info.migration.unwrap();
        assert_eq!(migration.from, 1);
        assert_eq!(migration.tables, vec!["comments".to_string()]);
        assert_eq!(
            migration.columns,
            vec![TableColumns {
                table: "posts".into(),
                columns: vec!["subtitle".into()],
            }]
        );
        assert!(info.should_save_schema_version);
    }

    #[test]
    fn diffs_from_version_two() {
        let info =
            get_migration_info(&schema(3), Some(&migrations()), Some(&cursor()), Some(2), Some(1))
                .unwrap();
        let migration = info.migration.unwrap();
        assert_eq!(migration.tables, vec!["comments".to_string()]);
        assert!(migration.columns.is_empty());
    }

    #[test]
    fn first_sync_has_no_descriptor_but_saves_version() {
        let info = get_migration_info(&schema(3), Some(&migrations()), None, None, Some(1)).unwrap();
        assert_eq!(info.schema_version, 3);
        assert_eq!(info.migration, None);
        assert!(info.should_save_schema_version);

        let info = get_migration_info(&schema(3), None, None, None, None).unwrap();
        assert!(info.should_save_schema_version);
    }

    #[test]
    fn disabled_migrations_have_no_descriptor() {
        let info = get_migration_info(&schema(3), Some(&migrations()), Some(&cursor()), Some(1), None)
            .unwrap();
        assert_eq!(info.migration, None);
        assert!(!info.should_save_schema_version);
    }

    #[test]
    fn same_version_has_no_descriptor() {
        let info =
            get_migration_info(&schema(3), Some(&migrations()), Some(&cursor()), Some(3), Some(1))
                .unwrap();
        assert_eq!(info.migration, None);
        assert!(!info.should_save_schema_version);
    }

    #[test]
    fn falls_back_to_enabled_version() {
        let info =
            get_migration_info(&schema(3), Some(&migrations()), Some(&cursor()), None, Some(2))
                .unwrap();
        assert_eq!(info.migration.unwrap().from, 2);
    }

    #[test]
    fn configuration_errors() {
        let m = migrations();
        let c = cursor();
        assert!(get_migration_info(&schema(3), Some(&m), Some(&c), None, Some(4)).is_err());
        assert!(get_migration_info(&schema(3), None, Some(&c), None, Some(2)).is_err());
        assert!(get_migration_info(&schema(3), Some(&m), Some(&c), None, Some(0)).is_err());
        let err = get_migration_info(&schema(3), Some(&m), Some(&c), Some(4), Some(1)).unwrap_err();
        assert!(err
            .to_string()
            .contains("Last synced schema version (4) is greater than current schema version (3)"));
    }

    #[test]
    fn sql_steps_cannot_be_replayed() {
        let sql = unsafe_execute_sql("create index x on posts (subtitle)");
        assert!(get_sync_changes(&[&sql]).is_err());
    }

    #[test]
    fn duplicate_columns_are_merged() {
        let a = add_columns("posts", vec![ColumnSchema::string("a"), ColumnSchema::string("b")]);
        let b = add_columns("posts", vec![ColumnSchema::string("b"), ColumnSchema::string("c")]);
        let c = add_columns("notes", vec![ColumnSchema::string("x")]);
        let created = create_table(TableSchema::new("notes", []));
        let (tables, columns) = get_sync_changes(&[&a, &created, &b, &c]).unwrap();
        assert_eq!(tables, vec!["notes".to_string()]);
        assert_eq!(
            columns,
            vec![TableColumns {
                table: "posts".into(),
                columns: vec!["a".into(), "b".into(), "c".into()],
            }]
        );
    }
}
