//! Migration-info command implementation.

use super::{read_json, CliResult};
use std::path::Path;
use tidedb_core::{AppSchema, SchemaMigrations};
use tidedb_sync_engine::get_migration_info;
use tidedb_sync_protocol::{to_json, MigrationSyncChanges, SchemaVersion, SyncCursor};
use tracing::debug;

/// Computes the descriptor a client migrated from `from` reports on its
/// next pull, or `None` if it has nothing to report.
pub fn describe(
    migrations: &SchemaMigrations,
    schema_version: SchemaVersion,
    from: SchemaVersion,
) -> CliResult<Option<MigrationSyncChanges>> {
    let schema = AppSchema::new(schema_version, [])?;
    // Any cursor will do, the descriptor is only computed after a first sync.
    let cursor = SyncCursor::timestamp(1);
    let info = get_migration_info(
        &schema,
        Some(migrations),
        Some(&cursor),
        Some(from),
        Some(migrations.min_version()),
    )?;
    Ok(info.migration)
}

/// Runs the migration-info command.
pub fn run(path: &Path, schema_version: SchemaVersion, from: SchemaVersion) -> CliResult<()> {
    let migrations: SchemaMigrations = read_json(path)?;
    debug!(
        min_version = migrations.min_version(),
        max_version = migrations.max_version(),
        "loaded migrations"
    );
    let migration = describe(&migrations, schema_version, from)?;
    println!("{}", to_json(&migration)?);
    Ok(())
}
