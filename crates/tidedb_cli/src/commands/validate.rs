//! Validate-changes command implementation.

use super::{read_json, CliResult};
use std::path::Path;
use tidedb_sync_protocol::ChangeSet;
use tracing::info;

/// Runs the validate-changes command.
pub fn run(path: &Path) -> CliResult<()> {
    let changes: ChangeSet = read_json(path)?;
    changes.validate_remote()?;

    for (table, table_changes) in changes.iter() {
        println!(
            "{table}: {} created, {} updated, {} deleted",
            table_changes.created.len(),
            table_changes.updated.len(),
            table_changes.deleted.len()
        );
    }
    info!(changes = changes.count(), "change set is valid");
    Ok(())
}
