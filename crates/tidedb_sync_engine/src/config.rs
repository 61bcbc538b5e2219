//! Configuration for the sync engine.

use crate::error::{SyncError, SyncResult};
use crate::resolver::ConflictResolver;
use crate::strategy::PullStrategy;
use std::fmt;
use std::sync::Arc;
use tidedb_core::{AppSchema, SchemaMigrations};
use tidedb_sync_protocol::SchemaVersion;

/// Bookkeeping key holding the last pull cursor.
pub const LAST_PULLED_AT_KEY: &str = "__tidedb_last_pulled_at";

/// Bookkeeping key holding the schema version of the last pull.
pub const LAST_PULLED_SCHEMA_VERSION_KEY: &str = "__tidedb_last_pulled_schema_version";

/// Bookkeeping key counting syncs that committed pulled changes.
pub const SYNC_SEQUENCE_KEY: &str = "__tidedb_sync_sequence";

/// Configuration for sync operations.
#[derive(Clone, Default)]
pub struct SyncConfig {
    /// Strategy used to apply pulls, unless the remote picks one.
    pub pull_strategy: PullStrategy,
    /// Schema version at which migration-aware pulls were enabled.
    pub migrations_enabled_at_version: Option<SchemaVersion>,
    /// The remote sends every non-deleted record as `updated`.
    pub send_created_as_updated: bool,
    /// Custom conflict resolution hook.
    pub conflict_resolver: Option<Arc<dyn ConflictResolver>>,
}

impl SyncConfig {
    /// Creates a configuration with incremental pulls and no migrations.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the pull strategy.
    pub fn with_pull_strategy(mut self, strategy: PullStrategy) -> Self {
        self.pull_strategy = strategy;
        self
    }

    /// Enables migration-aware pulls from the given schema version.
    pub fn with_migrations_enabled_at(mut self, version: SchemaVersion) -> Self {
        self.migrations_enabled_at_version = Some(version);
        self
    }

    /// Sets whether the remote sends created records as updated.
    pub fn with_send_created_as_updated(mut self, enabled: bool) -> Self {
        self.send_created_as_updated = enabled;
        self
    }

    /// Sets the conflict resolution hook.
    pub fn with_conflict_resolver(mut self, resolver: impl ConflictResolver + 'static) -> Self {
        self.conflict_resolver = Some(Arc::new(resolver));
        self
    }

    /// Checks the configuration against the store's schema and migrations.
    pub fn validate(
        &self,
        schema: &AppSchema,
        migrations: Option<&SchemaMigrations>,
    ) -> SyncResult<()> {
        self.pull_strategy.validate(schema)?;

        if let Some(enabled_at) = self.migrations_enabled_at_version {
            if enabled_at > schema.version() {
                return Err(SyncError::invalid_migration(format!(
                    "migrations enabled at version {enabled_at}, which is greater than the \
                     current schema version {}",
                    schema.version()
                )));
            }
            let Some(migrations) = migrations else {
                return Err(SyncError::invalid_migration(
                    "migration syncs cannot be enabled on a store without migrations",
                ));
            };
            if enabled_at < migrations.min_version() {
                return Err(SyncError::invalid_migration(format!(
                    "migrations enabled at version {enabled_at} is too low: migrations only \
                     cover versions from {}",
                    migrations.min_version()
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncConfig")
            .field("pull_strategy", &self.pull_strategy)
            .field(
                "migrations_enabled_at_version",
                &self.migrations_enabled_at_version,
            )
            .field("send_created_as_updated", &self.send_created_as_updated)
            .field("conflict_resolver", &self.conflict_resolver.is_some())
            .finish()
    }
}
