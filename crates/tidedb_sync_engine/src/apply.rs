//! Applying pulled changes to the local store.
//!
//! All changes of a pull are applied in a single store transaction. A
//! malformed record aborts the whole transaction; a table the local schema
//! does not know is skipped.
//!
//! ## Incremental tables
//!
//! - `created`: created fresh. If the record already exists it is updated
//!   instead; if its id is tombstoned the tombstone is purged first.
//! - `updated`: merged into the local record with [`resolve_conflict`].
//!   Tombstoned ids are ignored, missing records are created.
//! - `deleted`: local records and tombstones are erased.
//!
//! ## Replacement tables
//!
//! Handled as above, then every local record that was not pulled is
//! destroyed, except pending local creations and records outside the
//! table's scope predicate.

use crate::error::SyncResult;
use crate::resolver::{resolve_conflict, ConflictResolver, SyncConflict};
use crate::strategy::{PullStrategy, TableStrategy};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tidedb_core::{LocalStore, RawRecord, RecordStatus, StoreTxn, TableSchema};
use tidedb_sync_protocol::{raw_id, ChangeSet, DirtyRaw, RecordId, TableChangeSet, TableName};
use tracing::{debug, warn};

/// Recoverable surprises met while applying a pull.
///
/// They usually mean a previous sync failed half-way. Each one is handled
/// by a fallback and reported, never raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyAnomaly {
    /// A pulled creation named a record that already exists. It was updated.
    CreatedAlreadyExists {
        /// Table of the record.
        table: TableName,
        /// Record id.
        id: RecordId,
    },
    /// A pulled creation named a tombstoned id. The tombstone was purged and
    /// the record created.
    CreatedWasTombstoned {
        /// Table of the record.
        table: TableName,
        /// Record id.
        id: RecordId,
    },
    /// A pulled update named a missing record. It was created.
    UpdatedMissing {
        /// Table of the record.
        table: TableName,
        /// Record id.
        id: RecordId,
    },
}

impl fmt::Display for ApplyAnomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreatedAlreadyExists { table, id } => write!(
                f,
                "remote created {table}#{id}, but it already exists locally; updated it instead"
            ),
            Self::CreatedWasTombstoned { table, id } => write!(
                f,
                "remote created {table}#{id}, but it is locally deleted; recreated it"
            ),
            Self::UpdatedMissing { table, id } => write!(
                f,
                "remote updated {table}#{id}, but it does not exist locally; created it instead"
            ),
        }
    }
}

/// Options of [`apply_remote_changes`].
#[derive(Clone, Copy, Default)]
pub struct ApplyOptions<'a> {
    /// The remote sends every non-deleted record as `updated`.
    pub send_created_as_updated: bool,
    /// Custom conflict resolution hook.
    pub conflict_resolver: Option<&'a dyn ConflictResolver>,
}

/// What a pull did to the local store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyReport {
    /// Records created.
    pub created: usize,
    /// Records whose content changed.
    pub updated: usize,
    /// Records destroyed, explicitly or by replacement.
    pub destroyed: usize,
    /// Tombstones purged.
    pub tombstones_purged: usize,
    /// Merges of records that had local changes.
    pub resolved_conflicts: Vec<SyncConflict>,
    /// Recovered anomalies.
    pub anomalies: Vec<ApplyAnomaly>,
    /// Tables of the pull that the schema does not know.
    pub skipped_tables: Vec<TableName>,
}

/// Applies pulled changes in a single store transaction.
pub fn apply_remote_changes<S: LocalStore>(
    store: &S,
    changes: &ChangeSet,
    strategy: &PullStrategy,
    options: ApplyOptions<'_>,
) -> SyncResult<ApplyReport> {
    store.transaction(|txn| apply_remote_changes_in(txn, changes, strategy, options))
}

/// Applies pulled changes inside an open transaction.
pub fn apply_remote_changes_in(
    txn: &mut dyn StoreTxn,
    changes: &ChangeSet,
    strategy: &PullStrategy,
    options: ApplyOptions<'_>,
) -> SyncResult<ApplyReport> {
    changes.validate_remote()?;

    let schema = txn.schema().clone();
    let mut report = ApplyReport::default();

    for table in changes.table_names() {
        if schema.table(table).is_none() {
            warn!(table = %table, "skipping pulled changes for unknown table");
            report.skipped_tables.push(table.clone());
        }
    }

    if options.send_created_as_updated
        && changes.iter().any(|(_, c)| !c.created.is_empty())
    {
        warn!("send_created_as_updated is enabled, yet the remote sent records as created");
    }

    let empty = TableChangeSet::new();
    for table_schema in schema.tables() {
        let table_changes = changes.table(&table_schema.name).unwrap_or(&empty);
        let table_strategy = strategy.for_table(&table_schema.name);
        if table_changes.is_empty() && table_strategy == TableStrategy::Incremental {
            continue;
        }

        let mut applier = TableApplier {
            txn: &mut *txn,
            table: table_schema,
            options,
            report: &mut report,
        };
        applier.apply(table_changes)?;
        if table_strategy == TableStrategy::Replacement {
            applier.replace(table_changes, strategy)?;
        }
    }

    debug!(
        created = report.created,
        updated = report.updated,
        destroyed = report.destroyed,
        anomalies = report.anomalies.len(),
        "applied remote changes"
    );
    Ok(report)
}

struct TableApplier<'a, 'o> {
    txn: &'a mut dyn StoreTxn,
    table: &'a TableSchema,
    options: ApplyOptions<'o>,
    report: &'a mut ApplyReport,
}

impl TableApplier<'_, '_> {
    fn name(&self) -> &str {
        &self.table.name
    }

    fn apply(&mut self, changes: &TableChangeSet) -> SyncResult<()> {
        let ids: Vec<RecordId> = changes.ids().map(str::to_string).collect();
        let mut existing: BTreeMap<RecordId, RawRecord> = self
            .txn
            .query_by_ids(self.name(), &ids)?
            .into_iter()
            .map(|r| (r.id.clone(), r))
            .collect();
        let tombstones: BTreeSet<RecordId> =
            self.txn.tombstone_ids(self.name())?.into_iter().collect();

        for id in &changes.deleted {
            if existing.remove(id).is_some() {
                self.txn.destroy_permanently(&self.table.name, id)?;
                self.report.destroyed += 1;
            }
        }
        let purge: Vec<RecordId> = changes
            .deleted
            .iter()
            .filter(|id| tombstones.contains(*id))
            .cloned()
            .collect();
        if !purge.is_empty() {
            self.report.tombstones_purged += self.txn.purge_tombstones(&self.table.name, &purge)?;
        }

        for raw in &changes.created {
            let id = raw_id(raw).unwrap_or_default().to_string();
            if let Some(local) = existing.remove(&id) {
                self.anomaly(ApplyAnomaly::CreatedAlreadyExists {
                    table: self.table.name.clone(),
                    id,
                });
                self.update_from_raw(local, raw)?;
            } else if tombstones.contains(&id) {
                self.anomaly(ApplyAnomaly::CreatedWasTombstoned {
                    table: self.table.name.clone(),
                    id: id.clone(),
                });
                self.report.tombstones_purged +=
                    self.txn.purge_tombstones(&self.table.name, &[id.clone()])?;
                self.create_from_raw(id, raw)?;
            } else {
                self.create_from_raw(id, raw)?;
            }
        }

        for raw in &changes.updated {
            let id = raw_id(raw).unwrap_or_default().to_string();
            if let Some(local) = existing.remove(&id) {
                self.update_from_raw(local, raw)?;
            } else if tombstones.contains(&id) {
                debug!(table = %self.table.name, id = %id, "ignoring update of locally deleted record");
            } else {
                if !self.options.send_created_as_updated {
                    self.anomaly(ApplyAnomaly::UpdatedMissing {
                        table: self.table.name.clone(),
                        id: id.clone(),
                    });
                }
                self.create_from_raw(id, raw)?;
            }
        }
        Ok(())
    }

    fn replace(&mut self, changes: &TableChangeSet, strategy: &PullStrategy) -> SyncResult<()> {
        let pulled: BTreeSet<&str> = changes
            .created
            .iter()
            .chain(changes.updated.iter())
            .filter_map(raw_id)
            .collect();
        let scope = strategy.scope_for(&self.table.name);

        let doomed: Vec<RecordId> = self
            .txn
            .query_all(&self.table.name)?
            .into_iter()
            .filter(|r| !pulled.contains(r.id.as_str()))
            .filter(|r| r.status != RecordStatus::Created)
            .filter(|r| scope.map_or(true, |in_scope| in_scope(r)))
            .map(|r| r.id)
            .collect();

        for id in &doomed {
            self.txn.destroy_permanently(&self.table.name, id)?;
        }
        if !doomed.is_empty() {
            debug!(
                table = %self.table.name,
                count = doomed.len(),
                "destroyed records missing from replacement pull"
            );
        }
        self.report.destroyed += doomed.len();
        Ok(())
    }

    fn create_from_raw(&mut self, id: RecordId, raw: &DirtyRaw) -> SyncResult<()> {
        let record = RawRecord {
            columns: self.table.sanitize(raw),
            ..RawRecord::new_synced(id)
        };
        self.txn.create_record(&self.table.name, record)?;
        self.report.created += 1;
        Ok(())
    }

    fn update_from_raw(&mut self, local: RawRecord, raw: &DirtyRaw) -> SyncResult<()> {
        let mut resolved = resolve_conflict(&local, raw);
        if let Some(resolver) = self.options.conflict_resolver {
            resolved = resolver.resolve(&self.table.name, &local, raw, resolved);
        }
        // Only a later mark-synced step may change sync state.
        resolved.id = local.id.clone();
        resolved.status = local.status;
        resolved.changed = local.changed.clone();
        resolved.columns = self.table.sanitize(&resolved.columns_raw());

        if !local.changed.is_empty() {
            self.report.resolved_conflicts.push(SyncConflict {
                table: self.table.name.clone(),
                local: local.clone(),
                remote: raw.clone(),
                resolved: resolved.clone(),
            });
        }

        if resolved != local {
            self.txn.update_record(&self.table.name, resolved)?;
            self.report.updated += 1;
        }
        Ok(())
    }

    fn anomaly(&mut self, anomaly: ApplyAnomaly) {
        warn!(%anomaly, "recovered from sync anomaly");
        self.report.anomalies.push(anomaly);
    }
}
