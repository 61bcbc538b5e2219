//! Sync engine state machine.
//!
//! A run moves through the phases of [`SyncPhase`] in order:
//!
//! 1. Read the cursor, the store generation and the migration info.
//! 2. Pull, then apply the changes and store the new cursor in one
//!    transaction.
//! 3. Collect local changes. If there are none, stop.
//! 4. Push, then mark the pushed records synced in one transaction.
//!
//! Both transactions first check that the cursor, the sync sequence and the
//! store generation are still what the run expects. The apply transaction
//! bumps the sequence, so two runs from the same start state cannot both
//! commit even when the remote returns an unchanged cursor. If another sync
//! committed or the store was reset meanwhile, the run aborts with a guard
//! error instead of overwriting newer state.

use crate::apply::{apply_remote_changes_in, ApplyOptions, ApplyReport};
use crate::bookkeeping::{
    last_pulled_at, last_pulled_at_in, last_pulled_schema_version, set_last_pulled_at_in,
    set_last_pulled_schema_version_in, set_sync_sequence_in, sync_sequence, sync_sequence_in,
};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::local::{fetch_local_changes, has_unsynced_changes, mark_local_changes_as_synced_in};
use crate::log::{SyncLog, SyncPhase};
use crate::migration::get_migration_info;
use crate::transport::{PullArgs, PushArgs, SyncTransport};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Instant, SystemTime};
use tidedb_core::{LocalStore, StoreTxn};
use tidedb_sync_protocol::SyncCursor;
use tracing::{debug, error, info, warn};

/// Statistics about sync runs of an engine.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Runs that finished.
    pub cycles_completed: u64,
    /// Runs that failed.
    pub cycles_failed: u64,
    /// Pulled changes, over all runs.
    pub records_pulled: u64,
    /// Pushed changes, over all runs.
    pub records_pushed: u64,
    /// Records merged while they had local changes.
    pub conflicts_resolved: u64,
    /// Recovered apply anomalies.
    pub anomalies: u64,
    /// End of the last finished run.
    pub last_sync_time: Option<Instant>,
    /// Error of the last failed run.
    pub last_error: Option<String>,
}

/// The sync engine synchronizes a local store with a remote.
pub struct SyncEngine<S: LocalStore, T: SyncTransport> {
    config: SyncConfig,
    store: Arc<S>,
    transport: Arc<T>,
    phase: RwLock<SyncPhase>,
    stats: RwLock<SyncStats>,
}

impl<S: LocalStore, T: SyncTransport> SyncEngine<S, T> {
    /// Creates a new sync engine.
    pub fn new(config: SyncConfig, store: Arc<S>, transport: Arc<T>) -> Self {
        Self {
            config,
            store,
            transport,
            phase: RwLock::new(SyncPhase::Starting),
            stats: RwLock::new(SyncStats::default()),
        }
    }

    /// Gets the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Gets the local store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Gets the transport.
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Phase of the current or last run.
    pub fn phase(&self) -> SyncPhase {
        *self.phase.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Returns true if the store holds changes not yet pushed.
    pub fn has_unsynced_changes(&self) -> SyncResult<bool> {
        has_unsynced_changes(&*self.store)
    }

    /// Runs one sync and returns its log.
    pub async fn synchronize(&self) -> SyncResult<SyncLog> {
        let mut log = SyncLog::new();
        self.synchronize_with_log(&mut log).await?;
        Ok(log)
    }

    /// Runs one sync, recording it in `log`.
    ///
    /// On failure the log keeps the phase the run stopped in.
    pub async fn synchronize_with_log(&self, log: &mut SyncLog) -> SyncResult<()> {
        info!("sync started");
        log.started_at = Some(SystemTime::now());

        let result = self.run(log).await;
        match &result {
            Ok(()) => {
                self.enter(log, SyncPhase::Done);
                log.finished_at = Some(SystemTime::now());
                let mut stats = self.stats.write();
                stats.cycles_completed += 1;
                stats.records_pulled += log.remote_change_count as u64;
                stats.conflicts_resolved += log.resolved_conflicts.len() as u64;
                stats.anomalies += log.anomalies.len() as u64;
                stats.last_sync_time = Some(Instant::now());
                info!(
                    pulled = log.remote_change_count,
                    pushed = log.local_change_count,
                    conflicts = log.resolved_conflicts.len(),
                    "sync finished"
                );
            }
            Err(err) => {
                log.fail(err);
                *self.phase.write() = SyncPhase::Failed;
                let mut stats = self.stats.write();
                stats.cycles_failed += 1;
                stats.last_error = Some(err.to_string());
                if let Some(phase) = log.failed_at {
                    error!(%phase, error = %err, "sync failed");
                }
            }
        }
        result
    }

    async fn run(&self, log: &mut SyncLog) -> SyncResult<()> {
        let store = &*self.store;
        self.enter(log, SyncPhase::Starting);
        self.config.validate(store.schema(), store.migrations())?;

        let start = Expected {
            generation: store.generation(),
            sequence: sync_sequence(store),
            cursor: last_pulled_at(store),
        };
        log.last_pulled_at = start.cursor.clone();
        log.last_pulled_schema_version = last_pulled_schema_version(store);
        let info = get_migration_info(
            store.schema(),
            store.migrations(),
            start.cursor.as_ref(),
            log.last_pulled_schema_version,
            self.config.migrations_enabled_at_version,
        )?;
        log.migration = info.migration.clone();

        self.enter(log, SyncPhase::ReadyToPull);
        let pulled = self
            .transport
            .pull_changes(PullArgs {
                last_pulled_at: start.cursor.clone(),
                schema_version: info.schema_version,
                migration: info.migration.clone(),
            })
            .await?;
        self.enter(log, SyncPhase::Pulled);

        pulled.timestamp.validate()?;
        log.new_last_pulled_at = Some(pulled.timestamp.clone());
        log.remote_change_count = pulled.changes.count();
        let remote_strategy;
        let strategy = match &pulled.strategy {
            Some(strategy) => {
                strategy.validate(store.schema())?;
                remote_strategy = strategy.clone().with_scopes_of(&self.config.pull_strategy);
                &remote_strategy
            }
            None => &self.config.pull_strategy,
        };
        let options = ApplyOptions {
            send_created_as_updated: self.config.send_created_as_updated,
            conflict_resolver: self.config.conflict_resolver.as_deref(),
        };

        let report = store.transaction(|txn| -> SyncResult<ApplyReport> {
            check_start_state(txn, &start)?;
            let report = apply_remote_changes_in(txn, &pulled.changes, strategy, options)?;
            set_last_pulled_at_in(txn, &pulled.timestamp);
            set_sync_sequence_in(txn, start.sequence + 1);
            if info.should_save_schema_version {
                set_last_pulled_schema_version_in(txn, info.schema_version);
            }
            Ok(report)
        })?;
        log.resolved_conflicts = report.resolved_conflicts;
        log.anomalies = report.anomalies;
        self.enter(log, SyncPhase::AppliedRemote);

        self.enter(log, SyncPhase::ReadyToFetchLocal);
        let local = fetch_local_changes(store)?;
        if store.generation() != start.generation {
            return Err(SyncError::DatabaseReset);
        }
        log.local_change_count = local.changes.count();
        self.enter(log, SyncPhase::FetchedLocal);

        if local.is_empty() {
            debug!("no local changes to push");
            return Ok(());
        }

        self.enter(log, SyncPhase::ReadyToPush);
        let pushed = self
            .transport
            .push_changes(PushArgs {
                changes: local.changes.clone(),
                last_pulled_at: pulled.timestamp.clone(),
            })
            .await?;
        self.enter(log, SyncPhase::Pushed);
        self.stats.write().records_pushed += log.local_change_count as u64;

        let rejected = pushed.rejected_ids.filter(|ids| !ids.is_empty());
        if let Some(ids) = &rejected {
            warn!(count = ids.count(), "remote rejected some pushed changes");
        }
        let applied = Expected {
            generation: start.generation,
            sequence: start.sequence + 1,
            cursor: Some(pulled.timestamp.clone()),
        };
        store.transaction(|txn| -> SyncResult<usize> {
            check_start_state(txn, &applied)?;
            mark_local_changes_as_synced_in(txn, &local, rejected.as_ref())
        })?;
        log.rejected_ids = rejected;
        self.enter(log, SyncPhase::MarkedLocalSynced);
        Ok(())
    }

    fn enter(&self, log: &mut SyncLog, phase: SyncPhase) {
        debug!(%phase, "sync phase");
        log.phase = phase;
        *self.phase.write() = phase;
    }
}

/// Store state a run expects to find when it commits.
struct Expected {
    generation: u64,
    sequence: u64,
    cursor: Option<SyncCursor>,
}

/// Aborts if the store was reset or another sync committed.
fn check_start_state(txn: &dyn StoreTxn, expected: &Expected) -> SyncResult<()> {
    if txn.generation() != expected.generation {
        return Err(SyncError::DatabaseReset);
    }
    let current = last_pulled_at_in(txn);
    if current != expected.cursor {
        let show = |cursor: Option<&SyncCursor>| {
            cursor.map_or_else(|| "nothing".to_string(), ToString::to_string)
        };
        return Err(SyncError::ConcurrentSync(format!(
            "last pulled at moved from {} to {}",
            show(expected.cursor.as_ref()),
            show(current.as_ref())
        )));
    }
    let sequence = sync_sequence_in(txn);
    if sequence != expected.sequence {
        return Err(SyncError::ConcurrentSync(format!(
            "sync sequence moved from {} to {sequence}",
            expected.sequence
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockTransport, PullResult, PushResult};
    use tidedb_core::{AppSchema, ColumnSchema, MemoryStore, RecordStatus, TableSchema};
    use tidedb_sync_protocol::{ChangeSet, RejectedIds};

    fn engine() -> SyncEngine<MemoryStore, MockTransport> {
        let store = MemoryStore::new(
            AppSchema::new(1, [TableSchema::new("tasks", [ColumnSchema::string("name")])])
                .unwrap(),
        );
        SyncEngine::new(
            SyncConfig::new(),
            Arc::new(store),
            Arc::new(MockTransport::new()),
        )
    }

    #[tokio::test]
    async fn sync_engine_initial_state() {
        let engine = engine();
        assert_eq!(engine.phase(), SyncPhase::Starting);
        assert_eq!(engine.stats().cycles_completed, 0);
        assert!(!engine.has_unsynced_changes().unwrap());
    }

    #[tokio::test]
    async fn stats_track_runs() {
        let engine = engine();
        engine
            .transport()
            .set_pull_response(PullResult::new(ChangeSet::new(), SyncCursor::timestamp(10)));
        engine.store().create("tasks", |r| r.set("name", "a")).unwrap();

        let log = engine.synchronize().await.unwrap();
        assert_eq!(log.phase, SyncPhase::Done);
        assert_eq!(engine.phase(), SyncPhase::Done);

        engine.transport().set_connected(false);
        assert!(engine.synchronize().await.is_err());
        assert_eq!(engine.phase(), SyncPhase::Failed);

        let stats = engine.stats();
        assert_eq!(stats.cycles_completed, 1);
        assert_eq!(stats.cycles_failed, 1);
        assert_eq!(stats.records_pushed, 1);
        assert!(stats.last_sync_time.is_some());
        assert!(stats.last_error.unwrap().contains("not connected"));
    }

    #[tokio::test]
    async fn empty_rejection_list_counts_as_accepted() {
        let engine = engine();
        engine
            .transport()
            .set_pull_response(PullResult::new(ChangeSet::new(), SyncCursor::timestamp(10)));
        engine
            .transport()
            .set_push_response(PushResult::rejected(RejectedIds::new()));
        let record = engine.store().create("tasks", |_| {}).unwrap();

        let log = engine.synchronize().await.unwrap();
        assert_eq!(log.rejected_ids, None);
        let record = engine.store().find("tasks", &record.id).unwrap().unwrap();
        assert_eq!(record.status, RecordStatus::Synced);
    }

    fn expected(generation: u64, sequence: u64, cursor: Option<i64>) -> Expected {
        Expected {
            generation,
            sequence,
            cursor: cursor.map(SyncCursor::timestamp),
        }
    }

    #[test]
    fn guard_detects_moved_cursor_and_reset() {
        let store = MemoryStore::new(AppSchema::new(1, []).unwrap());
        store
            .read(|txn| check_start_state(txn, &expected(0, 0, None)))
            .unwrap();
        store
            .transaction(|txn| -> SyncResult<()> {
                set_last_pulled_at_in(txn, &SyncCursor::timestamp(5));
                Ok(())
            })
            .unwrap();
        let err = store
            .read(|txn| check_start_state(txn, &expected(0, 0, None)))
            .unwrap_err();
        assert!(matches!(err, SyncError::ConcurrentSync(_)));

        store.unsafe_reset();
        let err = store
            .read(|txn| check_start_state(txn, &expected(0, 0, Some(5))))
            .unwrap_err();
        assert_eq!(err, SyncError::DatabaseReset);
    }

    #[test]
    fn guard_detects_commit_with_unchanged_cursor() {
        let store = MemoryStore::new(AppSchema::new(1, []).unwrap());
        store
            .transaction(|txn| -> SyncResult<()> {
                set_last_pulled_at_in(txn, &SyncCursor::timestamp(5));
                set_sync_sequence_in(txn, 1);
                Ok(())
            })
            .unwrap();

        store
            .read(|txn| check_start_state(txn, &expected(0, 1, Some(5))))
            .unwrap();
        let err = store
            .read(|txn| check_start_state(txn, &expected(0, 0, Some(5))))
            .unwrap_err();
        assert_eq!(
            err,
            SyncError::ConcurrentSync("sync sequence moved from 0 to 1".into())
        );
    }

    #[tokio::test]
    async fn each_sync_bumps_the_sequence() {
        let engine = engine();
        engine
            .transport()
            .set_pull_response(PullResult::new(ChangeSet::new(), SyncCursor::timestamp(10)));
        engine.synchronize().await.unwrap();
        engine.synchronize().await.unwrap();
        assert_eq!(sync_sequence(&**engine.store()), 2);
    }
}
