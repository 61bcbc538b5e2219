//! Sync consistency diagnostics.
//!
//! Checks that the local store holds exactly what the remote would send on
//! a fresh login. Meant for debugging sync backends, not for production
//! code paths: it runs several syncs and a full pull.

use crate::bookkeeping::last_pulled_at;
use crate::error::{SyncError, SyncResult};
use crate::state::SyncEngine;
use crate::transport::{PullArgs, PullResult, SyncTransport};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tidedb_core::{LocalStore, RawRecord, RecordStatus};
use tidedb_sync_protocol::{raw_id, DirtyRaw, TableName};
use tracing::{info, warn};

/// Decides whether a pulled record missing locally is acceptable.
pub type AllowMissing = Arc<dyn Fn(&str, &DirtyRaw) -> bool + Send + Sync>;

/// Decides whether a local record missing remotely is acceptable.
pub type AllowExcess = Arc<dyn Fn(&str, &RawRecord) -> bool + Send + Sync>;

/// Decides whether a local record differing from the pulled one is acceptable.
pub type AllowInconsistent = Arc<dyn Fn(&str, &RawRecord, &DirtyRaw) -> bool + Send + Sync>;

/// Options of [`diagnose_sync_consistency`].
#[derive(Clone)]
pub struct ConsistencyOptions {
    /// How many times to retry when the remote changed during the check.
    pub max_attempts: usize,
    /// Filter for records missing locally.
    pub allow_missing: Option<AllowMissing>,
    /// Filter for records missing remotely.
    pub allow_excess: Option<AllowExcess>,
    /// Filter for inconsistent records.
    pub allow_inconsistent: Option<AllowInconsistent>,
}

impl Default for ConsistencyOptions {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            allow_missing: None,
            allow_excess: None,
            allow_inconsistent: None,
        }
    }
}

impl ConsistencyOptions {
    /// Creates options with no allowances and five attempts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of attempts.
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Allows some records to be missing locally.
    pub fn with_allow_missing(
        mut self,
        allow: impl Fn(&str, &DirtyRaw) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.allow_missing = Some(Arc::new(allow));
        self
    }

    /// Allows some local records to be missing remotely.
    pub fn with_allow_excess(
        mut self,
        allow: impl Fn(&str, &RawRecord) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.allow_excess = Some(Arc::new(allow));
        self
    }

    /// Allows some records to differ.
    pub fn with_allow_inconsistent(
        mut self,
        allow: impl Fn(&str, &RawRecord, &DirtyRaw) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.allow_inconsistent = Some(Arc::new(allow));
        self
    }
}

impl fmt::Debug for ConsistencyOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsistencyOptions")
            .field("max_attempts", &self.max_attempts)
            .field("allow_missing", &self.allow_missing.is_some())
            .field("allow_excess", &self.allow_excess.is_some())
            .field("allow_inconsistent", &self.allow_inconsistent.is_some())
            .finish()
    }
}

/// Outcome of a consistency check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsistencyReport {
    /// Number of issues not allowed by the options.
    pub issue_count: usize,
    /// One line per finding.
    pub log: Vec<String>,
}

impl ConsistencyReport {
    /// Returns true if no issue was found.
    pub fn is_consistent(&self) -> bool {
        self.issue_count == 0
    }

    fn note(&mut self, line: String) {
        info!("{line}");
        self.log.push(line);
    }

    fn issue(&mut self, line: String) {
        warn!("{line}");
        self.issue_count += 1;
        self.log.push(line);
    }
}

/// Compares the local store with a full pull.
///
/// Syncs twice, then pulls everything from scratch and pulls incrementally
/// at the new cursor. If the incremental pull is not empty the remote
/// changed during the check and the whole check is retried, up to
/// `max_attempts` times. Unsynced local changes left after syncing make
/// the check fail immediately.
pub async fn diagnose_sync_consistency<S, T>(
    engine: &SyncEngine<S, T>,
    options: &ConsistencyOptions,
) -> SyncResult<ConsistencyReport>
where
    S: LocalStore,
    T: SyncTransport,
{
    let attempts = options.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match check_once(engine, options).await {
            Err(SyncError::InconsistentSync(message)) if attempt < attempts => {
                warn!(attempt, %message, "remote changed during consistency check, retrying");
                attempt += 1;
            }
            result => return result,
        }
    }
}

async fn check_once<S, T>(
    engine: &SyncEngine<S, T>,
    options: &ConsistencyOptions,
) -> SyncResult<ConsistencyReport>
where
    S: LocalStore,
    T: SyncTransport,
{
    let mut report = ConsistencyReport::default();
    engine.synchronize().await?;
    engine.synchronize().await?;
    if engine.has_unsynced_changes()? {
        return Err(SyncError::InconsistentSync(
            "local changes are still unsynced after syncing twice".into(),
        ));
    }

    let store = &**engine.store();
    let schema_version = store.schema().version();
    let full = engine
        .transport()
        .pull_changes(PullArgs {
            last_pulled_at: None,
            schema_version,
            migration: None,
        })
        .await?;
    report.note(format!(
        "full pull returned {} changes at {}",
        full.changes.count(),
        full.timestamp
    ));

    let cursor = last_pulled_at(store);
    let incremental = engine
        .transport()
        .pull_changes(PullArgs {
            last_pulled_at: cursor,
            schema_version,
            migration: None,
        })
        .await?;
    if !incremental.changes.is_empty() {
        return Err(SyncError::InconsistentSync(format!(
            "remote sent {} new changes during the check",
            incremental.changes.count()
        )));
    }

    compare(store, &full, options, &mut report)?;
    report.note(format!("found {} issues", report.issue_count));
    Ok(report)
}

fn compare<S: LocalStore>(
    store: &S,
    full: &PullResult,
    options: &ConsistencyOptions,
    report: &mut ConsistencyReport,
) -> SyncResult<()> {
    for table in store.schema().tables() {
        let name: &TableName = &table.name;
        let remote: BTreeMap<&str, &DirtyRaw> = full
            .changes
            .table(name)
            .map(|changes| {
                changes
                    .created
                    .iter()
                    .chain(changes.updated.iter())
                    .filter_map(|raw| raw_id(raw).map(|id| (id, raw)))
                    .collect()
            })
            .unwrap_or_default();
        let local = store.read(|txn| txn.query_all(name))?;
        let local_ids: BTreeMap<&str, &RawRecord> =
            local.iter().map(|r| (r.id.as_str(), r)).collect();

        for (id, raw) in &remote {
            if local_ids.contains_key(id) {
                continue;
            }
            if options.allow_missing.as_ref().is_some_and(|allow| allow(name, raw)) {
                report.note(format!("allowed missing record {name}#{id}"));
            } else {
                report.issue(format!("record {name}#{id} is missing locally"));
            }
        }

        for record in &local {
            let Some(raw) = remote.get(record.id.as_str()) else {
                if options.allow_excess.as_ref().is_some_and(|allow| allow(name, record)) {
                    report.note(format!("allowed excess record {name}#{}", record.id));
                } else {
                    report.issue(format!("record {name}#{} is missing remotely", record.id));
                }
                continue;
            };

            let expected = table.sanitize(raw);
            let differing: Vec<&str> = expected
                .iter()
                .filter(|(column, value)| record.get(column).unwrap_or(&Value::Null) != *value)
                .map(|(column, _)| column.as_str())
                .collect();
            if differing.is_empty() && record.status == RecordStatus::Synced {
                continue;
            }
            if options
                .allow_inconsistent
                .as_ref()
                .is_some_and(|allow| allow(name, record, raw))
            {
                report.note(format!("allowed inconsistent record {name}#{}", record.id));
            } else if differing.is_empty() {
                report.issue(format!(
                    "record {name}#{} is {} instead of synced",
                    record.id, record.status
                ));
            } else {
                report.issue(format!(
                    "record {name}#{} differs in {}",
                    record.id,
                    differing.join(", ")
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::transport::MockTransport;
    use serde_json::json;
    use tidedb_core::{AppSchema, ColumnSchema, MemoryStore, TableSchema};
    use tidedb_sync_protocol::{ChangeSet, SyncCursor, TableChangeSet};

    fn raw(value: Value) -> DirtyRaw {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

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

    fn snapshot(records: Vec<DirtyRaw>) -> PullResult {
        PullResult::new(
            ChangeSet::new().with_table(
                "tasks",
                TableChangeSet {
                    updated: records,
                    ..Default::default()
                },
            ),
            SyncCursor::timestamp(100),
        )
    }

    fn empty() -> PullResult {
        PullResult::new(ChangeSet::new(), SyncCursor::timestamp(100))
    }

    #[tokio::test]
    async fn consistent_store_has_no_issues() {
        let engine = engine();
        engine.store().insert_synced("tasks", "t1", |r| r.set_raw("name", "a")).unwrap();
        engine.transport().set_pull_response(empty());
        engine.transport().queue_pull(Ok(empty()));
        engine.transport().queue_pull(Ok(empty()));
        engine
            .transport()
            .queue_pull(Ok(snapshot(vec![raw(json!({"id": "t1", "name": "a"}))])));

        let report = diagnose_sync_consistency(&engine, &ConsistencyOptions::new())
            .await
            .unwrap();
        assert!(report.is_consistent(), "{:?}", report.log);
    }

    #[tokio::test]
    async fn reports_missing_excess_and_inconsistent_records() {
        let engine = engine();
        engine.store().insert_synced("tasks", "t1", |r| r.set_raw("name", "a")).unwrap();
        engine.store().insert_synced("tasks", "t2", |r| r.set_raw("name", "b")).unwrap();
        engine.transport().set_pull_response(empty());
        engine.transport().queue_pull(Ok(empty()));
        engine.transport().queue_pull(Ok(empty()));
        engine.transport().queue_pull(Ok(snapshot(vec![
            raw(json!({"id": "t1", "name": "changed"})),
            raw(json!({"id": "t3", "name": "c"})),
        ])));

        let report = diagnose_sync_consistency(&engine, &ConsistencyOptions::new())
            .await
            .unwrap();
        assert_eq!(report.issue_count, 3);
        assert!(report.log.iter().any(|l| l.contains("tasks#t3 is missing locally")));
        assert!(report.log.iter().any(|l| l.contains("tasks#t2 is missing remotely")));
        assert!(report.log.iter().any(|l| l.contains("tasks#t1 differs in name")));
    }

    #[tokio::test]
    async fn allowances_suppress_issues() {
        let engine = engine();
        engine.store().insert_synced("tasks", "t2", |_| {}).unwrap();
        engine.transport().set_pull_response(empty());
        engine.transport().queue_pull(Ok(empty()));
        engine.transport().queue_pull(Ok(empty()));
        engine
            .transport()
            .queue_pull(Ok(snapshot(vec![raw(json!({"id": "t3", "name": "c"}))])));

        let options = ConsistencyOptions::new()
            .with_allow_missing(|_, raw| raw_id(raw) == Some("t3"))
            .with_allow_excess(|table, _| table == "tasks");
        let report = diagnose_sync_consistency(&engine, &options).await.unwrap();
        assert!(report.is_consistent());
        assert_eq!(report.log.iter().filter(|l| l.contains("allowed")).count(), 2);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let engine = engine();
        let busy = PullResult::new(
            ChangeSet::new().with_table(
                "tasks",
                TableChangeSet {
                    deleted: vec!["gone".into()],
                    ..Default::default()
                },
            ),
            SyncCursor::timestamp(100),
        );
        engine.transport().set_pull_response(busy);

        let err = diagnose_sync_consistency(&engine, &ConsistencyOptions::new().with_max_attempts(2))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InconsistentSync(_)));
        // Two syncs, one full pull and one incremental pull per attempt.
        assert_eq!(engine.transport().pulls().len(), 8);
    }

    #[tokio::test]
    async fn unsynced_changes_fail_the_check() {
        let engine = engine();
        engine.transport().set_pull_response(empty());
        engine
            .transport()
            .queue_push(Err(SyncError::transport_retryable("offline")));
        engine.store().create("tasks", |_| {}).unwrap();

        let err = diagnose_sync_consistency(&engine, &ConsistencyOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Transport { .. }));
    }
}
