//! Diagnostic record of a sync run.

use crate::apply::ApplyAnomaly;
use crate::error::SyncError;
use crate::resolver::SyncConflict;
use std::fmt;
use std::time::SystemTime;
use tidedb_sync_protocol::{MigrationSyncChanges, RejectedIds, SchemaVersion, SyncCursor};

/// Phase of a sync run.
///
/// Phases are strictly ordered. A run that stops early ends in `Failed`,
/// and its log remembers the phase it failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SyncPhase {
    /// Reading bookkeeping and migration info.
    Starting,
    /// About to call the remote for changes.
    ReadyToPull,
    /// Remote changes received.
    Pulled,
    /// Remote changes committed with the new cursor.
    AppliedRemote,
    /// About to collect local changes.
    ReadyToFetchLocal,
    /// Local changes collected.
    FetchedLocal,
    /// About to push local changes.
    ReadyToPush,
    /// Local changes accepted by the remote.
    Pushed,
    /// Pushed changes marked as synced.
    MarkedLocalSynced,
    /// Sync finished.
    Done,
    /// Sync aborted.
    Failed,
}

impl SyncPhase {
    /// Human-readable name of the phase.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::ReadyToPull => "ready to pull",
            Self::Pulled => "pulled",
            Self::AppliedRemote => "applied remote changes",
            Self::ReadyToFetchLocal => "ready to fetch local changes",
            Self::FetchedLocal => "fetched local changes",
            Self::ReadyToPush => "ready to push",
            Self::Pushed => "pushed",
            Self::MarkedLocalSynced => "marked local changes as synced",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    /// Returns true once the run has ended.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened during one sync run.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncLog {
    /// Current or final phase.
    pub phase: SyncPhase,
    /// Phase the run was in when it failed.
    pub failed_at: Option<SyncPhase>,
    /// Error that ended the run.
    pub error: Option<SyncError>,
    /// When the run started.
    pub started_at: Option<SystemTime>,
    /// When the run finished successfully.
    pub finished_at: Option<SystemTime>,
    /// Cursor the pull started from.
    pub last_pulled_at: Option<SyncCursor>,
    /// Cursor returned by the pull.
    pub new_last_pulled_at: Option<SyncCursor>,
    /// Schema version of the previous pull.
    pub last_pulled_schema_version: Option<SchemaVersion>,
    /// Migration descriptor sent with the pull.
    pub migration: Option<MigrationSyncChanges>,
    /// Number of pulled changes.
    pub remote_change_count: usize,
    /// Number of local changes collected for the push.
    pub local_change_count: usize,
    /// Records merged while they had local changes.
    pub resolved_conflicts: Vec<SyncConflict>,
    /// Ids the remote rejected during the push.
    pub rejected_ids: Option<RejectedIds>,
    /// Anomalies recovered from while applying the pull.
    pub anomalies: Vec<ApplyAnomaly>,
}

impl Default for SyncLog {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncLog {
    /// Creates an empty log in the `Starting` phase.
    pub fn new() -> Self {
        Self {
            phase: SyncPhase::Starting,
            failed_at: None,
            error: None,
            started_at: None,
            finished_at: None,
            last_pulled_at: None,
            new_last_pulled_at: None,
            last_pulled_schema_version: None,
            migration: None,
            remote_change_count: 0,
            local_change_count: 0,
            resolved_conflicts: Vec::new(),
            rejected_ids: None,
            anomalies: Vec::new(),
        }
    }

    /// Records a failure in the current phase.
    pub fn fail(&mut self, error: &SyncError) {
        if self.phase != SyncPhase::Failed {
            self.failed_at = Some(self.phase);
        }
        self.phase = SyncPhase::Failed;
        self.error = Some(error.clone());
    }

    /// Returns true if the run finished successfully.
    pub fn is_done(&self) -> bool {
        self.phase == SyncPhase::Done
    }
}
