//! Transport layer abstraction for sync operations.

use crate::error::{SyncError, SyncResult};
use crate::strategy::PullStrategy;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tidedb_sync_protocol::{ChangeSet, MigrationSyncChanges, RejectedIds, SchemaVersion, SyncCursor};

/// Arguments of a pull.
#[derive(Debug, Clone, PartialEq)]
pub struct PullArgs {
    /// Cursor of the last successful pull, `None` on the first sync.
    pub last_pulled_at: Option<SyncCursor>,
    /// Current local schema version.
    pub schema_version: SchemaVersion,
    /// Tables and columns gained since the last pull.
    pub migration: Option<MigrationSyncChanges>,
}

/// What the remote answered to a pull.
#[derive(Debug, Clone)]
pub struct PullResult {
    /// Remote changes since `last_pulled_at`.
    pub changes: ChangeSet,
    /// Cursor to pull from next time.
    pub timestamp: SyncCursor,
    /// Strategy chosen by the remote, overriding the configured one.
    ///
    /// Scope predicates of the configured strategy still apply to the tables
    /// this strategy replaces.
    pub strategy: Option<PullStrategy>,
}

impl PullResult {
    /// Creates a pull result applied with the configured strategy.
    pub fn new(changes: ChangeSet, timestamp: impl Into<SyncCursor>) -> Self {
        Self {
            changes,
            timestamp: timestamp.into(),
            strategy: None,
        }
    }

    /// Sets the strategy the remote wants the pull applied with.
    #[must_use]
    pub fn with_strategy(mut self, strategy: PullStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }
}

/// Arguments of a push.
#[derive(Debug, Clone, PartialEq)]
pub struct PushArgs {
    /// Local changes.
    pub changes: ChangeSet,
    /// Cursor of the pull that preceded this push.
    pub last_pulled_at: SyncCursor,
}

/// What the remote answered to a push.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushResult {
    /// Ids the remote refused. They stay pending locally.
    pub rejected_ids: Option<RejectedIds>,
}

impl PushResult {
    /// A push where every change was accepted.
    pub fn accepted() -> Self {
        Self::default()
    }

    /// A push where some ids were refused.
    pub fn rejected(rejected_ids: RejectedIds) -> Self {
        Self {
            rejected_ids: Some(rejected_ids),
        }
    }
}

/// A sync transport talks to the remote.
///
/// This trait abstracts the network layer. Timeouts and retries are the
/// implementation's business; the engine imposes none.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Fetches remote changes since `args.last_pulled_at`.
    async fn pull_changes(&self, args: PullArgs) -> SyncResult<PullResult>;

    /// Sends local changes.
    async fn push_changes(&self, args: PushArgs) -> SyncResult<PushResult>;
}

#[async_trait]
impl<T: SyncTransport + ?Sized> SyncTransport for Arc<T> {
    async fn pull_changes(&self, args: PullArgs) -> SyncResult<PullResult> {
        (**self).pull_changes(args).await
    }

    async fn push_changes(&self, args: PushArgs) -> SyncResult<PushResult> {
        (**self).push_changes(args).await
    }
}

/// A transport built from a pull closure and a push closure.
pub struct FnTransport<P, Q> {
    pull: P,
    push: Q,
}

impl<P, Q, PF, QF> FnTransport<P, Q>
where
    P: Fn(PullArgs) -> PF + Send + Sync,
    Q: Fn(PushArgs) -> QF + Send + Sync,
    PF: Future<Output = SyncResult<PullResult>> + Send + 'static,
    QF: Future<Output = SyncResult<PushResult>> + Send + 'static,
{
    /// Creates a transport from two async closures.
    pub fn new(pull: P, push: Q) -> Self {
        Self { pull, push }
    }
}

#[async_trait]
impl<P, Q, PF, QF> SyncTransport for FnTransport<P, Q>
where
    P: Fn(PullArgs) -> PF + Send + Sync,
    Q: Fn(PushArgs) -> QF + Send + Sync,
    PF: Future<Output = SyncResult<PullResult>> + Send + 'static,
    QF: Future<Output = SyncResult<PushResult>> + Send + 'static,
{
    async fn pull_changes(&self, args: PullArgs) -> SyncResult<PullResult> {
        (self.pull)(args).await
    }

    async fn push_changes(&self, args: PushArgs) -> SyncResult<PushResult> {
        (self.push)(args).await
    }
}

type PullHook = Box<dyn Fn(&PullArgs) + Send + Sync>;
type PushHook = Box<dyn Fn(&PushArgs) + Send + Sync>;

/// A scripted transport for testing.
///
/// Queued responses are returned first, in order. When the queue is empty
/// the default response is returned, or an error if there is none. Every
/// call is recorded.
#[derive(Default)]
pub struct MockTransport {
    connected: AtomicBool,
    pull_queue: Mutex<VecDeque<SyncResult<PullResult>>>,
    push_queue: Mutex<VecDeque<SyncResult<PushResult>>>,
    pull_response: Mutex<Option<PullResult>>,
    push_response: Mutex<Option<PushResult>>,
    pulls: Mutex<Vec<PullArgs>>,
    pushes: Mutex<Vec<PushArgs>>,
    on_pull: Mutex<Option<PullHook>>,
    on_push: Mutex<Option<PushHook>>,
}

impl MockTransport {
    /// Creates a connected mock transport that accepts every push.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            push_response: Mutex::new(Some(PushResult::accepted())),
            ..Self::default()
        }
    }

    /// Sets the pull response returned when nothing is queued.
    pub fn set_pull_response(&self, response: PullResult) {
        *self.pull_response.lock() = Some(response);
    }

    /// Sets the push response returned when nothing is queued.
    pub fn set_push_response(&self, response: PushResult) {
        *self.push_response.lock() = Some(response);
    }

    /// Queues the result of a future pull.
    pub fn queue_pull(&self, response: SyncResult<PullResult>) {
        self.pull_queue.lock().push_back(response);
    }

    /// Queues the result of a future push.
    pub fn queue_push(&self, response: SyncResult<PushResult>) {
        self.push_queue.lock().push_back(response);
    }

    /// Runs `hook` at the start of every pull.
    pub fn on_pull(&self, hook: impl Fn(&PullArgs) + Send + Sync + 'static) {
        *self.on_pull.lock() = Some(Box::new(hook));
    }

    /// Runs `hook` at the start of every push.
    pub fn on_push(&self, hook: impl Fn(&PushArgs) + Send + Sync + 'static) {
        *self.on_push.lock() = Some(Box::new(hook));
    }

    /// Sets the connected state. Calls fail while disconnected.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Arguments of every pull so far.
    pub fn pulls(&self) -> Vec<PullArgs> {
        self.pulls.lock().clone()
    }

    /// Arguments of every push so far.
    pub fn pushes(&self) -> Vec<PushArgs> {
        self.pushes.lock().clone()
    }

    fn check_connected(&self) -> SyncResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SyncError::transport_retryable("not connected"))
        }
    }
}

#[async_trait]
impl SyncTransport for MockTransport {
    async fn pull_changes(&self, args: PullArgs) -> SyncResult<PullResult> {
        self.check_connected()?;
        if let Some(hook) = self.on_pull.lock().as_ref() {
            hook(&args);
        }
        self.pulls.lock().push(args);
        if let Some(response) = self.pull_queue.lock().pop_front() {
            return response;
        }
        self.pull_response
            .lock()
            .clone()
            .ok_or_else(|| SyncError::transport_fatal("no mock pull response set"))
    }

    async fn push_changes(&self, args: PushArgs) -> SyncResult<PushResult> {
        self.check_connected()?;
        if let Some(hook) = self.on_push.lock().as_ref() {
            hook(&args);
        }
        self.pushes.lock().push(args);
        if let Some(response) = self.push_queue.lock().pop_front() {
            return response;
        }
        self.push_response
            .lock()
            .clone()
            .ok_or_else(|| SyncError::transport_fatal("no mock push response set"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pull_args() -> PullArgs {
        PullArgs {
            last_pulled_at: None,
            schema_version: 1,
            migration: None,
        }
    }

    #[tokio::test]
    async fn mock_transport_not_connected_error() {
        let transport = MockTransport::new();
        transport.set_connected(false);
        let err = transport.pull_changes(pull_args()).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(transport.pulls().is_empty());
    }

    #[tokio::test]
    async fn queued_responses_come_first() {
        let transport = MockTransport::new();
        transport.set_pull_response(PullResult::new(ChangeSet::new(), SyncCursor::timestamp(20)));
        transport.queue_pull(Ok(PullResult::new(ChangeSet::new(), SyncCursor::timestamp(10))));
        transport.queue_pull(Err(SyncError::transport_retryable("timeout")));

        let first = transport.pull_changes(pull_args()).await.unwrap();
        assert_eq!(first.timestamp, SyncCursor::timestamp(10));
        assert!(transport.pull_changes(pull_args()).await.is_err());
        let third = transport.pull_changes(pull_args()).await.unwrap();
        assert_eq!(third.timestamp, SyncCursor::timestamp(20));
        assert_eq!(transport.pulls().len(), 3);
    }

    #[tokio::test]
    async fn missing_pull_response_is_an_error() {
        let transport = MockTransport::new();
        let err = transport.pull_changes(pull_args()).await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn hooks_run_before_recording() {
        let transport = MockTransport::new();
        let seen = Arc::new(AtomicBool::new(false));
        let flag = seen.clone();
        transport.on_push(move |_| flag.store(true, Ordering::SeqCst));

        let result = transport
            .push_changes(PushArgs {
                changes: ChangeSet::new(),
                last_pulled_at: SyncCursor::timestamp(1),
            })
            .await
            .unwrap();
        assert_eq!(result, PushResult::accepted());
        assert!(seen.load(Ordering::SeqCst));
        assert_eq!(transport.pushes().len(), 1);
    }

    #[tokio::test]
    async fn fn_transport_calls_closures() {
        let transport = FnTransport::new(
            |args: PullArgs| async move {
                assert_eq!(args.schema_version, 1);
                Ok::<_, SyncError>(PullResult::new(ChangeSet::new(), SyncCursor::timestamp(5)))
            },
            |_: PushArgs| async { Ok::<_, SyncError>(PushResult::accepted()) },
        );
        let pulled = transport.pull_changes(pull_args()).await.unwrap();
        assert_eq!(pulled.timestamp, SyncCursor::timestamp(5));
    }
}
