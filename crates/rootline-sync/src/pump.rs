//! Async driver for the [`Outbox`].
//!
//! The pump pushes due entries one at a time, in order, stopping at the first
//! failure. After the server confirms an operation it updates the snapshot
//! rows (best effort), records the activity entry, and counts toward the
//! next backup. A background worker sleeps until the outbox's next deadline
//! or until new work is enqueued.
//!
//! The outbox mutex is never held across an await; a separate async lock
//! serializes deliveries so a manual flush and the worker never interleave.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rootline_graph::FamilyGraph;
use rootline_types::{ActivityEntry, Clock, Mutation, NewOperation, TreeId};
use tokio::sync::{Notify, broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::activity::ActivityLedger;
use crate::config::SyncConfig;
use crate::constants::EVENT_CHANNEL_CAPACITY;
use crate::error::SyncError;
use crate::outbox::{Completion, Outbox, OutboxEntry};
use crate::remote::{Credentials, Identity, RemoteError, RemoteStore, SessionProvider};
use crate::status::{OutboxEvent, SyncState};

/// Result of one delivery pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub delivered: usize,
    /// The error that stopped the pass, if any.
    pub failed: Option<RemoteError>,
    /// Entries still pending afterwards.
    pub remaining: usize,
}

struct PumpInner {
    tree_id: TreeId,
    outbox: Mutex<Outbox>,
    delivery: tokio::sync::Mutex<()>,
    remote: Arc<dyn RemoteStore>,
    ledger: Arc<ActivityLedger>,
    session: Arc<dyn SessionProvider>,
    clock: Arc<dyn Clock>,
    state_tx: watch::Sender<SyncState>,
    events_tx: broadcast::Sender<OutboxEvent>,
    wake: Notify,
    backup_every: u32,
    since_backup: AtomicU32,
    retry_base: Duration,
}

/// Shared handle to a tree's outgoing queue.
#[derive(Clone)]
pub struct OutboxPump {
    inner: Arc<PumpInner>,
}

impl OutboxPump {
    pub fn new(
        tree_id: TreeId,
        config: &SyncConfig,
        remote: Arc<dyn RemoteStore>,
        ledger: Arc<ActivityLedger>,
        session: Arc<dyn SessionProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (state_tx, _) = watch::channel(SyncState::Synced);
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(PumpInner {
                tree_id,
                outbox: Mutex::new(Outbox::new(config)),
                delivery: tokio::sync::Mutex::new(()),
                remote,
                ledger,
                session,
                clock,
                state_tx,
                events_tx,
                wake: Notify::new(),
                backup_every: config.backup_every,
                since_backup: AtomicU32::new(0),
                retry_base: Duration::from_millis(config.retry_base_ms.max(1)),
            }),
        }
    }

    /// Queue the mutations of one edit from `before` to `after`.
    pub fn enqueue(&self, mutations: &[Mutation], before: &FamilyGraph, after: &FamilyGraph) {
        if mutations.is_empty() {
            return;
        }
        let now = self.inner.clock.now_millis();
        {
            let mut outbox = self.inner.outbox.lock();
            for mutation in mutations {
                outbox.enqueue(mutation.clone(), before, after, now);
            }
        }
        self.inner.state_tx.send_if_modified(|state| {
            let idle = *state == SyncState::Synced;
            if idle {
                *state = SyncState::Saving;
            }
            idle
        });
        self.inner.wake.notify_one();
    }

    /// Push whatever is due, honoring debounce windows and retry backoff.
    pub async fn deliver_due(&self) -> Result<FlushReport, SyncError> {
        self.deliver(false).await
    }

    /// Push everything pending now, ignoring debounce and backoff.
    #[instrument(skip(self), fields(tree = %self.inner.tree_id))]
    pub async fn flush_outgoing_batch(&self) -> Result<FlushReport, SyncError> {
        let mut total = FlushReport::default();
        loop {
            let report = self.deliver(true).await?;
            total.delivered += report.delivered;
            total.remaining = report.remaining;
            if report.failed.is_some() || report.delivered == 0 || report.remaining == 0 {
                total.failed = report.failed;
                break;
            }
        }
        info!(delivered = total.delivered, remaining = total.remaining, failed = total.failed.is_some(), "flushed");
        Ok(total)
    }

    /// Drop every pending entry. Returns how many were dropped.
    pub fn clear_outgoing_queue(&self) -> usize {
        let dropped = self.inner.outbox.lock().clear();
        warn!(tree = %self.inner.tree_id, dropped, "outgoing queue cleared");
        let _ = self.inner.events_tx.send(OutboxEvent::Cleared { dropped });
        self.inner.state_tx.send_replace(SyncState::Synced);
        dropped
    }

    pub fn state(&self) -> SyncState {
        *self.inner.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SyncState> {
        self.inner.state_tx.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<OutboxEvent> {
        self.inner.events_tx.subscribe()
    }

    pub fn pending_len(&self) -> usize {
        self.inner.outbox.lock().pending_len()
    }

    /// Summaries of pending entries, in send order.
    pub fn pending_summaries(&self) -> Vec<String> {
        self.inner.outbox.lock().pending().map(|e| e.summary.clone()).collect()
    }

    /// Mark the pump offline without attempting a push (the session opened
    /// from a local copy).
    pub(crate) fn mark_offline(&self) {
        self.inner.state_tx.send_replace(SyncState::Offline);
    }

    /// Recompute the state from the queue after the remote answered.
    pub(crate) fn mark_online(&self) {
        let state = if self.pending_len() == 0 { SyncState::Synced } else { SyncState::Saving };
        self.inner.state_tx.send_replace(state);
    }

    async fn deliver(&self, force: bool) -> Result<FlushReport, SyncError> {
        let inner = &self.inner;
        let _guard = inner.delivery.lock().await;

        let Some(creds) = inner.session.credentials() else {
            inner.state_tx.send_replace(SyncState::Error);
            return Err(SyncError::NotSignedIn);
        };
        let identity = inner.session.identity();

        let batch = inner.outbox.lock().take_batch(inner.clock.now_millis(), force);
        let Some(batch) = batch else {
            return Ok(FlushReport { remaining: self.pending_len(), ..Default::default() });
        };
        inner.state_tx.send_replace(SyncState::Saving);
        debug!(tree = %inner.tree_id, entries = batch.entries.len(), force, "delivering batch");

        let mut completion = Completion::default();
        let mut failure = None;
        let mut entries = batch.entries.into_iter();
        for entry in entries.by_ref() {
            let created_at = inner.clock.now_millis();
            let actor_id = identity.as_ref().map(|i| i.actor_id);
            let record = match NewOperation::from_mutation(inner.tree_id, &entry.mutation, actor_id, created_at) {
                Ok(record) => record,
                Err(e) => {
                    error!(tree = %inner.tree_id, kind = %entry.kind(), error = %e, "dropping unencodable operation");
                    continue;
                }
            };
            match inner.remote.insert_operation(&creds, record).await {
                Ok(version) => {
                    self.confirmed(&creds, identity.as_ref(), &entry, version).await;
                    completion.delivered.push(entry);
                }
                Err(e) => {
                    warn!(
                        tree = %inner.tree_id,
                        kind = %entry.kind(),
                        attempts = entry.attempts + 1,
                        error = %e,
                        "push failed"
                    );
                    let _ = inner.events_tx.send(OutboxEvent::Failed {
                        kind: entry.kind(),
                        person_id: entry.mutation.person_id(),
                        attempts: entry.attempts + 1,
                        error: e.to_string(),
                    });
                    completion.failed = Some(entry);
                    failure = Some(e);
                    break;
                }
            }
        }
        completion.unsent = entries.collect();

        let delivered = completion.delivered.len();
        let remaining = {
            let mut outbox = inner.outbox.lock();
            outbox.finish(batch.generation, completion, inner.clock.now_millis());
            outbox.pending_len()
        };
        let state = match &failure {
            Some(e) => SyncState::from_error(e),
            None if remaining == 0 => SyncState::Synced,
            None => SyncState::Saving,
        };
        inner.state_tx.send_replace(state);
        Ok(FlushReport { delivered, failed: failure, remaining })
    }

    async fn confirmed(&self, creds: &Credentials, identity: Option<&Identity>, entry: &OutboxEntry, version: u64) {
        let inner = &self.inner;
        debug!(tree = %inner.tree_id, kind = %entry.kind(), version, "operation confirmed");

        if let Err(e) = self.write_rows(creds, entry).await {
            warn!(tree = %inner.tree_id, version, error = %e, "snapshot rows not updated; replay will cover it");
        }
        let _ = inner.events_tx.send(OutboxEvent::Confirmed {
            kind: entry.kind(),
            person_id: entry.mutation.person_id(),
            version,
        });

        match identity {
            Some(identity) => {
                inner
                    .ledger
                    .record(ActivityEntry {
                        tree_id: inner.tree_id,
                        actor_id: identity.actor_id,
                        actor_email: identity.email.clone(),
                        action: entry.kind(),
                        details: entry.summary.clone(),
                        created_at: inner.clock.now_millis(),
                    })
                    .await;
            }
            None => warn!(tree = %inner.tree_id, "no identity, activity not recorded"),
        }

        if inner.backup_every > 0 {
            let count = inner.since_backup.fetch_add(1, Ordering::SeqCst) + 1;
            if count >= inner.backup_every {
                inner.since_backup.store(0, Ordering::SeqCst);
                info!(tree = %inner.tree_id, version, "backup due");
                let _ = inner.events_tx.send(OutboxEvent::BackupRequested { version });
            }
        }
    }

    /// Mirror a confirmed mutation into the snapshot tables.
    async fn write_rows(&self, creds: &Credentials, entry: &OutboxEntry) -> Result<(), RemoteError> {
        let inner = &self.inner;
        let tree = inner.tree_id;
        let remote = &inner.remote;
        match &entry.mutation {
            Mutation::AddNode(p) => {
                remote.upsert_people(creds, tree, vec![p.person.clone()]).await?;
                if let Some(link) = entry.mutation.relationship() {
                    remote.upsert_relationships(creds, tree, vec![link]).await?;
                }
            }
            Mutation::UpdateProp(p) => remote.patch_person(creds, tree, p.person_id, p.patch.clone()).await?,
            Mutation::DeleteNode(p) => remote.delete_people(creds, tree, vec![p.person_id]).await?,
            Mutation::AddRelation(_) => {
                if let Some(link) = entry.mutation.relationship() {
                    remote.upsert_relationships(creds, tree, vec![link]).await?;
                }
            }
            Mutation::DeleteRelation(_) => {
                if let Some(link) = entry.mutation.relationship() {
                    remote.delete_relationships(creds, tree, vec![link]).await?;
                }
            }
        }
        Ok(())
    }

    /// Run delivery in the background until the returned handle is stopped
    /// or dropped.
    pub fn spawn_worker(&self) -> PumpWorker {
        let pump = self.clone();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let inner = &pump.inner;
            loop {
                let now = inner.clock.now_millis();
                let wake_at = inner.outbox.lock().next_wake(now);
                let sleep = async {
                    match wake_at {
                        Some(at) => tokio::time::sleep(Duration::from_millis(at.saturating_sub(now))).await,
                        None => std::future::pending::<()>().await,
                    }
                };
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = inner.wake.notified() => continue,
                    _ = sleep => {}
                }
                if let Err(e) = pump.deliver_due().await {
                    warn!(tree = %inner.tree_id, error = %e, "background delivery skipped");
                    tokio::select! {
                        _ = &mut shutdown_rx => break,
                        _ = tokio::time::sleep(inner.retry_base) => {}
                    }
                }
            }
            debug!(tree = %inner.tree_id, "outbox worker stopped");
        });
        PumpWorker { shutdown_tx, handle }
    }
}

/// Handle to a running delivery worker. Dropping it stops the worker.
pub struct PumpWorker {
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl PumpWorker {
    /// Stop the worker and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.handle.await {
            warn!(error = %e, "outbox worker panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryRemote;
    use crate::remote::StaticSession;
    use rootline_graph::{Edit, GraphStore};
    use rootline_types::{ActorId, Gender, ManualClock, OpKind, PersonPatch, RelationKind};

    struct Fixture {
        remote: Arc<MemoryRemote>,
        clock: Arc<ManualClock>,
        pump: OutboxPump,
        store: GraphStore,
        tree: TreeId,
    }

    impl Fixture {
        fn new(config: SyncConfig) -> Self {
            let remote = Arc::new(MemoryRemote::new());
            let clock = Arc::new(ManualClock::new(1_000_000));
            let tree = TreeId::new();
            let session: Arc<dyn SessionProvider> = Arc::new(StaticSession::new(
                Identity { actor_id: ActorId::new(), email: "ada@example.com".into() },
                Credentials::bearer("token"),
            ));
            let ledger = Arc::new(ActivityLedger::new(tree, remote.clone(), session.clone()));
            let pump = OutboxPump::new(tree, &config, remote.clone(), ledger, session, clock.clone());
            Self { remote, clock, pump, store: GraphStore::new(), tree }
        }

        fn push(&self, edit: &Edit) {
            self.pump.enqueue(&edit.mutations, &edit.before, &edit.graph);
        }

        fn advance(&self, ms: u64) {
            self.clock.advance(Duration::from_millis(ms));
        }
    }

    #[tokio::test]
    async fn test_coalesced_props_produce_one_operation() {
        let mut f = Fixture::new(SyncConfig::default());
        let edit = f.store.add_root(Gender::Female).unwrap();
        let root = edit.person_id.unwrap();
        f.push(&edit);
        f.pump.deliver_due().await.unwrap();

        for name in ["A", "Ad", "Ada"] {
            let edit = f.store.update_properties(root, &PersonPatch::set("first_name", name)).unwrap();
            f.push(&edit);
            f.advance(100);
        }
        assert_eq!(f.pump.deliver_due().await.unwrap().delivered, 0);
        f.advance(300);
        let report = f.pump.deliver_due().await.unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(report.remaining, 0);

        let ops = f.remote.operations(f.tree);
        assert_eq!(ops.iter().map(|op| op.kind).collect::<Vec<_>>(), vec![OpKind::AddNode, OpKind::UpdateProp]);
        assert_eq!(f.remote.snapshot(f.tree).people[0].details.first_name.as_deref(), Some("Ada"));
        assert_eq!(f.pump.state(), SyncState::Synced);

        let activity = f.remote.activity(f.tree);
        assert_eq!(activity.len(), 2);
        assert_eq!(activity[1].details, "updated first_name of \"Ada\"");
    }

    #[tokio::test]
    async fn test_failure_stops_batch_and_retries_later() {
        let mut f = Fixture::new(SyncConfig::default());
        let edit = f.store.add_root(Gender::Female).unwrap();
        let root = edit.person_id.unwrap();
        f.push(&edit);
        let child = f.store.add_relative(root, Gender::Male, RelationKind::Child).unwrap();
        f.push(&child);
        let mut events = f.pump.subscribe_events();

        f.remote.fail_next_insert(RemoteError::Unavailable("timeout".into()));
        let report = f.pump.deliver_due().await.unwrap();
        assert_eq!(report.delivered, 0);
        assert_eq!(report.remaining, 2);
        assert!(report.failed.is_some_and(|e| e.is_offline()));
        assert_eq!(f.pump.state(), SyncState::Offline);
        assert!(matches!(events.recv().await.unwrap(), OutboxEvent::Failed { attempts: 1, .. }));

        // Backoff holds background delivery.
        f.advance(1_999);
        assert_eq!(f.pump.deliver_due().await.unwrap().delivered, 0);
        f.advance(1);
        let report = f.pump.deliver_due().await.unwrap();
        assert_eq!(report.delivered, 2);
        assert_eq!(f.pump.state(), SyncState::Synced);

        let versions: Vec<u64> = f.remote.operations(f.tree).iter().map(|op| op.version_seq).collect();
        assert_eq!(versions, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_flush_ignores_debounce() {
        let mut f = Fixture::new(SyncConfig::default());
        let edit = f.store.add_root(Gender::Female).unwrap();
        let root = edit.person_id.unwrap();
        f.push(&edit);
        let edit = f.store.update_properties(root, &PersonPatch::set("last_name", "Byron")).unwrap();
        f.push(&edit);

        let report = f.pump.flush_outgoing_batch().await.unwrap();
        assert_eq!(report.delivered, 2);
        assert_eq!(report.remaining, 0);
        assert_eq!(f.remote.operations(f.tree).len(), 2);
    }

    #[tokio::test]
    async fn test_row_write_failure_does_not_block_log() {
        let mut f = Fixture::new(SyncConfig::default());
        f.remote.set_row_writes_failing(true);
        let edit = f.store.add_root(Gender::Female).unwrap();
        f.push(&edit);

        let report = f.pump.flush_outgoing_batch().await.unwrap();
        assert_eq!(report.delivered, 1);
        assert!(report.failed.is_none());
        assert_eq!(f.remote.operations(f.tree).len(), 1);
        assert!(f.remote.snapshot(f.tree).people.is_empty());
    }

    #[tokio::test]
    async fn test_backup_requested_once_per_threshold() {
        let config = SyncConfig { backup_every: 5, ..SyncConfig::default() };
        let mut f = Fixture::new(config);
        let mut events = f.pump.subscribe_events();
        let edit = f.store.add_root(Gender::Female).unwrap();
        let root = edit.person_id.unwrap();
        f.push(&edit);
        for _ in 0..11 {
            let edit = f.store.add_relative(root, Gender::Male, RelationKind::Child).unwrap();
            f.push(&edit);
        }
        f.pump.flush_outgoing_batch().await.unwrap();

        let mut backups = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let OutboxEvent::BackupRequested { version } = event {
                backups.push(version);
            }
        }
        assert_eq!(backups, vec![5, 10]);
    }

    #[tokio::test]
    async fn test_clear_outgoing_queue() {
        let mut f = Fixture::new(SyncConfig::default());
        let edit = f.store.add_root(Gender::Female).unwrap();
        f.push(&edit);
        assert_eq!(f.pump.state(), SyncState::Saving);
        assert_eq!(f.pump.pending_summaries().len(), 1);

        assert_eq!(f.pump.clear_outgoing_queue(), 1);
        assert_eq!(f.pump.state(), SyncState::Synced);
        assert_eq!(f.pump.flush_outgoing_batch().await.unwrap().delivered, 0);
        assert!(f.remote.operations(f.tree).is_empty());
    }

    #[tokio::test]
    async fn test_not_signed_in() {
        struct SignedOut;
        impl SessionProvider for SignedOut {
            fn identity(&self) -> Option<Identity> {
                None
            }
            fn credentials(&self) -> Option<Credentials> {
                None
            }
        }
        let remote = Arc::new(MemoryRemote::new());
        let tree = TreeId::new();
        let session: Arc<dyn SessionProvider> = Arc::new(SignedOut);
        let ledger = Arc::new(ActivityLedger::new(tree, remote.clone(), session.clone()));
        let pump = OutboxPump::new(tree, &SyncConfig::default(), remote, ledger, session, Arc::new(ManualClock::new(0)));
        let mut store = GraphStore::new();
        let edit = store.add_root(Gender::Female).unwrap();
        pump.enqueue(&edit.mutations, &edit.before, &edit.graph);

        assert!(matches!(pump.flush_outgoing_batch().await, Err(SyncError::NotSignedIn)));
        assert_eq!(pump.state(), SyncState::Error);
        assert_eq!(pump.pending_len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_delivers_enqueued_edit() {
        let f = Fixture::new(SyncConfig::default());
        let mut store = GraphStore::new();
        let worker = f.pump.spawn_worker();
        let mut state = f.pump.subscribe_state();

        let edit = store.add_root(Gender::Female).unwrap();
        f.push(&edit);
        while *state.borrow_and_update() != SyncState::Synced {
            state.changed().await.unwrap();
        }
        assert_eq!(f.remote.operations(f.tree).len(), 1);
        worker.stop().await;
    }
}
