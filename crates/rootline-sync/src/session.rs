//! One collaborator's live view of a tree.
//!
//! [`TreeSession`] owns the working [`GraphStore`] and fans every edit out:
//! mutations go to the outbox, the new graph goes to subscribers, to the
//! consistency checker, and to the throttled local saver. All edits happen
//! on the caller's task; background work only ever sees immutable `Arc`
//! copies of the graph.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rootline_graph::{ConsistencyChecker, Edit, FamilyGraph, GraphStore, IssueReport, Rejected};
use rootline_types::{
    ActivityEntry, ActivityQuery, Clock, Gender, PersonId, PersonPatch, RelationKind, TreeId,
};
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::activity::ActivityLedger;
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::local::{LocalSaver, LocalStore};
use crate::pump::{FlushReport, OutboxPump, PumpWorker};
use crate::reconcile::{ReconcileReport, Reconciler};
use crate::remote::{ActivityStore, RemoteStore, SessionProvider};
use crate::status::{OutboxEvent, SyncState};

/// Collaborators a session is built from.
#[derive(Clone)]
pub struct SessionDeps {
    pub remote: Arc<dyn RemoteStore>,
    pub activity: Arc<dyn ActivityStore>,
    pub session: Arc<dyn SessionProvider>,
    /// Local copy for restarts and offline opens; `None` disables it.
    pub local: Option<Arc<dyn LocalStore>>,
    pub clock: Arc<dyn Clock>,
}

pub struct TreeSession {
    tree_id: TreeId,
    config: SyncConfig,
    store: GraphStore,
    pump: OutboxPump,
    checker: ConsistencyChecker,
    ledger: Arc<ActivityLedger>,
    reconciler: Arc<Reconciler>,
    saver: Option<Arc<Mutex<LocalSaver>>>,
    graph_tx: watch::Sender<Arc<FamilyGraph>>,
    clock: Arc<dyn Clock>,
    head: u64,
}

impl TreeSession {
    /// Reconcile `tree_id` from the remote and start a session on it.
    ///
    /// When the remote is unreachable and a local copy exists, the session
    /// opens on that copy in the offline state; edits queue until the remote
    /// comes back.
    #[instrument(skip(config, deps), fields(tree = %tree_id))]
    pub async fn open(tree_id: TreeId, config: SyncConfig, deps: SessionDeps) -> Result<Self, SyncError> {
        let reconciler = Arc::new(Reconciler::new(deps.remote.clone(), deps.session.clone()));
        let (graph, head, offline) = match reconciler.load(tree_id).await {
            Ok((graph, report)) => (graph, report.head(), false),
            Err(e) if e.is_offline() => {
                let local = match &deps.local {
                    Some(store) => store.load(tree_id)?,
                    None => None,
                };
                match local {
                    Some(graph) => {
                        warn!(error = %e, people = graph.len(), "remote unreachable, opened local copy");
                        (graph, 0, true)
                    }
                    None => return Err(e),
                }
            }
            Err(e) => return Err(e),
        };
        let graph = Arc::new(graph);

        let checker = ConsistencyChecker::spawn(config.check.clone(), deps.clock.clone(), config.check_debounce());
        checker.submit(graph.clone());
        let ledger = Arc::new(ActivityLedger::new(tree_id, deps.activity, deps.session.clone()));
        let pump = OutboxPump::new(tree_id, &config, deps.remote, ledger.clone(), deps.session, deps.clock.clone());
        if offline {
            pump.mark_offline();
        }
        let clock = deps.clock;
        let saver = deps.local.map(|store| {
            Arc::new(Mutex::new(LocalSaver::new(tree_id, store, clock.clone(), config.local_save_throttle_ms)))
        });
        let (graph_tx, _) = watch::channel(graph.clone());

        info!(people = graph.len(), head, offline, "session opened");
        Ok(Self {
            tree_id,
            config,
            store: GraphStore::with_graph(graph),
            pump,
            checker,
            ledger,
            reconciler,
            saver,
            graph_tx,
            clock,
            head,
        })
    }

    pub fn tree_id(&self) -> TreeId {
        self.tree_id
    }

    pub fn graph(&self) -> Arc<FamilyGraph> {
        self.store.graph().clone()
    }

    /// Log version the graph was last reconciled at.
    pub fn head(&self) -> u64 {
        self.head
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn can_undo(&self) -> bool {
        self.store.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.store.can_redo()
    }

    pub fn add_root(&mut self, gender: Gender) -> Result<Edit, Rejected> {
        let edit = self.store.add_root(gender)?;
        self.publish(&edit);
        Ok(edit)
    }

    pub fn add_relative(&mut self, anchor: PersonId, gender: Gender, kind: RelationKind) -> Option<Edit> {
        let edit = self.store.add_relative(anchor, gender, kind)?;
        self.publish(&edit);
        Some(edit)
    }

    pub fn link_existing(&mut self, anchor: PersonId, existing: PersonId, kind: RelationKind) -> Result<Edit, Rejected> {
        let edit = self.store.link_existing(anchor, existing, kind)?;
        self.publish(&edit);
        Ok(edit)
    }

    pub fn update_properties(&mut self, id: PersonId, patch: &PersonPatch) -> Result<Edit, Rejected> {
        let edit = self.store.update_properties(id, patch)?;
        self.publish(&edit);
        Ok(edit)
    }

    pub fn update_properties_transient(&mut self, id: PersonId, patch: &PersonPatch) -> Result<Edit, Rejected> {
        let edit = self.store.update_properties_transient(id, patch)?;
        self.publish(&edit);
        Ok(edit)
    }

    pub fn remove_relationship(&mut self, target: PersonId, relative: PersonId, kind: RelationKind) -> Edit {
        let edit = self.store.remove_relationship(target, relative, kind);
        self.publish(&edit);
        edit
    }

    pub fn delete_person(&mut self, id: PersonId) -> Edit {
        let edit = self.store.delete_person(id);
        self.publish(&edit);
        edit
    }

    pub fn undo(&mut self) -> Option<Edit> {
        let edit = self.store.undo()?;
        self.publish(&edit);
        Some(edit)
    }

    pub fn redo(&mut self) -> Option<Edit> {
        let edit = self.store.redo()?;
        self.publish(&edit);
        Some(edit)
    }

    fn publish(&self, edit: &Edit) {
        self.pump.enqueue(&edit.mutations, &edit.before, &edit.graph);
        if edit.is_noop() {
            return;
        }
        self.graph_tx.send_replace(edit.graph.clone());
        self.checker.submit(edit.graph.clone());
        if let Some(saver) = &self.saver {
            saver.lock().on_change(edit.graph.clone());
        }
    }

    /// Push pending edits, then replace the working graph with the remote's
    /// reconciled state. Undo history is cleared. Fails without touching the
    /// graph if pending edits could not be pushed.
    #[instrument(skip(self), fields(tree = %self.tree_id))]
    pub async fn reload(&mut self) -> Result<ReconcileReport, SyncError> {
        let flushed = self.pump.flush_outgoing_batch().await?;
        if let Some(e) = flushed.failed {
            return Err(e.into());
        }
        let (graph, report) = self.reconciler.load(self.tree_id).await?;
        let graph = Arc::new(graph);
        self.store.load(graph.clone());
        self.head = report.head();
        self.pump.mark_online();
        self.graph_tx.send_replace(graph.clone());
        self.checker.submit(graph.clone());
        if let Some(saver) = &self.saver {
            saver.lock().on_change(graph);
        }
        Ok(report)
    }

    /// Write a full snapshot backup at the current log head.
    pub async fn run_backup(&self) -> Result<u64, SyncError> {
        self.reconciler.backup(self.tree_id).await
    }

    pub async fn deliver_due(&self) -> Result<FlushReport, SyncError> {
        self.pump.deliver_due().await
    }

    pub async fn flush_outgoing_batch(&self) -> Result<FlushReport, SyncError> {
        self.pump.flush_outgoing_batch().await
    }

    pub fn clear_outgoing_queue(&self) -> usize {
        self.pump.clear_outgoing_queue()
    }

    pub fn pending_summaries(&self) -> Vec<String> {
        self.pump.pending_summaries()
    }

    pub fn sync_state(&self) -> SyncState {
        self.pump.state()
    }

    pub fn issues(&self) -> Arc<IssueReport> {
        self.checker.report()
    }

    pub fn subscribe_graph(&self) -> watch::Receiver<Arc<FamilyGraph>> {
        self.graph_tx.subscribe()
    }

    pub fn subscribe_issues(&self) -> watch::Receiver<Arc<IssueReport>> {
        self.checker.subscribe()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SyncState> {
        self.pump.subscribe_state()
    }

    pub fn subscribe_outbox(&self) -> broadcast::Receiver<OutboxEvent> {
        self.pump.subscribe_events()
    }

    pub fn subscribe_activity(&self) -> broadcast::Receiver<ActivityEntry> {
        self.ledger.subscribe()
    }

    pub async fn activity_page(&self, query: &ActivityQuery) -> Result<Vec<ActivityEntry>, SyncError> {
        self.ledger.page(query).await
    }

    /// Write any throttled local save now.
    pub fn save_local(&self) -> bool {
        self.saver.as_ref().is_some_and(|saver| saver.lock().flush())
    }

    /// Start delivery, backups on request, and trailing local saves.
    pub fn start_background(&self) -> BackgroundTasks {
        let pump = self.pump.spawn_worker();
        let mut tasks = Vec::new();

        let (backup_stop, mut stop_rx) = oneshot::channel::<()>();
        let mut events = self.pump.subscribe_events();
        let reconciler = self.reconciler.clone();
        let tree_id = self.tree_id;
        let backups = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = &mut stop_rx => break,
                    event = events.recv() => event,
                };
                match event {
                    Ok(OutboxEvent::BackupRequested { version }) => match reconciler.backup(tree_id).await {
                        Ok(head) => debug!(tree = %tree_id, requested = version, head, "backup complete"),
                        Err(e) => warn!(tree = %tree_id, error = %e, "backup failed"),
                    },
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(tree = %tree_id, skipped = n, "backup listener lagged")
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        tasks.push((backup_stop, backups));

        if let Some(saver) = &self.saver {
            let (saver_stop, mut stop_rx) = oneshot::channel::<()>();
            let saver = saver.clone();
            let clock = self.clock.clone();
            let idle = Duration::from_millis(self.config.local_save_throttle_ms.max(1));
            let saves = tokio::spawn(async move {
                loop {
                    let now = clock.now_millis();
                    let wait = match saver.lock().next_deadline() {
                        Some(at) => Duration::from_millis(at.saturating_sub(now)),
                        None => idle,
                    };
                    tokio::select! {
                        _ = &mut stop_rx => break,
                        _ = tokio::time::sleep(wait) => {}
                    }
                    save_blocking(&saver, LocalSaver::poll).await;
                }
                save_blocking(&saver, LocalSaver::flush).await;
            });
            tasks.push((saver_stop, saves));
        }

        BackgroundTasks { pump, tasks }
    }

    /// Flush the outbox and the local copy.
    pub async fn close(self) -> Result<FlushReport, SyncError> {
        if let Some(saver) = &self.saver {
            save_blocking(saver, LocalSaver::flush).await;
        }
        self.pump.flush_outgoing_batch().await
    }
}

/// Run a trailing save on the blocking pool. The saver lock is only taken
/// there.
async fn save_blocking(saver: &Arc<Mutex<LocalSaver>>, save: fn(&mut LocalSaver) -> bool) -> bool {
    let saver = saver.clone();
    match tokio::task::spawn_blocking(move || save(&mut saver.lock())).await {
        Ok(wrote) => wrote,
        Err(e) => {
            warn!(error = %e, "local save task failed");
            false
        }
    }
}

/// Handles to a session's background tasks. Dropping them stops the tasks.
pub struct BackgroundTasks {
    pump: PumpWorker,
    tasks: Vec<(oneshot::Sender<()>, JoinHandle<()>)>,
}

impl BackgroundTasks {
    /// Stop every task and wait for them to exit.
    pub async fn stop(self) {
        self.pump.stop().await;
        for (stop, handle) in self.tasks {
            let _ = stop.send(());
            if let Err(e) = handle.await {
                warn!(error = %e, "background task panicked");
            }
        }
    }
}
