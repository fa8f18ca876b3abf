//! Reconciliation: rebuild the authoritative graph from the last snapshot
//! plus every logged operation after it.
//!
//! Snapshot rows are written best effort after each push and may lag or run
//! ahead of the log. Replay is idempotent, so applying the tail of the log on
//! top of whatever the rows hold converges on the log's state.

use std::sync::Arc;

use rootline_graph::replay::replay;
use rootline_graph::{FamilyGraph, ReplayReport};
use rootline_types::{Operation, Snapshot, TreeId};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::error::SyncError;
use crate::remote::{RemoteStore, SessionProvider};

/// What a reconciliation found.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Version the snapshot claimed to include.
    pub snapshot_version: u64,
    pub replay: ReplayReport,
}

impl ReconcileReport {
    /// Highest version now reflected in the graph.
    pub fn head(&self) -> u64 {
        self.replay.head
    }
}

/// Apply `ops` on top of `snapshot`.
pub fn reconcile(snapshot: &Snapshot, ops: &[Operation]) -> (FamilyGraph, ReconcileReport) {
    let mut graph = FamilyGraph::from_snapshot(snapshot);
    let report = replay(&mut graph, snapshot.tree_id, snapshot.version, ops);
    for skipped in &report.skipped {
        warn!(tree = %snapshot.tree_id, version = skipped.version, reason = %skipped.reason, "skipped log entry");
    }
    (graph, ReconcileReport { snapshot_version: snapshot.version, replay: report })
}

pub struct Reconciler {
    remote: Arc<dyn RemoteStore>,
    session: Arc<dyn SessionProvider>,
}

impl Reconciler {
    pub fn new(remote: Arc<dyn RemoteStore>, session: Arc<dyn SessionProvider>) -> Self {
        Self { remote, session }
    }

    /// Fetch the snapshot and the log tail, and replay.
    #[instrument(skip(self), fields(tree = %tree_id))]
    pub async fn load(&self, tree_id: TreeId) -> Result<(FamilyGraph, ReconcileReport), SyncError> {
        let creds = self.session.credentials().ok_or(SyncError::NotSignedIn)?;
        let snapshot = self.remote.fetch_snapshot(&creds, tree_id).await?;
        let ops = self.remote.fetch_operations(&creds, tree_id, snapshot.version).await?;
        let (graph, report) = reconcile(&snapshot, &ops);
        info!(
            snapshot_version = report.snapshot_version,
            head = report.head(),
            applied = report.replay.applied.len(),
            skipped = report.replay.skipped.len(),
            people = graph.len(),
            "reconciled"
        );
        Ok((graph, report))
    }

    /// Reconcile, then overwrite the snapshot tables with the result at the
    /// log head. Returns the new snapshot version.
    #[instrument(skip(self), fields(tree = %tree_id))]
    pub async fn backup(&self, tree_id: TreeId) -> Result<u64, SyncError> {
        let (graph, report) = self.load(tree_id).await?;
        let creds = self.session.credentials().ok_or(SyncError::NotSignedIn)?;
        let head = report.head();
        self.remote.replace_snapshot(&creds, graph.to_snapshot(tree_id, head)).await?;
        info!(version = head, people = graph.len(), "snapshot backup written");
        Ok(head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryRemote;
    use crate::remote::{Credentials, Identity, StaticSession};
    use rootline_graph::GraphStore;
    use rootline_types::{ActorId, Gender, NewOperation, PersonPatch, RelationKind};

    fn session() -> Arc<StaticSession> {
        Arc::new(StaticSession::new(
            Identity { actor_id: ActorId::new(), email: "ada@example.com".into() },
            Credentials::bearer("token"),
        ))
    }

    async fn push_all(remote: &MemoryRemote, tree: TreeId, store: &mut GraphStore) {
        let creds = Credentials::bearer("token");
        let root = store.add_root(Gender::Female).unwrap();
        let id = root.person_id.unwrap();
        let child = store.add_relative(id, Gender::Male, RelationKind::Child).unwrap();
        let named = store.update_properties(id, &PersonPatch::set("first_name", "Ada")).unwrap();
        for edit in [root, child, named] {
            for m in &edit.mutations {
                let op = NewOperation::from_mutation(tree, m, None, 0).unwrap();
                remote.insert_operation(&creds, op).await.unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_load_replays_log_over_empty_snapshot() {
        let remote = Arc::new(MemoryRemote::new());
        let tree = TreeId::new();
        let mut store = GraphStore::new();
        push_all(&remote, tree, &mut store).await;

        let reconciler = Reconciler::new(remote.clone(), session());
        let (graph, report) = reconciler.load(tree).await.unwrap();
        assert_eq!(&graph, store.graph().as_ref());
        assert_eq!(report.snapshot_version, 0);
        assert_eq!(report.head(), 3);
    }

    #[tokio::test]
    async fn test_backup_sets_version_and_load_is_unchanged() {
        let remote = Arc::new(MemoryRemote::new());
        let tree = TreeId::new();
        let mut store = GraphStore::new();
        push_all(&remote, tree, &mut store).await;

        let reconciler = Reconciler::new(remote.clone(), session());
        assert_eq!(reconciler.backup(tree).await.unwrap(), 3);
        assert_eq!(remote.snapshot(tree).version, 3);

        let (graph, report) = reconciler.load(tree).await.unwrap();
        assert_eq!(&graph, store.graph().as_ref());
        assert!(report.replay.applied.is_empty());
        assert_eq!(report.head(), 3);
    }

    #[tokio::test]
    async fn test_offline_load_is_reported() {
        let remote = Arc::new(MemoryRemote::new());
        remote.set_offline(true);
        let reconciler = Reconciler::new(remote, session());
        let err = reconciler.load(TreeId::new()).await.unwrap_err();
        assert!(err.is_offline());
    }
}
