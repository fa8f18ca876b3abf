//! Local persistence of the working graph, so a session survives restarts
//! and can open while the remote is unreachable.
//!
//! Saves are throttled: the first change after a quiet spell is written at
//! once, and further changes inside the window collapse into one trailing
//! write when it closes. Failures are logged and otherwise ignored; the
//! server log stays the source of truth.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rootline_graph::FamilyGraph;
use rootline_types::{Clock, Snapshot, TreeId};
use thiserror::Error;
use tracing::{debug, warn};

use crate::schedule::DelayQueue;

#[derive(Debug, Error)]
pub enum LocalStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Where a client keeps its copy of a tree.
pub trait LocalStore: Send + Sync {
    fn save(&self, tree_id: TreeId, graph: &FamilyGraph) -> Result<(), LocalStoreError>;

    /// `Ok(None)` when nothing was saved for `tree_id`.
    fn load(&self, tree_id: TreeId) -> Result<Option<FamilyGraph>, LocalStoreError>;
}

/// One `<tree>.json` snapshot file per tree in a directory.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self, tree_id: TreeId) -> PathBuf {
        self.dir.join(format!("{tree_id}.json"))
    }

    fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, path)
    }
}

impl LocalStore for JsonFileStore {
    fn save(&self, tree_id: TreeId, graph: &FamilyGraph) -> Result<(), LocalStoreError> {
        std::fs::create_dir_all(&self.dir)?;
        let bytes = serde_json::to_vec_pretty(&graph.to_snapshot(tree_id, 0))?;
        Self::write_atomic(&self.path(tree_id), &bytes)?;
        Ok(())
    }

    fn load(&self, tree_id: TreeId) -> Result<Option<FamilyGraph>, LocalStoreError> {
        let bytes = match std::fs::read(self.path(tree_id)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
        Ok(Some(FamilyGraph::from_snapshot(&snapshot)))
    }
}

/// Throttled writer for one tree.
pub struct LocalSaver {
    tree_id: TreeId,
    store: Arc<dyn LocalStore>,
    clock: Arc<dyn Clock>,
    throttle_ms: u64,
    last_saved_at: Option<u64>,
    pending: Option<Arc<FamilyGraph>>,
    trailing: DelayQueue<TreeId>,
}

impl LocalSaver {
    pub fn new(tree_id: TreeId, store: Arc<dyn LocalStore>, clock: Arc<dyn Clock>, throttle_ms: u64) -> Self {
        Self {
            tree_id,
            store,
            clock,
            throttle_ms,
            last_saved_at: None,
            pending: None,
            trailing: DelayQueue::new(),
        }
    }

    /// Note a new graph. Returns true if it was written immediately.
    pub fn on_change(&mut self, graph: Arc<FamilyGraph>) -> bool {
        let now = self.clock.now_millis();
        let window_end = self.last_saved_at.map(|at| at + self.throttle_ms);
        match window_end {
            Some(end) if now < end => {
                self.pending = Some(graph);
                self.trailing.schedule_earliest(self.tree_id, end);
                false
            }
            _ => {
                self.write(&graph, now);
                true
            }
        }
    }

    /// Write the trailing save if its window has closed. Returns true if a
    /// write happened.
    pub fn poll(&mut self) -> bool {
        let now = self.clock.now_millis();
        if !self.trailing.is_due(&self.tree_id, now) {
            return false;
        }
        self.trailing.cancel(&self.tree_id);
        match self.pending.take() {
            Some(graph) => {
                self.write(&graph, now);
                true
            }
            None => false,
        }
    }

    /// Write any pending change now, ignoring the window.
    pub fn flush(&mut self) -> bool {
        self.trailing.cancel(&self.tree_id);
        match self.pending.take() {
            Some(graph) => {
                let now = self.clock.now_millis();
                self.write(&graph, now);
                true
            }
            None => false,
        }
    }

    /// When [`poll`](Self::poll) next has work.
    pub fn next_deadline(&self) -> Option<u64> {
        self.trailing.next_deadline()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    fn write(&mut self, graph: &FamilyGraph, now: u64) {
        match self.store.save(self.tree_id, graph) {
            Ok(()) => debug!(tree = %self.tree_id, people = graph.len(), "saved local copy"),
            Err(e) => warn!(tree = %self.tree_id, error = %e, "local save failed"),
        }
        self.last_saved_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use rootline_graph::GraphStore;
    use rootline_types::{Gender, ManualClock, RelationKind};

    #[derive(Default)]
    struct CountingStore {
        saves: AtomicUsize,
        last_len: AtomicUsize,
    }

    impl LocalStore for CountingStore {
        fn save(&self, _tree_id: TreeId, graph: &FamilyGraph) -> Result<(), LocalStoreError> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            self.last_len.store(graph.len(), Ordering::SeqCst);
            Ok(())
        }

        fn load(&self, _tree_id: TreeId) -> Result<Option<FamilyGraph>, LocalStoreError> {
            Ok(None)
        }
    }

    #[test]
    fn test_json_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("trees"));
        let tree = TreeId::new();
        assert!(store.load(tree).unwrap().is_none());

        let mut graph_store = GraphStore::new();
        let root = graph_store.add_root(Gender::Female).unwrap().person_id.unwrap();
        graph_store.add_relative(root, Gender::Male, RelationKind::Spouse).unwrap();
        store.save(tree, graph_store.graph()).unwrap();

        let loaded = store.load(tree).unwrap().unwrap();
        assert_eq!(&loaded, graph_store.graph().as_ref());
        assert!(!store.path(tree).with_extension("json.tmp").exists());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let tree = TreeId::new();
        std::fs::write(store.path(tree), b"{ not json").unwrap();
        assert!(matches!(store.load(tree), Err(LocalStoreError::Json(_))));
    }

    #[test]
    fn test_throttle_leading_and_trailing() {
        let clock = Arc::new(ManualClock::new(10_000));
        let store = Arc::new(CountingStore::default());
        let mut saver = LocalSaver::new(TreeId::new(), store.clone(), clock.clone(), 3_000);

        let mut graphs = GraphStore::new();
        let root = graphs.add_root(Gender::Female).unwrap().person_id.unwrap();
        assert!(saver.on_change(graphs.graph().clone()));

        clock.advance(Duration::from_millis(500));
        graphs.add_relative(root, Gender::Male, RelationKind::Child).unwrap();
        assert!(!saver.on_change(graphs.graph().clone()));
        clock.advance(Duration::from_millis(500));
        graphs.add_relative(root, Gender::Male, RelationKind::Child).unwrap();
        assert!(!saver.on_change(graphs.graph().clone()));
        assert_eq!(saver.next_deadline(), Some(13_000));

        clock.advance(Duration::from_millis(1_999));
        assert!(!saver.poll());
        clock.advance(Duration::from_millis(1));
        assert!(saver.poll());
        assert_eq!(store.saves.load(Ordering::SeqCst), 2);
        assert_eq!(store.last_len.load(Ordering::SeqCst), 3);
        assert!(!saver.has_pending());
    }

    #[test]
    fn test_flush_writes_pending() {
        let clock = Arc::new(ManualClock::new(0));
        let store = Arc::new(CountingStore::default());
        let mut saver = LocalSaver::new(TreeId::new(), store.clone(), clock, 3_000);
        let graph = Arc::new(FamilyGraph::new());

        saver.on_change(graph.clone());
        saver.on_change(graph);
        assert!(saver.flush());
        assert!(!saver.flush());
        assert_eq!(store.saves.load(Ordering::SeqCst), 2);
        assert_eq!(saver.next_deadline(), None);
    }
}
