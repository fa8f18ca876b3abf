//! In-process remote with fault injection.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use rootline_types::{
    ActivityEntry, ActivityQuery, NewOperation, Operation, PersonId, PersonPatch, PersonRow, RelationshipRow,
    Snapshot, TreeId,
};

use crate::remote::{ActivityStore, Credentials, RemoteError, RemoteStore};

#[derive(Default)]
struct TreeState {
    log: Vec<Operation>,
    version: u64,
    people: BTreeMap<PersonId, PersonRow>,
    relationships: BTreeSet<RelationshipRow>,
}

#[derive(Default)]
struct State {
    trees: HashMap<TreeId, TreeState>,
    activity: Vec<ActivityEntry>,
    offline: bool,
    insert_faults: VecDeque<RemoteError>,
    row_writes_fail: bool,
    activity_fails: bool,
}

/// A [`RemoteStore`] and [`ActivityStore`] held in memory.
///
/// Shares the server's rules: versions are assigned per tree as `max + 1`,
/// and an empty bearer token is unauthorized.
#[derive(Default)]
pub struct MemoryRemote {
    state: Mutex<State>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call fails with [`RemoteError::Unavailable`] while offline.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// Fail the next `insert_operation` call with `error`. Stacks.
    pub fn fail_next_insert(&self, error: RemoteError) {
        self.state.lock().insert_faults.push_back(error);
    }

    /// Make snapshot row writes fail while log inserts keep working.
    pub fn set_row_writes_failing(&self, failing: bool) {
        self.state.lock().row_writes_fail = failing;
    }

    pub fn set_activity_failing(&self, failing: bool) {
        self.state.lock().activity_fails = failing;
    }

    /// The full log of `tree`.
    pub fn operations(&self, tree: TreeId) -> Vec<Operation> {
        self.state.lock().trees.get(&tree).map(|t| t.log.clone()).unwrap_or_default()
    }

    /// Current snapshot rows of `tree`.
    pub fn snapshot(&self, tree: TreeId) -> Snapshot {
        let state = self.state.lock();
        match state.trees.get(&tree) {
            Some(t) => materialize(tree, t),
            None => Snapshot::empty(tree),
        }
    }

    /// Activity entries of `tree`, oldest first.
    pub fn activity(&self, tree: TreeId) -> Vec<ActivityEntry> {
        self.state.lock().activity.iter().filter(|e| e.tree_id == tree).cloned().collect()
    }

    fn check(&self, creds: &Credentials) -> Result<(), RemoteError> {
        let state = self.state.lock();
        if state.offline {
            return Err(RemoteError::Unavailable("memory remote is offline".into()));
        }
        if creds.token.is_empty() {
            return Err(RemoteError::Unauthorized);
        }
        Ok(())
    }

    fn write_rows(&self, creds: &Credentials, tree: TreeId, f: impl FnOnce(&mut TreeState)) -> Result<(), RemoteError> {
        self.check(creds)?;
        let mut state = self.state.lock();
        if state.row_writes_fail {
            return Err(RemoteError::Server("snapshot row write failed".into()));
        }
        f(state.trees.entry(tree).or_default());
        Ok(())
    }
}

fn materialize(tree: TreeId, t: &TreeState) -> Snapshot {
    Snapshot {
        tree_id: tree,
        version: t.version,
        people: t.people.values().cloned().collect(),
        relationships: t.relationships.iter().copied().collect(),
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn insert_operation(&self, creds: &Credentials, op: NewOperation) -> Result<u64, RemoteError> {
        self.check(creds)?;
        let mut state = self.state.lock();
        if let Some(fault) = state.insert_faults.pop_front() {
            return Err(fault);
        }
        let tree = state.trees.entry(op.tree_id).or_default();
        let version = tree.log.last().map_or(1, |last| last.version_seq + 1);
        tree.log.push(op.into_operation(version));
        Ok(version)
    }

    async fn upsert_people(&self, creds: &Credentials, tree: TreeId, rows: Vec<PersonRow>) -> Result<(), RemoteError> {
        self.write_rows(creds, tree, |t| {
            for row in rows {
                t.people.insert(row.id, row);
            }
        })
    }

    async fn patch_person(
        &self,
        creds: &Credentials,
        tree: TreeId,
        id: PersonId,
        patch: PersonPatch,
    ) -> Result<(), RemoteError> {
        self.write_rows(creds, tree, |t| {
            if let Some(row) = t.people.get_mut(&id) {
                patch.apply(&mut row.details);
            }
        })
    }

    async fn delete_people(&self, creds: &Credentials, tree: TreeId, ids: Vec<PersonId>) -> Result<(), RemoteError> {
        self.write_rows(creds, tree, |t| {
            for id in ids {
                t.people.remove(&id);
                t.relationships.retain(|r| !r.touches(id));
            }
        })
    }

    async fn upsert_relationships(
        &self,
        creds: &Credentials,
        tree: TreeId,
        rows: Vec<RelationshipRow>,
    ) -> Result<(), RemoteError> {
        self.write_rows(creds, tree, |t| t.relationships.extend(rows))
    }

    async fn delete_relationships(
        &self,
        creds: &Credentials,
        tree: TreeId,
        rows: Vec<RelationshipRow>,
    ) -> Result<(), RemoteError> {
        self.write_rows(creds, tree, |t| {
            for row in &rows {
                t.relationships.remove(row);
            }
        })
    }

    async fn replace_snapshot(&self, creds: &Credentials, snapshot: Snapshot) -> Result<(), RemoteError> {
        self.write_rows(creds, snapshot.tree_id, |t| {
            t.version = snapshot.version;
            t.people = snapshot.people.into_iter().map(|row| (row.id, row)).collect();
            t.relationships = snapshot.relationships.into_iter().collect();
        })
    }

    async fn fetch_snapshot(&self, creds: &Credentials, tree: TreeId) -> Result<Snapshot, RemoteError> {
        self.check(creds)?;
        Ok(self.snapshot(tree))
    }

    async fn fetch_operations(
        &self,
        creds: &Credentials,
        tree: TreeId,
        after: u64,
    ) -> Result<Vec<Operation>, RemoteError> {
        self.check(creds)?;
        Ok(self.operations(tree).into_iter().filter(|op| op.version_seq > after).collect())
    }
}

#[async_trait]
impl ActivityStore for MemoryRemote {
    async fn append(&self, creds: &Credentials, entry: ActivityEntry) -> Result<(), RemoteError> {
        self.check(creds)?;
        let mut state = self.state.lock();
        if state.activity_fails {
            return Err(RemoteError::Server("activity write failed".into()));
        }
        state.activity.push(entry);
        Ok(())
    }

    async fn query(
        &self,
        creds: &Credentials,
        tree: TreeId,
        query: &ActivityQuery,
    ) -> Result<Vec<ActivityEntry>, RemoteError> {
        self.check(creds)?;
        let state = self.state.lock();
        let mut rows: Vec<ActivityEntry> = state
            .activity
            .iter()
            .filter(|e| e.tree_id == tree && query.matches(e))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(query.page_size());
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rootline_types::{DeleteNodePayload, Mutation};

    fn creds() -> Credentials {
        Credentials::bearer("token")
    }

    fn delete_op(tree: TreeId) -> NewOperation {
        let m = Mutation::DeleteNode(DeleteNodePayload { person_id: PersonId::new() });
        NewOperation::from_mutation(tree, &m, None, 0).unwrap()
    }

    #[tokio::test]
    async fn test_versions_per_tree() {
        let remote = MemoryRemote::new();
        let (a, b) = (TreeId::new(), TreeId::new());
        assert_eq!(remote.insert_operation(&creds(), delete_op(a)).await.unwrap(), 1);
        assert_eq!(remote.insert_operation(&creds(), delete_op(a)).await.unwrap(), 2);
        assert_eq!(remote.insert_operation(&creds(), delete_op(b)).await.unwrap(), 1);
        assert_eq!(remote.fetch_operations(&creds(), a, 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_faults() {
        let remote = MemoryRemote::new();
        let tree = TreeId::new();
        assert_eq!(
            remote.insert_operation(&Credentials::bearer(""), delete_op(tree)).await,
            Err(RemoteError::Unauthorized)
        );
        remote.fail_next_insert(RemoteError::Server("boom".into()));
        assert!(remote.insert_operation(&creds(), delete_op(tree)).await.is_err());
        assert_eq!(remote.insert_operation(&creds(), delete_op(tree)).await.unwrap(), 1);

        remote.set_offline(true);
        let err = remote.fetch_snapshot(&creds(), tree).await.unwrap_err();
        assert!(err.is_offline());
    }
}
