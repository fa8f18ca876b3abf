//! [`RemoteStore`] and [`ActivityStore`] over a [`TreeDb`].
//!
//! SQLite calls are synchronous, so each request runs on the blocking pool
//! with the connection lock held only inside that closure.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rootline_sync::{ActivityStore, Credentials, RemoteError, RemoteStore};
use rootline_types::{
    ActivityEntry, ActivityQuery, NewOperation, Operation, PersonId, PersonPatch, PersonRow, RelationshipRow,
    Snapshot, TreeId,
};
use tracing::{debug, warn};

use crate::db::{DbError, TreeDb};

/// Shared handle to a tree database, usable as a sync backend.
#[derive(Clone)]
pub struct SqliteRemote {
    db: Arc<Mutex<TreeDb>>,
    /// When set, only these bearer tokens are accepted.
    tokens: Option<Arc<BTreeSet<String>>>,
}

impl SqliteRemote {
    pub fn new(db: TreeDb) -> Self {
        Self { db: Arc::new(Mutex::new(db)), tokens: None }
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        Ok(Self::new(TreeDb::open(path)?))
    }

    pub fn in_memory() -> Result<Self, DbError> {
        Ok(Self::new(TreeDb::in_memory()?))
    }

    /// Restrict access to the given bearer tokens.
    pub fn with_tokens<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tokens = Some(Arc::new(tokens.into_iter().map(Into::into).collect()));
        self
    }

    /// Direct access for admin commands.
    pub fn db(&self) -> Arc<Mutex<TreeDb>> {
        self.db.clone()
    }

    fn authorize(&self, creds: &Credentials) -> Result<(), RemoteError> {
        if creds.token.is_empty() {
            return Err(RemoteError::Unauthorized);
        }
        match &self.tokens {
            Some(allowed) if !allowed.contains(&creds.token) => Err(RemoteError::Unauthorized),
            _ => Ok(()),
        }
    }

    async fn with_db<T, F>(&self, creds: &Credentials, op: &'static str, f: F) -> Result<T, RemoteError>
    where
        T: Send + 'static,
        F: FnOnce(&mut TreeDb) -> Result<T, DbError> + Send + 'static,
    {
        self.authorize(creds)?;
        let db = self.db.clone();
        let result = tokio::task::spawn_blocking(move || f(&mut db.lock()))
            .await
            .map_err(|e| RemoteError::Server(format!("{op}: database task failed: {e}")))?;
        result.map_err(|e| {
            warn!(op, error = %e, "database request failed");
            RemoteError::Server(format!("{op}: {e}"))
        })
    }
}

#[async_trait]
impl RemoteStore for SqliteRemote {
    async fn insert_operation(&self, creds: &Credentials, op: NewOperation) -> Result<u64, RemoteError> {
        let version = self.with_db(creds, "insert_operation", move |db| db.insert_operation(&op)).await?;
        debug!(version, "operation logged");
        Ok(version)
    }

    async fn upsert_people(&self, creds: &Credentials, tree: TreeId, rows: Vec<PersonRow>) -> Result<(), RemoteError> {
        self.with_db(creds, "upsert_people", move |db| db.upsert_people(tree, &rows)).await
    }

    async fn patch_person(
        &self,
        creds: &Credentials,
        tree: TreeId,
        id: PersonId,
        patch: PersonPatch,
    ) -> Result<(), RemoteError> {
        let found = self.with_db(creds, "patch_person", move |db| db.patch_person(tree, id, &patch)).await?;
        if !found {
            debug!(%tree, person = %id, "patch for missing person row ignored");
        }
        Ok(())
    }

    async fn delete_people(&self, creds: &Credentials, tree: TreeId, ids: Vec<PersonId>) -> Result<(), RemoteError> {
        self.with_db(creds, "delete_people", move |db| db.delete_people(tree, &ids)).await
    }

    async fn upsert_relationships(
        &self,
        creds: &Credentials,
        tree: TreeId,
        rows: Vec<RelationshipRow>,
    ) -> Result<(), RemoteError> {
        self.with_db(creds, "upsert_relationships", move |db| db.upsert_relationships(tree, &rows))
            .await
    }

    async fn delete_relationships(
        &self,
        creds: &Credentials,
        tree: TreeId,
        rows: Vec<RelationshipRow>,
    ) -> Result<(), RemoteError> {
        self.with_db(creds, "delete_relationships", move |db| db.delete_relationships(tree, &rows))
            .await
    }

    async fn replace_snapshot(&self, creds: &Credentials, snapshot: Snapshot) -> Result<(), RemoteError> {
        self.with_db(creds, "replace_snapshot", move |db| db.replace_snapshot(&snapshot)).await
    }

    async fn fetch_snapshot(&self, creds: &Credentials, tree: TreeId) -> Result<Snapshot, RemoteError> {
        self.with_db(creds, "fetch_snapshot", move |db| db.snapshot(tree)).await
    }

    async fn fetch_operations(
        &self,
        creds: &Credentials,
        tree: TreeId,
        after: u64,
    ) -> Result<Vec<Operation>, RemoteError> {
        self.with_db(creds, "fetch_operations", move |db| db.operations_since(tree, after)).await
    }
}

#[async_trait]
impl ActivityStore for SqliteRemote {
    async fn append(&self, creds: &Credentials, entry: ActivityEntry) -> Result<(), RemoteError> {
        self.with_db(creds, "append_activity", move |db| db.append_activity(&entry)).await
    }

    async fn query(
        &self,
        creds: &Credentials,
        tree: TreeId,
        query: &ActivityQuery,
    ) -> Result<Vec<ActivityEntry>, RemoteError> {
        let query = query.clone();
        self.with_db(creds, "query_activity", move |db| db.query_activity(tree, &query)).await
    }
}
