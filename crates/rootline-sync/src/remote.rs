//! Contracts with the outside world: who is signed in, and where operations,
//! snapshot rows and activity entries are stored.
//!
//! The client never talks to a concrete backend. `rootline-server` provides a
//! SQLite implementation and [`MemoryRemote`](crate::MemoryRemote) an
//! in-process one with fault injection.

use async_trait::async_trait;
use rootline_types::{
    ActivityEntry, ActivityQuery, ActorId, NewOperation, Operation, PersonId, PersonPatch, PersonRow,
    RelationshipRow, Snapshot, TreeId,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Renewable bearer credentials.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub token: String,
}

impl Credentials {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials").field("token", &"<redacted>").finish()
    }
}

/// The signed-in collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub actor_id: ActorId,
    pub email: String,
}

/// Source of the current identity and credentials. Token refresh lives
/// behind this trait.
pub trait SessionProvider: Send + Sync {
    fn identity(&self) -> Option<Identity>;
    fn credentials(&self) -> Option<Credentials>;
}

/// A fixed identity and token (CLI, tests).
#[derive(Debug, Clone)]
pub struct StaticSession {
    identity: Identity,
    credentials: Credentials,
}

impl StaticSession {
    pub fn new(identity: Identity, credentials: Credentials) -> Self {
        Self { identity, credentials }
    }
}

impl SessionProvider for StaticSession {
    fn identity(&self) -> Option<Identity> {
        Some(self.identity.clone())
    }

    fn credentials(&self) -> Option<Credentials> {
        Some(self.credentials.clone())
    }
}

/// Errors from a remote store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Network unreachable or timed out; worth retrying.
    #[error("remote unavailable: {0}")]
    Unavailable(String),

    #[error("not authorized")]
    Unauthorized,

    /// The server refused this request; retrying unchanged will not help.
    #[error("rejected by server: {0}")]
    Rejected(String),

    #[error("server error: {0}")]
    Server(String),
}

impl RemoteError {
    /// True for connectivity failures (as opposed to auth or server faults).
    pub fn is_offline(&self) -> bool {
        matches!(self, RemoteError::Unavailable(_))
    }
}

/// Server-held operation log and snapshot tables.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Append to the log; returns the server-assigned `version_seq`.
    async fn insert_operation(&self, creds: &Credentials, op: NewOperation) -> Result<u64, RemoteError>;

    async fn upsert_people(&self, creds: &Credentials, tree: TreeId, rows: Vec<PersonRow>) -> Result<(), RemoteError>;

    /// Apply a property patch to one person row. A missing row stays
    /// missing.
    async fn patch_person(
        &self,
        creds: &Credentials,
        tree: TreeId,
        id: PersonId,
        patch: PersonPatch,
    ) -> Result<(), RemoteError>;

    /// Delete person rows and every relationship row touching them.
    async fn delete_people(&self, creds: &Credentials, tree: TreeId, ids: Vec<PersonId>) -> Result<(), RemoteError>;

    async fn upsert_relationships(
        &self,
        creds: &Credentials,
        tree: TreeId,
        rows: Vec<RelationshipRow>,
    ) -> Result<(), RemoteError>;

    async fn delete_relationships(
        &self,
        creds: &Credentials,
        tree: TreeId,
        rows: Vec<RelationshipRow>,
    ) -> Result<(), RemoteError>;

    /// Replace all snapshot rows and set the snapshot version.
    async fn replace_snapshot(&self, creds: &Credentials, snapshot: Snapshot) -> Result<(), RemoteError>;

    /// Current snapshot rows; an empty snapshot at version 0 for a new tree.
    async fn fetch_snapshot(&self, creds: &Credentials, tree: TreeId) -> Result<Snapshot, RemoteError>;

    /// Every operation with `version_seq > after`, ascending.
    async fn fetch_operations(&self, creds: &Credentials, tree: TreeId, after: u64)
    -> Result<Vec<Operation>, RemoteError>;
}

/// Server-held activity ledger.
#[async_trait]
pub trait ActivityStore: Send + Sync {
    async fn append(&self, creds: &Credentials, entry: ActivityEntry) -> Result<(), RemoteError>;

    /// Entries of `tree` matching `query`, newest first, at most one page.
    async fn query(
        &self,
        creds: &Credentials,
        tree: TreeId,
        query: &ActivityQuery,
    ) -> Result<Vec<ActivityEntry>, RemoteError>;
}
