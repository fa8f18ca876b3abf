//! Activity ledger: an append-only, human-readable audit trail.
//!
//! Entries are written after the server confirms an operation. Writing is
//! best effort; a failed append is logged and never blocks the outbox.
//! Successfully stored entries are also broadcast to live subscribers.

use std::sync::Arc;

use rootline_types::{ActivityEntry, ActivityQuery, TreeId};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::constants::EVENT_CHANNEL_CAPACITY;
use crate::error::SyncError;
use crate::remote::{ActivityStore, SessionProvider};

pub struct ActivityLedger {
    tree_id: TreeId,
    store: Arc<dyn ActivityStore>,
    session: Arc<dyn SessionProvider>,
    live: broadcast::Sender<ActivityEntry>,
}

impl ActivityLedger {
    pub fn new(tree_id: TreeId, store: Arc<dyn ActivityStore>, session: Arc<dyn SessionProvider>) -> Self {
        let (live, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tree_id, store, session, live }
    }

    pub fn tree_id(&self) -> TreeId {
        self.tree_id
    }

    /// Append an entry. Returns whether it was stored.
    pub async fn record(&self, entry: ActivityEntry) -> bool {
        let Some(creds) = self.session.credentials() else {
            warn!(tree = %self.tree_id, "activity skipped: not signed in");
            return false;
        };
        match self.store.append(&creds, entry.clone()).await {
            Ok(()) => {
                debug!(tree = %self.tree_id, action = %entry.action, "activity recorded");
                // No subscribers is fine.
                let _ = self.live.send(entry);
                true
            }
            Err(e) => {
                warn!(tree = %self.tree_id, action = %entry.action, error = %e, "activity append failed");
                false
            }
        }
    }

    /// Entries as they are recorded by this client.
    pub fn subscribe(&self) -> broadcast::Receiver<ActivityEntry> {
        self.live.subscribe()
    }

    /// One page of the ledger, newest first.
    pub async fn page(&self, query: &ActivityQuery) -> Result<Vec<ActivityEntry>, SyncError> {
        let creds = self.session.credentials().ok_or(SyncError::NotSignedIn)?;
        Ok(self.store.query(&creds, self.tree_id, query).await?)
    }
}
