//! Sync status signal and outbox events.

use rootline_types::{OpKind, PersonId};
use serde::{Deserialize, Serialize};

use crate::remote::RemoteError;

/// What the save indicator shows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// Nothing pending; everything confirmed.
    #[default]
    Synced,
    /// Edits pending or a push in flight.
    Saving,
    /// Last push failed for auth or server reasons.
    Error,
    /// Last push failed because the remote was unreachable.
    Offline,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Synced => "synced",
            SyncState::Saving => "saving",
            SyncState::Error => "error",
            SyncState::Offline => "offline",
        }
    }

    /// State after a failed push.
    pub fn from_error(error: &RemoteError) -> Self {
        if error.is_offline() { SyncState::Offline } else { SyncState::Error }
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Broadcast by the pump.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutboxEvent {
    /// The server accepted an operation.
    Confirmed { kind: OpKind, person_id: PersonId, version: u64 },
    /// A push failed; the entry stays queued.
    Failed { kind: OpKind, person_id: PersonId, attempts: u32, error: String },
    /// Enough pushes since the last backup; a full snapshot should be written
    /// at `version`.
    BackupRequested { version: u64 },
    /// The queue was purged by hand.
    Cleared { dropped: usize },
}
