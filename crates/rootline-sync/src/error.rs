//! Errors surfaced by the sync layer.

use rootline_types::PayloadError;
use thiserror::Error;

use crate::local::LocalStoreError;
use crate::remote::RemoteError;

#[derive(Debug, Error)]
pub enum SyncError {
    /// No credentials available; nothing can be pushed or fetched.
    #[error("not signed in")]
    NotSignedIn,

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("payload error: {0}")]
    Payload(#[from] PayloadError),

    #[error("local store error: {0}")]
    Local(#[from] LocalStoreError),
}

impl SyncError {
    /// True when the failure was connectivity and a local copy may stand in.
    pub fn is_offline(&self) -> bool {
        matches!(self, SyncError::Remote(e) if e.is_offline())
    }
}
