//! Client-side synchronization for rootline trees.
//!
//! # Flow
//!
//! ```text
//!  edit ─▶ GraphStore ─▶ TreeSession ─┬─▶ OutboxPump ─▶ RemoteStore (log, then rows)
//!                                     │        └──────▶ ActivityLedger
//!                                     ├─▶ ConsistencyChecker
//!                                     └─▶ LocalSaver ─▶ LocalStore
//!
//!  open / reload ─▶ Reconciler: snapshot + log tail ─▶ replay ─▶ FamilyGraph
//! ```
//!
//! The server's log is the only authority. Everything else (snapshot rows,
//! local copies, activity) is derived and may lag.

mod activity;
mod config;
pub mod constants;
mod error;
mod local;
mod memory;
pub mod outbox;
mod pump;
mod reconcile;
pub mod remote;
mod schedule;
mod session;
mod status;

pub use activity::ActivityLedger;
pub use config::{ConfigError, SyncConfig};
pub use error::SyncError;
pub use local::{JsonFileStore, LocalSaver, LocalStore, LocalStoreError};
pub use memory::MemoryRemote;
pub use outbox::{Outbox, OutboxEntry};
pub use pump::{FlushReport, OutboxPump, PumpWorker};
pub use reconcile::{ReconcileReport, Reconciler, reconcile};
pub use remote::{
    ActivityStore, Credentials, Identity, RemoteError, RemoteStore, SessionProvider, StaticSession,
};
pub use schedule::DelayQueue;
pub use session::{BackgroundTasks, SessionDeps, TreeSession};
pub use status::{OutboxEvent, SyncState};
