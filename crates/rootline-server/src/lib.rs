//! Server side of rootline: the per-tree operation log, the snapshot tables
//! clients bootstrap from, and the activity ledger, all in SQLite.
//!
//! ```text
//! TreeSession ──RemoteStore──▶ SqliteRemote ──spawn_blocking──▶ TreeDb
//!                                                                ├── operations     (append-only, version_seq per tree)
//!                                                                ├── people         ┐ snapshot rows,
//!                                                                ├── relationships  ┘ best effort
//!                                                                ├── snapshot_meta  (version the rows include)
//!                                                                └── activity
//! ```
//!
//! [`admin`] holds the maintenance passes behind the `rootline-server` CLI.

pub mod admin;
pub mod db;
pub mod remote;

pub use admin::CompactReport;
pub use db::{DbError, TreeDb, TreeStats};
pub use remote::SqliteRemote;
