//! Family graph model, local editing, replay, and consistency audits.
//!
//! # Layers
//!
//! - [`FamilyGraph`]: persons plus symmetric relationship sets. Primitives
//!   only; every primitive preserves symmetry.
//! - [`GraphStore`]: the editing API. Validates requests, keeps undo/redo
//!   history as whole-graph `Arc` snapshots, and reports each change as a
//!   list of [`Mutation`](rootline_types::Mutation)s for synchronization.
//! - [`replay`]: applies logged operations idempotently; used to rebuild a
//!   tree from snapshot plus log.
//! - [`consistency`] / [`ConsistencyChecker`]: advisory audit, run on a
//!   background task against immutable copies.

pub mod checker;
pub mod consistency;
mod describe;
mod diff;
mod graph;
pub mod replay;
mod store;

pub use checker::ConsistencyChecker;
pub use consistency::{
    CheckPolicy, DateField, Issue, IssueClass, IssueReport, Severity, check, health_score,
};
pub use describe::summarize;
pub use diff::diff;
pub use graph::{FamilyGraph, SymmetryViolation};
pub use replay::{Applied, ReplayError, ReplayReport, SkippedOp, apply_mutation, apply_operation};
pub use store::{Edit, GraphStore, Rejected};
