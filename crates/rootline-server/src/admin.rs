//! Offline maintenance over a [`TreeDb`]: rebuild, audit, and compact a
//! tree without a client session.

use rootline_graph::{CheckPolicy, FamilyGraph, IssueReport, check};
use rootline_sync::{ReconcileReport, reconcile};
use rootline_types::{PartialDate, TreeId};
use serde::Serialize;
use tracing::{info, instrument};

use crate::db::{DbError, TreeDb};

/// Outcome of [`compact`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompactReport {
    pub tree_id: TreeId,
    /// Version the rewritten snapshot now includes.
    pub version: u64,
    pub people: usize,
    pub relationships: usize,
    /// Log entries removed; zero unless pruning was requested.
    pub pruned: usize,
}

/// Rebuild the tree from its stored snapshot and log.
pub fn rebuild(db: &TreeDb, tree: TreeId) -> Result<(FamilyGraph, ReconcileReport), DbError> {
    let snapshot = db.snapshot(tree)?;
    let ops = db.operations_since(tree, snapshot.version)?;
    Ok(reconcile(&snapshot, &ops))
}

/// Run the consistency checker over the rebuilt tree.
pub fn audit(db: &TreeDb, tree: TreeId, policy: &CheckPolicy, today: PartialDate) -> Result<IssueReport, DbError> {
    let (graph, _) = rebuild(db, tree)?;
    Ok(check(&graph, policy, today))
}

/// Rewrite the snapshot rows from the rebuilt tree at the log head, and
/// optionally drop log entries the snapshot now covers.
#[instrument(skip(db), fields(tree = %tree))]
pub fn compact(db: &TreeDb, tree: TreeId, prune: bool) -> Result<CompactReport, DbError> {
    let (graph, report) = rebuild(db, tree)?;
    let snapshot = graph.to_snapshot(tree, report.head());
    db.replace_snapshot(&snapshot)?;
    let pruned = if prune { db.prune_operations(tree)? } else { 0 };

    let compacted = CompactReport {
        tree_id: tree,
        version: snapshot.version,
        people: snapshot.people.len(),
        relationships: snapshot.relationships.len(),
        pruned,
    };
    info!(version = compacted.version, people = compacted.people, pruned, "snapshot compacted");
    Ok(compacted)
}
