//! Replay of logged operations onto a graph.
//!
//! Replay is how a client rebuilds authoritative state: start from the latest
//! snapshot, then apply every operation after its version in ascending order.
//! Every operation kind is idempotent, so a snapshot that already contains
//! some of those operations (row writes after a push do not advance the
//! snapshot version) still converges.
//!
//! A single bad entry never aborts replay. It is skipped with a warning and
//! recorded in the [`ReplayReport`].

use rootline_types::{Mutation, Operation, PayloadError, PersonId, TreeId};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument, trace, warn};

use crate::graph::FamilyGraph;

/// Why one operation could not be applied.
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("operation v{version} belongs to tree {actual}, not {expected}")]
    WrongTree { version: u64, expected: TreeId, actual: TreeId },

    #[error(transparent)]
    Payload(#[from] PayloadError),

    #[error("person not found: {0}")]
    MissingPerson(PersonId),

    #[error("self-referencing relationship on {0}")]
    SelfLink(PersonId),
}

/// Effect of applying one operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    Changed,
    /// Already reflected in the graph (idempotent repeat).
    Unchanged,
}

/// Apply a typed mutation. Property updates are merged without validation:
/// the log is authoritative and last writer wins per field.
pub fn apply_mutation(graph: &mut FamilyGraph, mutation: &Mutation) -> Result<Applied, ReplayError> {
    let changed = match mutation {
        Mutation::AddNode(p) => {
            let inserted = graph.insert_person(p.person.id, p.person.details.clone());
            let linked = match (p.relative_id, p.relation) {
                (Some(relative), Some(relation)) if graph.contains(relative) => {
                    graph.link(relative, p.person.id, relation)
                }
                (Some(relative), Some(_)) => {
                    warn!(person = %p.person.id, %relative, "ADD_NODE relative missing, person added unlinked");
                    false
                }
                _ => false,
            };
            inserted || linked
        }
        Mutation::UpdateProp(p) => graph
            .merge_patch(p.person_id, &p.patch)
            .ok_or(ReplayError::MissingPerson(p.person_id))?,
        Mutation::DeleteNode(p) => graph.remove_person(p.person_id).is_some(),
        Mutation::AddRelation(p) => {
            check_link(graph, p.focus_id, p.existing_id)?;
            graph.link(p.focus_id, p.existing_id, p.relation)
        }
        Mutation::DeleteRelation(p) => {
            check_link(graph, p.focus_id, p.relative_id)?;
            graph.unlink(p.focus_id, p.relative_id, p.relation)
        }
    };
    Ok(if changed { Applied::Changed } else { Applied::Unchanged })
}

fn check_link(graph: &FamilyGraph, a: PersonId, b: PersonId) -> Result<(), ReplayError> {
    if a == b {
        return Err(ReplayError::SelfLink(a));
    }
    for id in [a, b] {
        if !graph.contains(id) {
            return Err(ReplayError::MissingPerson(id));
        }
    }
    Ok(())
}

/// Decode and apply one logged operation of `tree_id`.
pub fn apply_operation(graph: &mut FamilyGraph, tree_id: TreeId, op: &Operation) -> Result<Applied, ReplayError> {
    if op.tree_id != tree_id {
        return Err(ReplayError::WrongTree {
            version: op.version_seq,
            expected: tree_id,
            actual: op.tree_id,
        });
    }
    let mutation = op.decode()?;
    apply_mutation(graph, &mutation)
}

/// An operation replay passed over.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SkippedOp {
    pub version: u64,
    pub reason: String,
}

/// Outcome of replaying a batch of operations.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    /// Versions applied (including idempotent no-ops), ascending.
    pub applied: Vec<u64>,
    pub skipped: Vec<SkippedOp>,
    /// Highest version seen, or the base version if nothing newer arrived.
    pub head: u64,
}

/// Apply every operation newer than `base_version` in ascending version
/// order. Duplicate versions are applied once.
#[instrument(skip(graph, ops), fields(tree = %tree_id, ops = ops.len()))]
pub fn replay(graph: &mut FamilyGraph, tree_id: TreeId, base_version: u64, ops: &[Operation]) -> ReplayReport {
    let mut ordered: Vec<&Operation> = ops.iter().collect();
    ordered.sort_by_key(|op| op.version_seq);

    let mut report = ReplayReport { head: base_version, ..Default::default() };
    for op in ordered {
        if op.version_seq <= report.head {
            trace!(version = op.version_seq, "already applied, skipping");
            continue;
        }
        report.head = op.version_seq;
        match apply_operation(graph, tree_id, op) {
            Ok(applied) => {
                trace!(version = op.version_seq, kind = %op.kind, ?applied, "replayed");
                report.applied.push(op.version_seq);
            }
            Err(e) => {
                warn!(version = op.version_seq, kind = %op.kind, error = %e, "skipping operation during replay");
                report.skipped.push(SkippedOp { version: op.version_seq, reason: e.to_string() });
            }
        }
    }
    debug!(
        applied = report.applied.len(),
        skipped = report.skipped.len(),
        head = report.head,
        "replay complete"
    );
    report
}
