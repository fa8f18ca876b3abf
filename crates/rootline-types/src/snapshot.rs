//! Materialized tree state as of a known log version.

use serde::{Deserialize, Serialize};

use crate::ids::{PersonId, TreeId};
use crate::person::PersonDetails;
use crate::relation::RelationshipRow;

/// One row of the snapshot `people` table: identity plus scalar details.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonRow {
    pub id: PersonId,
    #[serde(flatten)]
    pub details: PersonDetails,
}

impl PersonRow {
    pub fn new(id: PersonId, details: PersonDetails) -> Self {
        Self { id, details }
    }
}

/// The `{people, relationships}` tables as of `version`.
///
/// `version` is the highest log entry the snapshot is known to include. Row
/// writes made after individual pushes do not advance it, so a snapshot may
/// already reflect some later operations; replay is idempotent for that
/// reason.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub tree_id: TreeId,
    pub version: u64,
    #[serde(default)]
    pub people: Vec<PersonRow>,
    #[serde(default)]
    pub relationships: Vec<RelationshipRow>,
}

impl Snapshot {
    /// An empty snapshot at version 0 (a tree nobody has written yet).
    pub fn empty(tree_id: TreeId) -> Self {
        Self { tree_id, version: 0, people: Vec::new(), relationships: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.people.is_empty()
    }
}
