//! The family graph: persons keyed by id with symmetric relationship sets.
//!
//! [`FamilyGraph`] only offers primitives that keep the symmetry invariant.
//! Policy (what is allowed, what gets recorded, what gets synced) lives in
//! [`GraphStore`](crate::GraphStore) and in replay.

use std::collections::{BTreeMap, BTreeSet};

use rootline_types::{
    LinkKind, Person, PersonDetails, PersonId, PersonPatch, PersonRow, RelationKind,
    RelationshipRow, Snapshot, TreeId,
};
use serde::Serialize;
use tracing::warn;

/// All persons of one tree.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FamilyGraph {
    people: BTreeMap<PersonId, Person>,
}

/// A one-sided link found by [`FamilyGraph::symmetry_violations`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SymmetryViolation {
    pub person: PersonId,
    pub relative: PersonId,
    /// The role `relative` holds in `person`'s sets.
    pub kind: RelationKind,
}

impl FamilyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: PersonId) -> Option<&Person> {
        self.people.get(&id)
    }

    pub fn contains(&self, id: PersonId) -> bool {
        self.people.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.people.len()
    }

    pub fn is_empty(&self) -> bool {
        self.people.is_empty()
    }

    /// Persons in id order (creation order for v7 ids).
    pub fn people(&self) -> impl Iterator<Item = &Person> {
        self.people.values()
    }

    /// Display label for `id`, or the short id if the person is gone.
    pub fn label(&self, id: PersonId) -> String {
        self.get(id).map(Person::label).unwrap_or_else(|| id.short())
    }

    /// Insert a person with no links. Returns false if the id is taken.
    pub fn insert_person(&mut self, id: PersonId, mut details: PersonDetails) -> bool {
        if self.people.contains_key(&id) {
            return false;
        }
        details.normalize();
        self.people.insert(id, Person::new(id, details));
        true
    }

    /// Remove a person and purge it from every relative's sets.
    pub fn remove_person(&mut self, id: PersonId) -> Option<Person> {
        let removed = self.people.remove(&id)?;
        for relative in removed.parents.iter().chain(&removed.children).chain(&removed.spouses) {
            if let Some(p) = self.people.get_mut(relative) {
                p.parents.remove(&id);
                p.children.remove(&id);
                p.spouses.remove(&id);
            }
        }
        Some(removed)
    }

    /// Apply a patch to a person's details without validation.
    ///
    /// `None` if the person does not exist, otherwise whether anything changed.
    pub fn merge_patch(&mut self, id: PersonId, patch: &PersonPatch) -> Option<bool> {
        let person = self.people.get_mut(&id)?;
        Some(patch.apply(&mut person.details))
    }

    /// Replace a person's details wholesale.
    pub(crate) fn set_details(&mut self, id: PersonId, details: PersonDetails) -> bool {
        match self.people.get_mut(&id) {
            Some(person) => {
                person.details = details;
                true
            }
            None => false,
        }
    }

    /// True when `other` is the `kind` of `focus`.
    pub fn has_link(&self, focus: PersonId, other: PersonId, kind: RelationKind) -> bool {
        self.get(focus).is_some_and(|p| match kind {
            RelationKind::Parent => p.parents.contains(&other),
            RelationKind::Child => p.children.contains(&other),
            RelationKind::Spouse => p.spouses.contains(&other),
        })
    }

    /// Make `other` the `kind` of `focus`, on both sides.
    ///
    /// Returns false (and changes nothing) for self links, unknown persons,
    /// or a link that already exists.
    pub fn link(&mut self, focus: PersonId, other: PersonId, kind: RelationKind) -> bool {
        self.link_row(RelationshipRow::canonical(focus, other, kind))
    }

    /// Remove the link "`other` is the `kind` of `focus`" from both sides.
    pub fn unlink(&mut self, focus: PersonId, other: PersonId, kind: RelationKind) -> bool {
        self.unlink_row(RelationshipRow::canonical(focus, other, kind))
    }

    pub fn link_row(&mut self, row: RelationshipRow) -> bool {
        if row.from == row.to || !self.contains(row.from) || !self.contains(row.to) {
            return false;
        }
        let (changed_from, changed_to) = match row.kind {
            LinkKind::Parent => (
                self.with_person(row.from, |p| p.children.insert(row.to)),
                self.with_person(row.to, |p| p.parents.insert(row.from)),
            ),
            LinkKind::Spouse => (
                self.with_person(row.from, |p| p.spouses.insert(row.to)),
                self.with_person(row.to, |p| p.spouses.insert(row.from)),
            ),
        };
        changed_from || changed_to
    }

    pub fn unlink_row(&mut self, row: RelationshipRow) -> bool {
        let (changed_from, changed_to) = match row.kind {
            LinkKind::Parent => (
                self.with_person(row.from, |p| p.children.remove(&row.to)),
                self.with_person(row.to, |p| p.parents.remove(&row.from)),
            ),
            LinkKind::Spouse => (
                self.with_person(row.from, |p| p.spouses.remove(&row.to)),
                self.with_person(row.to, |p| p.spouses.remove(&row.from)),
            ),
        };
        changed_from || changed_to
    }

    fn with_person(&mut self, id: PersonId, f: impl FnOnce(&mut Person) -> bool) -> bool {
        self.people.get_mut(&id).is_some_and(f)
    }

    /// Every link in canonical form.
    pub fn relationships(&self) -> BTreeSet<RelationshipRow> {
        let mut rows = BTreeSet::new();
        for person in self.people.values() {
            for child in &person.children {
                rows.insert(RelationshipRow::canonical(person.id, *child, RelationKind::Child));
            }
            for spouse in &person.spouses {
                rows.insert(RelationshipRow::canonical(person.id, *spouse, RelationKind::Spouse));
            }
        }
        rows
    }

    /// Links recorded on one side only, and self references.
    pub fn symmetry_violations(&self) -> Vec<SymmetryViolation> {
        let mut violations = Vec::new();
        for person in self.people.values() {
            let sets = [
                (RelationKind::Parent, &person.parents),
                (RelationKind::Child, &person.children),
                (RelationKind::Spouse, &person.spouses),
            ];
            for (kind, set) in sets {
                for relative in set {
                    let mirrored = *relative != person.id
                        && self.has_link(*relative, person.id, kind.inverse());
                    if !mirrored {
                        violations.push(SymmetryViolation {
                            person: person.id,
                            relative: *relative,
                            kind,
                        });
                    }
                }
            }
        }
        violations
    }

    /// Build from snapshot rows. Relationships naming unknown persons are
    /// dropped with a warning.
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        let mut graph = Self::new();
        for row in &snapshot.people {
            if !graph.insert_person(row.id, row.details.clone()) {
                warn!(tree = %snapshot.tree_id, person = %row.id, "duplicate person row in snapshot");
            }
        }
        for row in &snapshot.relationships {
            if !graph.contains(row.from) || !graph.contains(row.to) {
                warn!(
                    tree = %snapshot.tree_id,
                    from = %row.from,
                    to = %row.to,
                    kind = row.kind.as_str(),
                    "snapshot relationship references missing person, dropping"
                );
                continue;
            }
            graph.link_row(*row);
        }
        graph
    }

    /// Materialize as snapshot tables at `version`.
    pub fn to_snapshot(&self, tree_id: TreeId, version: u64) -> Snapshot {
        Snapshot {
            tree_id,
            version,
            people: self
                .people
                .values()
                .map(|p| PersonRow::new(p.id, p.details.clone()))
                .collect(),
            relationships: self.relationships().into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rootline_types::Gender;

    fn graph_with(n: usize) -> (FamilyGraph, Vec<PersonId>) {
        let mut graph = FamilyGraph::new();
        let ids: Vec<PersonId> = (0..n).map(|_| PersonId::new()).collect();
        for id in &ids {
            graph.insert_person(*id, PersonDetails::with_gender(Gender::Unknown));
        }
        (graph, ids)
    }

    #[test]
    fn test_link_is_symmetric() {
        let (mut graph, ids) = graph_with(3);
        assert!(graph.link(ids[0], ids[1], RelationKind::Parent));
        assert!(graph.link(ids[0], ids[2], RelationKind::Spouse));

        assert!(graph.get(ids[0]).unwrap().parents.contains(&ids[1]));
        assert!(graph.get(ids[1]).unwrap().children.contains(&ids[0]));
        assert!(graph.get(ids[2]).unwrap().spouses.contains(&ids[0]));
        assert!(graph.symmetry_violations().is_empty());

        // Same link from the other side is a duplicate.
        assert!(!graph.link(ids[1], ids[0], RelationKind::Child));
    }

    #[test]
    fn test_link_rejects_self_and_unknown() {
        let (mut graph, ids) = graph_with(1);
        assert!(!graph.link(ids[0], ids[0], RelationKind::Spouse));
        assert!(!graph.link(ids[0], PersonId::new(), RelationKind::Child));
        assert!(graph.get(ids[0]).unwrap().is_isolated());
    }

    #[test]
    fn test_remove_person_purges_relatives() {
        let (mut graph, ids) = graph_with(3);
        graph.link(ids[0], ids[1], RelationKind::Child);
        graph.link(ids[0], ids[2], RelationKind::Spouse);

        let removed = graph.remove_person(ids[0]).unwrap();
        assert_eq!(removed.id, ids[0]);
        assert!(graph.get(ids[1]).unwrap().is_isolated());
        assert!(graph.get(ids[2]).unwrap().is_isolated());
        assert!(graph.remove_person(ids[0]).is_none());
    }

    #[test]
    fn test_unlink_missing_is_noop() {
        let (mut graph, ids) = graph_with(2);
        assert!(!graph.unlink(ids[0], ids[1], RelationKind::Parent));
        graph.link(ids[0], ids[1], RelationKind::Parent);
        assert!(graph.unlink(ids[1], ids[0], RelationKind::Child));
        assert!(graph.relationships().is_empty());
    }

    #[test]
    fn test_symmetry_violation_detected() {
        let (mut graph, ids) = graph_with(2);
        graph.with_person(ids[0], |p| p.spouses.insert(ids[1]));
        let violations = graph.symmetry_violations();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].person, ids[0]);
        assert_eq!(violations[0].kind, RelationKind::Spouse);
    }

    #[test]
    fn test_snapshot_roundtrip_drops_dangling_links() {
        let (mut graph, ids) = graph_with(3);
        graph.link(ids[0], ids[1], RelationKind::Parent);
        graph.link(ids[1], ids[2], RelationKind::Spouse);
        let tree = TreeId::new();

        let mut snapshot = graph.to_snapshot(tree, 7);
        assert_eq!(snapshot.version, 7);
        assert_eq!(snapshot.relationships.len(), 2);
        assert_eq!(FamilyGraph::from_snapshot(&snapshot), graph);

        snapshot
            .relationships
            .push(RelationshipRow::canonical(ids[0], PersonId::new(), RelationKind::Spouse));
        assert_eq!(FamilyGraph::from_snapshot(&snapshot), graph);
    }
}
