//! Structural diff between two graphs, expressed as mutations.
//!
//! Used for undo/redo: the restored graph must be synchronized like any other
//! edit, so the store turns the jump between two whole-graph snapshots back
//! into the operations that would have produced it.

use std::collections::BTreeSet;

use rootline_types::{
    AddNodePayload, AddRelationPayload, DeleteNodePayload, DeleteRelationPayload, LinkKind, Mutation,
    PersonId, PersonPatch, PersonRow, RelationKind, RelationshipRow, UpdatePropPayload,
};

use crate::graph::FamilyGraph;

/// Mutations that turn `before` into `after`.
///
/// Order: removed links, removed persons, added persons (each attached by one
/// of its new links, parents before children where possible), property
/// changes, then the remaining added links. Replaying the result onto
/// `before` yields `after`.
pub fn diff(before: &FamilyGraph, after: &FamilyGraph) -> Vec<Mutation> {
    let mut out = Vec::new();
    let old_links = before.relationships();
    let all_links = after.relationships();
    let mut new_links: BTreeSet<RelationshipRow> = all_links.difference(&old_links).copied().collect();

    for row in old_links.difference(&all_links) {
        if after.contains(row.from) && after.contains(row.to) {
            let (focus, relative, relation) = row.as_relation();
            out.push(Mutation::DeleteRelation(DeleteRelationPayload {
                focus_id: focus,
                relative_id: relative,
                relation,
            }));
        }
    }

    for person in before.people().filter(|p| !after.contains(p.id)) {
        out.push(Mutation::DeleteNode(DeleteNodePayload { person_id: person.id }));
    }

    // Added persons need an anchor that already exists when they are replayed.
    let mut present: BTreeSet<PersonId> = after.people().map(|p| p.id).filter(|id| before.contains(*id)).collect();
    let mut pending: Vec<PersonId> = after.people().map(|p| p.id).filter(|id| !before.contains(*id)).collect();
    while !pending.is_empty() {
        let mut progressed = false;
        let mut still_pending = Vec::new();
        for id in pending {
            let anchor = new_links
                .iter()
                .find(|r| (r.from == id && present.contains(&r.to)) || (r.to == id && present.contains(&r.from)))
                .copied();
            match anchor {
                Some(row) => {
                    new_links.remove(&row);
                    let relative = if row.from == id { row.to } else { row.from };
                    out.push(add_node(after, id, Some((relative, role_of(&row, id)))));
                    present.insert(id);
                    progressed = true;
                }
                None => still_pending.push(id),
            }
        }
        if !progressed {
            // No link to anything present: detached islands start unattached.
            if let Some((first, rest)) = still_pending.split_first() {
                out.push(add_node(after, *first, None));
                present.insert(*first);
                still_pending = rest.to_vec();
            }
        }
        pending = still_pending;
    }

    for person in after.people() {
        if let Some(old) = before.get(person.id)
            && old.details != person.details
        {
            out.push(Mutation::UpdateProp(UpdatePropPayload {
                person_id: person.id,
                patch: PersonPatch::between(&old.details, &person.details),
            }));
        }
    }

    for row in new_links {
        let (focus, existing, relation) = row.as_relation();
        out.push(Mutation::AddRelation(AddRelationPayload { focus_id: focus, existing_id: existing, relation }));
    }

    out
}

fn add_node(graph: &FamilyGraph, id: PersonId, link: Option<(PersonId, RelationKind)>) -> Mutation {
    let details = graph.get(id).map(|p| p.details.clone()).unwrap_or_default();
    Mutation::AddNode(AddNodePayload {
        person: PersonRow::new(id, details),
        relative_id: link.map(|(relative, _)| relative),
        relation: link.map(|(_, kind)| kind),
    })
}

/// The role `id` plays in `row`, as seen from the other endpoint.
fn role_of(row: &RelationshipRow, id: PersonId) -> RelationKind {
    match row.kind {
        LinkKind::Spouse => RelationKind::Spouse,
        LinkKind::Parent if row.from == id => RelationKind::Parent,
        LinkKind::Parent => RelationKind::Child,
    }
}
