//! Human-readable one-line summaries of mutations, for the activity ledger.

use rootline_types::{Mutation, PersonId};

use crate::graph::FamilyGraph;

/// Summarize `mutation` given the graphs around it.
///
/// Names come from `after` when the person still exists there and from
/// `before` otherwise, so deletions still read as names rather than ids.
pub fn summarize(mutation: &Mutation, before: &FamilyGraph, after: &FamilyGraph) -> String {
    let name = |id: PersonId| {
        let label = match after.get(id).or_else(|| before.get(id)) {
            Some(person) => person.label(),
            None => id.short(),
        };
        format!("\"{label}\"")
    };

    match mutation {
        Mutation::AddNode(p) => match (p.relative_id, p.relation) {
            (Some(relative), Some(kind)) => {
                format!("added {} as {} of {}", name(p.person.id), kind, name(relative))
            }
            _ => format!("added {}", name(p.person.id)),
        },
        Mutation::UpdateProp(p) => {
            let fields = p.patch.fields();
            if fields.is_empty() {
                format!("edited {}", name(p.person_id))
            } else {
                format!("updated {} of {}", fields.join(", "), name(p.person_id))
            }
        }
        Mutation::DeleteNode(p) => format!("deleted {}", name(p.person_id)),
        Mutation::AddRelation(p) => {
            format!("linked {} as {} of {}", name(p.existing_id), p.relation, name(p.focus_id))
        }
        Mutation::DeleteRelation(p) => {
            format!("removed {} as {} of {}", name(p.relative_id), p.relation, name(p.focus_id))
        }
    }
}
