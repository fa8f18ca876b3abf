//! Local graph store with undo/redo.
//!
//! Every edit produces a new immutable [`FamilyGraph`] behind an `Arc`, so
//! observers and the consistency checker can hold on to a version without
//! locking. The store is single-threaded and synchronous; it never panics and
//! never performs I/O.
//!
//! # Edits
//!
//! Each successful operation returns an [`Edit`]: the new graph, the previous
//! graph, and the [`Mutation`]s that describe the change for the outbox. An
//! edit that changed nothing carries the *same* `Arc` as before and no
//! mutations.

use std::sync::Arc;

use rootline_types::{
    AddNodePayload, AddRelationPayload, DeleteNodePayload, DeleteRelationPayload, DetailsError,
    Gender, Mutation, PersonDetails, PersonId, PersonPatch, PersonRow, RelationKind,
    UpdatePropPayload,
};
use thiserror::Error;
use tracing::{debug, trace};

use crate::diff::diff;
use crate::graph::FamilyGraph;

/// Why the store refused an edit. Nothing was mutated.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Rejected {
    #[error("person not found: {0}")]
    UnknownPerson(PersonId),

    #[error("a person cannot be linked to themselves")]
    SelfLink,

    #[error("{existing} is already the {kind} of {anchor}")]
    DuplicateLink { anchor: PersonId, existing: PersonId, kind: RelationKind },

    /// Parent/child link whose inverse direction already exists.
    #[error("{existing} cannot be the {kind} of {anchor}: the inverse link exists")]
    ContradictsInverse { anchor: PersonId, existing: PersonId, kind: RelationKind },

    #[error("the tree already has people; add relatives instead")]
    NotEmpty,

    #[error(transparent)]
    Invalid(#[from] DetailsError),
}

/// Result of a store operation.
#[derive(Clone, Debug)]
pub struct Edit {
    /// The graph after the edit.
    pub graph: Arc<FamilyGraph>,
    /// The graph before the edit.
    pub before: Arc<FamilyGraph>,
    /// The person created or primarily affected, where there is one.
    pub person_id: Option<PersonId>,
    /// Mutations to synchronize, in order.
    pub mutations: Vec<Mutation>,
}

impl Edit {
    fn unchanged(graph: &Arc<FamilyGraph>, person_id: Option<PersonId>) -> Self {
        Self {
            graph: Arc::clone(graph),
            before: Arc::clone(graph),
            person_id,
            mutations: Vec::new(),
        }
    }

    /// True when nothing changed (the graph is pointer-equal to before).
    pub fn is_noop(&self) -> bool {
        Arc::ptr_eq(&self.graph, &self.before)
    }
}

/// Owner of the current graph and its edit history.
#[derive(Debug, Default)]
pub struct GraphStore {
    current: Arc<FamilyGraph>,
    undo_stack: Vec<Arc<FamilyGraph>>,
    redo_stack: Vec<Arc<FamilyGraph>>,
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store starting from `graph` with empty history.
    pub fn with_graph(graph: impl Into<Arc<FamilyGraph>>) -> Self {
        Self { current: graph.into(), ..Self::default() }
    }

    /// The current graph.
    pub fn graph(&self) -> &Arc<FamilyGraph> {
        &self.current
    }

    /// Replace the graph (tree switch, import, cloud load). Clears history.
    pub fn load(&mut self, graph: impl Into<Arc<FamilyGraph>>) {
        self.current = graph.into();
        self.undo_stack.clear();
        self.redo_stack.clear();
        debug!(people = self.current.len(), "graph loaded, history cleared");
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// Create the first person of an empty tree.
    pub fn add_root(&mut self, gender: Gender) -> Result<Edit, Rejected> {
        if !self.current.is_empty() {
            return Err(Rejected::NotEmpty);
        }
        let id = PersonId::new();
        let details = PersonDetails::with_gender(gender);
        let mut next = FamilyGraph::clone(&self.current);
        next.insert_person(id, details.clone());

        let mutation = Mutation::AddNode(AddNodePayload {
            person: PersonRow::new(id, details),
            relative_id: None,
            relation: None,
        });
        Ok(self.commit(next, Some(id), vec![mutation], true))
    }

    /// Create a new person who is the `kind` of `anchor`.
    ///
    /// Returns `None` when `anchor` does not exist.
    pub fn add_relative(&mut self, anchor: PersonId, gender: Gender, kind: RelationKind) -> Option<Edit> {
        if !self.current.contains(anchor) {
            debug!(%anchor, "add_relative: anchor not found");
            return None;
        }
        let id = PersonId::new();
        let details = PersonDetails::with_gender(gender);
        let mut next = FamilyGraph::clone(&self.current);
        next.insert_person(id, details.clone());
        next.link(anchor, id, kind);

        let mutation = Mutation::AddNode(AddNodePayload {
            person: PersonRow::new(id, details),
            relative_id: Some(anchor),
            relation: Some(kind),
        });
        Some(self.commit(next, Some(id), vec![mutation], true))
    }

    /// Make an existing person the `kind` of `anchor`.
    pub fn link_existing(
        &mut self,
        anchor: PersonId,
        existing: PersonId,
        kind: RelationKind,
    ) -> Result<Edit, Rejected> {
        if anchor == existing {
            return Err(Rejected::SelfLink);
        }
        for id in [anchor, existing] {
            if !self.current.contains(id) {
                return Err(Rejected::UnknownPerson(id));
            }
        }
        if self.current.has_link(anchor, existing, kind) {
            return Err(Rejected::DuplicateLink { anchor, existing, kind });
        }
        if kind != RelationKind::Spouse && self.current.has_link(anchor, existing, kind.inverse()) {
            return Err(Rejected::ContradictsInverse { anchor, existing, kind });
        }

        let mut next = FamilyGraph::clone(&self.current);
        next.link(anchor, existing, kind);
        let mutation = Mutation::AddRelation(AddRelationPayload {
            focus_id: anchor,
            existing_id: existing,
            relation: kind,
        });
        Ok(self.commit(next, Some(existing), vec![mutation], true))
    }

    /// Merge scalar fields into a person, recorded in history.
    pub fn update_properties(&mut self, id: PersonId, patch: &PersonPatch) -> Result<Edit, Rejected> {
        self.update(id, patch, true)
    }

    /// Like [`update_properties`](Self::update_properties) but not recorded
    /// onto the undo stack (live typing, drag previews).
    pub fn update_properties_transient(
        &mut self,
        id: PersonId,
        patch: &PersonPatch,
    ) -> Result<Edit, Rejected> {
        self.update(id, patch, false)
    }

    fn update(&mut self, id: PersonId, patch: &PersonPatch, record: bool) -> Result<Edit, Rejected> {
        let person = self.current.get(id).ok_or(Rejected::UnknownPerson(id))?;
        let mut details = person.details.clone();
        if !patch.apply(&mut details) {
            trace!(%id, "update_properties: nothing changed");
            return Ok(Edit::unchanged(&self.current, Some(id)));
        }
        details.validate()?;

        let effective = PersonPatch::between(&person.details, &details);
        let mut next = FamilyGraph::clone(&self.current);
        next.set_details(id, details);
        let mutation = Mutation::UpdateProp(UpdatePropPayload { person_id: id, patch: effective });
        Ok(self.commit(next, Some(id), vec![mutation], record))
    }

    /// Remove the link "`relative` is the `kind` of `target`". Removing a
    /// link that does not exist is a no-op.
    pub fn remove_relationship(&mut self, target: PersonId, relative: PersonId, kind: RelationKind) -> Edit {
        if !self.current.has_link(target, relative, kind) {
            return Edit::unchanged(&self.current, Some(target));
        }
        let mut next = FamilyGraph::clone(&self.current);
        next.unlink(target, relative, kind);
        let mutation = Mutation::DeleteRelation(DeleteRelationPayload {
            focus_id: target,
            relative_id: relative,
            relation: kind,
        });
        self.commit(next, Some(target), vec![mutation], true)
    }

    /// Delete a person and every link to it. Unknown ids return the current
    /// graph unchanged.
    pub fn delete_person(&mut self, id: PersonId) -> Edit {
        if !self.current.contains(id) {
            debug!(%id, "delete_person: not found");
            return Edit::unchanged(&self.current, None);
        }
        let mut next = FamilyGraph::clone(&self.current);
        next.remove_person(id);
        let mutation = Mutation::DeleteNode(DeleteNodePayload { person_id: id });
        self.commit(next, Some(id), vec![mutation], true)
    }

    /// Restore the previous graph.
    pub fn undo(&mut self) -> Option<Edit> {
        let restored = self.undo_stack.pop()?;
        let before = std::mem::replace(&mut self.current, restored);
        self.redo_stack.push(Arc::clone(&before));
        Some(self.restored(before))
    }

    /// Re-apply the most recently undone graph.
    pub fn redo(&mut self) -> Option<Edit> {
        let restored = self.redo_stack.pop()?;
        let before = std::mem::replace(&mut self.current, restored);
        self.undo_stack.push(Arc::clone(&before));
        Some(self.restored(before))
    }

    fn restored(&self, before: Arc<FamilyGraph>) -> Edit {
        let mutations = diff(&before, &self.current);
        debug!(mutations = mutations.len(), "history step");
        Edit {
            graph: Arc::clone(&self.current),
            before,
            person_id: None,
            mutations,
        }
    }

    fn commit(
        &mut self,
        next: FamilyGraph,
        person_id: Option<PersonId>,
        mutations: Vec<Mutation>,
        record: bool,
    ) -> Edit {
        let before = std::mem::replace(&mut self.current, Arc::new(next));
        if record {
            self.undo_stack.push(Arc::clone(&before));
            self.redo_stack.clear();
        }
        trace!(
            people = self.current.len(),
            kinds = ?mutations.iter().map(Mutation::kind).collect::<Vec<_>>(),
            record,
            "graph edit"
        );
        Edit {
            graph: Arc::clone(&self.current),
            before,
            person_id,
            mutations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rootline_types::{FieldUpdate, OpKind};

    fn store_with_root() -> (GraphStore, PersonId) {
        let mut store = GraphStore::new();
        let root = store.add_root(Gender::Female).unwrap().person_id.unwrap();
        (store, root)
    }

    fn assert_symmetric(store: &GraphStore) {
        assert_eq!(store.graph().symmetry_violations(), vec![]);
    }

    #[test]
    fn test_add_root_only_on_empty() {
        let (mut store, root) = store_with_root();
        assert!(store.graph().contains(root));
        assert_eq!(store.add_root(Gender::Male).unwrap_err(), Rejected::NotEmpty);
    }

    #[test]
    fn test_add_relative_wires_link() {
        let (mut store, root) = store_with_root();
        let edit = store.add_relative(root, Gender::Male, RelationKind::Parent).unwrap();
        let father = edit.person_id.unwrap();

        let graph = store.graph();
        assert!(graph.get(root).unwrap().parents.contains(&father));
        assert!(graph.get(father).unwrap().children.contains(&root));
        assert_eq!(edit.mutations.len(), 1);
        match &edit.mutations[0] {
            Mutation::AddNode(p) => {
                assert_eq!(p.relative_id, Some(root));
                assert_eq!(p.relation, Some(RelationKind::Parent));
            }
            other => panic!("unexpected mutation {other:?}"),
        }
        assert_symmetric(&store);
    }

    #[test]
    fn test_add_relative_unknown_anchor_is_silent() {
        let (mut store, _) = store_with_root();
        let before = Arc::clone(store.graph());
        assert!(store.add_relative(PersonId::new(), Gender::Male, RelationKind::Child).is_none());
        assert!(Arc::ptr_eq(&before, store.graph()));
        assert!(!store.can_redo());
    }

    #[test]
    fn test_link_existing_rejections() {
        let (mut store, root) = store_with_root();
        let child = store.add_relative(root, Gender::Male, RelationKind::Child).unwrap().person_id.unwrap();
        let spouse = store.add_relative(root, Gender::Male, RelationKind::Spouse).unwrap().person_id.unwrap();

        assert_eq!(store.link_existing(root, root, RelationKind::Spouse).unwrap_err(), Rejected::SelfLink);
        let ghost = PersonId::new();
        assert_eq!(
            store.link_existing(root, ghost, RelationKind::Child).unwrap_err(),
            Rejected::UnknownPerson(ghost)
        );
        assert!(matches!(
            store.link_existing(root, child, RelationKind::Child),
            Err(Rejected::DuplicateLink { .. })
        ));
        assert!(matches!(
            store.link_existing(root, child, RelationKind::Parent),
            Err(Rejected::ContradictsInverse { .. })
        ));

        let graph_before = Arc::clone(store.graph());
        let edit = store.link_existing(spouse, child, RelationKind::Child).unwrap();
        assert!(!Arc::ptr_eq(&graph_before, &edit.graph));
        assert!(store.graph().get(child).unwrap().parents.contains(&spouse));
        assert_eq!(edit.mutations[0].kind(), OpKind::AddRelation);
        assert_symmetric(&store);
    }

    #[test]
    fn test_update_properties_validates() {
        let (mut store, root) = store_with_root();
        let mut patch = PersonPatch::set("birth_date", "2020-01-01");
        patch.merge(PersonPatch::set("death_date", "2019-01-01"));
        let err = store.update_properties(root, &patch).unwrap_err();
        assert!(matches!(err, Rejected::Invalid(DetailsError::DeathBeforeBirth { .. })));
        assert_eq!(store.graph().get(root).unwrap().details.birth_date, None);

        let ghost = PersonId::new();
        assert_eq!(
            store.update_properties(ghost, &PersonPatch::set("notes", "x")).unwrap_err(),
            Rejected::UnknownPerson(ghost)
        );
        assert!(!store.can_redo());
    }

    #[test]
    fn test_update_properties_emits_effective_patch() {
        let (mut store, root) = store_with_root();
        let edit = store
            .update_properties(root, &PersonPatch::set("first_name", "  Ada "))
            .unwrap();
        match &edit.mutations[0] {
            Mutation::UpdateProp(p) => {
                assert_eq!(p.person_id, root);
                assert_eq!(p.patch.first_name, Some(FieldUpdate::Set("Ada".into())));
                assert_eq!(p.patch.fields(), vec!["first_name"]);
            }
            other => panic!("unexpected mutation {other:?}"),
        }

        // Same value again is a no-op with no history entry.
        let noop = store.update_properties(root, &PersonPatch::set("first_name", "Ada")).unwrap();
        assert!(noop.is_noop());
        assert!(noop.mutations.is_empty());
        store.undo();
        assert_eq!(store.graph().get(root).unwrap().details.first_name, None);
    }

    #[test]
    fn test_transient_update_skips_history() {
        let (mut store, root) = store_with_root();
        let edit = store
            .update_properties_transient(root, &PersonPatch::set("last_name", "Byron"))
            .unwrap();
        assert_eq!(edit.mutations.len(), 1);
        // Undo goes back past the transient edit to before the root existed.
        store.undo();
        assert!(store.graph().is_empty());
    }

    #[test]
    fn test_remove_relationship_idempotent() {
        let (mut store, root) = store_with_root();
        let spouse = store.add_relative(root, Gender::Male, RelationKind::Spouse).unwrap().person_id.unwrap();

        let edit = store.remove_relationship(root, spouse, RelationKind::Spouse);
        assert_eq!(edit.mutations.len(), 1);
        assert!(store.graph().get(root).unwrap().is_isolated());

        let again = store.remove_relationship(root, spouse, RelationKind::Spouse);
        assert!(again.is_noop());
        assert!(again.mutations.is_empty());
        assert_symmetric(&store);
    }

    #[test]
    fn test_delete_person_cascades() {
        let (mut store, root) = store_with_root();
        let child = store.add_relative(root, Gender::Male, RelationKind::Child).unwrap().person_id.unwrap();
        let spouse = store.add_relative(root, Gender::Male, RelationKind::Spouse).unwrap().person_id.unwrap();

        let edit = store.delete_person(root);
        assert!(!edit.graph.contains(root));
        assert!(edit.graph.get(child).unwrap().is_isolated());
        assert!(edit.graph.get(spouse).unwrap().is_isolated());
        assert_eq!(edit.mutations[0].kind(), OpKind::DeleteNode);
        assert_symmetric(&store);
    }

    #[test]
    fn test_delete_unknown_returns_same_arc() {
        let (mut store, _) = store_with_root();
        let before = Arc::clone(store.graph());
        let edit = store.delete_person(PersonId::new());
        assert!(Arc::ptr_eq(&before, &edit.graph));
        assert!(edit.mutations.is_empty());
    }

    #[test]
    fn test_undo_redo_produce_sync_mutations() {
        let (mut store, root) = store_with_root();
        let child = store.add_relative(root, Gender::Male, RelationKind::Child).unwrap().person_id.unwrap();

        let undo = store.undo().unwrap();
        assert!(!store.graph().contains(child));
        assert_eq!(undo.mutations.len(), 1);
        assert_eq!(undo.mutations[0].kind(), OpKind::DeleteNode);
        assert!(store.can_redo());

        let redo = store.redo().unwrap();
        assert!(store.graph().contains(child));
        assert_eq!(redo.mutations[0].kind(), OpKind::AddNode);
        assert_eq!(redo.mutations[0].relationship(), undo.before.relationships().into_iter().next());
        assert_symmetric(&store);
    }

    #[test]
    fn test_new_edit_clears_redo() {
        let (mut store, root) = store_with_root();
        store.add_relative(root, Gender::Male, RelationKind::Child);
        store.undo();
        assert!(store.can_redo());
        store.add_relative(root, Gender::Female, RelationKind::Spouse);
        assert!(!store.can_redo());
        assert!(store.redo().is_none());
    }

    #[test]
    fn test_load_clears_history() {
        let (mut store, root) = store_with_root();
        store.add_relative(root, Gender::Male, RelationKind::Child);
        store.load(FamilyGraph::new());
        assert!(!store.can_undo());
        assert!(!store.can_redo());
        assert!(store.graph().is_empty());
    }
}
