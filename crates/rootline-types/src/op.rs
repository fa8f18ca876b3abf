//! Mutation intents and logged operations.
//!
//! A [`Mutation`] is the typed intent a client produces. An [`Operation`] is
//! the logged record the server holds: the same intent flattened into a kind,
//! a JSON payload, and a server-assigned `version_seq`.
//!
//! The payload stays raw JSON on [`Operation`] so that a single corrupt log
//! entry decodes to an error (and gets skipped during replay) instead of
//! failing the whole fetch.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::EnumString;
use thiserror::Error;

use crate::ids::{ActorId, PersonId, TreeId};
use crate::person::PersonPatch;
use crate::relation::{RelationKind, RelationshipRow};
use crate::snapshot::PersonRow;

/// Operation type as stored in the log (`type` column).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum OpKind {
    AddNode,
    UpdateProp,
    DeleteNode,
    AddRelation,
    DeleteRelation,
}

impl OpKind {
    /// Parse the wire name (e.g. `"ADD_NODE"`).
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }

    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::AddNode => "ADD_NODE",
            OpKind::UpdateProp => "UPDATE_PROP",
            OpKind::DeleteNode => "DELETE_NODE",
            OpKind::AddRelation => "ADD_RELATION",
            OpKind::DeleteRelation => "DELETE_RELATION",
        }
    }

    /// Structural operations change the shape of the graph and are pushed
    /// immediately, in order. Only UPDATE_PROP is debounced.
    pub fn is_structural(&self) -> bool {
        !matches!(self, OpKind::UpdateProp)
    }
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Payloads
// ============================================================================

/// ADD_NODE: a new person, plus the one link that attaches it to the tree.
///
/// `relation` reads from the new person's side: `Parent` means the new
/// person is a parent of `relative_id`. Both are absent only for the root.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddNodePayload {
    pub person: PersonRow,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative_id: Option<PersonId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<RelationKind>,
}

/// UPDATE_PROP: field-level partial update.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePropPayload {
    pub person_id: PersonId,
    pub patch: PersonPatch,
}

/// DELETE_NODE: remove a person and every link to it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteNodePayload {
    pub person_id: PersonId,
}

/// ADD_RELATION: `existing_id` becomes the `relation` of `focus_id`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddRelationPayload {
    pub focus_id: PersonId,
    pub existing_id: PersonId,
    pub relation: RelationKind,
}

/// DELETE_RELATION: `relative_id` stops being the `relation` of `focus_id`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRelationPayload {
    pub focus_id: PersonId,
    pub relative_id: PersonId,
    pub relation: RelationKind,
}

/// Error encoding or decoding an operation payload.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("malformed {kind} payload: {source}")]
    Malformed {
        kind: OpKind,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode {kind} payload: {source}")]
    Encode {
        kind: OpKind,
        #[source]
        source: serde_json::Error,
    },
}

// ============================================================================
// Mutation
// ============================================================================

/// A typed mutation intent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Mutation {
    AddNode(AddNodePayload),
    UpdateProp(UpdatePropPayload),
    DeleteNode(DeleteNodePayload),
    AddRelation(AddRelationPayload),
    DeleteRelation(DeleteRelationPayload),
}

impl Mutation {
    pub fn kind(&self) -> OpKind {
        match self {
            Mutation::AddNode(_) => OpKind::AddNode,
            Mutation::UpdateProp(_) => OpKind::UpdateProp,
            Mutation::DeleteNode(_) => OpKind::DeleteNode,
            Mutation::AddRelation(_) => OpKind::AddRelation,
            Mutation::DeleteRelation(_) => OpKind::DeleteRelation,
        }
    }

    /// Primary person this mutation targets (`person_id` column).
    pub fn person_id(&self) -> PersonId {
        match self {
            Mutation::AddNode(p) => p.person.id,
            Mutation::UpdateProp(p) => p.person_id,
            Mutation::DeleteNode(p) => p.person_id,
            Mutation::AddRelation(p) => p.focus_id,
            Mutation::DeleteRelation(p) => p.focus_id,
        }
    }

    /// Secondary person, where applicable (`relative_id` column).
    pub fn relative_id(&self) -> Option<PersonId> {
        match self {
            Mutation::AddNode(p) => p.relative_id,
            Mutation::UpdateProp(_) | Mutation::DeleteNode(_) => None,
            Mutation::AddRelation(p) => Some(p.existing_id),
            Mutation::DeleteRelation(p) => Some(p.relative_id),
        }
    }

    /// The canonical link this mutation creates or removes, if any.
    pub fn relationship(&self) -> Option<RelationshipRow> {
        match self {
            Mutation::AddNode(AddNodePayload { person, relative_id: Some(rel), relation: Some(kind) }) => {
                Some(RelationshipRow::canonical(*rel, person.id, *kind))
            }
            Mutation::AddRelation(p) => Some(RelationshipRow::canonical(p.focus_id, p.existing_id, p.relation)),
            Mutation::DeleteRelation(p) => {
                Some(RelationshipRow::canonical(p.focus_id, p.relative_id, p.relation))
            }
            _ => None,
        }
    }

    /// Serialize the payload for the log.
    pub fn encode_payload(&self) -> Result<serde_json::Value, PayloadError> {
        let encoded = match self {
            Mutation::AddNode(p) => serde_json::to_value(p),
            Mutation::UpdateProp(p) => serde_json::to_value(p),
            Mutation::DeleteNode(p) => serde_json::to_value(p),
            Mutation::AddRelation(p) => serde_json::to_value(p),
            Mutation::DeleteRelation(p) => serde_json::to_value(p),
        };
        encoded.map_err(|source| PayloadError::Encode { kind: self.kind(), source })
    }

    /// Decode a logged payload of the given kind.
    pub fn decode(kind: OpKind, payload: &serde_json::Value) -> Result<Self, PayloadError> {
        fn parse<T: serde::de::DeserializeOwned>(
            kind: OpKind,
            payload: &serde_json::Value,
        ) -> Result<T, PayloadError> {
            T::deserialize(payload).map_err(|source| PayloadError::Malformed { kind, source })
        }

        Ok(match kind {
            OpKind::AddNode => Mutation::AddNode(parse(kind, payload)?),
            OpKind::UpdateProp => Mutation::UpdateProp(parse(kind, payload)?),
            OpKind::DeleteNode => Mutation::DeleteNode(parse(kind, payload)?),
            OpKind::AddRelation => Mutation::AddRelation(parse(kind, payload)?),
            OpKind::DeleteRelation => Mutation::DeleteRelation(parse(kind, payload)?),
        })
    }
}

// ============================================================================
// Logged records
// ============================================================================

/// An operation about to be inserted; the server assigns `version_seq`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewOperation {
    pub tree_id: TreeId,
    pub kind: OpKind,
    pub person_id: Option<PersonId>,
    pub relative_id: Option<PersonId>,
    pub payload: serde_json::Value,
    pub actor_id: Option<ActorId>,
    /// Client-side creation time (Unix millis).
    pub created_at: u64,
}

impl NewOperation {
    /// Flatten a mutation into its log record.
    pub fn from_mutation(
        tree_id: TreeId,
        mutation: &Mutation,
        actor_id: Option<ActorId>,
        created_at: u64,
    ) -> Result<Self, PayloadError> {
        Ok(Self {
            tree_id,
            kind: mutation.kind(),
            person_id: Some(mutation.person_id()),
            relative_id: mutation.relative_id(),
            payload: mutation.encode_payload()?,
            actor_id,
            created_at,
        })
    }

    /// Stamp with a server-assigned version.
    pub fn into_operation(self, version_seq: u64) -> Operation {
        Operation {
            tree_id: self.tree_id,
            version_seq,
            kind: self.kind,
            person_id: self.person_id,
            relative_id: self.relative_id,
            payload: self.payload,
            actor_id: self.actor_id,
            created_at: self.created_at,
        }
    }
}

/// A versioned entry of a tree's operation log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub tree_id: TreeId,
    /// Strictly increasing per tree; assigned by the server only.
    pub version_seq: u64,
    pub kind: OpKind,
    pub person_id: Option<PersonId>,
    pub relative_id: Option<PersonId>,
    pub payload: serde_json::Value,
    pub actor_id: Option<ActorId>,
    pub created_at: u64,
}

impl Operation {
    /// Decode the payload into a typed mutation.
    pub fn decode(&self) -> Result<Mutation, PayloadError> {
        Mutation::decode(self.kind, &self.payload)
    }
}
