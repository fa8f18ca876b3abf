//! Relationship kinds and canonical relationship keys.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::EnumString;

use crate::ids::PersonId;

/// The role a person takes relative to another.
///
/// Always read as "`other` is the `kind` of `focus`": with
/// `RelationKind::Parent`, the other person is a parent of the focus person.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum RelationKind {
    #[strum(serialize = "parent", serialize = "father", serialize = "mother")]
    Parent,
    #[strum(serialize = "child", serialize = "son", serialize = "daughter")]
    Child,
    #[strum(serialize = "spouse", serialize = "partner")]
    Spouse,
}

impl RelationKind {
    /// Parse from string (case-insensitive).
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationKind::Parent => "parent",
            RelationKind::Child => "child",
            RelationKind::Spouse => "spouse",
        }
    }

    /// The same link seen from the other side.
    pub fn inverse(&self) -> Self {
        match self {
            RelationKind::Parent => RelationKind::Child,
            RelationKind::Child => RelationKind::Parent,
            RelationKind::Spouse => RelationKind::Spouse,
        }
    }
}

impl std::fmt::Display for RelationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Canonical form of a relationship link, independent of which side named it.
///
/// Parent links are stored as `(parent, child)`; spouse links as the
/// ordered pair `(min, max)`. This is the key the outbox coalesces on and the
/// primary key of the snapshot `relationships` table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelationshipRow {
    pub from: PersonId,
    pub to: PersonId,
    pub kind: LinkKind,
}

/// Stored link kind: parent→child or spouse.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LinkKind {
    Parent,
    Spouse,
}

impl LinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkKind::Parent => "parent",
            LinkKind::Spouse => "spouse",
        }
    }
}

impl RelationshipRow {
    /// Canonicalize "`other` is the `kind` of `focus`".
    pub fn canonical(focus: PersonId, other: PersonId, kind: RelationKind) -> Self {
        match kind {
            RelationKind::Parent => Self { from: other, to: focus, kind: LinkKind::Parent },
            RelationKind::Child => Self { from: focus, to: other, kind: LinkKind::Parent },
            RelationKind::Spouse => Self {
                from: focus.min(other),
                to: focus.max(other),
                kind: LinkKind::Spouse,
            },
        }
    }

    /// Back to the (focus, other, kind) form with `from` as the focus.
    pub fn as_relation(&self) -> (PersonId, PersonId, RelationKind) {
        match self.kind {
            LinkKind::Parent => (self.from, self.to, RelationKind::Child),
            LinkKind::Spouse => (self.from, self.to, RelationKind::Spouse),
        }
    }

    /// True when either endpoint is `id`.
    pub fn touches(&self, id: PersonId) -> bool {
        self.from == id || self.to == id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inverse_is_involution() {
        for kind in [RelationKind::Parent, RelationKind::Child, RelationKind::Spouse] {
            assert_eq!(kind.inverse().inverse(), kind);
        }
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!(RelationKind::from_str("Mother"), Some(RelationKind::Parent));
        assert_eq!(RelationKind::from_str("partner"), Some(RelationKind::Spouse));
        assert_eq!(RelationKind::from_str("cousin"), None);
    }

    #[test]
    fn test_canonical_is_side_independent() {
        let a = PersonId::new();
        let b = PersonId::new();
        assert_eq!(
            RelationshipRow::canonical(a, b, RelationKind::Parent),
            RelationshipRow::canonical(b, a, RelationKind::Child)
        );
        assert_eq!(
            RelationshipRow::canonical(a, b, RelationKind::Spouse),
            RelationshipRow::canonical(b, a, RelationKind::Spouse)
        );
        assert_ne!(
            RelationshipRow::canonical(a, b, RelationKind::Parent),
            RelationshipRow::canonical(a, b, RelationKind::Child)
        );
    }

    #[test]
    fn test_as_relation_roundtrip() {
        let parent = PersonId::new();
        let child = PersonId::new();
        let row = RelationshipRow::canonical(child, parent, RelationKind::Parent);
        assert_eq!(row.as_relation(), (parent, child, RelationKind::Child));
        assert_eq!(RelationshipRow::canonical(parent, child, RelationKind::Child), row);
    }
}
