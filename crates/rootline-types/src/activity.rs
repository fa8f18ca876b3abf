//! Audit trail entries for confirmed mutations.

use serde::{Deserialize, Serialize};

use crate::ids::{ActorId, TreeId};
use crate::op::OpKind;

/// One confirmed, human-readable action.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub tree_id: TreeId,
    pub actor_id: ActorId,
    pub actor_email: String,
    pub action: OpKind,
    /// Human summary, e.g. `added "Ada Lovelace" as child of "Annabella Milbanke"`.
    pub details: String,
    /// Unix millis.
    pub created_at: u64,
}

/// Filter and page for reading the ledger. Results are newest first.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<ActorId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<OpKind>,
    /// Only entries strictly older than this (Unix millis); the paging cursor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<u64>,
    /// Page size; `0` means [`DEFAULT_PAGE_SIZE`].
    #[serde(default)]
    pub limit: usize,
}

/// Page size when a query does not set one.
pub const DEFAULT_PAGE_SIZE: usize = 50;

impl ActivityQuery {
    pub fn page_size(&self) -> usize {
        if self.limit == 0 { DEFAULT_PAGE_SIZE } else { self.limit }
    }

    /// Whether `entry` passes the filter (ignores paging size).
    pub fn matches(&self, entry: &ActivityEntry) -> bool {
        self.actor_id.is_none_or(|a| a == entry.actor_id)
            && self.action.is_none_or(|k| k == entry.action)
            && self.before.is_none_or(|b| entry.created_at < b)
    }

    /// Next page: entries older than the last one returned.
    pub fn next_page(&self, last: &ActivityEntry) -> Self {
        Self { before: Some(last.created_at), ..self.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(action: OpKind, created_at: u64) -> ActivityEntry {
        ActivityEntry {
            tree_id: TreeId::new(),
            actor_id: ActorId::new(),
            actor_email: "a@example.com".into(),
            action,
            details: String::new(),
            created_at,
        }
    }

    #[test]
    fn test_query_filters() {
        let q = ActivityQuery { action: Some(OpKind::AddNode), before: Some(10), ..Default::default() };
        assert!(q.matches(&entry(OpKind::AddNode, 5)));
        assert!(!q.matches(&entry(OpKind::AddNode, 10)));
        assert!(!q.matches(&entry(OpKind::DeleteNode, 5)));
        assert_eq!(q.page_size(), DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn test_next_page_moves_cursor() {
        let q = ActivityQuery { limit: 2, ..Default::default() };
        let next = q.next_page(&entry(OpKind::AddNode, 42));
        assert_eq!(next.before, Some(42));
        assert_eq!(next.limit, 2);
    }
}
