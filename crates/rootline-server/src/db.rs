//! SQLite persistence for tree operation logs, snapshot tables, and the
//! activity ledger.
//!
//! The `operations` table is append-only and is the source of truth. The
//! `people` / `relationships` tables hold the materialized snapshot, and
//! `snapshot_meta` records the log version they are known to include.

use std::path::Path;
use std::str::FromStr;

use rootline_types::{
    ActivityEntry, ActivityQuery, ActorId, Gender, LinkKind, NewOperation, OpKind, Operation, PersonDetails,
    PersonId, PersonPatch, PersonRow, RelationshipRow, Snapshot, TreeId,
};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Per-tree counters for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeStats {
    pub tree_id: TreeId,
    pub head: u64,
    pub snapshot_version: u64,
    pub operations: u64,
}

const SCHEMA: &str = r#"
-- Operation log (append-only; version_seq assigned here)
CREATE TABLE IF NOT EXISTS operations (
    tree_id TEXT NOT NULL,
    version_seq INTEGER NOT NULL,
    type TEXT NOT NULL,
    person_id TEXT,
    relative_id TEXT,
    payload TEXT NOT NULL,
    actor_id TEXT,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (tree_id, version_seq)
);

-- Snapshot: people
CREATE TABLE IF NOT EXISTS people (
    tree_id TEXT NOT NULL,
    id TEXT NOT NULL,
    gender TEXT NOT NULL,
    first_name TEXT,
    last_name TEXT,
    birth_name TEXT,
    birth_date TEXT,
    birth_place TEXT,
    death_date TEXT,
    death_place TEXT,
    notes TEXT,
    photo TEXT,
    PRIMARY KEY (tree_id, id)
);

-- Snapshot: canonical links (parent→child, spouse min→max)
CREATE TABLE IF NOT EXISTS relationships (
    tree_id TEXT NOT NULL,
    from_id TEXT NOT NULL,
    to_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    PRIMARY KEY (tree_id, from_id, to_id, kind)
);

-- Log version the snapshot tables include
CREATE TABLE IF NOT EXISTS snapshot_meta (
    tree_id TEXT PRIMARY KEY,
    version INTEGER NOT NULL
);

-- Activity ledger
CREATE TABLE IF NOT EXISTS activity (
    id INTEGER PRIMARY KEY,
    tree_id TEXT NOT NULL,
    actor_id TEXT NOT NULL,
    actor_email TEXT NOT NULL,
    action TEXT NOT NULL,
    details TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_activity_tree ON activity(tree_id, created_at);
"#;

/// Highest version ever assigned in a tree. Pruned entries are covered by
/// the snapshot version, so numbering never restarts.
const HEAD_SQL: &str = "SELECT MAX(
    COALESCE((SELECT MAX(version_seq) FROM operations WHERE tree_id = ?1), 0),
    COALESCE((SELECT version FROM snapshot_meta WHERE tree_id = ?1), 0))";

/// Database handle for tree persistence.
pub struct TreeDb {
    conn: Connection,
}

impl TreeDb {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    // =========================================================================
    // Operation log
    // =========================================================================

    /// Append an operation, assigning the next version of its tree.
    pub fn insert_operation(&mut self, op: &NewOperation) -> Result<u64, DbError> {
        let tree = op.tree_id.to_string();
        let payload = serde_json::to_string(&op.payload)?;
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let head: i64 = tx.query_row(
            HEAD_SQL,
            params![tree],
            |row| row.get(0),
        )?;
        let version = head + 1;
        tx.execute(
            "INSERT INTO operations (tree_id, version_seq, type, person_id, relative_id, payload, actor_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                tree,
                version,
                op.kind.as_str(),
                op.person_id.map(|id| id.to_string()),
                op.relative_id.map(|id| id.to_string()),
                payload,
                op.actor_id.map(|id| id.to_string()),
                op.created_at as i64,
            ],
        )?;
        tx.commit()?;
        Ok(version as u64)
    }

    /// Operations of `tree` with `version_seq > after`, ascending.
    pub fn operations_since(&self, tree: TreeId, after: u64) -> Result<Vec<Operation>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT tree_id, version_seq, type, person_id, relative_id, payload, actor_id, created_at
             FROM operations WHERE tree_id = ?1 AND version_seq > ?2 ORDER BY version_seq",
        )?;
        let rows = stmt.query_map(params![tree.to_string(), after as i64], |row| {
            let payload: String = row.get(5)?;
            Ok((operation_from_row(row)?, payload))
        })?;

        let mut ops = Vec::new();
        for row in rows {
            let (mut op, payload) = row?;
            op.payload = serde_json::from_str(&payload)?;
            ops.push(op);
        }
        Ok(ops)
    }

    /// Highest version of `tree`, 0 when the log is empty.
    pub fn head(&self, tree: TreeId) -> Result<u64, DbError> {
        let head: i64 = self.conn.query_row(
            HEAD_SQL,
            params![tree.to_string()],
            |row| row.get(0),
        )?;
        Ok(head as u64)
    }

    /// Delete log entries already covered by the snapshot. Returns how many
    /// were removed.
    pub fn prune_operations(&self, tree: TreeId) -> Result<usize, DbError> {
        let version = self.snapshot_version(tree)?;
        let removed = self.conn.execute(
            "DELETE FROM operations WHERE tree_id = ?1 AND version_seq <= ?2",
            params![tree.to_string(), version as i64],
        )?;
        Ok(removed)
    }

    /// Every tree with a log or a snapshot.
    pub fn trees(&self) -> Result<Vec<TreeStats>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT t.tree_id,
                    MAX(COALESCE((SELECT MAX(version_seq) FROM operations o WHERE o.tree_id = t.tree_id), 0),
                        COALESCE((SELECT version FROM snapshot_meta m WHERE m.tree_id = t.tree_id), 0)),
                    COALESCE((SELECT version FROM snapshot_meta m WHERE m.tree_id = t.tree_id), 0),
                    (SELECT COUNT(*) FROM operations o WHERE o.tree_id = t.tree_id)
             FROM (SELECT tree_id FROM operations UNION SELECT tree_id FROM snapshot_meta) t
             ORDER BY t.tree_id",
        )?;
        let rows = stmt.query_map([], |row| {
            let head: i64 = row.get(1)?;
            let snapshot_version: i64 = row.get(2)?;
            let operations: i64 = row.get(3)?;
            Ok(TreeStats {
                tree_id: parse_col(row, 0)?,
                head: head as u64,
                snapshot_version: snapshot_version as u64,
                operations: operations as u64,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // =========================================================================
    // Snapshot rows
    // =========================================================================

    pub fn upsert_people(&self, tree: TreeId, rows: &[PersonRow]) -> Result<(), DbError> {
        let tx = self.conn.unchecked_transaction()?;
        for row in rows {
            write_person(&tx, tree, row)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Apply `patch` to a stored person. Returns false if the row is absent.
    pub fn patch_person(&self, tree: TreeId, id: PersonId, patch: &PersonPatch) -> Result<bool, DbError> {
        let tx = self.conn.unchecked_transaction()?;
        let Some(mut row) = read_person(&tx, tree, id)? else {
            return Ok(false);
        };
        patch.apply(&mut row.details);
        write_person(&tx, tree, &row)?;
        tx.commit()?;
        Ok(true)
    }

    /// Delete people and every relationship touching them.
    pub fn delete_people(&self, tree: TreeId, ids: &[PersonId]) -> Result<(), DbError> {
        let tx = self.conn.unchecked_transaction()?;
        let tree = tree.to_string();
        for id in ids {
            let id = id.to_string();
            tx.execute("DELETE FROM people WHERE tree_id = ?1 AND id = ?2", params![tree, id])?;
            tx.execute(
                "DELETE FROM relationships WHERE tree_id = ?1 AND (from_id = ?2 OR to_id = ?2)",
                params![tree, id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn upsert_relationships(&self, tree: TreeId, rows: &[RelationshipRow]) -> Result<(), DbError> {
        let tx = self.conn.unchecked_transaction()?;
        for row in rows {
            tx.execute(
                "INSERT OR IGNORE INTO relationships (tree_id, from_id, to_id, kind) VALUES (?1, ?2, ?3, ?4)",
                params![tree.to_string(), row.from.to_string(), row.to.to_string(), row.kind.as_str()],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn delete_relationships(&self, tree: TreeId, rows: &[RelationshipRow]) -> Result<(), DbError> {
        let tx = self.conn.unchecked_transaction()?;
        for row in rows {
            tx.execute(
                "DELETE FROM relationships WHERE tree_id = ?1 AND from_id = ?2 AND to_id = ?3 AND kind = ?4",
                params![tree.to_string(), row.from.to_string(), row.to.to_string(), row.kind.as_str()],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Replace every snapshot row of the tree and set its version.
    pub fn replace_snapshot(&self, snapshot: &Snapshot) -> Result<(), DbError> {
        let tx = self.conn.unchecked_transaction()?;
        let tree = snapshot.tree_id.to_string();
        tx.execute("DELETE FROM people WHERE tree_id = ?1", params![tree])?;
        tx.execute("DELETE FROM relationships WHERE tree_id = ?1", params![tree])?;
        for row in &snapshot.people {
            write_person(&tx, snapshot.tree_id, row)?;
        }
        for row in &snapshot.relationships {
            tx.execute(
                "INSERT OR IGNORE INTO relationships (tree_id, from_id, to_id, kind) VALUES (?1, ?2, ?3, ?4)",
                params![tree, row.from.to_string(), row.to.to_string(), row.kind.as_str()],
            )?;
        }
        tx.execute(
            "INSERT OR REPLACE INTO snapshot_meta (tree_id, version) VALUES (?1, ?2)",
            params![tree, snapshot.version as i64],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn snapshot_version(&self, tree: TreeId) -> Result<u64, DbError> {
        let version: Option<i64> = self
            .conn
            .query_row(
                "SELECT version FROM snapshot_meta WHERE tree_id = ?1",
                params![tree.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(version.unwrap_or(0) as u64)
    }

    /// Current snapshot rows; empty at version 0 for an unknown tree.
    pub fn snapshot(&self, tree: TreeId) -> Result<Snapshot, DbError> {
        let mut people_stmt = self.conn.prepare(&format!(
            "SELECT {PERSON_COLUMNS} FROM people WHERE tree_id = ?1 ORDER BY id"
        ))?;
        let people = people_stmt
            .query_map(params![tree.to_string()], person_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let mut rel_stmt = self.conn.prepare(
            "SELECT from_id, to_id, kind FROM relationships WHERE tree_id = ?1 ORDER BY from_id, to_id, kind",
        )?;
        let relationships = rel_stmt
            .query_map(params![tree.to_string()], |row| {
                Ok(RelationshipRow { from: parse_col(row, 0)?, to: parse_col(row, 1)?, kind: parse_col::<LinkKind>(row, 2)? })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Snapshot { tree_id: tree, version: self.snapshot_version(tree)?, people, relationships })
    }

    // =========================================================================
    // Activity
    // =========================================================================

    pub fn append_activity(&self, entry: &ActivityEntry) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO activity (tree_id, actor_id, actor_email, action, details, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.tree_id.to_string(),
                entry.actor_id.to_string(),
                entry.actor_email,
                entry.action.as_str(),
                entry.details,
                entry.created_at as i64,
            ],
        )?;
        Ok(())
    }

    /// Entries of `tree` matching `query`, newest first, one page.
    pub fn query_activity(&self, tree: TreeId, query: &ActivityQuery) -> Result<Vec<ActivityEntry>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT tree_id, actor_id, actor_email, action, details, created_at
             FROM activity
             WHERE tree_id = ?1
               AND (?2 IS NULL OR actor_id = ?2)
               AND (?3 IS NULL OR action = ?3)
               AND (?4 IS NULL OR created_at < ?4)
             ORDER BY created_at DESC, id DESC
             LIMIT ?5",
        )?;
        let rows = stmt.query_map(
            params![
                tree.to_string(),
                query.actor_id.map(|id| id.to_string()),
                query.action.map(|kind| kind.as_str()),
                query.before.map(|b| b as i64),
                query.page_size() as i64,
            ],
            |row| {
                let created_at: i64 = row.get(5)?;
                Ok(ActivityEntry {
                    tree_id: parse_col(row, 0)?,
                    actor_id: parse_col::<ActorId>(row, 1)?,
                    actor_email: row.get(2)?,
                    action: parse_col::<OpKind>(row, 3)?,
                    details: row.get(4)?,
                    created_at: created_at as u64,
                })
            },
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

const PERSON_COLUMNS: &str =
    "id, gender, first_name, last_name, birth_name, birth_date, birth_place, death_date, death_place, notes, photo";

fn write_person(conn: &Connection, tree: TreeId, row: &PersonRow) -> rusqlite::Result<()> {
    let d = &row.details;
    conn.execute(
        "INSERT OR REPLACE INTO people
            (tree_id, id, gender, first_name, last_name, birth_name, birth_date, birth_place, death_date, death_place, notes, photo)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            tree.to_string(),
            row.id.to_string(),
            d.gender.as_str(),
            d.first_name,
            d.last_name,
            d.birth_name,
            d.birth_date,
            d.birth_place,
            d.death_date,
            d.death_place,
            d.notes,
            d.photo,
        ],
    )?;
    Ok(())
}

fn read_person(conn: &Connection, tree: TreeId, id: PersonId) -> rusqlite::Result<Option<PersonRow>> {
    conn.query_row(
        &format!("SELECT {PERSON_COLUMNS} FROM people WHERE tree_id = ?1 AND id = ?2"),
        params![tree.to_string(), id.to_string()],
        person_from_row,
    )
    .optional()
}

fn person_from_row(row: &Row<'_>) -> rusqlite::Result<PersonRow> {
    let gender: String = row.get(1)?;
    Ok(PersonRow {
        id: parse_col(row, 0)?,
        details: PersonDetails {
            gender: Gender::from_str(&gender).unwrap_or_default(),
            first_name: row.get(2)?,
            last_name: row.get(3)?,
            birth_name: row.get(4)?,
            birth_date: row.get(5)?,
            birth_place: row.get(6)?,
            death_date: row.get(7)?,
            death_place: row.get(8)?,
            notes: row.get(9)?,
            photo: row.get(10)?,
        },
    })
}

/// Payload is filled in by the caller; it needs a serde_json error path.
fn operation_from_row(row: &Row<'_>) -> rusqlite::Result<Operation> {
    let version: i64 = row.get(1)?;
    let created_at: i64 = row.get(7)?;
    Ok(Operation {
        tree_id: parse_col(row, 0)?,
        version_seq: version as u64,
        kind: parse_col::<OpKind>(row, 2)?,
        person_id: parse_opt_col(row, 3)?,
        relative_id: parse_opt_col(row, 4)?,
        payload: serde_json::Value::Null,
        actor_id: parse_opt_col(row, 6)?,
        created_at: created_at as u64,
    })
}

fn parse_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: String = row.get(idx)?;
    text.parse().map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_opt_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: Option<String> = row.get(idx)?;
    text.map(|t| t.parse().map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rootline_types::{DeleteNodePayload, Mutation};

    fn delete_op(tree: TreeId, at: u64) -> NewOperation {
        let m = Mutation::DeleteNode(DeleteNodePayload { person_id: PersonId::new() });
        NewOperation::from_mutation(tree, &m, Some(ActorId::new()), at).unwrap()
    }

    fn person(name: &str) -> PersonRow {
        let mut details = PersonDetails::with_gender(Gender::Female);
        details.first_name = Some(name.into());
        PersonRow::new(PersonId::new(), details)
    }

    #[test]
    fn test_versions_increase_per_tree() {
        let mut db = TreeDb::in_memory().unwrap();
        let (a, b) = (TreeId::new(), TreeId::new());
        assert_eq!(db.insert_operation(&delete_op(a, 1)).unwrap(), 1);
        assert_eq!(db.insert_operation(&delete_op(a, 2)).unwrap(), 2);
        assert_eq!(db.insert_operation(&delete_op(b, 3)).unwrap(), 1);
        assert_eq!(db.head(a).unwrap(), 2);

        let ops = db.operations_since(a, 0).unwrap();
        assert_eq!(ops.iter().map(|op| op.version_seq).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(ops[0].kind, OpKind::DeleteNode);
        assert!(ops[0].decode().is_ok());
        assert_eq!(db.operations_since(a, 1).unwrap().len(), 1);
    }

    #[test]
    fn test_operation_round_trips_columns() {
        let mut db = TreeDb::in_memory().unwrap();
        let tree = TreeId::new();
        let op = delete_op(tree, 42);
        db.insert_operation(&op).unwrap();
        let stored = db.operations_since(tree, 0).unwrap().remove(0);
        assert_eq!(stored, op.into_operation(1));
    }

    #[test]
    fn test_snapshot_rows() {
        let db = TreeDb::in_memory().unwrap();
        let tree = TreeId::new();
        let (ada, byron) = (person("Ada"), person("Byron"));
        db.upsert_people(tree, &[ada.clone(), byron.clone()]).unwrap();
        let link = RelationshipRow::canonical(ada.id, byron.id, rootline_types::RelationKind::Parent);
        db.upsert_relationships(tree, &[link, link]).unwrap();

        let snapshot = db.snapshot(tree).unwrap();
        assert_eq!(snapshot.version, 0);
        assert_eq!(snapshot.people.len(), 2);
        assert_eq!(snapshot.relationships, vec![link]);

        let patch = PersonPatch::set("last_name", "Lovelace");
        assert!(db.patch_person(tree, ada.id, &patch).unwrap());
        assert!(!db.patch_person(tree, PersonId::new(), &patch).unwrap());

        db.delete_people(tree, &[byron.id]).unwrap();
        let snapshot = db.snapshot(tree).unwrap();
        assert_eq!(snapshot.people.len(), 1);
        assert_eq!(snapshot.people[0].details.last_name.as_deref(), Some("Lovelace"));
        assert!(snapshot.relationships.is_empty());
    }

    #[test]
    fn test_replace_snapshot_and_prune() {
        let mut db = TreeDb::in_memory().unwrap();
        let tree = TreeId::new();
        for at in 0..3 {
            db.insert_operation(&delete_op(tree, at)).unwrap();
        }
        db.upsert_people(tree, &[person("stale")]).unwrap();

        let fresh = Snapshot { tree_id: tree, version: 2, people: vec![person("Ada")], relationships: vec![] };
        db.replace_snapshot(&fresh).unwrap();
        assert_eq!(db.snapshot(tree).unwrap(), fresh);

        assert_eq!(db.prune_operations(tree).unwrap(), 2);
        assert_eq!(db.operations_since(tree, 0).unwrap().len(), 1);
        // Pruning never resets numbering.
        assert_eq!(db.insert_operation(&delete_op(tree, 9)).unwrap(), 4);
        db.replace_snapshot(&Snapshot { version: 4, ..fresh.clone() }).unwrap();
        assert_eq!(db.prune_operations(tree).unwrap(), 2);
        assert_eq!(db.head(tree).unwrap(), 4);
        assert_eq!(db.insert_operation(&delete_op(tree, 10)).unwrap(), 5);

        let stats = db.trees().unwrap();
        assert_eq!(stats, vec![TreeStats { tree_id: tree, head: 5, snapshot_version: 4, operations: 1 }]);
    }

    #[test]
    fn test_activity_query() {
        let db = TreeDb::in_memory().unwrap();
        let tree = TreeId::new();
        let (alice, bob) = (ActorId::new(), ActorId::new());
        for (at, actor, action) in [
            (1, alice, OpKind::AddNode),
            (2, bob, OpKind::AddNode),
            (3, alice, OpKind::UpdateProp),
            (4, alice, OpKind::DeleteNode),
        ] {
            db.append_activity(&ActivityEntry {
                tree_id: tree,
                actor_id: actor,
                actor_email: "someone@example.com".into(),
                action,
                details: format!("entry {at}"),
                created_at: at,
            })
            .unwrap();
        }

        let all = db.query_activity(tree, &ActivityQuery::default()).unwrap();
        assert_eq!(all.iter().map(|e| e.created_at).collect::<Vec<_>>(), vec![4, 3, 2, 1]);

        let query = ActivityQuery { actor_id: Some(alice), limit: 2, ..Default::default() };
        let page = db.query_activity(tree, &query).unwrap();
        assert_eq!(page.iter().map(|e| e.created_at).collect::<Vec<_>>(), vec![4, 3]);
        let next = db.query_activity(tree, &query.next_page(&page[1])).unwrap();
        assert_eq!(next.iter().map(|e| e.created_at).collect::<Vec<_>>(), vec![1]);

        let adds = ActivityQuery { action: Some(OpKind::AddNode), ..Default::default() };
        assert_eq!(db.query_activity(tree, &adds).unwrap().len(), 2);
    }
}
