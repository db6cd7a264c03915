//! SQLite storage backend

use super::traits::{
    GraphStore, MergePolicy, NodeSummary, OpenStore, ProjectedNode, Projection,
    RelationshipPredicate, StorageError, StorageResult,
};
use crate::graph::{CategoryNode, EdgeId, NodeId, Relationship, CATEGORY_LABEL};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// SQLite-backed graph store
///
/// Uses a single database file with tables for nodes, relationships and
/// analysis projections. Thread-safe via an internal mutex on the connection;
/// every mutating call runs in its own transaction.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

const NODE_COLUMNS: &str =
    "id, name, embedding_json, description, community, properties_json, created_at";

impl SqliteStore {
    fn init_schema(conn: &Connection) -> StorageResult<()> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS nodes (
                id TEXT PRIMARY KEY,
                label TEXT NOT NULL,
                name TEXT NOT NULL,
                embedding_json TEXT NOT NULL DEFAULT '[]',
                description TEXT,
                community INTEGER,
                properties_json TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_nodes_label ON nodes(label);

            -- AUTOINCREMENT keeps ids strictly increasing: a lower id is an
            -- older relationship, even after deletes.
            CREATE TABLE IF NOT EXISTS relationships (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_id TEXT NOT NULL,
                target_id TEXT NOT NULL,
                rel_type TEXT NOT NULL,
                properties_json TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_relationships_pair
                ON relationships(source_id, target_id, rel_type);
            CREATE INDEX IF NOT EXISTS idx_relationships_target
                ON relationships(target_id);

            CREATE TABLE IF NOT EXISTS projections (
                name TEXT PRIMARY KEY,
                label TEXT NOT NULL,
                node_count INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS projection_members (
                projection TEXT NOT NULL,
                seq INTEGER NOT NULL,
                node_id TEXT NOT NULL,
                embedding_json TEXT NOT NULL,
                PRIMARY KEY (projection, seq),
                FOREIGN KEY (projection) REFERENCES projections(name) ON DELETE CASCADE
            );

            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }

    fn parse_timestamp(raw: &str) -> StorageResult<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| StorageError::DateParse(e.to_string()))
    }

    /// Read a node row selected with [`NODE_COLUMNS`].
    fn row_to_node(row: &rusqlite::Row<'_>) -> StorageResult<CategoryNode> {
        let embedding_json: String = row.get(2)?;
        let properties_json: String = row.get(5)?;
        let created_at: String = row.get(6)?;
        Ok(CategoryNode {
            id: NodeId::from_string(row.get::<_, String>(0)?),
            name: row.get(1)?,
            embedding: serde_json::from_str(&embedding_json)?,
            description: row.get(3)?,
            community: row.get(4)?,
            properties: serde_json::from_str(&properties_json)?,
            created_at: Self::parse_timestamp(&created_at)?,
        })
    }

    fn upsert_node(conn: &Connection, label: &str, node: &CategoryNode) -> StorageResult<()> {
        if node.name.trim().is_empty() {
            return Err(StorageError::InvalidData(format!(
                "node {} has an empty name",
                node.id
            )));
        }
        conn.execute(
            r#"
            INSERT INTO nodes (id, label, name, embedding_json, description, community,
                               properties_json, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(id) DO UPDATE SET
                label = excluded.label,
                name = excluded.name,
                embedding_json = excluded.embedding_json,
                description = excluded.description,
                community = excluded.community,
                properties_json = excluded.properties_json
            "#,
            params![
                node.id.as_str(),
                label,
                node.name,
                serde_json::to_string(&node.embedding)?,
                node.description,
                node.community,
                serde_json::to_string(&node.properties)?,
                node.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn load_category(tx: &Transaction<'_>, id: &NodeId) -> StorageResult<Option<CategoryNode>> {
        let sql = format!("SELECT {} FROM nodes WHERE id = ?1 AND label = ?2", NODE_COLUMNS);
        let mut stmt = tx.prepare(&sql)?;
        let mut rows = stmt.query(params![id.as_str(), CATEGORY_LABEL])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::row_to_node(row)?)),
            None => Ok(None),
        }
    }

    /// Collapse one group inside an open transaction.
    fn merge_group(
        tx: &Transaction<'_>,
        ids: &[NodeId],
        policy: MergePolicy,
    ) -> StorageResult<Option<NodeId>> {
        let mut seen = HashSet::new();
        let mut members = Vec::new();
        for id in ids {
            if !seen.insert(id) {
                continue;
            }
            if let Some(node) = Self::load_category(tx, id)? {
                members.push(node);
            }
        }
        if members.len() < 2 {
            return Ok(None);
        }

        // Oldest first, so the tie-break below and Overwrite ordering agree.
        members.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        let survivor_idx = members
            .iter()
            .enumerate()
            .max_by(|(ia, a), (ib, b)| a.richness().cmp(&b.richness()).then_with(|| ib.cmp(ia)))
            .map(|(i, _)| i)
            .unwrap_or(0);
        let mut survivor = members.remove(survivor_idx);
        let losers = members;

        for loser in &losers {
            absorb_properties(&mut survivor, loser, policy);
        }

        for loser in &losers {
            tx.execute(
                "UPDATE relationships SET source_id = ?1 WHERE source_id = ?2",
                params![survivor.id.as_str(), loser.id.as_str()],
            )?;
            tx.execute(
                "UPDATE relationships SET target_id = ?1 WHERE target_id = ?2",
                params![survivor.id.as_str(), loser.id.as_str()],
            )?;
            tx.execute("DELETE FROM nodes WHERE id = ?1", params![loser.id.as_str()])?;
        }
        Self::upsert_node(tx, CATEGORY_LABEL, &survivor)?;

        Ok(Some(survivor.id))
    }

    fn predicate_query(predicate: &RelationshipPredicate) -> &'static str {
        match predicate {
            RelationshipPredicate::SelfLoop { .. } => {
                r#"
                SELECT r.id FROM relationships r
                WHERE r.source_id = r.target_id
                  AND (?1 IS NULL OR r.rel_type = ?1)
                LIMIT ?2
                "#
            }
            RelationshipPredicate::ParallelDuplicate { .. } => {
                r#"
                SELECT r.id FROM relationships r
                WHERE (?1 IS NULL OR r.rel_type = ?1)
                  AND EXISTS (
                    SELECT 1 FROM relationships o
                    WHERE o.source_id = r.source_id
                      AND o.target_id = r.target_id
                      AND o.rel_type = r.rel_type
                      AND o.id < r.id
                  )
                LIMIT ?2
                "#
            }
            RelationshipPredicate::ReciprocalDuplicate { .. } => {
                r#"
                SELECT r.id FROM relationships r
                WHERE r.source_id <> r.target_id
                  AND (?1 IS NULL OR r.rel_type = ?1)
                  AND EXISTS (
                    SELECT 1 FROM relationships o
                    WHERE o.source_id = r.target_id
                      AND o.target_id = r.source_id
                      AND o.rel_type = r.rel_type
                      AND o.id < r.id
                  )
                LIMIT ?2
                "#
            }
        }
    }
}

/// Fold a loser's scalar properties into the survivor according to policy.
fn absorb_properties(survivor: &mut CategoryNode, loser: &CategoryNode, policy: MergePolicy) {
    for (key, value) in &loser.properties {
        if !value.is_populated() {
            continue;
        }
        match policy {
            MergePolicy::Discard => {
                let keep_existing = survivor
                    .properties
                    .get(key)
                    .map_or(false, |existing| existing.is_populated());
                if !keep_existing {
                    survivor.properties.insert(key.clone(), value.clone());
                }
            }
            MergePolicy::Overwrite => {
                survivor.properties.insert(key.clone(), value.clone());
            }
        }
    }

    let loser_description = loser
        .description
        .as_ref()
        .filter(|d| !d.trim().is_empty());
    let survivor_has_description = survivor
        .description
        .as_deref()
        .map_or(false, |d| !d.trim().is_empty());
    if let Some(description) = loser_description {
        if policy == MergePolicy::Overwrite || !survivor_has_description {
            survivor.description = Some(description.clone());
        }
    }

    if !survivor.has_embedding() && loser.has_embedding() {
        survivor.embedding = loser.embedding.clone();
    }
    if survivor.community.is_none() {
        survivor.community = loser.community;
    }
}

impl OpenStore for SqliteStore {
    fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl GraphStore for SqliteStore {
    // === Node Operations ===

    fn save_node(&self, node: &CategoryNode) -> StorageResult<()> {
        self.save_labeled_node(CATEGORY_LABEL, node)
    }

    fn save_labeled_node(&self, label: &str, node: &CategoryNode) -> StorageResult<()> {
        let conn = self.conn()?;
        Self::upsert_node(&conn, label, node)
    }

    fn load_node(&self, id: &NodeId) -> StorageResult<Option<CategoryNode>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM nodes WHERE id = ?1", NODE_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params![id.as_str()])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::row_to_node(row)?)),
            None => Ok(None),
        }
    }

    fn node_summaries(&self, label: &str) -> StorageResult<Vec<NodeSummary>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT id, name, community FROM nodes WHERE label = ?1 ORDER BY id")?;
        let summaries = stmt
            .query_map(params![label], |row| {
                Ok(NodeSummary {
                    id: NodeId::from_string(row.get::<_, String>(0)?),
                    name: row.get(1)?,
                    community: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(summaries)
    }

    fn count_nodes(&self, label: &str) -> StorageResult<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM nodes WHERE label = ?1",
            params![label],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // === Relationship Operations ===

    fn save_relationship(&self, relationship: &Relationship) -> StorageResult<EdgeId> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO relationships (source_id, target_id, rel_type, properties_json, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                relationship.source.as_str(),
                relationship.target.as_str(),
                relationship.rel_type,
                serde_json::to_string(&relationship.properties)?,
                relationship.created_at.to_rfc3339(),
            ],
        )?;
        Ok(EdgeId::from_raw(conn.last_insert_rowid()))
    }

    fn relationships(&self, rel_type: Option<&str>) -> StorageResult<Vec<Relationship>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, source_id, target_id, rel_type, properties_json, created_at
            FROM relationships
            WHERE (?1 IS NULL OR rel_type = ?1)
            ORDER BY id
            "#,
        )?;
        let rows = stmt
            .query_map(params![rel_type], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, source, target, rel_type, props, created)| {
                Ok(Relationship {
                    id: Some(EdgeId::from_raw(id)),
                    source: NodeId::from_string(source),
                    target: NodeId::from_string(target),
                    rel_type,
                    properties: serde_json::from_str(&props)?,
                    created_at: Self::parse_timestamp(&created)?,
                })
            })
            .collect()
    }

    fn count_relationships(&self) -> StorageResult<usize> {
        let conn = self.conn()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM relationships", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    // === Analysis Projection ===

    fn project_nodes(&self, name: &str, label: &str) -> StorageResult<Projection> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let existing: Option<String> = tx
            .query_row(
                "SELECT name FROM projections WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        if existing.is_some() {
            return Err(StorageError::AlreadyExists(format!("projection '{}'", name)));
        }

        tx.execute(
            "INSERT INTO projections (name, label, node_count, created_at) VALUES (?1, ?2, 0, ?3)",
            params![name, label, Utc::now().to_rfc3339()],
        )?;
        let node_count = tx.execute(
            r#"
            INSERT INTO projection_members (projection, seq, node_id, embedding_json)
            SELECT ?1, ROW_NUMBER() OVER (ORDER BY id), id, embedding_json
            FROM nodes
            WHERE label = ?2 AND embedding_json <> '[]'
            "#,
            params![name, label],
        )?;
        tx.execute(
            "UPDATE projections SET node_count = ?2 WHERE name = ?1",
            params![name, node_count as i64],
        )?;
        tx.commit()?;

        Ok(Projection {
            name: name.to_string(),
            label: label.to_string(),
            node_count,
        })
    }

    fn drop_projection(&self, name: &str) -> StorageResult<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM projections WHERE name = ?1", params![name])?;
        Ok(deleted > 0)
    }

    fn projection_page(
        &self,
        name: &str,
        offset: usize,
        limit: usize,
    ) -> StorageResult<Vec<ProjectedNode>> {
        let conn = self.conn()?;
        let known: Option<String> = conn
            .query_row(
                "SELECT name FROM projections WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        if known.is_none() {
            return Err(StorageError::NotFound(format!("projection '{}'", name)));
        }

        let mut stmt = conn.prepare(
            r#"
            SELECT node_id, embedding_json FROM projection_members
            WHERE projection = ?1
            ORDER BY seq
            LIMIT ?2 OFFSET ?3
            "#,
        )?;
        let rows = stmt
            .query_map(params![name, limit as i64, offset as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, embedding)| {
                Ok(ProjectedNode {
                    id: NodeId::from_string(id),
                    embedding: serde_json::from_str(&embedding)?,
                })
            })
            .collect()
    }

    fn write_communities(
        &self,
        label: &str,
        assignments: &[(NodeId, i64)],
    ) -> StorageResult<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE nodes SET community = NULL WHERE label = ?1",
            params![label],
        )?;
        let mut written = 0;
        {
            let mut stmt =
                tx.prepare("UPDATE nodes SET community = ?2 WHERE id = ?1 AND label = ?3")?;
            for (id, community) in assignments {
                written += stmt.execute(params![id.as_str(), community, label])?;
            }
        }
        tx.commit()?;
        Ok(written)
    }

    // === Merging ===

    fn merge_nodes(&self, ids: &[NodeId], policy: MergePolicy) -> StorageResult<Option<NodeId>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let survivor = Self::merge_group(&tx, ids, policy)?;
        tx.commit()?;
        Ok(survivor)
    }

    fn merge_batch(&self, groups: &[Vec<NodeId>], policy: MergePolicy) -> StorageResult<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut merged = 0;
        for group in groups {
            if Self::merge_group(&tx, group, policy)?.is_some() {
                merged += 1;
            }
        }
        tx.commit()?;
        Ok(merged)
    }

    // === Cleanup ===

    fn delete_relationships_matching(
        &self,
        predicate: &RelationshipPredicate,
        batch_size: usize,
    ) -> StorageResult<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let ids: Vec<i64> = {
            let mut stmt = tx.prepare(Self::predicate_query(predicate))?;
            let rows = stmt.query_map(
                params![predicate.rel_type(), batch_size as i64],
                |row| row.get(0),
            )?;
            rows.collect::<Result<Vec<_>, _>>()?
        };
        {
            let mut delete = tx.prepare("DELETE FROM relationships WHERE id = ?1")?;
            for id in &ids {
                delete.execute(params![id])?;
            }
        }
        tx.commit()?;
        Ok(ids.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::PropertyValue;
    use chrono::Duration as ChronoDuration;

    fn create_test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    fn category(id: &str, name: &str) -> CategoryNode {
        CategoryNode::new(name).with_id(id).with_embedding(vec![1.0, 0.0])
    }

    fn link(store: &SqliteStore, source: &str, target: &str) -> EdgeId {
        store
            .save_relationship(&Relationship::mentions(
                NodeId::from_string(source),
                NodeId::from_string(target),
            ))
            .unwrap()
    }

    fn all_pass(predicate: RelationshipPredicate, store: &SqliteStore) -> usize {
        let mut total = 0;
        loop {
            let n = store.delete_relationships_matching(&predicate, 2).unwrap();
            if n == 0 {
                return total;
            }
            total += n;
        }
    }

    #[test]
    fn test_save_and_load_node() {
        let store = create_test_store();
        let node = category("c1", "Robotics")
            .with_description("machines")
            .with_property("source", PropertyValue::String("doc-1".into()));
        store.save_node(&node).unwrap();

        let loaded = store.load_node(&NodeId::from_string("c1")).unwrap().unwrap();
        assert_eq!(loaded.name, "Robotics");
        assert_eq!(loaded.embedding, vec![1.0, 0.0]);
        assert_eq!(loaded.description.as_deref(), Some("machines"));
        assert_eq!(
            loaded.properties.get("source"),
            Some(&PropertyValue::String("doc-1".into()))
        );
        assert!(store.load_node(&NodeId::from_string("missing")).unwrap().is_none());
    }

    #[test]
    fn test_empty_name_is_rejected() {
        let store = create_test_store();
        let err = store.save_node(&category("c1", "   ")).unwrap_err();
        assert!(matches!(err, StorageError::InvalidData(_)));
    }

    #[test]
    fn test_relationship_ids_increase() {
        let store = create_test_store();
        let first = link(&store, "a", "b");
        let second = link(&store, "b", "c");
        assert!(first < second);
        assert_eq!(store.count_relationships().unwrap(), 2);
    }

    #[test]
    fn test_projection_conflict_is_typed() {
        let store = create_test_store();
        store.save_node(&category("c1", "AI")).unwrap();
        store.save_node(&CategoryNode::new("no embedding").with_id("c2")).unwrap();

        let projection = store.project_nodes("entities", CATEGORY_LABEL).unwrap();
        assert_eq!(projection.node_count, 1, "nodes without embeddings are not projected");

        let err = store.project_nodes("entities", CATEGORY_LABEL).unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists(_)));

        assert!(store.drop_projection("entities").unwrap());
        assert!(!store.drop_projection("entities").unwrap());
        assert!(store.project_nodes("entities", CATEGORY_LABEL).is_ok());
    }

    #[test]
    fn test_projection_pages_are_stable() {
        let store = create_test_store();
        for i in 0..5 {
            store.save_node(&category(&format!("c{}", i), &format!("n{}", i))).unwrap();
        }
        store.project_nodes("p", CATEGORY_LABEL).unwrap();

        let first = store.projection_page("p", 0, 3).unwrap();
        let second = store.projection_page("p", 3, 3).unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(second.len(), 2);
        let ids: HashSet<_> = first.iter().chain(second.iter()).map(|n| n.id.clone()).collect();
        assert_eq!(ids.len(), 5);

        let err = store.projection_page("other", 0, 3).unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[test]
    fn test_write_communities_resets_unassigned_nodes() {
        let store = create_test_store();
        let mut stale = category("c1", "AI");
        stale.community = Some(99);
        store.save_node(&stale).unwrap();
        store.save_node(&category("c2", "ML")).unwrap();

        let written = store
            .write_communities(CATEGORY_LABEL, &[(NodeId::from_string("c2"), 4)])
            .unwrap();
        assert_eq!(written, 1);

        let summaries = store.node_summaries(CATEGORY_LABEL).unwrap();
        let c1 = summaries.iter().find(|s| s.id.as_str() == "c1").unwrap();
        let c2 = summaries.iter().find(|s| s.id.as_str() == "c2").unwrap();
        assert_eq!(c1.community, None);
        assert_eq!(c2.community, Some(4));
    }

    #[test]
    fn test_merge_picks_richest_survivor_and_rewires() {
        let store = create_test_store();
        let plain = category("a", "artificial intelligence");
        let rich = category("b", "Artificial Intelligence")
            .with_description("the study of intelligent agents");
        store.save_node(&plain).unwrap();
        store.save_node(&rich).unwrap();
        store.save_labeled_node("Document", &CategoryNode::new("doc").with_id("d1")).unwrap();
        link(&store, "d1", "a");
        link(&store, "d1", "b");
        link(&store, "a", "b");

        let survivor = store
            .merge_nodes(
                &[NodeId::from_string("a"), NodeId::from_string("b")],
                MergePolicy::Discard,
            )
            .unwrap();
        assert_eq!(survivor, Some(NodeId::from_string("b")));
        assert_eq!(store.count_nodes(CATEGORY_LABEL).unwrap(), 1);

        let rels = store.relationships(None).unwrap();
        assert_eq!(rels.len(), 3, "merging preserves every relationship");
        assert!(rels.iter().all(|r| r.source.as_str() != "a" && r.target.as_str() != "a"));
        assert_eq!(rels.iter().filter(|r| r.is_self_loop()).count(), 1);
    }

    #[test]
    fn test_merge_discard_keeps_survivor_values_and_fills_gaps() {
        let store = create_test_store();
        let survivor = category("s", "ML")
            .with_description("kept")
            .with_property("lang", PropertyValue::String("en".into()))
            .with_property("rank", PropertyValue::Int(1));
        let loser = category("l", "ml")
            .with_description("dropped")
            .with_property("lang", PropertyValue::String("fr".into()))
            .with_property("origin", PropertyValue::String("doc-9".into()));
        store.save_node(&survivor).unwrap();
        store.save_node(&loser).unwrap();

        store
            .merge_nodes(&[NodeId::from_string("s"), NodeId::from_string("l")], MergePolicy::Discard)
            .unwrap();

        let merged = store.load_node(&NodeId::from_string("s")).unwrap().unwrap();
        assert_eq!(merged.name, "ML");
        assert_eq!(merged.description.as_deref(), Some("kept"));
        assert_eq!(merged.properties.get("lang"), Some(&PropertyValue::String("en".into())));
        assert_eq!(
            merged.properties.get("origin"),
            Some(&PropertyValue::String("doc-9".into()))
        );
    }

    #[test]
    fn test_merge_overwrite_prefers_loser_values() {
        let store = create_test_store();
        let survivor = category("s", "ML")
            .with_property("lang", PropertyValue::String("en".into()))
            .with_property("rank", PropertyValue::Int(1));
        let loser = category("l", "ml").with_property("lang", PropertyValue::String("fr".into()));
        store.save_node(&survivor).unwrap();
        store.save_node(&loser).unwrap();

        store
            .merge_nodes(&[NodeId::from_string("s"), NodeId::from_string("l")], MergePolicy::Overwrite)
            .unwrap();
        let merged = store.load_node(&NodeId::from_string("s")).unwrap().unwrap();
        assert_eq!(merged.properties.get("lang"), Some(&PropertyValue::String("fr".into())));
    }

    #[test]
    fn test_merge_tie_goes_to_oldest_node() {
        let store = create_test_store();
        let mut older = category("z-older", "Robotics");
        older.created_at = Utc::now() - ChronoDuration::days(1);
        let newer = category("a-newer", "robotics");
        store.save_node(&older).unwrap();
        store.save_node(&newer).unwrap();

        let survivor = store
            .merge_nodes(&[newer.id.clone(), older.id.clone()], MergePolicy::Discard)
            .unwrap();
        assert_eq!(survivor, Some(older.id));
    }

    #[test]
    fn test_merge_is_noop_once_collapsed() {
        let store = create_test_store();
        store.save_node(&category("a", "AI")).unwrap();
        store.save_node(&category("b", "ai")).unwrap();
        let group = vec![NodeId::from_string("a"), NodeId::from_string("b")];

        assert_eq!(store.merge_batch(&[group.clone()], MergePolicy::Discard).unwrap(), 1);
        assert_eq!(store.merge_batch(&[group], MergePolicy::Discard).unwrap(), 0);
    }

    #[test]
    fn test_merge_ignores_non_category_nodes() {
        let store = create_test_store();
        store.save_node(&category("a", "AI")).unwrap();
        store.save_labeled_node("Document", &CategoryNode::new("AI").with_id("d")).unwrap();

        let survivor = store
            .merge_nodes(&[NodeId::from_string("a"), NodeId::from_string("d")], MergePolicy::Discard)
            .unwrap();
        assert!(survivor.is_none());
        assert_eq!(store.count_nodes("Document").unwrap(), 1);
    }

    #[test]
    fn test_self_loops_removed_in_batches() {
        let store = create_test_store();
        for _ in 0..5 {
            link(&store, "a", "a");
        }
        link(&store, "a", "b");

        let removed = all_pass(RelationshipPredicate::SelfLoop { rel_type: None }, &store);
        assert_eq!(removed, 5);
        assert_eq!(store.count_relationships().unwrap(), 1);
    }

    #[test]
    fn test_parallel_duplicates_keep_lowest_id() {
        let store = create_test_store();
        let first = link(&store, "a", "b");
        link(&store, "a", "b");
        link(&store, "a", "b");
        store
            .save_relationship(&Relationship::new(
                NodeId::from_string("a"),
                NodeId::from_string("b"),
                "RELATED_TO",
            ))
            .unwrap();

        let removed = all_pass(RelationshipPredicate::ParallelDuplicate { rel_type: None }, &store);
        assert_eq!(removed, 2);

        let remaining = store.relationships(Some("MENTIONS")).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, Some(first));
        assert_eq!(store.relationships(Some("RELATED_TO")).unwrap().len(), 1);
    }

    #[test]
    fn test_reciprocal_duplicates_keep_older_direction() {
        let store = create_test_store();
        let forward = link(&store, "a", "b");
        link(&store, "b", "a");
        link(&store, "c", "d");

        let removed =
            all_pass(RelationshipPredicate::ReciprocalDuplicate { rel_type: None }, &store);
        assert_eq!(removed, 1);

        let remaining = store.relationships(None).unwrap();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().any(|r| r.id == Some(forward)));
    }

    #[test]
    fn test_predicate_respects_relationship_type() {
        let store = create_test_store();
        link(&store, "a", "a");
        store
            .save_relationship(&Relationship::new(
                NodeId::from_string("a"),
                NodeId::from_string("a"),
                "RELATED_TO",
            ))
            .unwrap();

        let removed = all_pass(
            RelationshipPredicate::SelfLoop {
                rel_type: Some("RELATED_TO".into()),
            },
            &store,
        );
        assert_eq!(removed, 1);
        assert_eq!(store.relationships(Some("MENTIONS")).unwrap().len(), 1);
    }

    #[test]
    fn test_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("graph.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.save_node(&category("c1", "AI")).unwrap();
            store.project_nodes("entities", CATEGORY_LABEL).unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.count_nodes(CATEGORY_LABEL).unwrap(), 1);
        // A projection left behind by an interrupted run is still there
        assert!(matches!(
            store.project_nodes("entities", CATEGORY_LABEL),
            Err(StorageError::AlreadyExists(_))
        ));
    }
}
