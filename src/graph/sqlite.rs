//! SQLite-backed graph store.

use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, Row};

use super::{GraphCounts, GraphStore};
use crate::error::{Error, Result};
use crate::model::{Entity, EntityRelationship, GraphFilter, GraphResult};
use crate::storage::schema::apply_pragmas;
use crate::storage::DEFAULT_BUSY_TIMEOUT_MS;

const DEFAULT_QUERY_LIMIT: usize = 100;

const GRAPH_SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS entities (
    id TEXT PRIMARY KEY,
    source_subject_id TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    name TEXT NOT NULL,
    value TEXT NOT NULL,
    confidence REAL NOT NULL,
    updated_at INTEGER NOT NULL,
    UNIQUE(source_subject_id, entity_type, name, value)
);

CREATE INDEX IF NOT EXISTS idx_entities_type ON entities(entity_type);
CREATE INDEX IF NOT EXISTS idx_entities_subject ON entities(source_subject_id);

CREATE TABLE IF NOT EXISTS relationships (
    id TEXT PRIMARY KEY,
    source_entity_id TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
    target_entity_id TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
    relationship_type TEXT NOT NULL,
    confidence REAL NOT NULL,
    source_subject_id TEXT NOT NULL,
    updated_at INTEGER NOT NULL,
    UNIQUE(source_entity_id, target_entity_id, relationship_type)
);

CREATE INDEX IF NOT EXISTS idx_relationships_subject ON relationships(source_subject_id);
";

/// Graph store over a dedicated SQLite file.
#[derive(Debug)]
pub struct SqliteGraphStore {
    conn: Connection,
}

impl SqliteGraphStore {
    /// Open (or create) the graph database.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the schema applied.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
        Self::init(conn)
    }

    /// Open an in-memory graph (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be applied.
    pub fn open_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        apply_pragmas(&conn)?;
        conn.execute_batch(GRAPH_SCHEMA_SQL)?;
        Ok(Self { conn })
    }
}

impl GraphStore for SqliteGraphStore {
    fn upsert_entities(&mut self, entities: &[Entity]) -> Result<usize> {
        let now = chrono::Utc::now().timestamp_millis();
        let tx = self.conn.transaction()?;
        for entity in entities {
            tx.execute(
                "INSERT INTO entities (id, source_subject_id, entity_type, name, value, confidence, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(source_subject_id, entity_type, name, value) DO UPDATE SET
                   confidence = MAX(confidence, excluded.confidence),
                   updated_at = excluded.updated_at",
                rusqlite::params![
                    entity.id,
                    entity.source_subject_id,
                    entity.entity_type,
                    entity.name,
                    entity.value,
                    entity.confidence,
                    now,
                ],
            )?;
        }
        tx.commit()?;
        Ok(entities.len())
    }

    fn upsert_relationships(&mut self, relationships: &[EntityRelationship]) -> Result<usize> {
        let now = chrono::Utc::now().timestamp_millis();
        let tx = self.conn.transaction()?;
        for rel in relationships {
            if rel.source_entity_id == rel.target_entity_id {
                return Err(Error::InvalidArgument(format!(
                    "relationship {} links an entity to itself",
                    rel.id
                )));
            }
            tx.execute(
                "INSERT INTO relationships (id, source_entity_id, target_entity_id, relationship_type,
                                            confidence, source_subject_id, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(source_entity_id, target_entity_id, relationship_type) DO UPDATE SET
                   confidence = MAX(confidence, excluded.confidence),
                   updated_at = excluded.updated_at",
                rusqlite::params![
                    rel.id,
                    rel.source_entity_id,
                    rel.target_entity_id,
                    rel.relationship_type,
                    rel.confidence,
                    rel.source_subject_id,
                    now,
                ],
            )?;
        }
        tx.commit()?;
        Ok(relationships.len())
    }

    fn query(&self, filter: &GraphFilter) -> Result<GraphResult> {
        let limit = filter.limit.unwrap_or(DEFAULT_QUERY_LIMIT);
        let name_pattern = filter
            .name
            .as_deref()
            .map(|n| format!("%{}%", n.to_lowercase()));

        let mut stmt = self.conn.prepare(
            "SELECT id, source_subject_id, entity_type, name, value, confidence
             FROM entities
             WHERE (?1 IS NULL OR entity_type = ?1)
               AND (?2 IS NULL OR lower(name) LIKE ?2)
               AND (?3 IS NULL OR source_subject_id = ?3)
               AND (?4 IS NULL OR confidence >= ?4)
             ORDER BY confidence DESC, name ASC, id ASC
             LIMIT ?5",
        )?;
        let entities = stmt
            .query_map(
                rusqlite::params![
                    filter.entity_type,
                    name_pattern,
                    filter.source_subject_id,
                    filter.min_confidence,
                    i64::try_from(limit).unwrap_or(i64::MAX),
                ],
                map_entity,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let ids: std::collections::HashSet<&str> =
            entities.iter().map(|e| e.id.as_str()).collect();

        // Relationships whose both endpoints are in the result set
        let mut relationships = Vec::new();
        if !ids.is_empty() {
            let mut stmt = self.conn.prepare(
                "SELECT id, source_entity_id, target_entity_id, relationship_type, confidence, source_subject_id
                 FROM relationships
                 ORDER BY confidence DESC, id ASC",
            )?;
            let rows = stmt.query_map([], map_relationship)?;
            for row in rows {
                let rel = row?;
                if ids.contains(rel.source_entity_id.as_str())
                    && ids.contains(rel.target_entity_id.as_str())
                {
                    relationships.push(rel);
                }
            }
        }

        Ok(GraphResult {
            entities,
            relationships,
        })
    }

    fn delete_subject(&mut self, subject_id: &str) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let rels = tx.execute(
            "DELETE FROM relationships WHERE source_subject_id = ?1",
            [subject_id],
        )?;
        let ents = tx.execute(
            "DELETE FROM entities WHERE source_subject_id = ?1",
            [subject_id],
        )?;
        tx.commit()?;
        Ok(rels + ents)
    }

    fn subject_ids(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT source_subject_id FROM entities
             UNION
             SELECT source_subject_id FROM relationships
             ORDER BY 1",
        )?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn clear(&mut self) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let rels = tx.execute("DELETE FROM relationships", [])?;
        let ents = tx.execute("DELETE FROM entities", [])?;
        tx.commit()?;
        Ok(rels + ents)
    }

    fn counts(&self) -> Result<GraphCounts> {
        let (entities, relationships): (i64, i64) = self.conn.query_row(
            "SELECT (SELECT COUNT(*) FROM entities), (SELECT COUNT(*) FROM relationships)",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(GraphCounts {
            entities: usize::try_from(entities).unwrap_or(0),
            relationships: usize::try_from(relationships).unwrap_or(0),
        })
    }
}

fn map_entity(row: &Row<'_>) -> rusqlite::Result<Entity> {
    Ok(Entity {
        id: row.get(0)?,
        source_subject_id: row.get(1)?,
        entity_type: row.get(2)?,
        name: row.get(3)?,
        value: row.get(4)?,
        confidence: row.get(5)?,
    })
}

fn map_relationship(row: &Row<'_>) -> rusqlite::Result<EntityRelationship> {
    Ok(EntityRelationship {
        id: row.get(0)?,
        source_entity_id: row.get(1)?,
        target_entity_id: row.get(2)?,
        relationship_type: row.get(3)?,
        confidence: row.get(4)?,
        source_subject_id: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice_works_at_acme(subject: &str, confidence: f64) -> (Vec<Entity>, Vec<EntityRelationship>) {
        let alice = Entity::new(subject, "PERSON", "Alice", "Alice", confidence);
        let acme = Entity::new(subject, "ORG", "Acme", "Acme", confidence);
        let rel = EntityRelationship::new(&alice.id, &acme.id, "works_at", confidence, subject);
        (vec![alice, acme], vec![rel])
    }

    #[test]
    fn test_reprocessing_keeps_single_rows_with_max_confidence() {
        let mut graph = SqliteGraphStore::open_memory().unwrap();
        let (entities, rels) = alice_works_at_acme("doc_1", 0.9);
        graph.upsert_entities(&entities).unwrap();
        graph.upsert_relationships(&rels).unwrap();

        let (entities, rels) = alice_works_at_acme("doc_1", 0.5);
        graph.upsert_entities(&entities).unwrap();
        graph.upsert_relationships(&rels).unwrap();

        let counts = graph.counts().unwrap();
        assert_eq!(counts.entities, 2);
        assert_eq!(counts.relationships, 1);

        let result = graph.query(&GraphFilter::default()).unwrap();
        assert!(result.entities.iter().all(|e| (e.confidence - 0.9).abs() < 1e-9));
        assert_eq!(result.relationships.len(), 1);
    }

    #[test]
    fn test_query_filters_and_includes_only_internal_relationships() {
        let mut graph = SqliteGraphStore::open_memory().unwrap();
        let (entities, rels) = alice_works_at_acme("doc_1", 0.8);
        graph.upsert_entities(&entities).unwrap();
        graph.upsert_relationships(&rels).unwrap();

        let people = graph
            .query(&GraphFilter {
                entity_type: Some("PERSON".to_string()),
                ..GraphFilter::default()
            })
            .unwrap();
        assert_eq!(people.entities.len(), 1);
        assert_eq!(people.entities[0].name, "Alice");
        assert!(people.relationships.is_empty());

        let by_name = graph
            .query(&GraphFilter {
                name: Some("acm".to_string()),
                ..GraphFilter::default()
            })
            .unwrap();
        assert_eq!(by_name.entities.len(), 1);

        let too_confident = graph
            .query(&GraphFilter {
                min_confidence: Some(0.95),
                ..GraphFilter::default()
            })
            .unwrap();
        assert!(too_confident.entities.is_empty());
    }

    #[test]
    fn test_delete_subject_and_subject_ids() {
        let mut graph = SqliteGraphStore::open_memory().unwrap();
        for subject in ["doc_1", "int_2"] {
            let (entities, rels) = alice_works_at_acme(subject, 0.7);
            graph.upsert_entities(&entities).unwrap();
            graph.upsert_relationships(&rels).unwrap();
        }
        assert_eq!(graph.subject_ids().unwrap(), vec!["doc_1", "int_2"]);

        assert_eq!(graph.delete_subject("doc_1").unwrap(), 3);
        assert_eq!(graph.subject_ids().unwrap(), vec!["int_2"]);
        assert_eq!(graph.clear().unwrap(), 3);
        assert_eq!(graph.counts().unwrap().entities, 0);
    }
}
