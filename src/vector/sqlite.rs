//! SQLite-backed vector store.
//!
//! Embeddings are stored as little-endian f32 BLOBs in their own database
//! file. Search is a brute-force cosine scan, which is fine for personal
//! knowledge bases in the tens of thousands of chunks.

use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension};

use super::{check_dimensions, cosine_similarity, VectorHit, VectorRecord, VectorStore};
use crate::error::{Error, Result};
use crate::model::SubjectKind;
use crate::storage::schema::apply_pragmas;
use crate::storage::sqlite::{json_column, parse_column};
use crate::storage::{blob_to_embedding, embedding_to_blob, DEFAULT_BUSY_TIMEOUT_MS};

const VECTOR_SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS vector_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS vectors (
    id TEXT PRIMARY KEY,
    subject_id TEXT NOT NULL,
    subject_kind TEXT NOT NULL,
    chunk_index INTEGER NOT NULL,
    content TEXT NOT NULL,
    embedding BLOB NOT NULL,
    dimensions INTEGER NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_vectors_subject ON vectors(subject_id, chunk_index);
";

/// Vector store over a dedicated SQLite file.
#[derive(Debug)]
pub struct SqliteVectorStore {
    conn: Connection,
    dimensions: usize,
}

impl SqliteVectorStore {
    /// Open (or create) a vector store with the configured dimensionality.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the file was created with a different dimension.
    pub fn open(path: &Path, dimensions: usize) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
        Self::init(conn, dimensions)
    }

    /// Open an in-memory store (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be applied.
    pub fn open_memory(dimensions: usize) -> Result<Self> {
        Self::init(Connection::open_in_memory()?, dimensions)
    }

    fn init(conn: Connection, dimensions: usize) -> Result<Self> {
        if dimensions == 0 {
            return Err(Error::Config("embedding dimensions must be positive".to_string()));
        }
        apply_pragmas(&conn)?;
        conn.execute_batch(VECTOR_SCHEMA_SQL)?;

        let stored: Option<String> = conn
            .query_row(
                "SELECT value FROM vector_meta WHERE key = 'dimensions'",
                [],
                |row| row.get(0),
            )
            .optional()?;

        match stored.and_then(|v| v.parse::<usize>().ok()) {
            Some(existing) if existing != dimensions => {
                return Err(Error::Config(format!(
                    "vector store holds {existing}-dimensional embeddings but {dimensions} are configured; \
                     run `kh ingest reindex --dimensions {dimensions}` to rebuild"
                )));
            }
            Some(_) => {}
            None => {
                conn.execute(
                    "INSERT INTO vector_meta (key, value) VALUES ('dimensions', ?1)",
                    [dimensions.to_string()],
                )?;
            }
        }

        Ok(Self { conn, dimensions })
    }

    /// Drop every vector and switch to a new dimensionality.
    ///
    /// # Errors
    ///
    /// Returns an error if the reset fails.
    pub fn reset_dimensions(&mut self, dimensions: usize) -> Result<usize> {
        if dimensions == 0 {
            return Err(Error::InvalidArgument("dimensions must be positive".to_string()));
        }
        let tx = self.conn.transaction()?;
        let removed = tx.execute("DELETE FROM vectors", [])?;
        tx.execute(
            "INSERT INTO vector_meta (key, value) VALUES ('dimensions', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [dimensions.to_string()],
        )?;
        tx.commit()?;
        self.dimensions = dimensions;
        Ok(removed)
    }
}

impl VectorStore for SqliteVectorStore {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn upsert(&mut self, records: &[VectorRecord]) -> Result<usize> {
        for record in records {
            check_dimensions(self.dimensions, &record.embedding)?;
        }

        let now = chrono::Utc::now().timestamp_millis();
        let tx = self.conn.transaction()?;
        for record in records {
            tx.execute(
                "INSERT INTO vectors (id, subject_id, subject_kind, chunk_index, content, embedding,
                                      dimensions, metadata, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(id) DO UPDATE SET
                   content = excluded.content,
                   embedding = excluded.embedding,
                   dimensions = excluded.dimensions,
                   metadata = excluded.metadata,
                   updated_at = excluded.updated_at",
                rusqlite::params![
                    record.id,
                    record.subject_id,
                    record.subject_kind.as_str(),
                    record.chunk_index,
                    record.content,
                    embedding_to_blob(&record.embedding),
                    record.embedding.len(),
                    record.metadata.to_string(),
                    now,
                ],
            )?;
        }
        tx.commit()?;
        Ok(records.len())
    }

    fn delete_beyond(&mut self, subject_id: &str, keep: usize) -> Result<usize> {
        Ok(self.conn.execute(
            "DELETE FROM vectors WHERE subject_id = ?1 AND chunk_index >= ?2",
            rusqlite::params![subject_id, keep],
        )?)
    }

    fn search(
        &self,
        query: &[f32],
        top_k: usize,
        kind: Option<SubjectKind>,
    ) -> Result<Vec<VectorHit>> {
        check_dimensions(self.dimensions, query)?;

        let mut stmt = self.conn.prepare(
            "SELECT subject_id, subject_kind, chunk_index, content, embedding, metadata
             FROM vectors WHERE (?1 IS NULL OR subject_kind = ?1)",
        )?;
        let rows = stmt.query_map([kind.map(|k| k.as_str())], |row| {
            let blob: Vec<u8> = row.get(4)?;
            Ok(VectorHit {
                subject_id: row.get(0)?,
                subject_kind: parse_column(row, 1)?,
                chunk_index: row.get(2)?,
                content: row.get(3)?,
                score: cosine_similarity(query, &blob_to_embedding(&blob)),
                metadata: json_column(row, 5)?,
            })
        })?;

        let mut hits = rows.collect::<std::result::Result<Vec<_>, _>>()?;
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.subject_id.cmp(&b.subject_id))
                .then_with(|| a.chunk_index.cmp(&b.chunk_index))
        });

        // Keep the best chunk per subject
        let mut seen = std::collections::HashSet::new();
        Ok(hits
            .into_iter()
            .filter(|hit| seen.insert(hit.subject_id.clone()))
            .take(top_k)
            .collect())
    }

    fn subject_records(&self, subject_id: &str) -> Result<Vec<VectorRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, subject_id, subject_kind, chunk_index, content, embedding, metadata
             FROM vectors WHERE subject_id = ?1 ORDER BY chunk_index ASC",
        )?;
        let rows = stmt.query_map([subject_id], |row| {
            let blob: Vec<u8> = row.get(5)?;
            Ok(VectorRecord {
                id: row.get(0)?,
                subject_id: row.get(1)?,
                subject_kind: parse_column(row, 2)?,
                chunk_index: row.get(3)?,
                content: row.get(4)?,
                embedding: blob_to_embedding(&blob),
                metadata: json_column(row, 6)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn subject_ids(&self) -> Result<Vec<(String, SubjectKind)>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT subject_id, subject_kind FROM vectors ORDER BY subject_id",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, parse_column(row, 1)?)))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn clear(&mut self, kind: Option<SubjectKind>) -> Result<usize> {
        Ok(self.conn.execute(
            "DELETE FROM vectors WHERE (?1 IS NULL OR subject_kind = ?1)",
            [kind.map(|k| k.as_str())],
        )?)
    }

    fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM vectors", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}
