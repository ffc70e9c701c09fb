//! Document and chunk storage.

use crate::error::{Error, Result};
use crate::model::{
    chunk_id, new_id, Chunk, Document, DocumentReceipt, NewDocument, SubjectKind,
};
use crate::storage::events::EventType;
use crate::storage::queue::{enqueue_in_tx, EnqueueOptions};
use crate::storage::sqlite::{json_column, SqliteStorage};
use rusqlite::{OptionalExtension, Row};

/// A chunk about to be written for a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRecord {
    pub chunk_index: usize,
    pub content: String,
    pub start_offset: usize,
    pub end_offset: usize,
}

/// Text handed to the ingestion pipeline for one subject.
#[derive(Debug, Clone)]
pub struct SubjectText {
    pub subject_id: String,
    pub kind: SubjectKind,
    pub text: String,
    /// Carried into each vector record's metadata.
    pub metadata: serde_json::Value,
}

const DOCUMENT_COLUMNS: &str =
    "id, title, content, content_hash, project, tags, metadata, created_at";

/// Encode an embedding as a little-endian f32 BLOB.
#[must_use]
pub fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Decode a little-endian f32 BLOB.
#[must_use]
pub fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|bytes| f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        .collect()
}

impl SqliteStorage {
    /// Store a document (deduplicated by content hash) and enqueue it.
    ///
    /// Identical content returns the existing document with
    /// `duplicate = true`; its queue row is left as it is unless missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn ingest_document(
        &mut self,
        document: &NewDocument,
        options: EnqueueOptions,
        actor: &str,
    ) -> Result<DocumentReceipt> {
        if document.content.trim().is_empty() {
            return Err(Error::InvalidArgument("document content is empty".to_string()));
        }

        let now = chrono::Utc::now().timestamp_millis();
        let hash = document.content_hash();
        let id = new_id("doc");

        self.mutate("ingest_document", actor, |tx, ctx| {
            let inserted = tx.execute(
                "INSERT INTO documents (id, title, content, content_hash, project, tags, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(content_hash) DO NOTHING",
                rusqlite::params![
                    id,
                    document.title,
                    document.content,
                    hash,
                    document.project,
                    serde_json::to_string(&document.tags)?,
                    document
                        .metadata
                        .clone()
                        .unwrap_or_else(|| serde_json::json!({}))
                        .to_string(),
                    now,
                ],
            )?;

            let document_id: String = tx.query_row(
                "SELECT id FROM documents WHERE content_hash = ?1",
                [&hash],
                |row| row.get(0),
            )?;

            let existing_item: Option<String> = tx
                .query_row(
                    "SELECT id FROM processing_queue WHERE subject_kind = 'document' AND subject_id = ?1",
                    [&document_id],
                    |row| row.get(0),
                )
                .optional()?;

            let queue_item_id = match existing_item {
                Some(item_id) if inserted == 0 => item_id,
                _ => enqueue_in_tx(tx, &document_id, SubjectKind::Document, None, options, now)?.id,
            };

            if inserted > 0 {
                ctx.record_comment("document", &document_id, EventType::DocumentIngested, &document.title);
            }

            Ok(DocumentReceipt {
                document_id,
                queue_item_id,
                duplicate: inserted == 0,
            })
        })
    }

    /// Get a document by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let sql = format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?1");
        Ok(self.conn.query_row(&sql, [id], map_document).optional()?)
    }

    /// List documents, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_documents(&self, project: Option<&str>, limit: u32) -> Result<Vec<Document>> {
        let sql = format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents
             WHERE (?1 IS NULL OR project = ?1)
             ORDER BY created_at DESC, id DESC
             LIMIT ?2"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params![project, limit], map_document)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    /// Replace a document's chunk rows.
    ///
    /// Upserts by (document_id, chunk_index) and drops any higher indexes
    /// left over from an earlier, longer chunking. Embeddings of chunks
    /// whose text changed are cleared.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn replace_chunks(&mut self, document_id: &str, chunks: &[ChunkRecord]) -> Result<()> {
        self.mutate("replace_chunks", "pipeline", |tx, _ctx| {
            for chunk in chunks {
                tx.execute(
                    "INSERT INTO chunks (id, document_id, chunk_index, content, start_offset, end_offset, metadata)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, '{}')
                     ON CONFLICT(document_id, chunk_index) DO UPDATE SET
                       content = excluded.content,
                       start_offset = excluded.start_offset,
                       end_offset = excluded.end_offset,
                       embedding = CASE WHEN chunks.content = excluded.content
                                        THEN chunks.embedding ELSE NULL END",
                    rusqlite::params![
                        chunk_id(document_id, chunk.chunk_index),
                        document_id,
                        chunk.chunk_index,
                        chunk.content,
                        chunk.start_offset,
                        chunk.end_offset,
                    ],
                )?;
            }
            tx.execute(
                "DELETE FROM chunks WHERE document_id = ?1 AND chunk_index >= ?2",
                rusqlite::params![document_id, chunks.len()],
            )?;
            Ok(())
        })
    }

    /// Store embeddings on a document's chunk rows, in index order.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn set_chunk_embeddings(&mut self, document_id: &str, embeddings: &[Vec<f32>]) -> Result<()> {
        self.mutate("set_chunk_embeddings", "pipeline", |tx, _ctx| {
            for (index, embedding) in embeddings.iter().enumerate() {
                tx.execute(
                    "UPDATE chunks SET embedding = ?1 WHERE document_id = ?2 AND chunk_index = ?3",
                    rusqlite::params![embedding_to_blob(embedding), document_id, index],
                )?;
            }
            Ok(())
        })
    }

    /// Chunks of a document in index order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_chunks(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, document_id, chunk_index, content, start_offset, end_offset, embedding, metadata
             FROM chunks WHERE document_id = ?1 ORDER BY chunk_index ASC",
        )?;
        let rows = stmt.query_map([document_id], |row| {
            let blob: Option<Vec<u8>> = row.get(6)?;
            Ok(Chunk {
                id: row.get(0)?,
                document_id: row.get(1)?,
                chunk_index: row.get(2)?,
                content: row.get(3)?,
                start_offset: row.get(4)?,
                end_offset: row.get(5)?,
                embedding: blob.as_deref().map(blob_to_embedding),
                metadata: json_column(row, 7)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    /// Load the text to ingest for a subject.
    ///
    /// The text is the stored body so chunk offsets index into it. A document's
    /// title travels in the metadata instead.
    ///
    /// # Errors
    ///
    /// Returns `SubjectNotFound` if the subject no longer exists.
    pub fn subject_text(&self, subject_id: &str, kind: SubjectKind) -> Result<SubjectText> {
        let found = match kind {
            SubjectKind::Document => self
                .conn
                .query_row(
                    "SELECT title, content, project FROM documents WHERE id = ?1",
                    [subject_id],
                    |row| {
                        let title: String = row.get(0)?;
                        let content: String = row.get(1)?;
                        let project: Option<String> = row.get(2)?;
                        Ok((
                            content,
                            serde_json::json!({"title": title, "project": project}),
                        ))
                    },
                )
                .optional()?,
            SubjectKind::Interaction => self
                .conn
                .query_row(
                    "SELECT i.content, i.kind, i.session_id, s.project
                     FROM interactions i JOIN sessions s ON s.id = i.session_id
                     WHERE i.id = ?1",
                    [subject_id],
                    |row| {
                        let content: String = row.get(0)?;
                        let kind: String = row.get(1)?;
                        let session_id: String = row.get(2)?;
                        let project: String = row.get(3)?;
                        Ok((
                            content,
                            serde_json::json!({
                                "interaction_kind": kind,
                                "session_id": session_id,
                                "project": project,
                            }),
                        ))
                    },
                )
                .optional()?,
        };

        let (text, metadata) = found.ok_or_else(|| Error::SubjectNotFound {
            kind: kind.as_str().to_string(),
            id: subject_id.to_string(),
        })?;

        Ok(SubjectText {
            subject_id: subject_id.to_string(),
            kind,
            text,
            metadata,
        })
    }

    /// Whether a subject still exists in the relational store.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn subject_exists(&self, subject_id: &str, kind: SubjectKind) -> Result<bool> {
        crate::storage::queue::subject_exists(&self.conn, subject_id, kind)
    }

    /// Clear stored chunk embeddings (all documents).
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn clear_chunk_embeddings(&mut self) -> Result<usize> {
        Ok(self
            .conn
            .execute("UPDATE chunks SET embedding = NULL WHERE embedding IS NOT NULL", [])?)
    }
}

fn map_document(row: &Row<'_>) -> rusqlite::Result<Document> {
    let tags: String = row.get(5)?;
    Ok(Document {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        content_hash: row.get(3)?,
        project: row.get(4)?,
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        metadata: json_column(row, 6)?,
        created_at: row.get(7)?,
    })
}
