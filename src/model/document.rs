//! Document and chunk models.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A stored document. `content_hash` is the dedup key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub content: String,
    pub content_hash: String,
    pub project: Option<String>,
    pub tags: Vec<String>,
    pub metadata: serde_json::Value,
    pub created_at: i64,
}

/// A new document handed to `ingest_document`.
#[derive(Debug, Clone, Default)]
pub struct NewDocument {
    pub title: String,
    pub content: String,
    pub project: Option<String>,
    pub tags: Vec<String>,
    pub metadata: Option<serde_json::Value>,
}

impl NewDocument {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    #[must_use]
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// SHA-256 of the content, hex encoded.
    #[must_use]
    pub fn content_hash(&self) -> String {
        content_hash(&self.content)
    }
}

/// Result of ingesting a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentReceipt {
    pub document_id: String,
    pub queue_item_id: String,
    /// True when identical content was already stored.
    pub duplicate: bool,
}

/// A chunk of a document. `chunk_index` is 0-based and contiguous.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub content: String,
    pub start_offset: i64,
    pub end_offset: i64,
    pub embedding: Option<Vec<f32>>,
    pub metadata: serde_json::Value,
}

/// Deterministic chunk/vector id for a subject and index.
#[must_use]
pub fn chunk_id(subject_id: &str, chunk_index: usize) -> String {
    format!("{subject_id}:{chunk_index}")
}

/// SHA-256 hex digest of text content.
#[must_use]
pub fn content_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
