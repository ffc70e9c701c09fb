//! Vector store: nearest-neighbour index over chunk embeddings.
//!
//! The vector store is derived data. Every record id is traceable to a
//! relational subject (`{subject_id}:{chunk_index}`), so the whole index can
//! be dropped and rebuilt from the queue.
//!
//! # Submodules
//!
//! - [`sqlite`] - SQLite BLOB implementation with brute-force cosine search

pub mod sqlite;

pub use sqlite::SqliteVectorStore;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::SubjectKind;

/// One stored embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    /// `{subject_id}:{chunk_index}`.
    pub id: String,
    pub subject_id: String,
    pub subject_kind: SubjectKind,
    pub chunk_index: usize,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: serde_json::Value,
}

/// A search hit, one per subject (best chunk wins).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorHit {
    pub subject_id: String,
    pub subject_kind: SubjectKind,
    pub chunk_index: usize,
    pub content: String,
    pub score: f32,
    pub metadata: serde_json::Value,
}

/// Storage seam for embeddings.
///
/// Implementations own their configured dimensionality and must refuse
/// records of any other length.
pub trait VectorStore {
    /// Configured embedding dimensionality.
    fn dimensions(&self) -> usize;

    /// Insert or overwrite records by id.
    ///
    /// # Errors
    ///
    /// Returns `DimensionMismatch` before writing anything if any record
    /// has the wrong length.
    fn upsert(&mut self, records: &[VectorRecord]) -> Result<usize>;

    /// Delete a subject's records with `chunk_index >= keep`.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    fn delete_beyond(&mut self, subject_id: &str, keep: usize) -> Result<usize>;

    /// Delete every record of a subject.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    fn delete_subject(&mut self, subject_id: &str) -> Result<usize> {
        self.delete_beyond(subject_id, 0)
    }

    /// Top `top_k` subjects by cosine similarity to `query`.
    ///
    /// # Errors
    ///
    /// Returns `DimensionMismatch` for a query of the wrong length.
    fn search(&self, query: &[f32], top_k: usize, kind: Option<SubjectKind>)
        -> Result<Vec<VectorHit>>;

    /// Records stored for one subject, in chunk order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn subject_records(&self, subject_id: &str) -> Result<Vec<VectorRecord>>;

    /// Distinct subjects with at least one record.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn subject_ids(&self) -> Result<Vec<(String, SubjectKind)>>;

    /// Drop all records, or all of one kind.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    fn clear(&mut self, kind: Option<SubjectKind>) -> Result<usize>;

    /// Total stored records.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn count(&self) -> Result<usize>;
}

/// Reject a vector whose length differs from the configured dimension.
///
/// # Errors
///
/// Returns `DimensionMismatch`.
pub fn check_dimensions(expected: usize, embedding: &[f32]) -> Result<()> {
    if embedding.len() == expected {
        Ok(())
    } else {
        Err(Error::DimensionMismatch {
            expected,
            actual: embedding.len(),
        })
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns a value between -1.0 and 1.0; 0.0 for empty, mismatched or
/// zero-magnitude inputs.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot_product = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;

    for (x, y) in a.iter().zip(b.iter()) {
        dot_product += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let magnitude = (norm_a * norm_b).sqrt();
    if magnitude == 0.0 {
        0.0
    } else {
        dot_product / magnitude
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_check_dimensions() {
        assert!(check_dimensions(3, &[0.0; 3]).is_ok());
        let err = check_dimensions(3, &[0.0; 4]).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 3, actual: 4 }));
    }
}
