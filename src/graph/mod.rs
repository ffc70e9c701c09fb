//! Graph store: entities and relationships extracted from subjects.
//!
//! Like the vector store, the graph is derived data. Entities carry the id of
//! the subject they were extracted from, and natural-key upserts make
//! re-processing a subject a no-op apart from confidence bumps.

pub mod sqlite;

pub use sqlite::SqliteGraphStore;

use crate::error::Result;
use crate::model::{Entity, EntityRelationship, GraphFilter, GraphResult};

/// Counts reported by `kh status`.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct GraphCounts {
    pub entities: usize,
    pub relationships: usize,
}

/// Storage seam for the entity graph.
pub trait GraphStore {
    /// Upsert entities by natural key, keeping the higher confidence.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn upsert_entities(&mut self, entities: &[Entity]) -> Result<usize>;

    /// Upsert relationships by natural key, keeping the higher confidence.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn upsert_relationships(&mut self, relationships: &[EntityRelationship]) -> Result<usize>;

    /// Entities matching `filter` plus the relationships among them.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn query(&self, filter: &GraphFilter) -> Result<GraphResult>;

    /// Remove everything extracted from one subject.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    fn delete_subject(&mut self, subject_id: &str) -> Result<usize>;

    /// Distinct source subjects present in the graph.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn subject_ids(&self) -> Result<Vec<String>>;

    /// Drop the whole graph.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    fn clear(&mut self) -> Result<usize>;

    /// Entity and relationship counts.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn counts(&self) -> Result<GraphCounts>;
}
