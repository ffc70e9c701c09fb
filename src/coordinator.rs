//! Consistency between the relational store and its derived indexes.
//!
//! Vector and graph rows are keyed by ids traceable to a relational subject,
//! so either index can be dropped and regrown from the queue. Nothing here
//! writes derived rows directly; rebuilds go back through ingestion.

use serde::Serialize;

use crate::embeddings::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::extraction::EntityExtractor;
use crate::graph::{GraphCounts, GraphStore};
use crate::ingestion::Pipeline;
use crate::model::{GraphFilter, GraphResult, QueueStats, SessionStatus, SubjectKind};
use crate::storage::events::EventType;
use crate::storage::EnqueueOptions;
use crate::stores::{Stores, DIMENSIONS_META_KEY};
use crate::vector::{VectorHit, VectorStore};

#[derive(Debug, Clone, Default, Serialize)]
pub struct RebuildReport {
    pub vectors_removed: usize,
    pub entities_removed: usize,
    pub requeued: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReindexReport {
    pub previous_dimensions: Option<usize>,
    pub dimensions: usize,
    pub vectors_removed: usize,
    pub chunk_embeddings_cleared: usize,
    pub requeued: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PruneReport {
    pub vector_subjects: usize,
    pub graph_subjects: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RetentionReport {
    pub sessions: usize,
    pub interactions: usize,
    pub queue_items: usize,
    pub vectors: usize,
    pub entities: usize,
}

/// Snapshot for `kh status`.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStatus {
    pub sessions: Vec<(SessionStatus, usize)>,
    pub queue: QueueStats,
    pub dimensions: usize,
    pub vectors: usize,
    pub graph: GraphCounts,
}

/// Cross-store maintenance over one set of connections.
pub struct Coordinator<'a> {
    stores: &'a mut Stores,
    queue: EnqueueOptions,
    actor: &'a str,
}

impl<'a> Coordinator<'a> {
    pub fn new(stores: &'a mut Stores, queue: EnqueueOptions, actor: &'a str) -> Self {
        Self {
            stores,
            queue,
            actor,
        }
    }

    /// Drop derived rows for one kind (or all) and re-enqueue its subjects.
    ///
    /// # Errors
    ///
    /// Returns an error if any store write fails.
    pub fn rebuild(&mut self, kind: Option<SubjectKind>) -> Result<RebuildReport> {
        let vectors_removed = self.stores.vectors.clear(kind)?;

        let entities_removed = match kind {
            None => self.stores.graph.clear()?,
            Some(kind) => {
                let mut removed = 0;
                for subject_id in self.stores.graph.subject_ids()? {
                    if SubjectKind::from_id(&subject_id) == Some(kind) {
                        removed += self.stores.graph.delete_subject(&subject_id)?;
                    }
                }
                removed
            }
        };

        let requeued = self
            .stores
            .relational
            .requeue_all(kind, self.queue, self.actor)?;

        tracing::info!(
            kind = kind.map_or("all", |k| k.as_str()),
            vectors_removed,
            entities_removed,
            requeued,
            "Derived stores rebuilt"
        );
        Ok(RebuildReport {
            vectors_removed,
            entities_removed,
            requeued,
        })
    }

    /// Switch the embedding dimensionality and re-enqueue everything.
    ///
    /// Every vector is dropped first; both stores record the new value.
    /// The graph is left alone since extraction does not depend on it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for zero dimensions, or a store error.
    pub fn reindex(&mut self, dimensions: usize) -> Result<ReindexReport> {
        if dimensions == 0 {
            return Err(Error::InvalidArgument("dimensions must be positive".to_string()));
        }
        let previous = self
            .stores
            .relational
            .get_embedding_meta(DIMENSIONS_META_KEY)?
            .and_then(|v| v.parse::<usize>().ok());

        let vectors_removed = self.stores.vectors.reset_dimensions(dimensions)?;
        self.stores
            .relational
            .set_embedding_meta(DIMENSIONS_META_KEY, &dimensions.to_string())?;
        self.stores.relational.mutate("reindex", self.actor, |_, ctx| {
            ctx.record_change(
                "embeddings",
                DIMENSIONS_META_KEY,
                EventType::DimensionsChanged,
                previous.map(|d| d.to_string()),
                Some(dimensions.to_string()),
            );
            Ok(())
        })?;
        let chunk_embeddings_cleared = self.stores.relational.clear_chunk_embeddings()?;
        let requeued = self
            .stores
            .relational
            .requeue_all(None, self.queue, self.actor)?;

        tracing::info!(
            previous = ?previous,
            dimensions,
            vectors_removed,
            requeued,
            "Vector index reset for new dimensions"
        );
        Ok(ReindexReport {
            previous_dimensions: previous,
            dimensions,
            vectors_removed,
            chunk_embeddings_cleared,
            requeued,
        })
    }

    /// Delete derived rows whose subject no longer exists.
    ///
    /// # Errors
    ///
    /// Returns an error if any store read or delete fails.
    pub fn prune_orphans(&mut self) -> Result<PruneReport> {
        let mut report = PruneReport::default();

        for (subject_id, kind) in self.stores.vectors.subject_ids()? {
            if !self.stores.relational.subject_exists(&subject_id, kind)? {
                self.stores.vectors.delete_subject(&subject_id)?;
                report.vector_subjects += 1;
            }
        }

        for subject_id in self.stores.graph.subject_ids()? {
            let exists = match SubjectKind::from_id(&subject_id) {
                Some(kind) => self.stores.relational.subject_exists(&subject_id, kind)?,
                None => false,
            };
            if !exists {
                self.stores.graph.delete_subject(&subject_id)?;
                report.graph_subjects += 1;
            }
        }

        if report.vector_subjects + report.graph_subjects > 0 {
            tracing::info!(
                vector_subjects = report.vector_subjects,
                graph_subjects = report.graph_subjects,
                "Orphaned derived rows pruned"
            );
        }
        Ok(report)
    }

    /// Retention: delete sessions ended before `cutoff` (Unix millis) with
    /// their interactions, queue items and derived rows.
    ///
    /// # Errors
    ///
    /// Returns an error if any store write fails.
    pub fn purge_ended_before(&mut self, cutoff: i64) -> Result<RetentionReport> {
        let purged = self
            .stores
            .relational
            .purge_sessions_ended_before(cutoff, self.actor)?;

        let mut report = RetentionReport {
            sessions: purged.session_ids.len(),
            interactions: purged.interaction_ids.len(),
            queue_items: purged.queue_items,
            ..RetentionReport::default()
        };
        for interaction_id in &purged.interaction_ids {
            report.vectors += self.stores.vectors.delete_subject(interaction_id)?;
            report.entities += self.stores.graph.delete_subject(interaction_id)?;
        }

        tracing::info!(
            cutoff,
            sessions = report.sessions,
            interactions = report.interactions,
            "Ended sessions purged"
        );
        Ok(report)
    }

    /// # Errors
    ///
    /// Returns an error if any count query fails.
    pub fn status(&self) -> Result<StoreStatus> {
        Ok(StoreStatus {
            sessions: self.stores.relational.session_counts()?,
            queue: self.stores.relational.queue_stats()?,
            dimensions: self.stores.vectors.dimensions(),
            vectors: self.stores.vectors.count()?,
            graph: self.stores.graph.counts()?,
        })
    }
}

/// Embed `query` and return the `top_k` closest subjects.
///
/// # Errors
///
/// Returns `InvalidArgument` for an empty query, or the provider error.
pub async fn search_vector<P: EmbeddingProvider, E: EntityExtractor>(
    pipeline: &Pipeline<P, E>,
    stores: &Stores,
    query: &str,
    top_k: usize,
    kind: Option<SubjectKind>,
) -> Result<Vec<VectorHit>> {
    if query.trim().is_empty() {
        return Err(Error::InvalidArgument("search query is empty".to_string()));
    }
    let embedding = pipeline.embed_query(query).await?;
    stores.vectors.search(&embedding, top_k.max(1), kind)
}

/// Entities matching `filter` plus the relationships among them.
///
/// # Errors
///
/// Returns an error if the graph query fails.
pub fn graph_query(stores: &Stores, filter: &GraphFilter) -> Result<GraphResult> {
    stores.graph.query(filter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Entity, NewDocument};

    fn stores_with_document() -> (Stores, String) {
        let mut stores = Stores::open_memory(4).unwrap();
        let receipt = stores
            .relational
            .ingest_document(&NewDocument::new("a", "alpha beta"), EnqueueOptions::default(), "test")
            .unwrap();
        (stores, receipt.document_id)
    }

    fn vector(subject_id: &str, kind: SubjectKind) -> crate::vector::VectorRecord {
        crate::vector::VectorRecord {
            id: format!("{subject_id}:0"),
            subject_id: subject_id.to_string(),
            subject_kind: kind,
            chunk_index: 0,
            content: "alpha".to_string(),
            embedding: vec![1.0, 0.0, 0.0, 0.0],
            metadata: serde_json::json!({}),
        }
    }

    #[test]
    fn test_prune_removes_only_orphans() {
        let (mut stores, doc_id) = stores_with_document();
        stores
            .vectors
            .upsert(&[
                vector(&doc_id, SubjectKind::Document),
                vector("doc_gone", SubjectKind::Document),
            ])
            .unwrap();
        stores
            .graph
            .upsert_entities(&[
                Entity::new(&doc_id, "TERM", "alpha", "alpha", 0.8),
                Entity::new("doc_gone", "TERM", "beta", "beta", 0.8),
            ])
            .unwrap();

        let mut coordinator = Coordinator::new(&mut stores, EnqueueOptions::default(), "test");
        let report = coordinator.prune_orphans().unwrap();
        assert_eq!(report.vector_subjects, 1);
        assert_eq!(report.graph_subjects, 1);

        assert_eq!(stores.vectors.subject_ids().unwrap().len(), 1);
        assert_eq!(stores.graph.subject_ids().unwrap(), vec![doc_id]);
    }

    #[test]
    fn test_reindex_resets_vectors_and_meta() {
        let (mut stores, doc_id) = stores_with_document();
        stores
            .vectors
            .upsert(&[vector(&doc_id, SubjectKind::Document)])
            .unwrap();

        let mut coordinator = Coordinator::new(&mut stores, EnqueueOptions::default(), "test");
        let report = coordinator.reindex(8).unwrap();
        assert_eq!(report.previous_dimensions, Some(4));
        assert_eq!(report.vectors_removed, 1);
        assert!(report.requeued >= 1);

        assert_eq!(stores.vectors.dimensions(), 8);
        assert_eq!(
            stores.relational.get_embedding_meta(DIMENSIONS_META_KEY).unwrap().as_deref(),
            Some("8")
        );
        assert!(matches!(
            stores.vectors.upsert(&[vector(&doc_id, SubjectKind::Document)]).unwrap_err(),
            Error::DimensionMismatch { expected: 8, actual: 4 }
        ));
    }

    #[test]
    fn test_rebuild_by_kind_keeps_other_kind() {
        let (mut stores, doc_id) = stores_with_document();
        stores
            .vectors
            .upsert(&[
                vector(&doc_id, SubjectKind::Document),
                vector("int_1", SubjectKind::Interaction),
            ])
            .unwrap();

        let mut coordinator = Coordinator::new(&mut stores, EnqueueOptions::default(), "test");
        let report = coordinator.rebuild(Some(SubjectKind::Document)).unwrap();
        assert_eq!(report.vectors_removed, 1);
        assert_eq!(report.requeued, 1);
        assert_eq!(
            stores.vectors.subject_ids().unwrap(),
            vec![("int_1".to_string(), SubjectKind::Interaction)]
        );
    }
}
