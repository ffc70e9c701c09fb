//! Per-item processing: chunk, embed, index, extract.
//!
//! ```text
//! claim ─▶ subject text ─▶ chunk ─▶ embed (timeout) ─▶ check dims
//!                                                        │
//!   complete ◀─ graph upsert ◀─ extract (timeout) ◀─ vector upsert + chunk rows
//! ```
//!
//! Any error ends the attempt. Transient errors schedule a retry through
//! `next_attempt_at`; everything else is recorded as a permanent failure.

use std::future::Future;
use std::time::{Duration, Instant};

use serde::Serialize;

use super::retry::RetryPolicy;
use crate::config::KhConfig;
use crate::embeddings::{chunk_text, resolve_dimensions, ChunkConfig, EmbeddingProvider, TextChunk};
use crate::error::{Error, Result};
use crate::extraction::EntityExtractor;
use crate::graph::GraphStore;
use crate::model::document::chunk_id;
use crate::model::{now_millis, QueueItem, QueueStatus, SubjectKind};
use crate::storage::{ChunkRecord, SubjectText, SweepReport};
use crate::stores::Stores;
use crate::vector::{check_dimensions, VectorRecord, VectorStore};

/// Knobs for a [`Pipeline`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Required length of every embedding.
    pub dimensions: usize,
    /// Bound on each provider and extractor call.
    pub provider_timeout: Duration,
    pub chunking: ChunkConfig,
    pub retry: RetryPolicy,
    pub min_confidence: f64,
    pub max_entities: usize,
    /// Processing items older than this are reclaimed by the sweeper.
    pub stale_after: Duration,
}

impl PipelineConfig {
    /// Build from loaded configuration, sizing chunks for `provider`.
    #[must_use]
    pub fn from_config<P: EmbeddingProvider>(config: &KhConfig, provider: &P) -> Self {
        Self {
            dimensions: resolve_dimensions(&config.embeddings),
            provider_timeout: config.ingestion.provider_timeout(),
            chunking: ChunkConfig::for_provider(&provider.info(), &config.embeddings),
            retry: RetryPolicy::from(&config.ingestion),
            min_confidence: config.extraction.min_confidence,
            max_entities: config.extraction.max_entities,
            stale_after: config.ingestion.stale_after(),
        }
    }
}

/// What happened to one queue item.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessOutcome {
    pub queue_item_id: String,
    pub subject_id: String,
    pub subject_kind: SubjectKind,
    pub status: QueueStatus,
    pub attempts: u32,
    pub chunks: usize,
    pub entities: usize,
    pub relationships: usize,
    pub error: Option<String>,
    /// Set when a failure will be retried automatically.
    pub retryable: bool,
}

/// Totals from a [`Pipeline::drain`] run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DrainReport {
    pub processed: usize,
    pub completed: usize,
    pub failed: usize,
    /// Failures scheduled for automatic retry.
    pub retry_scheduled: usize,
    pub swept: SweepReport,
}

#[derive(Debug, Default)]
struct IngestStats {
    chunks: usize,
    entities: usize,
    relationships: usize,
}

/// Ingestion pipeline over one embedding provider and one extractor.
///
/// Holds no connections: each caller passes its own [`Stores`], so one
/// pipeline can be shared by every worker behind an `Arc`.
#[derive(Debug)]
pub struct Pipeline<P, E> {
    provider: P,
    extractor: E,
    config: PipelineConfig,
}

impl<P: EmbeddingProvider, E: EntityExtractor> Pipeline<P, E> {
    pub fn new(provider: P, extractor: E, config: PipelineConfig) -> Self {
        Self {
            provider,
            extractor,
            config: PipelineConfig {
                chunking: config.chunking.normalized(),
                ..config
            },
        }
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[must_use]
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Claim the next due item and process it.
    ///
    /// Returns `Ok(None)` when nothing is pending.
    ///
    /// # Errors
    ///
    /// Returns an error only if the queue itself cannot be read or
    /// updated; processing failures are recorded on the item.
    pub async fn process_next(
        &self,
        stores: &mut Stores,
        worker_id: &str,
    ) -> Result<Option<ProcessOutcome>> {
        let Some(item) = stores.relational.claim_next(worker_id)? else {
            return Ok(None);
        };
        self.process_claimed(stores, &item, worker_id).await.map(Some)
    }

    /// Process an item this worker has already claimed.
    ///
    /// # Errors
    ///
    /// Returns an error only if the completion or failure cannot be
    /// written back to the queue.
    pub async fn process_claimed(
        &self,
        stores: &mut Stores,
        item: &QueueItem,
        worker_id: &str,
    ) -> Result<ProcessOutcome> {
        let started = Instant::now();
        tracing::debug!(
            item = %item.id,
            subject = %item.subject_id,
            kind = item.subject_kind.as_str(),
            attempt = item.attempts,
            worker = worker_id,
            "Processing queue item"
        );

        let mut outcome = ProcessOutcome {
            queue_item_id: item.id.clone(),
            subject_id: item.subject_id.clone(),
            subject_kind: item.subject_kind,
            status: QueueStatus::Completed,
            attempts: item.attempts,
            chunks: 0,
            entities: 0,
            relationships: 0,
            error: None,
            retryable: false,
        };

        match self.ingest(stores, item).await {
            Ok(stats) => {
                outcome.chunks = stats.chunks;
                outcome.entities = stats.entities;
                outcome.relationships = stats.relationships;

                if stores.relational.complete_item(&item.id, worker_id)? {
                    tracing::info!(
                        item = %item.id,
                        subject = %item.subject_id,
                        attempt = item.attempts,
                        chunks = stats.chunks,
                        entities = stats.entities,
                        elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                        "Queue item completed"
                    );
                } else {
                    // Swept as stale while we worked; the re-run will overwrite
                    // the same keys.
                    tracing::warn!(item = %item.id, worker = worker_id, "Queue item no longer held");
                    outcome.status = current_status(stores, &item.id)?;
                }
            }
            Err(err) => {
                let transient = err.is_transient();
                let message = err.to_string();
                let next_attempt_at = self.config.retry.next_attempt_at(item.attempts, now_millis());

                outcome.error = Some(message.clone());
                match stores
                    .relational
                    .fail_item(&item.id, &message, transient, next_attempt_at, worker_id)?
                {
                    Some(failed) => {
                        outcome.status = failed.status;
                        outcome.retryable = failed.retryable;
                        tracing::warn!(
                            item = %item.id,
                            subject = %item.subject_id,
                            attempt = failed.attempts,
                            max_attempts = failed.max_attempts,
                            retryable = failed.retryable,
                            code = err.error_code().as_str(),
                            error = %message,
                            "Queue item failed"
                        );
                    }
                    None => {
                        tracing::warn!(item = %item.id, worker = worker_id, "Queue item no longer held");
                        outcome.status = current_status(stores, &item.id)?;
                    }
                }
            }
        }

        Ok(outcome)
    }

    /// Sweep, then process until nothing is due.
    ///
    /// Items failing transiently are scheduled in the future, so the loop
    /// always terminates. `limit` caps the number of items processed.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be read or updated.
    pub async fn drain(
        &self,
        stores: &mut Stores,
        worker_id: &str,
        limit: Option<usize>,
    ) -> Result<DrainReport> {
        let mut report = DrainReport {
            swept: self.sweep(stores, worker_id)?,
            ..DrainReport::default()
        };

        while limit.is_none_or(|max| report.processed < max) {
            let Some(outcome) = self.process_next(stores, worker_id).await? else {
                break;
            };
            report.processed += 1;
            match outcome.status {
                QueueStatus::Completed => report.completed += 1,
                QueueStatus::Failed => {
                    report.failed += 1;
                    if outcome.retryable {
                        report.retry_scheduled += 1;
                    }
                }
                QueueStatus::Pending | QueueStatus::Processing => {}
            }
        }

        tracing::info!(
            processed = report.processed,
            completed = report.completed,
            failed = report.failed,
            "Drain finished"
        );
        Ok(report)
    }

    /// Requeue due retries and reclaim items stuck in processing.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue update fails.
    pub fn sweep(&self, stores: &mut Stores, actor: &str) -> Result<SweepReport> {
        let stale_ms = i64::try_from(self.config.stale_after.as_millis()).unwrap_or(i64::MAX);
        let report = stores
            .relational
            .sweep(now_millis().saturating_sub(stale_ms), actor)?;
        if report.total() > 0 {
            tracing::info!(
                requeued = report.requeued,
                reclaimed = report.reclaimed,
                exhausted = report.exhausted,
                "Queue swept"
            );
        }
        Ok(report)
    }

    /// Embed a free-text query for vector search.
    ///
    /// # Errors
    ///
    /// Returns the provider error, `Timeout`, or `DimensionMismatch`.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let embedding = with_timeout(
            "query embedding",
            self.config.provider_timeout,
            self.provider.generate_embedding(text),
        )
        .await?;
        check_dimensions(self.config.dimensions, &embedding)?;
        Ok(embedding)
    }

    async fn ingest(&self, stores: &mut Stores, item: &QueueItem) -> Result<IngestStats> {
        let subject = stores
            .relational
            .subject_text(&item.subject_id, item.subject_kind)?;
        if subject.text.trim().is_empty() {
            return Err(Error::PermanentProcessing(format!(
                "{} {} has no content",
                item.subject_kind.as_str(),
                item.subject_id
            )));
        }

        let chunks = chunk_text(&subject.text, &self.config.chunking);
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();

        let embeddings = with_timeout(
            "embedding",
            self.config.provider_timeout,
            self.provider.generate_embeddings(&texts),
        )
        .await?;

        if embeddings.len() != chunks.len() {
            return Err(Error::PermanentProcessing(format!(
                "provider returned {} embeddings for {} chunks",
                embeddings.len(),
                chunks.len()
            )));
        }
        // Nothing is written until every vector passes.
        for embedding in &embeddings {
            check_dimensions(self.config.dimensions, embedding)?;
        }

        let records = vector_records(&subject, &chunks, &embeddings);
        stores.vectors.upsert(&records)?;
        stores.vectors.delete_beyond(&subject.subject_id, chunks.len())?;

        if subject.kind == SubjectKind::Document {
            let rows: Vec<ChunkRecord> = chunks
                .iter()
                .map(|c| ChunkRecord {
                    chunk_index: c.index,
                    content: c.text.clone(),
                    start_offset: c.start_offset,
                    end_offset: c.end_offset,
                })
                .collect();
            stores.relational.replace_chunks(&subject.subject_id, &rows)?;
            stores
                .relational
                .set_chunk_embeddings(&subject.subject_id, &embeddings)?;
        }

        let extraction = with_timeout(
            "entity extraction",
            self.config.provider_timeout,
            self.extractor.extract(&subject.text),
        )
        .await?;
        let (entities, relationships) = extraction.into_graph(
            &subject.subject_id,
            self.config.min_confidence,
            self.config.max_entities,
        );
        stores.graph.upsert_entities(&entities)?;
        stores.graph.upsert_relationships(&relationships)?;

        Ok(IngestStats {
            chunks: chunks.len(),
            entities: entities.len(),
            relationships: relationships.len(),
        })
    }
}

fn vector_records(
    subject: &SubjectText,
    chunks: &[TextChunk],
    embeddings: &[Vec<f32>],
) -> Vec<VectorRecord> {
    chunks
        .iter()
        .zip(embeddings)
        .map(|(chunk, embedding)| {
            let mut metadata = subject.metadata.clone();
            if let Some(map) = metadata.as_object_mut() {
                map.insert("start_offset".to_string(), chunk.start_offset.into());
                map.insert("end_offset".to_string(), chunk.end_offset.into());
            }
            VectorRecord {
                id: chunk_id(&subject.subject_id, chunk.index),
                subject_id: subject.subject_id.clone(),
                subject_kind: subject.kind,
                chunk_index: chunk.index,
                content: chunk.text.clone(),
                embedding: embedding.clone(),
                metadata,
            }
        })
        .collect()
}

fn current_status(stores: &Stores, queue_item_id: &str) -> Result<QueueStatus> {
    Ok(stores
        .relational
        .get_queue_item(queue_item_id)?
        .map_or(QueueStatus::Pending, |item| item.status))
}

/// Run `fut` under `limit`, mapping expiry to `Error::Timeout`.
async fn with_timeout<T>(
    operation: &str,
    limit: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    let started = Instant::now();
    tokio::time::timeout(limit, fut)
        .await
        .unwrap_or_else(|_| {
            Err(Error::Timeout {
                operation: operation.to_string(),
                elapsed: started.elapsed(),
            })
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::ProviderInfo;
    use crate::extraction::{ExtractedEntity, Extraction, RuleBasedExtractor};
    use crate::model::{GraphFilter, NewDocument};
    use crate::storage::EnqueueOptions;
    use std::sync::atomic::{AtomicU32, Ordering};

    const DIMS: usize = 4;

    /// Fails the first `failures` batches, then embeds by text length.
    struct Scripted {
        failures: u32,
        calls: AtomicU32,
        dims: usize,
    }

    impl Scripted {
        fn new(failures: u32, dims: usize) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
                dims,
            }
        }
    }

    impl EmbeddingProvider for Scripted {
        fn info(&self) -> ProviderInfo {
            ProviderInfo {
                name: "scripted".to_string(),
                model: "test".to_string(),
                dimensions: self.dims,
                max_chars: 2000,
            }
        }

        async fn is_available(&self) -> bool {
            true
        }

        async fn generate_embedding(&self, text: &str) -> Result<Vec<f32>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(Error::TransientProvider("503 from scripted provider".to_string()));
            }
            let seed = text.len() as f32;
            Ok((0..self.dims).map(|i| seed + i as f32).collect())
        }

        async fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(Error::TransientProvider("503 from scripted provider".to_string()));
            }
            Ok(texts
                .iter()
                .map(|t| (0..self.dims).map(|i| t.len() as f32 + i as f32).collect())
                .collect())
        }
    }

    struct Fixed(Extraction);

    impl EntityExtractor for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn extract(&self, _text: &str) -> Result<Extraction> {
            Ok(self.0.clone())
        }
    }

    fn config(dimensions: usize) -> PipelineConfig {
        PipelineConfig {
            dimensions,
            provider_timeout: Duration::from_secs(5),
            chunking: ChunkConfig {
                max_chars: 40,
                overlap: 5,
                min_chunk_size: 5,
            },
            retry: RetryPolicy {
                base_delay: Duration::ZERO,
                multiplier: 2.0,
                max_delay: Duration::ZERO,
                jitter: 0.0,
            },
            min_confidence: 0.3,
            max_entities: 64,
            stale_after: Duration::from_secs(600),
        }
    }

    fn add_document(stores: &mut Stores, content: &str) -> String {
        stores
            .relational
            .ingest_document(&NewDocument::new("notes", content), EnqueueOptions::default(), "test")
            .unwrap()
            .document_id
    }

    const BODY: &str = "Alice Smith works at Acme Corp. The VectorStore depends on SQLite for storage.";

    #[tokio::test]
    async fn test_document_is_chunked_embedded_and_extracted() {
        let mut stores = Stores::open_memory(DIMS).unwrap();
        let doc_id = add_document(&mut stores, BODY);
        let pipeline = Pipeline::new(Scripted::new(0, DIMS), RuleBasedExtractor::new(), config(DIMS));

        let outcome = pipeline.process_next(&mut stores, "w1").await.unwrap().unwrap();
        assert_eq!(outcome.status, QueueStatus::Completed);
        assert!(outcome.chunks > 1);
        assert!(outcome.entities > 0);

        let chunks = stores.relational.get_chunks(&doc_id).unwrap();
        assert_eq!(chunks.len(), outcome.chunks);
        assert!(chunks.iter().all(|c| c.embedding.as_ref().is_some_and(|e| e.len() == DIMS)));
        assert_eq!(stores.vectors.subject_records(&doc_id).unwrap().len(), outcome.chunks);

        assert!(pipeline.process_next(&mut stores, "w1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transient_failures_retry_until_completed() {
        let mut stores = Stores::open_memory(DIMS).unwrap();
        let doc_id = add_document(&mut stores, BODY);
        let pipeline = Pipeline::new(Scripted::new(2, DIMS), RuleBasedExtractor::new(), config(DIMS));

        let first = pipeline.process_next(&mut stores, "w1").await.unwrap().unwrap();
        assert_eq!(first.status, QueueStatus::Failed);
        assert!(first.retryable);

        let report = pipeline.drain(&mut stores, "w1", None).await.unwrap();
        assert_eq!(report.swept.requeued, 1);
        assert_eq!(report.failed, 1);

        let report = pipeline.drain(&mut stores, "w1", None).await.unwrap();
        assert_eq!(report.completed, 1);

        let item = stores.relational.get_queue_item_by_subject(&doc_id).unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Completed);
        assert_eq!(item.attempts, 3);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_permanent_and_writes_nothing() {
        let mut stores = Stores::open_memory(DIMS).unwrap();
        let doc_id = add_document(&mut stores, BODY);
        let pipeline = Pipeline::new(Scripted::new(0, 3), RuleBasedExtractor::new(), config(DIMS));

        let outcome = pipeline.process_next(&mut stores, "w1").await.unwrap().unwrap();
        assert_eq!(outcome.status, QueueStatus::Failed);
        assert!(!outcome.retryable);
        assert!(outcome.error.unwrap().contains("dimension"));

        assert_eq!(stores.vectors.count().unwrap(), 0);
        assert!(stores.relational.get_chunks(&doc_id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reprocessing_keeps_entities_unique() {
        let mut stores = Stores::open_memory(DIMS).unwrap();
        let doc_id = add_document(&mut stores, BODY);
        let extraction = Extraction {
            entities: vec![
                ExtractedEntity::new("PERSON", "Alice", 0.9),
                ExtractedEntity::new("ORG", "Acme", 0.8),
            ],
            relations: vec![],
        };
        let pipeline = Pipeline::new(Scripted::new(0, DIMS), Fixed(extraction), config(DIMS));

        pipeline.drain(&mut stores, "w1", None).await.unwrap();
        stores
            .relational
            .enqueue(&doc_id, SubjectKind::Document, EnqueueOptions::default(), "test")
            .unwrap();
        pipeline.drain(&mut stores, "w1", None).await.unwrap();

        let graph = stores.graph.query(&GraphFilter::default()).unwrap();
        assert_eq!(graph.entities.len(), 2);
    }

    #[tokio::test]
    async fn test_shorter_content_drops_stale_vectors() {
        let mut stores = Stores::open_memory(DIMS).unwrap();
        let doc_id = add_document(&mut stores, BODY);
        let pipeline = Pipeline::new(Scripted::new(0, DIMS), RuleBasedExtractor::new(), config(DIMS));
        pipeline.drain(&mut stores, "w1", None).await.unwrap();
        let before = stores.vectors.subject_records(&doc_id).unwrap().len();

        let wide = Pipeline::new(
            Scripted::new(0, DIMS),
            RuleBasedExtractor::new(),
            PipelineConfig {
                chunking: ChunkConfig {
                    max_chars: 2000,
                    overlap: 0,
                    min_chunk_size: 1,
                },
                ..config(DIMS)
            },
        );
        stores
            .relational
            .enqueue(&doc_id, SubjectKind::Document, EnqueueOptions::default(), "test")
            .unwrap();
        wide.drain(&mut stores, "w1", None).await.unwrap();

        assert!(before > 1);
        assert_eq!(stores.vectors.subject_records(&doc_id).unwrap().len(), 1);
        assert_eq!(stores.relational.get_chunks(&doc_id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_slow_provider_times_out_as_transient() {
        struct Stalled;
        impl EmbeddingProvider for Stalled {
            fn info(&self) -> ProviderInfo {
                ProviderInfo {
                    name: "stalled".to_string(),
                    model: "test".to_string(),
                    dimensions: DIMS,
                    max_chars: 2000,
                }
            }
            async fn is_available(&self) -> bool {
                true
            }
            async fn generate_embedding(&self, _text: &str) -> Result<Vec<f32>> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(vec![0.0; DIMS])
            }
        }

        let mut stores = Stores::open_memory(DIMS).unwrap();
        add_document(&mut stores, BODY);
        let pipeline = Pipeline::new(
            Stalled,
            RuleBasedExtractor::new(),
            PipelineConfig {
                provider_timeout: Duration::from_millis(50),
                ..config(DIMS)
            },
        );

        let outcome = pipeline.process_next(&mut stores, "w1").await.unwrap().unwrap();
        assert_eq!(outcome.status, QueueStatus::Failed);
        assert!(outcome.retryable);
        assert!(outcome.error.unwrap().contains("Timed out"));
    }
}
