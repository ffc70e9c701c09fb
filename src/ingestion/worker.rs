//! Supervised worker pool.
//!
//! N processing tasks plus one sweeper, each holding its own store
//! connections. A `watch` channel carries the shutdown signal; tasks finish
//! the item in hand and exit, and [`WorkerPool::shutdown`] joins them all.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::pipeline::Pipeline;
use crate::config::IngestionSettings;
use crate::embeddings::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::extraction::EntityExtractor;
use crate::stores::{StorePaths, Stores};

/// Pool sizing and cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub workers: usize,
    /// Idle wait between empty claims.
    pub poll_interval: Duration,
    pub sweep_interval: Duration,
}

impl From<&IngestionSettings> for PoolSettings {
    fn from(settings: &IngestionSettings) -> Self {
        Self {
            workers: settings.workers,
            poll_interval: settings.poll_interval(),
            sweep_interval: settings.sweep_interval(),
        }
    }
}

/// Counts reported by [`WorkerPool::shutdown`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct PoolReport {
    pub processed: usize,
    /// Tasks that panicked instead of exiting.
    pub crashed: usize,
}

/// Running ingestion workers.
#[derive(Debug)]
pub struct WorkerPool {
    shutdown: watch::Sender<bool>,
    workers: Vec<JoinHandle<usize>>,
    sweeper: JoinHandle<usize>,
}

impl WorkerPool {
    /// Open connections for every task and spawn them on the current runtime.
    ///
    /// Connections are opened before anything is spawned, so a bad path or
    /// a dimension mismatch is reported here rather than inside a task.
    ///
    /// # Errors
    ///
    /// Returns an error if `workers` is zero or any store fails to open.
    pub fn spawn<P, E>(
        pipeline: Arc<Pipeline<P, E>>,
        paths: &StorePaths,
        settings: PoolSettings,
    ) -> Result<Self>
    where
        P: EmbeddingProvider + 'static,
        E: EntityExtractor + 'static,
    {
        if settings.workers == 0 {
            return Err(Error::Config("ingestion.workers must be at least 1".to_string()));
        }

        let dimensions = pipeline.config().dimensions;
        let mut connections = Vec::with_capacity(settings.workers);
        for _ in 0..settings.workers {
            connections.push(paths.open(dimensions)?);
        }
        let sweeper_stores = paths.open(dimensions)?;

        let (shutdown, signal) = watch::channel(false);

        let workers = connections
            .into_iter()
            .enumerate()
            .map(|(n, stores)| {
                let worker_id = format!("worker-{}-{n}", std::process::id());
                tokio::spawn(run_worker(
                    Arc::clone(&pipeline),
                    stores,
                    worker_id,
                    settings.poll_interval,
                    signal.clone(),
                ))
            })
            .collect();

        let sweeper = tokio::spawn(run_sweeper(
            pipeline,
            sweeper_stores,
            settings.sweep_interval,
            signal,
        ));

        tracing::info!(workers = settings.workers, "Worker pool started");
        Ok(Self {
            shutdown,
            workers,
            sweeper,
        })
    }

    /// Number of processing tasks (the sweeper excluded).
    #[must_use]
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Signal every task to stop and wait for all of them.
    pub async fn shutdown(self) -> PoolReport {
        // Receivers only go away when their task has exited already.
        let _ = self.shutdown.send(true);

        let mut report = PoolReport::default();
        for handle in self.workers {
            match handle.await {
                Ok(processed) => report.processed += processed,
                Err(err) => {
                    tracing::error!(error = %err, "Ingestion worker crashed");
                    report.crashed += 1;
                }
            }
        }
        if let Err(err) = self.sweeper.await {
            tracing::error!(error = %err, "Queue sweeper crashed");
            report.crashed += 1;
        }

        tracing::info!(processed = report.processed, crashed = report.crashed, "Worker pool stopped");
        report
    }
}

async fn run_worker<P, E>(
    pipeline: Arc<Pipeline<P, E>>,
    mut stores: Stores,
    worker_id: String,
    poll_interval: Duration,
    mut signal: watch::Receiver<bool>,
) -> usize
where
    P: EmbeddingProvider,
    E: EntityExtractor,
{
    let mut processed = 0;
    tracing::debug!(worker = %worker_id, "Worker started");

    while !*signal.borrow() {
        match pipeline.process_next(&mut stores, &worker_id).await {
            Ok(Some(_)) => {
                processed += 1;
                continue;
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(worker = %worker_id, error = %err, "Queue access failed");
            }
        }

        tokio::select! {
            _ = signal.changed() => {}
            () = tokio::time::sleep(poll_interval) => {}
        }
    }

    tracing::debug!(worker = %worker_id, processed, "Worker stopped");
    processed
}

async fn run_sweeper<P, E>(
    pipeline: Arc<Pipeline<P, E>>,
    mut stores: Stores,
    interval: Duration,
    mut signal: watch::Receiver<bool>,
) -> usize
where
    P: EmbeddingProvider,
    E: EntityExtractor,
{
    let mut swept = 0;
    while !*signal.borrow() {
        match pipeline.sweep(&mut stores, "sweeper") {
            Ok(report) => swept += report.total(),
            Err(err) => tracing::warn!(error = %err, "Queue sweep failed"),
        }

        tokio::select! {
            _ = signal.changed() => {}
            () = tokio::time::sleep(interval) => {}
        }
    }
    swept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::{ChunkConfig, ProviderInfo};
    use crate::extraction::RuleBasedExtractor;
    use crate::ingestion::{PipelineConfig, RetryPolicy};
    use crate::model::{NewDocument, QueueStatus};
    use crate::storage::EnqueueOptions;
    use tempfile::TempDir;

    struct Flat;

    impl EmbeddingProvider for Flat {
        fn info(&self) -> ProviderInfo {
            ProviderInfo {
                name: "flat".to_string(),
                model: "test".to_string(),
                dimensions: 4,
                max_chars: 2000,
            }
        }

        async fn is_available(&self) -> bool {
            true
        }

        async fn generate_embedding(&self, _text: &str) -> crate::error::Result<Vec<f32>> {
            Ok(vec![0.5; 4])
        }
    }

    fn pipeline() -> Arc<Pipeline<Flat, RuleBasedExtractor>> {
        Arc::new(Pipeline::new(
            Flat,
            RuleBasedExtractor::new(),
            PipelineConfig {
                dimensions: 4,
                provider_timeout: Duration::from_secs(5),
                chunking: ChunkConfig::default(),
                retry: RetryPolicy::default(),
                min_confidence: 0.3,
                max_entities: 64,
                stale_after: Duration::from_secs(600),
            },
        ))
    }

    fn settings(workers: usize) -> PoolSettings {
        PoolSettings {
            workers,
            poll_interval: Duration::from_millis(10),
            sweep_interval: Duration::from_millis(50),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pool_drains_queue_and_shuts_down() {
        let dir = TempDir::new().unwrap();
        let paths = StorePaths::for_database(&dir.path().join("kh.db"));
        let mut stores = paths.open(4).unwrap();
        let mut ids = Vec::new();
        for i in 0..6 {
            let receipt = stores
                .relational
                .ingest_document(
                    &NewDocument::new(format!("doc {i}"), format!("Document number {i} about WAL mode.")),
                    EnqueueOptions::default(),
                    "test",
                )
                .unwrap();
            ids.push(receipt.document_id);
        }

        let pool = WorkerPool::spawn(pipeline(), &paths, settings(3)).unwrap();
        assert_eq!(pool.size(), 3);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while stores.relational.queue_stats().unwrap().completed < ids.len() {
            assert!(tokio::time::Instant::now() < deadline, "queue did not drain");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let report = pool.shutdown().await;
        assert_eq!(report.processed, ids.len());
        assert_eq!(report.crashed, 0);
        for id in &ids {
            let item = stores.relational.get_queue_item_by_subject(id).unwrap().unwrap();
            assert_eq!(item.status, QueueStatus::Completed);
            assert_eq!(item.attempts, 1);
        }
    }

    #[tokio::test]
    async fn test_zero_workers_rejected() {
        let dir = TempDir::new().unwrap();
        let paths = StorePaths::for_database(&dir.path().join("kh.db"));
        let err = WorkerPool::spawn(pipeline(), &paths, settings(0)).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
