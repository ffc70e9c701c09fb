//! Fakes and fixtures shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use kh::embeddings::{ChunkConfig, EmbeddingProvider, ProviderInfo};
use kh::error::{Error, Result};
use kh::extraction::{EntityExtractor, Extraction};
use kh::ingestion::{PipelineConfig, RetryPolicy};
use kh::stores::{StorePaths, Stores};
use tempfile::TempDir;

pub const DIMS: usize = 4;

/// Embedding provider that fails its first `failures` calls transiently,
/// then embeds deterministically from the text.
pub struct ScriptedProvider {
    failures: u32,
    calls: AtomicU32,
    dims: usize,
    stall: Option<Duration>,
}

impl ScriptedProvider {
    pub fn new(failures: u32) -> Self {
        Self {
            failures,
            calls: AtomicU32::new(0),
            dims: DIMS,
            stall: None,
        }
    }

    /// Emits vectors of `dims` regardless of what the store expects.
    pub fn with_dims(mut self, dims: usize) -> Self {
        self.dims = dims;
        self
    }

    /// Sleeps this long before every answer.
    pub fn stalling(mut self, stall: Duration) -> Self {
        self.stall = Some(stall);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let bytes = text.as_bytes();
        (0..self.dims)
            .map(|i| {
                let sum: u32 = bytes.iter().skip(i).step_by(self.dims).map(|b| u32::from(*b)).sum();
                (sum % 97) as f32 + 1.0
            })
            .collect()
    }
}

impl EmbeddingProvider for ScriptedProvider {
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
        Ok(self.generate_embeddings(&[text]).await?.remove(0))
    }

    async fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(stall) = self.stall {
            tokio::time::sleep(stall).await;
        }
        if call < self.failures {
            return Err(Error::TransientProvider("503 Service Unavailable".to_string()));
        }
        Ok(texts.iter().map(|t| self.embed(t)).collect())
    }
}

/// Extractor that always reports the same entities.
pub struct FixedExtractor(pub Extraction);

impl EntityExtractor for FixedExtractor {
    fn name(&self) -> &'static str {
        "fixed"
    }

    async fn extract(&self, _text: &str) -> Result<Extraction> {
        Ok(self.0.clone())
    }
}

/// Small chunks and an immediate retry schedule.
pub fn pipeline_config() -> PipelineConfig {
    PipelineConfig {
        dimensions: DIMS,
        provider_timeout: Duration::from_secs(5),
        chunking: ChunkConfig {
            max_chars: 60,
            overlap: 10,
            min_chunk_size: 10,
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

/// File-backed stores in a fresh directory.
pub fn temp_stores() -> (TempDir, StorePaths, Stores) {
    let dir = TempDir::new().expect("temp dir");
    let paths = StorePaths::for_database(&dir.path().join("kh.db"));
    let stores = paths.open(DIMS).expect("open stores");
    (dir, paths, stores)
}
