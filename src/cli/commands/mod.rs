//! Command implementations.

pub mod capture;
pub mod graph;
pub mod ingest;
pub mod init;
pub mod search;
pub mod session;
pub mod status;
pub mod version;

use std::io::Read;
use std::path::{Path, PathBuf};

use crate::config::{default_actor, resolve_db_path, KhConfig};
use crate::embeddings::{create_embedding_provider, resolve_dimensions, BoxedProvider};
use crate::error::{Error, Result};
use crate::extraction::{create_extractor, Extractor};
use crate::ingestion::{Pipeline, PipelineConfig};
use crate::storage::{EnqueueOptions, SqliteStorage};
use crate::stores::{StorePaths, Stores};

/// Pipeline over the configured provider and extractor.
pub(crate) type ConfiguredPipeline = Pipeline<BoxedProvider, Extractor>;

/// Resolve the database path and require that `kh init` has run.
pub(crate) fn existing_db_path(db_path: Option<&PathBuf>) -> Result<PathBuf> {
    let db_path = resolve_db_path(db_path.map(PathBuf::as_path)).ok_or(Error::NotInitialized)?;
    if !db_path.exists() {
        return Err(Error::NotInitialized);
    }
    Ok(db_path)
}

pub(crate) fn resolve_actor(actor: Option<&str>) -> String {
    actor.map_or_else(default_actor, ToString::to_string)
}

/// Relational store only, for commands that never touch derived indexes.
pub(crate) fn open_storage(db_path: Option<&PathBuf>) -> Result<SqliteStorage> {
    SqliteStorage::open(&existing_db_path(db_path)?)
}

/// All three stores at the configured dimensionality.
pub(crate) fn open_stores(db_path: &Path, config: &KhConfig) -> Result<(StorePaths, Stores)> {
    let paths = StorePaths::for_database(db_path);
    let stores = paths.open(resolve_dimensions(&config.embeddings))?;
    Ok((paths, stores))
}

pub(crate) fn enqueue_options(config: &KhConfig) -> EnqueueOptions {
    EnqueueOptions {
        priority: 0,
        max_attempts: config.ingestion.max_attempts.max(1),
    }
}

pub(crate) fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Error::Other(format!("Failed to create async runtime: {e}")))
}

/// Build the ingestion pipeline from configuration.
///
/// # Errors
///
/// Returns `Config` when no embedding provider is available.
pub(crate) async fn build_pipeline(config: &KhConfig) -> Result<ConfiguredPipeline> {
    let provider = create_embedding_provider(&config.embeddings)
        .await
        .ok_or_else(|| {
            Error::Config(
                "No embedding provider available. Start Ollama or set HF_TOKEN.".to_string(),
            )
        })?;
    let extractor = create_extractor(&config.extraction, &config.embeddings);
    let pipeline_config = PipelineConfig::from_config(config, &provider);
    Ok(Pipeline::new(provider, extractor, pipeline_config))
}

/// Take `value` literally, or read stdin when it is `-`.
pub(crate) fn read_content(value: &str) -> Result<String> {
    if value != "-" {
        return Ok(value.to_string());
    }
    let mut buf = String::new();
    std::io::stdin().read_to_string(&mut buf)?;
    Ok(buf)
}

/// Parse an optional `--context` flag; it must be a JSON object.
pub(crate) fn parse_context(raw: Option<&str>) -> Result<Option<serde_json::Value>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| Error::InvalidArgument(format!("--context is not valid JSON: {e}")))?;
    if !value.is_object() {
        return Err(Error::InvalidArgument(
            "--context must be a JSON object".to_string(),
        ));
    }
    Ok(Some(value))
}

/// Format Unix millis for human output.
pub(crate) fn format_millis(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map_or_else(|| ms.to_string(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string())
}
