//! Embedding settings resolution.
//!
//! Priority for every value: environment variable > `config.json` > default.

use super::types::{EmbeddingSettings, DEFAULT_DIMENSIONS};

pub const DEFAULT_OLLAMA_ENDPOINT: &str = "http://localhost:11434";
pub const DEFAULT_OLLAMA_MODEL: &str = "nomic-embed-text";
pub const DEFAULT_HF_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";
pub const DEFAULT_HF_ENDPOINT: &str = "https://router.huggingface.co/hf-inference";

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Resolve Ollama endpoint (`OLLAMA_ENDPOINT`).
#[must_use]
pub fn resolve_ollama_endpoint(settings: &EmbeddingSettings) -> String {
    env_value("OLLAMA_ENDPOINT")
        .or_else(|| settings.ollama_endpoint.clone())
        .unwrap_or_else(|| DEFAULT_OLLAMA_ENDPOINT.to_string())
}

/// Resolve Ollama embedding model (`OLLAMA_MODEL`).
#[must_use]
pub fn resolve_ollama_model(settings: &EmbeddingSettings) -> String {
    env_value("OLLAMA_MODEL")
        .or_else(|| settings.ollama_model.clone())
        .unwrap_or_else(|| DEFAULT_OLLAMA_MODEL.to_string())
}

/// Resolve HuggingFace token (`HF_TOKEN`).
#[must_use]
pub fn resolve_hf_token(settings: &EmbeddingSettings) -> Option<String> {
    env_value("HF_TOKEN").or_else(|| settings.hf_token.clone().filter(|t| !t.is_empty()))
}

/// Resolve HuggingFace model (`HF_MODEL`).
#[must_use]
pub fn resolve_hf_model(settings: &EmbeddingSettings) -> String {
    env_value("HF_MODEL")
        .or_else(|| settings.hf_model.clone())
        .unwrap_or_else(|| DEFAULT_HF_MODEL.to_string())
}

/// Resolve HuggingFace endpoint (`HF_ENDPOINT`).
#[must_use]
pub fn resolve_hf_endpoint(settings: &EmbeddingSettings) -> String {
    env_value("HF_ENDPOINT")
        .or_else(|| settings.hf_endpoint.clone())
        .unwrap_or_else(|| DEFAULT_HF_ENDPOINT.to_string())
}

/// Resolve the global embedding dimensionality (`KH_EMBEDDING_DIMENSIONS`).
///
/// Unparseable or zero environment values are ignored.
#[must_use]
pub fn resolve_dimensions(settings: &EmbeddingSettings) -> usize {
    env_value("KH_EMBEDDING_DIMENSIONS")
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|d| *d > 0)
        .or(settings.dimensions.filter(|d| *d > 0))
        .unwrap_or(DEFAULT_DIMENSIONS)
}

/// Check if embeddings are enabled (`KH_EMBEDDINGS_ENABLED`).
#[must_use]
pub fn is_embeddings_enabled(settings: &EmbeddingSettings) -> bool {
    if let Some(enabled) = env_value("KH_EMBEDDINGS_ENABLED") {
        return enabled != "false" && enabled != "0";
    }
    settings.enabled.unwrap_or(true)
}
