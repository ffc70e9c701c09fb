//! Embedding provider factory.
//!
//! Picks a provider from settings, probing when none is configured.

use super::config::is_embeddings_enabled;
use super::huggingface::HuggingFaceProvider;
use super::ollama::OllamaProvider;
use super::provider::{BoxedProvider, EmbeddingProvider};
use super::types::{EmbeddingProviderType, EmbeddingSettings};

/// Create an embedding provider based on configuration.
///
/// Priority:
/// 1. Explicit provider in settings (not probed; failures surface as
///    transient errors on first use)
/// 2. Auto-detect available provider (Ollama preferred)
///
/// Returns `None` if no provider is available or embeddings are disabled.
pub async fn create_embedding_provider(settings: &EmbeddingSettings) -> Option<BoxedProvider> {
    if !is_embeddings_enabled(settings) {
        return None;
    }

    if let Some(provider_type) = settings.provider {
        return create_provider_by_type(provider_type, settings);
    }

    let ollama = OllamaProvider::from_settings(settings);
    if ollama.is_available().await {
        return Some(BoxedProvider::new(ollama));
    }

    if let Some(hf) = HuggingFaceProvider::from_settings(settings) {
        if hf.is_available().await {
            return Some(BoxedProvider::new(hf));
        }
    }

    None
}

/// Create a specific provider by type.
#[must_use]
pub fn create_provider_by_type(
    provider_type: EmbeddingProviderType,
    settings: &EmbeddingSettings,
) -> Option<BoxedProvider> {
    match provider_type {
        EmbeddingProviderType::Ollama => {
            Some(BoxedProvider::new(OllamaProvider::from_settings(settings)))
        }
        EmbeddingProviderType::Huggingface => {
            HuggingFaceProvider::from_settings(settings).map(BoxedProvider::new)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_embeddings_yield_no_provider() {
        if std::env::var("KH_EMBEDDINGS_ENABLED").is_err() {
            let settings = EmbeddingSettings {
                enabled: Some(false),
                ..EmbeddingSettings::default()
            };
            assert!(create_embedding_provider(&settings).await.is_none());
        }
    }

    #[test]
    fn test_explicit_ollama_is_created_without_probe() {
        let provider =
            create_provider_by_type(EmbeddingProviderType::Ollama, &EmbeddingSettings::default());
        assert_eq!(provider.map(|p| p.info().name), Some("ollama".to_string()));
    }
}
