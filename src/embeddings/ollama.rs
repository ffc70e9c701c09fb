//! Ollama embedding provider.
//!
//! Uses a local Ollama server (`/api/embed`). This is the preferred provider
//! when auto-detecting.

use serde::{Deserialize, Serialize};

use super::config::{resolve_ollama_endpoint, resolve_ollama_model};
use super::provider::{malformed_response, request_error, status_error, EmbeddingProvider};
use super::types::{ollama_models, EmbeddingSettings, ProviderInfo};
use crate::error::Result;

const PROVIDER: &str = "ollama";

/// Ollama embedding provider.
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dimensions: usize,
    max_chars: usize,
}

impl OllamaProvider {
    /// Create a provider from resolved settings.
    #[must_use]
    pub fn from_settings(settings: &EmbeddingSettings) -> Self {
        Self::with_config(resolve_ollama_endpoint(settings), resolve_ollama_model(settings))
    }

    /// Create a provider with explicit endpoint and model.
    #[must_use]
    pub fn with_config(endpoint: String, model: String) -> Self {
        let config = ollama_models::get_config(&model);

        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model,
            dimensions: config.dimensions,
            max_chars: config.max_chars,
        }
    }

    async fn embed(&self, input: EmbedInput<'_>) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/api/embed", self.endpoint);
        let request = OllamaEmbedRequest {
            model: &self.model,
            input,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| request_error(PROVIDER, &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(PROVIDER, status, &body));
        }

        let data: OllamaEmbedResponse = response
            .json()
            .await
            .map_err(|e| malformed_response(PROVIDER, e))?;

        Ok(data.embeddings)
    }
}

/// Ollama API response for listing models.
#[derive(Debug, Deserialize)]
struct OllamaTagsResponse {
    models: Option<Vec<OllamaModel>>,
}

#[derive(Debug, Deserialize)]
struct OllamaModel {
    name: String,
}

#[derive(Debug, Serialize)]
struct OllamaEmbedRequest<'a> {
    model: &'a str,
    input: EmbedInput<'a>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum EmbedInput<'a> {
    Single(&'a str),
    Batch(Vec<&'a str>),
}

#[derive(Debug, Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl EmbeddingProvider for OllamaProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: PROVIDER.to_string(),
            model: self.model.clone(),
            dimensions: self.dimensions,
            max_chars: self.max_chars,
        }
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.endpoint);

        let Ok(response) = self
            .client
            .get(&url)
            .timeout(std::time::Duration::from_secs(2))
            .send()
            .await
        else {
            return false;
        };

        if !response.status().is_success() {
            return false;
        }

        let Ok(data) = response.json::<OllamaTagsResponse>().await else {
            return false;
        };

        data.models.is_some_and(|models| {
            models
                .iter()
                .any(|m| m.name == self.model || m.name.starts_with(&format!("{}:", self.model)))
        })
    }

    async fn generate_embedding(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(EmbedInput::Single(text))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| malformed_response(PROVIDER, "no embeddings returned"))
    }

    async fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let embeddings = self.embed(EmbedInput::Batch(texts.to_vec())).await?;
        if embeddings.len() != texts.len() {
            return Err(malformed_response(
                PROVIDER,
                format!("{} embeddings for {} inputs", embeddings.len(), texts.len()),
            ));
        }
        Ok(embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ollama_provider_custom_config() {
        let provider = OllamaProvider::with_config(
            "http://custom:11434/".to_string(),
            "mxbai-embed-large".to_string(),
        );
        let info = provider.info();
        assert_eq!(info.name, "ollama");
        assert_eq!(info.model, "mxbai-embed-large");
        assert_eq!(info.dimensions, 1024);
        assert_eq!(provider.endpoint, "http://custom:11434");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transient() {
        // Port 9 (discard) is closed on test machines
        let provider =
            OllamaProvider::with_config("http://127.0.0.1:9".to_string(), "nomic-embed-text".to_string());
        assert!(!provider.is_available().await);
        let err = provider.generate_embedding("hello").await.unwrap_err();
        assert!(err.is_transient());
    }
}
