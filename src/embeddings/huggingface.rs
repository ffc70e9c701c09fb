//! HuggingFace Inference API embedding provider.
//!
//! Requires a HuggingFace API token (`HF_TOKEN`).

use serde::{Deserialize, Serialize};

use super::config::{resolve_hf_endpoint, resolve_hf_model, resolve_hf_token};
use super::provider::{malformed_response, request_error, status_error, EmbeddingProvider};
use super::types::{huggingface_models, EmbeddingSettings, ProviderInfo};
use crate::error::Result;

const PROVIDER: &str = "huggingface";

/// HuggingFace Inference API embedding provider.
#[derive(Debug, Clone)]
pub struct HuggingFaceProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    token: String,
    dimensions: usize,
    max_chars: usize,
}

impl HuggingFaceProvider {
    /// Create a provider from resolved settings.
    ///
    /// Returns `None` if no API token is configured.
    #[must_use]
    pub fn from_settings(settings: &EmbeddingSettings) -> Option<Self> {
        let token = resolve_hf_token(settings)?;
        Some(Self::with_config(
            resolve_hf_endpoint(settings),
            resolve_hf_model(settings),
            token,
        ))
    }

    /// Create a provider with explicit configuration.
    #[must_use]
    pub fn with_config(endpoint: String, model: String, token: String) -> Self {
        let config = huggingface_models::get_config(&model);

        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model,
            token,
            dimensions: config.dimensions,
            max_chars: config.max_chars,
        }
    }

    async fn feature_extraction(&self, inputs: HfInputs<'_>) -> Result<HfEmbedResponse> {
        let url = format!(
            "{}/models/{}/pipeline/feature-extraction",
            self.endpoint, self.model
        );

        let request = HfEmbedRequest {
            inputs,
            options: HfOptions {
                wait_for_model: true,
            },
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&request)
            .send()
            .await
            .map_err(|e| request_error(PROVIDER, &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(PROVIDER, status, &body));
        }

        response
            .json()
            .await
            .map_err(|e| malformed_response(PROVIDER, e))
    }
}

#[derive(Debug, Serialize)]
struct HfEmbedRequest<'a> {
    inputs: HfInputs<'a>,
    options: HfOptions,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum HfInputs<'a> {
    Single(&'a str),
    Batch(Vec<&'a str>),
}

#[derive(Debug, Serialize)]
struct HfOptions {
    wait_for_model: bool,
}

/// The API answers in one of several shapes depending on the model.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HfEmbedResponse {
    /// Direct embedding (most sentence-transformers, single input)
    Direct(Vec<f32>),
    /// One embedding per input, or `[[embedding]]` for a single input
    Nested(Vec<Vec<f32>>),
    /// Token-level output `[[[embedding]]]`; first row is taken
    Batch(Vec<Vec<Vec<f32>>>),
}

impl EmbeddingProvider for HuggingFaceProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: PROVIDER.to_string(),
            model: self.model.clone(),
            dimensions: self.dimensions,
            max_chars: self.max_chars,
        }
    }

    async fn is_available(&self) -> bool {
        // Pinging the API would spend rate-limit quota
        !self.token.is_empty()
    }

    async fn generate_embedding(&self, text: &str) -> Result<Vec<f32>> {
        match self.feature_extraction(HfInputs::Single(text)).await? {
            HfEmbedResponse::Direct(embedding) => Ok(embedding),
            HfEmbedResponse::Nested(nested) => nested
                .into_iter()
                .next()
                .ok_or_else(|| malformed_response(PROVIDER, "no embeddings in response")),
            HfEmbedResponse::Batch(batch) => batch
                .into_iter()
                .next()
                .and_then(|nested| nested.into_iter().next())
                .ok_or_else(|| malformed_response(PROVIDER, "no embeddings in batch response")),
        }
    }

    async fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let embeddings = match self.feature_extraction(HfInputs::Batch(texts.to_vec())).await? {
            HfEmbedResponse::Nested(nested) => nested,
            HfEmbedResponse::Direct(embedding) => vec![embedding],
            HfEmbedResponse::Batch(batch) => batch
                .into_iter()
                .filter_map(|nested| nested.into_iter().next())
                .collect(),
        };
        if embeddings.len() != texts.len() {
            return Err(malformed_response(
                PROVIDER,
                format!("{} embeddings for {} inputs", embeddings.len(), texts.len()),
            ));
        }
        Ok(embeddings)
    }
}
