//! Embedding provider trait.
//!
//! Defines the interface that all embedding providers must implement, plus
//! the HTTP error classification shared by every HTTP-backed collaborator.

use std::future::Future;
use std::pin::Pin;

use super::types::ProviderInfo;
use crate::error::{Error, Result};

/// Trait for embedding providers.
///
/// Implemented by Ollama and HuggingFace providers, and by scripted fakes in
/// tests. Errors must be classified: `TransientProvider` for anything worth
/// retrying, `PermanentProcessing` otherwise.
pub trait EmbeddingProvider: Send + Sync {
    /// Get provider metadata.
    fn info(&self) -> ProviderInfo;

    /// Check if the provider is reachable and configured.
    fn is_available(&self) -> impl Future<Output = bool> + Send;

    /// Generate embedding for a single text.
    fn generate_embedding(&self, text: &str) -> impl Future<Output = Result<Vec<f32>>> + Send;

    /// Generate embeddings for multiple texts (batch).
    ///
    /// Default implementation calls `generate_embedding` for each text.
    fn generate_embeddings(
        &self,
        texts: &[&str],
    ) -> impl Future<Output = Result<Vec<Vec<f32>>>> + Send {
        async move {
            let mut results = Vec::with_capacity(texts.len());
            for text in texts {
                results.push(self.generate_embedding(text).await?);
            }
            Ok(results)
        }
    }
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Object-safe version of `EmbeddingProvider` for boxing.
trait EmbeddingProviderBoxed: Send + Sync {
    fn info(&self) -> ProviderInfo;
    fn is_available_boxed(&self) -> BoxFuture<'_, bool>;
    fn generate_embedding_boxed(&self, text: String) -> BoxFuture<'_, Result<Vec<f32>>>;
    fn generate_embeddings_boxed(&self, texts: Vec<String>) -> BoxFuture<'_, Result<Vec<Vec<f32>>>>;
}

struct BoxedProviderWrapper<P: EmbeddingProvider + 'static>(P);

impl<P: EmbeddingProvider + 'static> EmbeddingProviderBoxed for BoxedProviderWrapper<P> {
    fn info(&self) -> ProviderInfo {
        self.0.info()
    }

    fn is_available_boxed(&self) -> BoxFuture<'_, bool> {
        Box::pin(self.0.is_available())
    }

    fn generate_embedding_boxed(&self, text: String) -> BoxFuture<'_, Result<Vec<f32>>> {
        Box::pin(async move { self.0.generate_embedding(&text).await })
    }

    fn generate_embeddings_boxed(&self, texts: Vec<String>) -> BoxFuture<'_, Result<Vec<Vec<f32>>>> {
        Box::pin(async move {
            let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
            self.0.generate_embeddings(&refs).await
        })
    }
}

/// Boxed provider for runtime provider selection.
///
/// The trait uses `impl Future` returns, so it is not object safe; this
/// wrapper erases the concrete type and implements the trait itself.
pub struct BoxedProvider {
    inner: Box<dyn EmbeddingProviderBoxed>,
}

impl BoxedProvider {
    /// Create a new boxed provider.
    pub fn new<P: EmbeddingProvider + 'static>(provider: P) -> Self {
        Self {
            inner: Box::new(BoxedProviderWrapper(provider)),
        }
    }
}

impl std::fmt::Debug for BoxedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let info = self.inner.info();
        f.debug_struct("BoxedProvider")
            .field("name", &info.name)
            .field("model", &info.model)
            .finish()
    }
}

impl EmbeddingProvider for BoxedProvider {
    fn info(&self) -> ProviderInfo {
        self.inner.info()
    }

    fn is_available(&self) -> impl Future<Output = bool> + Send {
        self.inner.is_available_boxed()
    }

    fn generate_embedding(&self, text: &str) -> impl Future<Output = Result<Vec<f32>>> + Send {
        self.inner.generate_embedding_boxed(text.to_string())
    }

    fn generate_embeddings(
        &self,
        texts: &[&str],
    ) -> impl Future<Output = Result<Vec<Vec<f32>>>> + Send {
        self.inner
            .generate_embeddings_boxed(texts.iter().map(|s| (*s).to_string()).collect())
    }
}

// ── HTTP error classification ─────────────────────────────────

/// Classify a failed HTTP exchange (no response).
///
/// Connection failures and timeouts are transient; body decoding and
/// request-building failures are permanent.
pub(crate) fn request_error(provider: &str, err: &reqwest::Error) -> Error {
    if err.is_decode() || err.is_builder() {
        Error::PermanentProcessing(format!("{provider} request invalid: {err}"))
    } else {
        Error::TransientProvider(format!("{provider} request failed: {err}"))
    }
}

/// Classify a non-success HTTP status.
///
/// 408, 429 and 5xx are transient; every other status is permanent.
pub(crate) fn status_error(provider: &str, status: reqwest::StatusCode, body: &str) -> Error {
    let message = format!("{provider} returned {status}: {}", body.trim());
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        Error::TransientProvider(message)
    } else {
        Error::PermanentProcessing(message)
    }
}

/// Malformed or empty provider payloads never get better on retry.
pub(crate) fn malformed_response(provider: &str, detail: impl std::fmt::Display) -> Error {
    Error::PermanentProcessing(format!("{provider} returned a malformed response: {detail}"))
}
