//! Embedding module.
//!
//! Provides embedding generation using HTTP-based providers:
//! - **Ollama** (local) - preferred when auto-detecting
//! - **HuggingFace** (cloud) - requires API token
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │ Ingestion worker │
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │    Factory      │  ← Auto-detects available provider
//! └────────┬────────┘
//!          │
//!     ┌────┴────┐
//!     ▼         ▼
//! ┌───────┐ ┌───────────┐
//! │Ollama │ │HuggingFace│
//! └───────┘ └───────────┘
//! ```
//!
//! # Configuration
//!
//! Settings come from the `embeddings` section of `config.json`.
//! Environment variables take precedence:
//! - `OLLAMA_ENDPOINT` - Ollama server URL (default: `http://localhost:11434`)
//! - `OLLAMA_MODEL` - Embedding model (default: `nomic-embed-text`)
//! - `HF_TOKEN` - HuggingFace API token
//! - `HF_MODEL` - HuggingFace model (default: `sentence-transformers/all-MiniLM-L6-v2`)
//! - `HF_ENDPOINT` - HuggingFace inference endpoint
//! - `KH_EMBEDDING_DIMENSIONS` - Global vector dimensionality (default: 768)
//! - `KH_EMBEDDINGS_ENABLED` - Enable/disable embeddings (default: `true`)

pub mod chunking;
pub mod config;
pub mod factory;
pub mod huggingface;
pub mod ollama;
pub mod provider;
pub mod types;

pub use chunking::{chunk_text, ChunkConfig, TextChunk};
pub use config::{
    is_embeddings_enabled, resolve_dimensions, resolve_hf_endpoint, resolve_hf_model,
    resolve_hf_token, resolve_ollama_endpoint, resolve_ollama_model,
};
pub use factory::{create_embedding_provider, create_provider_by_type};
pub use huggingface::HuggingFaceProvider;
pub use ollama::OllamaProvider;
pub use provider::{BoxedProvider, EmbeddingProvider};
pub use types::{EmbeddingProviderType, EmbeddingSettings, ModelConfig, ProviderInfo};
