//! Embedding types and settings.

use serde::{Deserialize, Serialize};

/// Default configured dimensionality (nomic-embed-text).
pub const DEFAULT_DIMENSIONS: usize = 768;

/// Embedding provider types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderType {
    Ollama,
    Huggingface,
}

impl std::fmt::Display for EmbeddingProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ollama => write!(f, "ollama"),
            Self::Huggingface => write!(f, "huggingface"),
        }
    }
}

impl std::str::FromStr for EmbeddingProviderType {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "huggingface" | "hf" => Ok(Self::Huggingface),
            other => Err(crate::error::Error::InvalidArgument(format!(
                "Unknown embedding provider: {other}"
            ))),
        }
    }
}

/// `embeddings` section of `config.json`.
///
/// Unset fields resolve through the environment and then built-in defaults
/// (see [`super::config`]).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub enabled: Option<bool>,
    /// Explicit provider; auto-detected when unset (Ollama preferred).
    pub provider: Option<EmbeddingProviderType>,
    /// Global embedding dimensionality shared by the pipeline and the vector store.
    pub dimensions: Option<usize>,
    pub ollama_endpoint: Option<String>,
    pub ollama_model: Option<String>,
    pub hf_token: Option<String>,
    pub hf_model: Option<String>,
    pub hf_endpoint: Option<String>,
    pub chunk_max_chars: Option<usize>,
    pub chunk_overlap: Option<usize>,
}

/// Provider metadata.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderInfo {
    pub name: String,
    pub model: String,
    pub dimensions: usize,
    pub max_chars: usize,
}

/// Model configuration with dimensions and max chars.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub name: String,
    pub dimensions: usize,
    pub max_chars: usize,
}

/// Ollama model configurations.
pub mod ollama_models {
    use super::ModelConfig;

    pub fn nomic_embed_text() -> ModelConfig {
        ModelConfig {
            name: "nomic-embed-text".to_string(),
            dimensions: 768,
            max_chars: 5000,
        }
    }

    pub fn mxbai_embed_large() -> ModelConfig {
        ModelConfig {
            name: "mxbai-embed-large".to_string(),
            dimensions: 1024,
            max_chars: 1500,
        }
    }

    pub fn all_minilm() -> ModelConfig {
        ModelConfig {
            name: "all-minilm".to_string(),
            dimensions: 384,
            max_chars: 800,
        }
    }

    pub fn get_config(model: &str) -> ModelConfig {
        // Tags like "nomic-embed-text:latest" share the base model's shape
        let base = model.split(':').next().unwrap_or(model);
        match base {
            "nomic-embed-text" => nomic_embed_text(),
            "mxbai-embed-large" => mxbai_embed_large(),
            "all-minilm" => all_minilm(),
            _ => ModelConfig {
                name: model.to_string(),
                dimensions: super::DEFAULT_DIMENSIONS,
                max_chars: 2000,
            },
        }
    }
}

/// HuggingFace model configurations.
pub mod huggingface_models {
    use super::ModelConfig;

    pub fn all_minilm_l6_v2() -> ModelConfig {
        ModelConfig {
            name: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
            dimensions: 384,
            max_chars: 800,
        }
    }

    pub fn all_mpnet_base_v2() -> ModelConfig {
        ModelConfig {
            name: "sentence-transformers/all-mpnet-base-v2".to_string(),
            dimensions: 768,
            max_chars: 1500,
        }
    }

    pub fn get_config(model: &str) -> ModelConfig {
        match model {
            "sentence-transformers/all-MiniLM-L6-v2" => all_minilm_l6_v2(),
            "sentence-transformers/all-mpnet-base-v2" => all_mpnet_base_v2(),
            _ => ModelConfig {
                name: model.to_string(),
                dimensions: 384,
                max_chars: 800,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ollama_tagged_model_resolves_base() {
        assert_eq!(ollama_models::get_config("nomic-embed-text:latest").dimensions, 768);
        assert_eq!(ollama_models::get_config("mxbai-embed-large").dimensions, 1024);
    }

    #[test]
    fn test_provider_type_parse() {
        assert_eq!("HF".parse::<EmbeddingProviderType>().unwrap(), EmbeddingProviderType::Huggingface);
        assert!("openai".parse::<EmbeddingProviderType>().is_err());
    }
}
