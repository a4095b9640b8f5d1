//! Embedding types and model tables.

use serde::{Deserialize, Serialize};

/// Embedding provider types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderType {
    Ollama,
    Huggingface,
    /// Model2Vec static embeddings, loaded locally.
    Model2vec,
    /// Deterministic feature hashing, no model or network needed.
    #[default]
    Hashing,
    /// Embeddings disabled; semantic search degrades to keyword.
    None,
}

impl std::fmt::Display for EmbeddingProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ollama => write!(f, "ollama"),
            Self::Huggingface => write!(f, "huggingface"),
            Self::Model2vec => write!(f, "model2vec"),
            Self::Hashing => write!(f, "hashing"),
            Self::None => write!(f, "none"),
        }
    }
}

impl std::str::FromStr for EmbeddingProviderType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "huggingface" | "hf" => Ok(Self::Huggingface),
            "model2vec" => Ok(Self::Model2vec),
            "hashing" | "local" => Ok(Self::Hashing),
            "none" | "off" | "disabled" => Ok(Self::None),
            _ => Err(format!("Unknown embedding provider: {s}")),
        }
    }
}

/// Provider metadata.
#[derive(Debug, Clone)]
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

    pub fn get_config(model: &str) -> ModelConfig {
        let (dimensions, max_chars) = match model {
            "mxbai-embed-large" => (1024, 1500),
            "all-minilm" => (384, 800),
            // nomic-embed-text and unknown models
            _ => (768, 5000),
        };
        ModelConfig {
            name: model.to_string(),
            dimensions,
            max_chars,
        }
    }
}

/// HuggingFace model configurations.
pub mod huggingface_models {
    use super::ModelConfig;

    pub fn get_config(model: &str) -> ModelConfig {
        let (dimensions, max_chars) = match model {
            "sentence-transformers/all-mpnet-base-v2" => (768, 1500),
            _ => (384, 800),
        };
        ModelConfig {
            name: model.to_string(),
            dimensions,
            max_chars,
        }
    }
}

/// Model2Vec model configurations (static embeddings, 256d).
pub mod model2vec_models {
    use super::ModelConfig;

    pub fn get_config(model: &str) -> ModelConfig {
        ModelConfig {
            name: model.to_string(),
            dimensions: 256,
            max_chars: 2048,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_type_parsing() {
        assert_eq!("Ollama".parse::<EmbeddingProviderType>(), Ok(EmbeddingProviderType::Ollama));
        assert_eq!("hf".parse::<EmbeddingProviderType>(), Ok(EmbeddingProviderType::Huggingface));
        assert_eq!("off".parse::<EmbeddingProviderType>(), Ok(EmbeddingProviderType::None));
        assert!("gpt".parse::<EmbeddingProviderType>().is_err());
    }

    #[test]
    fn test_model_tables() {
        assert_eq!(ollama_models::get_config("mxbai-embed-large").dimensions, 1024);
        assert_eq!(ollama_models::get_config("nomic-embed-text").dimensions, 768);
        assert_eq!(huggingface_models::get_config("x/y").dimensions, 384);
        assert_eq!(model2vec_models::get_config("minishlab/potion-base-8M").dimensions, 256);
    }
}
