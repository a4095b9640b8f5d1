//! Embedding provider creation from configuration.

use tracing::{debug, warn};

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};

use super::hashing::HashingProvider;
use super::huggingface::HuggingFaceProvider;
use super::model2vec::Model2VecProvider;
use super::ollama::OllamaProvider;
use super::provider::BoxedProvider;
use super::types::EmbeddingProviderType;

/// Create the provider named by the configuration.
///
/// Returns `Ok(None)` when embeddings are disabled. HTTP providers are
/// created without probing the server; an unreachable server surfaces later
/// as an embedding error, which search turns into keyword degradation.
///
/// # Errors
///
/// Returns `Error::Config` if HuggingFace is selected without a token, or
/// `Error::Embedding` if a Model2Vec model cannot be loaded.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Option<BoxedProvider>> {
    let provider = match config.provider {
        EmbeddingProviderType::None => {
            debug!("Embeddings disabled");
            return Ok(None);
        }
        EmbeddingProviderType::Hashing => BoxedProvider::new(HashingProvider::new(
            config
                .dimensions
                .unwrap_or(super::hashing::DEFAULT_DIMENSIONS),
        )),
        EmbeddingProviderType::Ollama => BoxedProvider::new(OllamaProvider::new(
            config.endpoint.clone(),
            config.model.clone(),
        )),
        EmbeddingProviderType::Huggingface => {
            let provider = HuggingFaceProvider::new(
                config.endpoint.clone(),
                config.model.clone(),
                config.token.clone(),
            )
            .ok_or_else(|| {
                Error::Config("huggingface embedding provider requires a token (HF_TOKEN)".into())
            })?;
            BoxedProvider::new(provider)
        }
        EmbeddingProviderType::Model2vec => {
            BoxedProvider::new(Model2VecProvider::new(config.model.clone())?)
        }
    };

    let info = provider.info();
    if let Some(expected) = config.dimensions {
        if expected != info.dimensions {
            warn!(
                provider = %info.name,
                configured = expected,
                actual = info.dimensions,
                "Configured embedding dimensions differ from the model's"
            );
        }
    }
    debug!(provider = %info.name, model = %info.model, "Embedding provider ready");

    Ok(Some(provider))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_disables_embeddings() {
        let config = EmbeddingConfig {
            provider: EmbeddingProviderType::None,
            ..EmbeddingConfig::default()
        };
        assert!(create_provider(&config).unwrap().is_none());
    }

    #[test]
    fn test_hashing_uses_configured_dimensions() {
        let config = EmbeddingConfig {
            provider: EmbeddingProviderType::Hashing,
            dimensions: Some(64),
            ..EmbeddingConfig::default()
        };
        let provider = create_provider(&config).unwrap().unwrap();
        assert_eq!(provider.dimensions(), 64);
    }

    #[test]
    fn test_huggingface_without_token_is_config_error() {
        let config = EmbeddingConfig {
            provider: EmbeddingProviderType::Huggingface,
            token: None,
            ..EmbeddingConfig::default()
        };
        assert!(matches!(create_provider(&config), Err(Error::Config(_))));
    }
}
