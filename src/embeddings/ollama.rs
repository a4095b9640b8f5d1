//! Ollama embedding provider.
//!
//! Uses a local Ollama server for embedding generation.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::provider::EmbeddingProvider;
use super::types::{ollama_models, ProviderInfo};

/// Default Ollama endpoint.
pub const DEFAULT_ENDPOINT: &str = "http://localhost:11434";

/// Default Ollama embedding model.
pub const DEFAULT_MODEL: &str = "nomic-embed-text";

/// Ollama embedding provider.
pub struct OllamaProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dimensions: usize,
    max_chars: usize,
}

impl OllamaProvider {
    /// Create a provider for the given endpoint and model, falling back to
    /// the defaults for whichever is absent.
    pub fn new(endpoint: Option<String>, model: Option<String>) -> Self {
        let endpoint = endpoint
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string())
            .trim_end_matches('/')
            .to_string();
        let model = model.unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let config = ollama_models::get_config(&model);

        Self {
            client: http_client(),
            endpoint,
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
            .map_err(|e| Error::Embedding(format!("Ollama request failed: {e}")))?;

        if !response.status().is_success() {
            let error = response.text().await.unwrap_or_default();
            return Err(Error::Embedding(format!("Ollama embedding failed: {error}")));
        }

        let data: OllamaEmbedResponse = response
            .json()
            .await
            .map_err(|e| Error::Embedding(format!("Failed to parse Ollama response: {e}")))?;

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

/// Requests past this are abandoned; the record store then stores the
/// item without an embedding.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .unwrap_or_default()
}

impl EmbeddingProvider for OllamaProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "ollama".to_string(),
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
            .timeout(Duration::from_secs(2))
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

        // The model may be listed with a tag suffix, e.g. "nomic-embed-text:latest"
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
            .ok_or_else(|| Error::Embedding("No embeddings returned from Ollama".into()))
    }

    async fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.embed(EmbedInput::Batch(texts.to_vec())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ollama_provider_defaults() {
        let provider = OllamaProvider::new(None, None);
        let info = provider.info();
        assert_eq!(info.name, "ollama");
        assert_eq!(info.model, DEFAULT_MODEL);
        assert_eq!(info.dimensions, 768);
    }

    #[test]
    fn test_ollama_provider_custom_config() {
        let provider = OllamaProvider::new(
            Some("http://custom:11434/".to_string()),
            Some("mxbai-embed-large".to_string()),
        );
        assert_eq!(provider.endpoint, "http://custom:11434");
        let info = provider.info();
        assert_eq!(info.model, "mxbai-embed-large");
        assert_eq!(info.dimensions, 1024);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unavailable() {
        let provider = OllamaProvider::new(Some("http://127.0.0.1:9".to_string()), None);
        assert!(!provider.is_available().await);
        assert!(provider.generate_embedding("hello").await.is_err());
    }
}
