//! HuggingFace Inference API embedding provider.
//!
//! Requires a HuggingFace API token.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::provider::EmbeddingProvider;
use super::types::{huggingface_models, ProviderInfo};

pub const DEFAULT_ENDPOINT: &str = "https://router.huggingface.co/hf-inference";
pub const DEFAULT_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";

/// HuggingFace Inference API embedding provider.
pub struct HuggingFaceProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    token: String,
    dimensions: usize,
    max_chars: usize,
}

impl HuggingFaceProvider {
    /// Create a provider.
    ///
    /// Returns `None` if no (non-empty) API token is supplied.
    pub fn new(endpoint: Option<String>, model: Option<String>, token: Option<String>) -> Option<Self> {
        let token = token.filter(|t| !t.is_empty())?;
        let endpoint = endpoint.unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        let model = model.unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let config = huggingface_models::get_config(&model);

        Some(Self {
            client: http_client(),
            endpoint,
            model,
            token,
            dimensions: config.dimensions,
            max_chars: config.max_chars,
        })
    }

    async fn request(&self, inputs: HfInputs<'_>) -> Result<HfEmbedResponse> {
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
            .header("Authorization", format!("Bearer {}", self.token))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Embedding(format!("HuggingFace request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error = response.text().await.unwrap_or_default();
            return Err(Error::Embedding(format!(
                "HuggingFace API error ({status}): {error}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| Error::Embedding(format!("Failed to parse HuggingFace response: {e}")))
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

/// Response shape varies by model.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HfEmbedResponse {
    /// `[[f32]]`: one row per input, or a nested single embedding
    Single(Vec<Vec<f32>>),
    /// `[[[f32]]]`: sentence-transformers batch
    Batch(Vec<Vec<Vec<f32>>>),
    /// `[f32]`
    Direct(Vec<f32>),
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

impl EmbeddingProvider for HuggingFaceProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "huggingface".to_string(),
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
        match self.request(HfInputs::Single(text)).await? {
            HfEmbedResponse::Single(nested) => nested
                .into_iter()
                .next()
                .ok_or_else(|| Error::Embedding("No embeddings in response".into())),
            HfEmbedResponse::Direct(embedding) => Ok(embedding),
            HfEmbedResponse::Batch(batch) => batch
                .into_iter()
                .next()
                .and_then(|nested| nested.into_iter().next())
                .ok_or_else(|| Error::Embedding("No embeddings in batch response".into())),
        }
    }

    async fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(match self.request(HfInputs::Batch(texts.to_vec())).await? {
            HfEmbedResponse::Batch(batch) => batch
                .into_iter()
                .filter_map(|nested| nested.into_iter().next())
                .collect(),
            HfEmbedResponse::Single(rows) => rows,
            HfEmbedResponse::Direct(embedding) => vec![embedding],
        })
    }
}
