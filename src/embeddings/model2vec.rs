//! Model2Vec embedding provider.
//!
//! Local static embeddings: pre-computed token vectors averaged per input,
//! no neural inference. The model is fetched from the HuggingFace Hub on
//! first load and cached by `model2vec-rs`.

use crate::error::{Error, Result};
use model2vec_rs::model::StaticModel;
use std::sync::Arc;

use super::provider::EmbeddingProvider;
use super::types::{model2vec_models, ProviderInfo};

pub const DEFAULT_MODEL: &str = "minishlab/potion-base-8M";

/// Model2Vec embedding provider.
pub struct Model2VecProvider {
    model: Arc<StaticModel>,
    model_name: String,
    dimensions: usize,
    max_chars: usize,
}

impl Model2VecProvider {
    /// Load a model, defaulting to `minishlab/potion-base-8M`.
    ///
    /// # Errors
    ///
    /// Returns an error if the model cannot be loaded.
    pub fn new(model_name: Option<String>) -> Result<Self> {
        let model_name = model_name.unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let config = model2vec_models::get_config(&model_name);

        let model = StaticModel::from_pretrained(&model_name, None, None, None).map_err(|e| {
            Error::Embedding(format!("Failed to load Model2Vec model '{model_name}': {e}"))
        })?;

        Ok(Self {
            model: Arc::new(model),
            model_name,
            dimensions: config.dimensions,
            max_chars: config.max_chars,
        })
    }
}

impl EmbeddingProvider for Model2VecProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "model2vec".to_string(),
            model: self.model_name.clone(),
            dimensions: self.dimensions,
            max_chars: self.max_chars,
        }
    }

    async fn is_available(&self) -> bool {
        // Loaded at construction
        true
    }

    async fn generate_embedding(&self, text: &str) -> Result<Vec<f32>> {
        let sentences = vec![text.to_string()];
        self.model
            .encode(&sentences)
            .into_iter()
            .next()
            .ok_or_else(|| Error::Embedding("Model2Vec returned no embeddings".into()))
    }

    async fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let sentences: Vec<String> = texts.iter().map(|&s| s.to_string()).collect();
        Ok(self.model.encode(&sentences))
    }
}
