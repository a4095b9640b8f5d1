//! Embedding providers.
//!
//! Turns text into fixed-length vectors for semantic search:
//! - **Ollama** (local HTTP server)
//! - **HuggingFace** (hosted inference API, requires a token)
//! - **Model2Vec** (local static embeddings)
//! - **Hashing** (deterministic feature hashing, offline)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐
//! │ RecordStore │   │ HybridSearch │
//! └──────┬──────┘   └──────┬───────┘
//!        └────────┬────────┘
//!                 ▼
//!       ┌───────────────────┐
//!       │ Arc<BoxedProvider>│  ← chosen by create_provider(&EmbeddingConfig)
//!       └─────────┬─────────┘
//!     ┌──────┬────┴─────┬─────────┐
//!     ▼      ▼          ▼         ▼
//!  Ollama  HuggingFace Model2Vec Hashing
//! ```
//!
//! Providers are stateless and safe to call concurrently.

pub mod factory;
pub mod hashing;
pub mod huggingface;
pub mod model2vec;
pub mod ollama;
pub mod provider;
pub mod text;
pub mod types;

pub use factory::create_provider;
pub use hashing::HashingProvider;
pub use huggingface::HuggingFaceProvider;
pub use model2vec::Model2VecProvider;
pub use ollama::OllamaProvider;
pub use provider::{BoxedProvider, EmbeddingProvider};
pub use text::{prepare_item_text, tokenize, truncate_for_model};
pub use types::{EmbeddingProviderType, ModelConfig, ProviderInfo};
