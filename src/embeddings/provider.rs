//! Embedding provider trait.
//!
//! Defines the interface that all embedding providers implement. Methods are
//! async so HTTP providers suspend while waiting on the network; local
//! providers return ready futures.

use crate::error::Result;
use super::types::ProviderInfo;

/// Trait for embedding providers.
///
/// Providers are stateless from the engine's point of view and are called
/// concurrently from search and record-store writes.
pub trait EmbeddingProvider: Send + Sync {
    /// Get provider metadata.
    fn info(&self) -> ProviderInfo;

    /// Check if the provider is reachable.
    fn is_available(&self) -> impl std::future::Future<Output = bool> + Send;

    /// Generate embedding for a single text.
    fn generate_embedding(&self, text: &str) -> impl std::future::Future<Output = Result<Vec<f32>>> + Send;

    /// Generate embeddings for multiple texts (batch).
    ///
    /// Default implementation calls `generate_embedding` for each text.
    fn generate_embeddings(&self, texts: &[&str]) -> impl std::future::Future<Output = Result<Vec<Vec<f32>>>> + Send {
        async move {
            let mut results = Vec::with_capacity(texts.len());
            for text in texts {
                results.push(self.generate_embedding(text).await?);
            }
            Ok(results)
        }
    }
}

type BoxFuture<'a, T> = std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Boxed provider for dynamic dispatch.
///
/// The trait uses `impl Future` returns, which are not object safe; this
/// wrapper erases the concrete provider so the engine can hold
/// `Arc<BoxedProvider>` chosen at runtime.
pub struct BoxedProvider {
    inner: Box<dyn EmbeddingProviderBoxed + Send + Sync>,
}

/// Object-safe version of EmbeddingProvider for boxing.
trait EmbeddingProviderBoxed: Send + Sync {
    fn info(&self) -> ProviderInfo;
    fn is_available_boxed(&self) -> BoxFuture<'_, bool>;
    fn generate_embedding_boxed(&self, text: String) -> BoxFuture<'_, Result<Vec<f32>>>;
    fn generate_embeddings_boxed(&self, texts: Vec<String>) -> BoxFuture<'_, Result<Vec<Vec<f32>>>>;
}

impl BoxedProvider {
    /// Create a new boxed provider.
    pub fn new<P: EmbeddingProvider + 'static>(provider: P) -> Self {
        Self {
            inner: Box::new(BoxedProviderWrapper(provider)),
        }
    }

    /// Get provider metadata.
    pub fn info(&self) -> ProviderInfo {
        self.inner.info()
    }

    /// Output vector length advertised by the provider.
    pub fn dimensions(&self) -> usize {
        self.inner.info().dimensions
    }

    /// Check if the provider is reachable.
    pub async fn is_available(&self) -> bool {
        self.inner.is_available_boxed().await
    }

    /// Generate embedding for a single text.
    pub async fn generate_embedding(&self, text: &str) -> Result<Vec<f32>> {
        self.inner.generate_embedding_boxed(text.to_string()).await
    }

    /// Generate embeddings for multiple texts (batch).
    pub async fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let owned = texts.iter().map(|s| (*s).to_string()).collect();
        self.inner.generate_embeddings_boxed(owned).await
    }
}

impl std::fmt::Debug for BoxedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let info = self.info();
        f.debug_struct("BoxedProvider")
            .field("name", &info.name)
            .field("model", &info.model)
            .finish()
    }
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
        // The owned string lives inside the future, so no borrow escapes.
        Box::pin(async move { self.0.generate_embedding(&text).await })
    }

    fn generate_embeddings_boxed(&self, texts: Vec<String>) -> BoxFuture<'_, Result<Vec<Vec<f32>>>> {
        Box::pin(async move {
            let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
            self.0.generate_embeddings(&refs).await
        })
    }
}
