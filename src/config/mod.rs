//! Engine configuration.
//!
//! The host loads an [`EngineConfig`] and passes it to constructors; nothing
//! in the engine reads the environment on its own. Configuration is JSON:
//!
//! ```json
//! {
//!   "storage_root": "/var/lib/workgraph",
//!   "embedding": { "provider": "ollama", "model": "nomic-embed-text" },
//!   "search": { "hybrid_alpha": 0.6, "min_score": 0.0, "candidate_k": 50 },
//!   "sync": { "max_concurrency": 8, "default_strategy": "auto_merge" },
//!   "retry": { "max_attempts": 3, "base_delay_ms": 50, "max_delay_ms": 2000 },
//!   "namespaces": ["default"]
//! }
//! ```
//!
//! Every section is optional. Environment overrides are applied explicitly
//! through [`EngineConfig::apply_env`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::embeddings::EmbeddingProviderType;
use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use crate::sync::MergeStrategy;

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding one subdirectory per namespace.
    pub storage_root: PathBuf,
    pub embedding: EmbeddingConfig,
    pub search: SearchConfig,
    pub sync: SyncConfig,
    pub retry: RetryPolicy,
    /// Namespaces created eagerly at startup.
    pub namespaces: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage_root: default_storage_root().unwrap_or_else(|| PathBuf::from(".workgraph")),
            embedding: EmbeddingConfig::default(),
            search: SearchConfig::default(),
            sync: SyncConfig::default(),
            retry: RetryPolicy::default(),
            namespaces: Vec::new(),
        }
    }
}

/// Embedding provider selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProviderType,
    pub model: Option<String>,
    pub endpoint: Option<String>,
    pub token: Option<String>,
    /// Expected vector length; the hashing provider uses it as its size.
    pub dimensions: Option<usize>,
}

/// Hybrid search tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Weight of the semantic score in hybrid mode (0..=1).
    pub hybrid_alpha: f64,
    /// Results scoring below this are dropped.
    pub min_score: f64,
    /// Candidates fetched per mode before merging.
    pub candidate_k: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            hybrid_alpha: 0.6,
            min_score: 0.0,
            candidate_k: 50,
        }
    }
}

/// Sync pass tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Items of one rank reconciled in parallel.
    pub max_concurrency: usize,
    pub default_strategy: MergeStrategy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            default_strategy: MergeStrategy::AutoMerge,
        }
    }
}

impl EngineConfig {
    /// Configuration rooted at an explicit directory, other sections default.
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: root.into(),
            ..Self::default()
        }
    }

    /// Load configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the file cannot be read, does not parse,
    /// or fails [`EngineConfig::validate`].
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {e}", path.display())))?;
        config.validate()?;
        debug!(path = %path.display(), "Loaded engine configuration");
        Ok(config)
    }

    /// Apply overrides from the process environment.
    ///
    /// Recognized: `WORKGRAPH_ROOT`, `WORKGRAPH_EMBEDDING_PROVIDER`,
    /// `OLLAMA_ENDPOINT`, `OLLAMA_MODEL`, `HF_TOKEN`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an unknown provider name.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (the environment in
    /// production, a map in tests).
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an unknown provider name.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(root) = get("WORKGRAPH_ROOT") {
            self.storage_root = PathBuf::from(root);
        }
        if let Some(provider) = get("WORKGRAPH_EMBEDDING_PROVIDER") {
            self.embedding.provider = provider.parse().map_err(Error::Config)?;
        }

        match self.embedding.provider {
            EmbeddingProviderType::Ollama => {
                if let Some(endpoint) = get("OLLAMA_ENDPOINT") {
                    self.embedding.endpoint = Some(endpoint);
                }
                if let Some(model) = get("OLLAMA_MODEL") {
                    self.embedding.model = Some(model);
                }
            }
            EmbeddingProviderType::Huggingface => {
                if let Some(token) = get("HF_TOKEN") {
                    self.embedding.token = Some(token);
                }
            }
            _ => {}
        }

        self.validate()
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` naming the first out-of-range setting.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.search.hybrid_alpha) {
            return Err(Error::Config(format!(
                "search.hybrid_alpha must be within 0..=1, got {}",
                self.search.hybrid_alpha
            )));
        }
        if self.sync.max_concurrency == 0 {
            return Err(Error::Config("sync.max_concurrency must be at least 1".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be at least 1".into()));
        }
        if let Some(bad) = self
            .namespaces
            .iter()
            .find(|ns| !crate::validate::is_valid_namespace(ns))
        {
            return Err(Error::Config(format!("invalid namespace name '{bad}'")));
        }
        Ok(())
    }
}

/// Platform data directory for the engine (e.g. `~/.local/share/workgraph`).
#[must_use]
pub fn default_storage_root() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "workgraph").map(|d| d.data_dir().to_path_buf())
}

/// Get the default actor name recorded on items and audit events.
///
/// Priority:
/// 1. `WORKGRAPH_ACTOR` environment variable
/// 2. System username
/// 3. "unknown"
#[must_use]
pub fn default_actor() -> String {
    ["WORKGRAPH_ACTOR", "USER", "USERNAME"]
        .into_iter()
        .find_map(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::with_root("/tmp/wg");
        assert_eq!(config.storage_root, PathBuf::from("/tmp/wg"));
        assert!((config.search.hybrid_alpha - 0.6).abs() < f64::EPSILON);
        assert_eq!(config.sync.default_strategy, MergeStrategy::AutoMerge);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_json() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"storage_root": "/data", "search": {"hybrid_alpha": 0.25}, "namespaces": ["team-a"]}"#,
        )
        .unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.storage_root, PathBuf::from("/data"));
        assert!((config.search.hybrid_alpha - 0.25).abs() < f64::EPSILON);
        assert_eq!(config.search.candidate_k, 50);
        assert_eq!(config.namespaces, vec!["team-a"]);
    }

    #[test]
    fn test_load_rejects_out_of_range() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"search": {"hybrid_alpha": 2.0}}"#).unwrap();
        assert!(matches!(EngineConfig::load(&path), Err(Error::Config(_))));

        std::fs::write(&path, r#"{"namespaces": ["../etc"]}"#).unwrap();
        assert!(matches!(EngineConfig::load(&path), Err(Error::Config(_))));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("WORKGRAPH_ROOT", "/override"),
            ("WORKGRAPH_EMBEDDING_PROVIDER", "ollama"),
            ("OLLAMA_ENDPOINT", "http://gpu:11434"),
            ("HF_TOKEN", "ignored-for-ollama"),
        ]
        .into_iter()
        .collect();

        let mut config = EngineConfig::with_root("/tmp");
        config
            .apply_overrides(|k| vars.get(k).map(ToString::to_string))
            .unwrap();

        assert_eq!(config.storage_root, PathBuf::from("/override"));
        assert_eq!(config.embedding.provider, EmbeddingProviderType::Ollama);
        assert_eq!(config.embedding.endpoint.as_deref(), Some("http://gpu:11434"));
        assert!(config.embedding.token.is_none());
    }

    #[test]
    fn test_unknown_provider_override() {
        let mut config = EngineConfig::with_root("/tmp");
        let result = config.apply_overrides(|k| {
            (k == "WORKGRAPH_EMBEDDING_PROVIDER").then(|| "gpt".to_string())
        });
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
