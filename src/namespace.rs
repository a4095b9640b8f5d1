//! Namespace routing.
//!
//! Every namespace lives in its own directory under the storage root with
//! its own database, file tree and sync state:
//!
//! ```text
//! <storage_root>/<namespace>/workitems.db
//! <storage_root>/<namespace>/{initiatives,epics,features,stories,tasks}/
//! <storage_root>/<namespace>/sync/
//! ```
//!
//! Workspaces are opened lazily and cached; nothing is shared between two
//! namespaces except the embedding provider.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::{EngineConfig, default_actor};
use crate::embeddings::{BoxedProvider, create_provider};
use crate::error::{Error, Result};
use crate::hierarchy::HierarchyEngine;
use crate::search::HybridSearch;
use crate::storage::RecordStore;
use crate::sync::{FileStore, SyncEngine};
use crate::validate::is_valid_namespace;

/// Database file name inside a namespace directory.
pub const DB_FILE: &str = "workitems.db";

/// Everything that operates on one namespace.
#[derive(Debug)]
pub struct Workspace {
    pub namespace: String,
    pub root: PathBuf,
    pub store: Arc<RecordStore>,
    pub hierarchy: HierarchyEngine,
    pub search: HybridSearch,
    pub sync: SyncEngine,
}

/// Opens and caches one [`Workspace`] per namespace.
#[derive(Debug)]
pub struct NamespaceRouter {
    config: EngineConfig,
    embedder: Option<Arc<BoxedProvider>>,
    actor: String,
    workspaces: Mutex<HashMap<String, Arc<Workspace>>>,
}

impl NamespaceRouter {
    /// Build a router with the embedding provider named by the configuration.
    ///
    /// Pre-declared namespaces get their directory created right away.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an invalid configuration or provider, or
    /// an I/O error if the storage root cannot be created.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let embedder = create_provider(&config.embedding)?.map(Arc::new);
        Self::with_embedder(config, embedder)
    }

    /// Build a router around an already constructed provider.
    ///
    /// # Errors
    ///
    /// See [`NamespaceRouter::new`].
    pub fn with_embedder(config: EngineConfig, embedder: Option<Arc<BoxedProvider>>) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.storage_root)?;
        for namespace in &config.namespaces {
            fs::create_dir_all(config.storage_root.join(namespace))?;
        }
        debug!(
            root = %config.storage_root.display(),
            embeddings = embedder.is_some(),
            "Namespace router ready"
        );
        Ok(Self {
            config,
            embedder,
            actor: default_actor(),
            workspaces: Mutex::new(HashMap::new()),
        })
    }

    /// Set the actor recorded on items and audit events.
    #[must_use]
    pub fn with_actor(mut self, actor: &str) -> Self {
        self.actor = actor.to_string();
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.config.storage_root
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Open an existing namespace.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` for a malformed name and
    /// `Error::NamespaceNotFound` if the namespace has no directory.
    pub async fn workspace(&self, namespace: &str) -> Result<Arc<Workspace>> {
        check_name(namespace)?;
        let mut cache = self.workspaces.lock().await;
        if let Some(ws) = cache.get(namespace) {
            return Ok(Arc::clone(ws));
        }
        if !self.root().join(namespace).is_dir() {
            return Err(Error::NamespaceNotFound {
                name: namespace.to_string(),
            });
        }
        let ws = Arc::new(self.open(namespace)?);
        cache.insert(namespace.to_string(), Arc::clone(&ws));
        Ok(ws)
    }

    /// Open a namespace, creating its directory on first use.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` for a malformed name, or an error if the
    /// database or file tree cannot be created.
    pub async fn workspace_or_create(&self, namespace: &str) -> Result<Arc<Workspace>> {
        check_name(namespace)?;
        let mut cache = self.workspaces.lock().await;
        if let Some(ws) = cache.get(namespace) {
            return Ok(Arc::clone(ws));
        }
        let dir = self.root().join(namespace);
        if !dir.is_dir() {
            fs::create_dir_all(&dir)?;
            info!(namespace, "Created namespace");
        }
        let ws = Arc::new(self.open(namespace)?);
        cache.insert(namespace.to_string(), Arc::clone(&ws));
        Ok(ws)
    }

    /// Namespace directories under the storage root, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage root cannot be listed.
    pub fn list_namespaces(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = fs::read_dir(self.root())?
            .filter_map(std::result::Result::ok)
            .filter(|e| e.path().is_dir())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| is_valid_namespace(n))
            .collect();
        names.sort();
        Ok(names)
    }

    fn open(&self, namespace: &str) -> Result<Workspace> {
        let root = self.root().join(namespace);
        let store = RecordStore::open(&root.join(DB_FILE), self.embedder.clone())?
            .with_actor(&self.actor)
            .with_retry_policy(self.config.retry);
        let store = Arc::new(store);

        let files = FileStore::new(&root);
        files.init()?;

        let hierarchy = HierarchyEngine::new(Arc::clone(&store));
        let search = HybridSearch::new(Arc::clone(&store), self.config.search.clone());
        let sync = SyncEngine::new(namespace, hierarchy.clone(), files, self.config.sync.clone())?;

        debug!(namespace, root = %root.display(), "Opened workspace");
        Ok(Workspace {
            namespace: namespace.to_string(),
            root,
            store,
            hierarchy,
            search,
            sync,
        })
    }
}

fn check_name(namespace: &str) -> Result<()> {
    if is_valid_namespace(namespace) {
        Ok(())
    } else {
        Err(Error::validation(
            "namespace",
            format!("'{namespace}' must be 1-64 characters of letters, digits, '_' or '-'"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ItemType, WorkItem};
    use tempfile::TempDir;

    fn router(temp: &TempDir) -> NamespaceRouter {
        NamespaceRouter::with_embedder(EngineConfig::with_root(temp.path()), None)
            .unwrap()
            .with_actor("tester")
    }

    #[tokio::test]
    async fn test_unknown_namespace_not_found() {
        let temp = TempDir::new().unwrap();
        let router = router(&temp);
        let err = router.workspace("missing").await.unwrap_err();
        assert!(matches!(err, Error::NamespaceNotFound { ref name } if name == "missing"));
    }

    #[tokio::test]
    async fn test_invalid_name_rejected() {
        let temp = TempDir::new().unwrap();
        let router = router(&temp);
        for bad in ["", "a/b", "..", "has space", &"x".repeat(65)] {
            let err = router.workspace_or_create(bad).await.unwrap_err();
            assert!(matches!(err, Error::Validation { ref field, .. } if field == "namespace"));
        }
    }

    #[tokio::test]
    async fn test_workspaces_cached_and_isolated() {
        let temp = TempDir::new().unwrap();
        let router = router(&temp);

        let alpha = router.workspace_or_create("alpha").await.unwrap();
        let again = router.workspace("alpha").await.unwrap();
        assert!(Arc::ptr_eq(&alpha, &again));

        let beta = router.workspace_or_create("beta").await.unwrap();
        alpha
            .store
            .put(WorkItem::new(ItemType::Epic, "Only in alpha").with_id("E1"))
            .await
            .unwrap();
        assert!(beta.store.get("E1").unwrap().is_none());
        assert_eq!(alpha.store.get("E1").unwrap().unwrap().title, "Only in alpha");

        assert!(temp.path().join("alpha").join(DB_FILE).is_file());
        assert!(temp.path().join("alpha").join("stories").is_dir());
        assert_eq!(router.list_namespaces().unwrap(), vec!["alpha", "beta"]);
    }

    #[tokio::test]
    async fn test_declared_namespaces_exist_at_startup() {
        let temp = TempDir::new().unwrap();
        let mut config = EngineConfig::with_root(temp.path());
        config.namespaces = vec!["default".into()];
        let router = NamespaceRouter::with_embedder(config, None).unwrap();

        assert_eq!(router.list_namespaces().unwrap(), vec!["default"]);
        assert_eq!(router.workspace("default").await.unwrap().namespace, "default");
    }
}
