use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{CriticalPath, Graph, HierarchyNode, ValidationReport, Violation};
use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::model::WorkItem;
use crate::storage::{Event, EventType, ItemGuard, RecordStore, WORK_ITEM_ENTITY};

/// Graph queries and edge-checked writes over one namespace.
///
/// Cloning shares the edge lock, so every clone of an engine for the same
/// store serializes edge changes against the others.
#[derive(Debug, Clone)]
pub struct HierarchyEngine {
    store: Arc<RecordStore>,
    /// Held while an edge-changing write is checked and committed, so two
    /// concurrent writes to different items cannot close a cycle together.
    /// Always taken after the item lock.
    edges: Arc<Mutex<()>>,
}

impl HierarchyEngine {
    #[must_use]
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self {
            store,
            edges: Arc::new(Mutex::new(())),
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    /// Snapshot of the namespace as an arena.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn graph(&self) -> Result<Graph> {
        Ok(Graph::from_items(self.store.all_items()?))
    }

    fn require<'g>(graph: &'g Graph, id: &str) -> Result<&'g WorkItem> {
        graph.get(id).ok_or_else(|| Error::NotFound { id: id.to_string() })
    }

    /// Children of `id`; with `recursive`, every descendant down to `max_depth`.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if `id` does not exist.
    pub fn get_children(&self, id: &str, recursive: bool, max_depth: Option<usize>) -> Result<Vec<WorkItem>> {
        let graph = self.graph()?;
        Self::require(&graph, id)?;
        let depth = if recursive { max_depth } else { Some(1) };
        Ok(graph
            .descendants(id, depth)
            .into_iter()
            .map(|(item, _)| item.clone())
            .collect())
    }

    /// Parent chain of `id`, nearest first.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if `id` does not exist.
    pub fn get_ancestors(&self, id: &str) -> Result<Vec<WorkItem>> {
        let graph = self.graph()?;
        Self::require(&graph, id)?;
        Ok(graph.ancestors(id).into_iter().cloned().collect())
    }

    /// Dependencies of `id`. `only_blocking` keeps those not yet completed.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if `id` does not exist.
    pub fn get_dependencies(&self, id: &str, transitive: bool, only_blocking: bool) -> Result<Vec<WorkItem>> {
        let graph = self.graph()?;
        Self::require(&graph, id)?;
        Ok(graph
            .dependencies(id, transitive)
            .into_iter()
            .filter(|dep| !only_blocking || dep.status.is_blocking())
            .cloned()
            .collect())
    }

    /// Items that depend on `id`.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if `id` does not exist.
    pub fn get_dependents(&self, id: &str, transitive: bool) -> Result<Vec<WorkItem>> {
        let graph = self.graph()?;
        Self::require(&graph, id)?;
        Ok(graph.dependents_of(id, transitive).into_iter().cloned().collect())
    }

    /// Validate the namespace, or only the listed ids.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn validate(&self, ids: Option<&[String]>, deadline: Deadline) -> Result<ValidationReport> {
        let graph = self.graph()?;
        let scope: Option<HashSet<String>> = ids.map(|ids| ids.iter().cloned().collect());
        let report = graph.validate(scope.as_ref(), deadline);

        info!(
            checked = report.checked,
            violations = report.violations.len(),
            cancelled = report.cancelled,
            "Validated hierarchy"
        );
        Ok(report)
    }

    /// Longest chain of unresolved dependencies starting at `id`.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if `id` does not exist.
    pub fn critical_path(&self, id: &str) -> Result<CriticalPath> {
        self.graph()?
            .critical_path(id)
            .ok_or_else(|| Error::NotFound { id: id.to_string() })
    }

    /// Nested view of the forest, or of the subtree under `root`.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if `root` is given and does not exist.
    pub fn full_hierarchy(&self, root: Option<&str>, max_depth: Option<usize>) -> Result<Vec<HierarchyNode>> {
        let graph = self.graph()?;
        if let Some(id) = root {
            Self::require(&graph, id)?;
        }
        Ok(graph.tree(root, max_depth))
    }

    /// Rank and existence check of the item's parent.
    ///
    /// # Errors
    ///
    /// Returns `Error::GraphViolation` with a `missing_reference` or
    /// `rank_skip` violation.
    pub fn check_parent(&self, item: &WorkItem) -> Result<()> {
        let parent = match item.parent_id.as_deref() {
            Some(parent_id) => self.store.get(parent_id)?,
            None => None,
        };
        let graph = Graph::from_items(parent);

        let mut violations = Vec::new();
        let probe = WorkItem {
            dependency_ids: BTreeSet::new(),
            ..item.clone()
        };
        graph.check_references(&probe, &mut violations);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(Error::GraphViolation(violations))
        }
    }

    /// Every violation that writing `item` would leave involving it.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn violations_for(&self, item: &WorkItem) -> Result<Vec<Violation>> {
        let mut graph = self.graph()?;
        graph.upsert(item.clone());

        let mut scope: HashSet<String> = graph.children(&item.id).iter().cloned().collect();
        scope.insert(item.id.clone());

        Ok(graph
            .validate(Some(&scope), Deadline::none())
            .violations
            .into_iter()
            .filter(|v| v.involves(&item.id))
            .collect())
    }

    /// Write an item after checking that it introduces no graph violation.
    ///
    /// # Errors
    ///
    /// Returns `Error::GraphViolation` and leaves the store unchanged if the
    /// write would break a rank, reference or acyclicity rule.
    pub async fn put_checked(&self, item: WorkItem) -> Result<WorkItem> {
        let guard = self.store.lock(&item.id).await;
        self.put_checked_locked(&guard, item).await
    }

    /// [`HierarchyEngine::put_checked`] for a caller already holding the item lock.
    ///
    /// # Errors
    ///
    /// See [`HierarchyEngine::put_checked`].
    pub async fn put_checked_locked(&self, guard: &ItemGuard, item: WorkItem) -> Result<WorkItem> {
        let existing = self.store.get(&item.id)?;
        let edges_changed = existing.as_ref().is_none_or(|e| {
            e.parent_id != item.parent_id
                || e.dependency_ids != item.dependency_ids
                || e.item_type != item.item_type
        });

        if !edges_changed {
            return self.store.put_locked(guard, item).await;
        }

        let _edges = self.edges.lock().await;
        let violations = self.violations_for(&item)?;
        if !violations.is_empty() {
            debug!(id = %item.id, violations = violations.len(), "Rejected write");
            return Err(Error::GraphViolation(violations));
        }
        self.store.put_locked(guard, item).await
    }

    /// Add the edge "`from` depends on `to`".
    ///
    /// Idempotent when the edge exists.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` for a missing endpoint and `Error::GraphViolation`
    /// (`self_dependency` or `circular_dependency`) when the edge would
    /// close a cycle.
    pub async fn add_dependency(&self, from: &str, to: &str) -> Result<WorkItem> {
        if from == to {
            return Err(Error::GraphViolation(vec![Violation::SelfDependency {
                id: from.to_string(),
            }]));
        }

        let guard = self.store.lock(from).await;
        let _edges = self.edges.lock().await;

        let mut item = self
            .store
            .get(from)?
            .ok_or_else(|| Error::NotFound { id: from.to_string() })?;
        if !self.store.exists(to)? {
            return Err(Error::NotFound { id: to.to_string() });
        }
        if item.dependency_ids.contains(to) {
            return Ok(item);
        }

        if let Some(path) = self.graph()?.cycle_if_added(from, to) {
            return Err(Error::GraphViolation(vec![Violation::CircularDependency { path }]));
        }

        item.dependency_ids.insert(to.to_string());
        item.touch();
        let stored = self.store.put_locked(&guard, item).await?;
        self.store.record_event(
            &Event::new(WORK_ITEM_ENTITY, from, EventType::DependencyAdded, self.store.actor())
                .with_values(None, Some(to.to_string())),
        )?;

        debug!(from, to, "Added dependency");
        Ok(stored)
    }

    /// Remove the edge "`from` depends on `to`". Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if `from` does not exist.
    pub async fn remove_dependency(&self, from: &str, to: &str) -> Result<bool> {
        let guard = self.store.lock(from).await;
        let mut item = self
            .store
            .get(from)?
            .ok_or_else(|| Error::NotFound { id: from.to_string() })?;

        if !item.dependency_ids.remove(to) {
            return Ok(false);
        }
        item.touch();
        self.store.put_locked(&guard, item).await?;
        self.store.record_event(
            &Event::new(WORK_ITEM_ENTITY, from, EventType::DependencyRemoved, self.store.actor())
                .with_values(Some(to.to_string()), None),
        )?;

        debug!(from, to, "Removed dependency");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ItemType, Status};

    async fn engine_with_scenario() -> HierarchyEngine {
        let store = Arc::new(RecordStore::open_memory(None).unwrap());
        let engine = HierarchyEngine::new(Arc::clone(&store));
        engine
            .put_checked(WorkItem::new(ItemType::Feature, "F1").with_id("F1"))
            .await
            .unwrap();
        engine
            .put_checked(WorkItem::new(ItemType::Story, "S1").with_id("S1").with_parent("F1"))
            .await
            .unwrap();
        engine
            .put_checked(
                WorkItem::new(ItemType::Story, "S2")
                    .with_id("S2")
                    .with_parent("F1")
                    .with_dependency("S1"),
            )
            .await
            .unwrap();
        engine
    }

    #[tokio::test]
    async fn test_children_and_validation() {
        let engine = engine_with_scenario().await;
        let mut children: Vec<String> = engine
            .get_children("F1", false, None)
            .unwrap()
            .into_iter()
            .map(|i| i.id)
            .collect();
        children.sort();
        assert_eq!(children, ["S1", "S2"]);

        let report = engine.validate(None, Deadline::none()).unwrap();
        assert!(report.is_valid());
    }

    #[tokio::test]
    async fn test_add_dependency_rejects_cycle() {
        let engine = engine_with_scenario().await;
        match engine.add_dependency("S1", "S2").await {
            Err(Error::GraphViolation(violations)) => {
                assert_eq!(
                    violations,
                    vec![Violation::CircularDependency {
                        path: vec!["S1".into(), "S2".into(), "S1".into()],
                    }]
                );
            }
            other => panic!("expected GraphViolation, got {other:?}"),
        }
        assert!(engine.store().get("S1").unwrap().unwrap().dependency_ids.is_empty());
        assert!(engine.validate(None, Deadline::none()).unwrap().is_valid());
    }

    #[tokio::test]
    async fn test_add_and_remove_dependency() {
        let engine = engine_with_scenario().await;
        engine
            .put_checked(WorkItem::new(ItemType::Story, "S3").with_id("S3").with_parent("F1"))
            .await
            .unwrap();

        let updated = engine.add_dependency("S3", "S2").await.unwrap();
        assert!(updated.dependency_ids.contains("S2"));
        engine.add_dependency("S3", "S2").await.unwrap();

        let events = engine.store().events_for("S3", None).unwrap();
        assert_eq!(
            events.iter().filter(|e| e.event_type == EventType::DependencyAdded).count(),
            1
        );

        let transitive: Vec<String> = engine
            .get_dependencies("S3", true, false)
            .unwrap()
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(transitive, ["S2", "S1"]);

        assert!(engine.remove_dependency("S3", "S2").await.unwrap());
        assert!(!engine.remove_dependency("S3", "S2").await.unwrap());
        assert!(matches!(
            engine.add_dependency("S3", "missing").await,
            Err(Error::NotFound { .. })
        ));
        assert!(matches!(
            engine.add_dependency("S3", "S3").await,
            Err(Error::GraphViolation(_))
        ));
    }

    #[tokio::test]
    async fn test_put_checked_rejects_rank_skip() {
        let engine = engine_with_scenario().await;
        let bad = WorkItem::new(ItemType::Task, "T").with_id("T1").with_parent("F1");
        match engine.put_checked(bad).await {
            Err(Error::GraphViolation(v)) => assert_eq!(v[0].kind(), "rank_skip"),
            other => panic!("expected rank_skip, got {other:?}"),
        }
        assert!(engine.store().get("T1").unwrap().is_none());

        let orphan = WorkItem::new(ItemType::Task, "T").with_id("T2").with_parent("S404");
        assert!(matches!(engine.put_checked(orphan).await, Err(Error::GraphViolation(_))));
    }

    #[tokio::test]
    async fn test_check_parent() {
        let engine = engine_with_scenario().await;
        let ok = WorkItem::new(ItemType::Task, "T").with_parent("S1");
        assert!(engine.check_parent(&ok).is_ok());

        let skip = WorkItem::new(ItemType::Task, "T").with_parent("F1");
        assert!(engine.check_parent(&skip).is_err());

        let missing = WorkItem::new(ItemType::Task, "T").with_parent("nope");
        match engine.check_parent(&missing) {
            Err(Error::GraphViolation(v)) => assert_eq!(v[0].kind(), "missing_reference"),
            other => panic!("expected missing_reference, got {other:?}"),
        }

        let root = WorkItem::new(ItemType::Initiative, "I");
        assert!(engine.check_parent(&root).is_ok());
    }

    #[tokio::test]
    async fn test_status_update_skips_edge_check() {
        let engine = engine_with_scenario().await;
        let s1 = engine.store().get("S1").unwrap().unwrap().with_status(Status::Completed);
        engine.put_checked(s1).await.unwrap();

        let blocking = engine.get_dependencies("S2", false, true).unwrap();
        assert!(blocking.is_empty());
        assert_eq!(engine.critical_path("S2").unwrap().path, ["S2"]);
    }

    #[tokio::test]
    async fn test_ancestors_dependents_and_tree() {
        let engine = engine_with_scenario().await;
        let ancestors = engine.get_ancestors("S2").unwrap();
        assert_eq!(ancestors[0].id, "F1");
        assert_eq!(engine.get_dependents("S1", false).unwrap()[0].id, "S2");

        let tree = engine.full_hierarchy(None, None).unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].children.len(), 2);
        assert!(matches!(
            engine.full_hierarchy(Some("nope"), None),
            Err(Error::NotFound { .. })
        ));
        assert!(matches!(engine.get_children("nope", true, None), Err(Error::NotFound { .. })));
    }
}
