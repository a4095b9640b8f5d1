//! Tool call surface.
//!
//! Each tool takes an explicit namespace and a typed request, and returns a
//! serializable response. [`Tools::call`] is the JSON entry point: it parses
//! the arguments, runs the tool and wraps the outcome as
//! `{"ok": true, "result": ...}` or the error's structured JSON with
//! `"ok": false`.
//!
//! Status, type and priority strings are normalized here, so callers may
//! pass synonyms such as `done`, `wip` or `p0`.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::hierarchy::{CriticalPath, HierarchyNode, ValidationReport};
use crate::model::{ExecutionLog, ItemType, Priority, Status, WorkItem};
use crate::namespace::{NamespaceRouter, Workspace};
use crate::search::{SearchOutcome, SearchRequest};
use crate::storage::{Event, ItemFilter, RecordStore, Sort};
use crate::sync::{
    BackupInfo, CancellationFlag, MergeStrategy, Resolution, StatusReport, SyncDirection,
    SyncOptions, SyncReport, SyncScope, SyncStatus,
};
use crate::validate::{
    describe_invalid, find_similar_ids, is_valid_item_id, normalize_priority, normalize_status,
    normalize_type,
};

const DEFAULT_PAGE: usize = 50;
const MAX_SUGGESTIONS: usize = 3;
const EVENTS_PER_ITEM: u32 = 20;

/// Tool names accepted by [`Tools::call`].
pub const TOOL_NAMES: [&str; 6] = [
    "manage_work_item",
    "get_work_item",
    "search_content",
    "get_hierarchy",
    "sync_data",
    "resolve_conflict",
];

// ── Requests and responses ────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManageAction {
    Create,
    Update,
    Delete,
}

/// Create, update or delete one item.
///
/// On update only the fields present are changed; an empty `parent_id`
/// detaches the item from its parent.
#[derive(Debug, Clone, Deserialize)]
pub struct ManageRequest {
    pub action: ManageAction,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, alias = "type")]
    pub item_type: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default, alias = "dependencies")]
    pub dependency_ids: Option<Vec<String>>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub acceptance_criteria: Option<Vec<String>>,
    #[serde(default)]
    pub effort_estimate: Option<f64>,
}

impl ManageRequest {
    #[must_use]
    pub fn create(item_type: &str, title: &str) -> Self {
        Self {
            item_type: Some(item_type.to_string()),
            title: Some(title.to_string()),
            ..Self::blank(ManageAction::Create)
        }
    }

    #[must_use]
    pub fn update(id: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            ..Self::blank(ManageAction::Update)
        }
    }

    #[must_use]
    pub fn delete(id: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            ..Self::blank(ManageAction::Delete)
        }
    }

    const fn blank(action: ManageAction) -> Self {
        Self {
            action,
            id: None,
            item_type: None,
            title: None,
            description: None,
            status: None,
            priority: None,
            parent_id: None,
            dependency_ids: None,
            tags: None,
            acceptance_criteria: None,
            effort_estimate: None,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    #[must_use]
    pub fn with_parent(mut self, parent_id: &str) -> Self {
        self.parent_id = Some(parent_id.to_string());
        self
    }

    #[must_use]
    pub fn with_dependencies(mut self, ids: &[&str]) -> Self {
        self.dependency_ids = Some(ids.iter().map(ToString::to_string).collect());
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: &str) -> Self {
        self.status = Some(status.to_string());
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: &str) -> Self {
        self.priority = Some(priority.to_string());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ManageResponse {
    pub action: ManageAction,
    /// The stored item after create or update.
    pub item: Option<WorkItem>,
    /// Id removed by a delete.
    pub deleted: Option<String>,
}

/// Raw list filters; strings accept the same synonyms as writes.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GetFilters {
    #[serde(alias = "item_type", alias = "type")]
    pub item_types: Vec<String>,
    #[serde(alias = "status")]
    pub statuses: Vec<String>,
    #[serde(alias = "priority")]
    pub priorities: Vec<String>,
    pub tags: Vec<String>,
    pub parent_id: Option<String>,
    pub ids: Option<Vec<String>>,
    pub created_after: Option<i64>,
    pub created_before: Option<i64>,
    pub updated_after: Option<i64>,
    pub updated_before: Option<i64>,
}

impl GetFilters {
    fn to_filter(&self) -> Result<ItemFilter> {
        Ok(ItemFilter {
            item_types: self
                .item_types
                .iter()
                .map(|t| parse_type(t))
                .collect::<Result<_>>()?,
            statuses: self
                .statuses
                .iter()
                .map(|s| parse_status(s))
                .collect::<Result<_>>()?,
            priorities: self
                .priorities
                .iter()
                .map(|p| parse_priority(p))
                .collect::<Result<_>>()?,
            tags: self.tags.clone(),
            parent_id: self.parent_id.clone(),
            ids: self.ids.clone(),
            created_after: self.created_after,
            created_before: self.created_before,
            updated_after: self.updated_after,
            updated_before: self.updated_before,
        })
    }
}

/// Fetch one item by id, or a filtered page of items.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GetRequest {
    pub id: Option<String>,
    pub filters: GetFilters,
    pub sort: Sort,
    pub limit: usize,
    pub offset: usize,
    pub include_children: bool,
    pub include_metadata: bool,
}

impl Default for GetRequest {
    fn default() -> Self {
        Self {
            id: None,
            filters: GetFilters::default(),
            sort: Sort::default(),
            limit: DEFAULT_PAGE,
            offset: 0,
            include_children: false,
            include_metadata: false,
        }
    }
}

impl GetRequest {
    #[must_use]
    pub fn by_id(id: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemMetadata {
    pub created_at: i64,
    pub updated_at: i64,
    pub checksum: String,
    /// `None` when the item has never been through a sync pass.
    pub sync_status: Option<SyncStatus>,
    pub execution_logs: Vec<ExecutionLog>,
    pub events: Vec<Event>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemView {
    #[serde(flatten)]
    pub item: WorkItem,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<WorkItem>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ItemMetadata>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GetResponse {
    pub items: Vec<ItemView>,
    pub count: usize,
    /// Close matches for an id lookup that found nothing.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub similar: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HierarchyRelation {
    #[default]
    Children,
    Ancestors,
    Dependencies,
    Dependents,
    FullHierarchy,
    CriticalPath,
}

impl HierarchyRelation {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Children => "children",
            Self::Ancestors => "ancestors",
            Self::Dependencies => "dependencies",
            Self::Dependents => "dependents",
            Self::FullHierarchy => "full_hierarchy",
            Self::CriticalPath => "critical_path",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HierarchyAction {
    #[default]
    Get,
    Add,
    Remove,
    Validate,
}

/// Read or edit one relation of an item, or validate the namespace.
///
/// `add`/`remove` on `children` re-parent `target_id` under `id` or detach
/// it; on `dependencies` they add or drop the edge "`id` depends on
/// `target_id`".
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HierarchyRequest {
    pub id: Option<String>,
    pub relation: HierarchyRelation,
    pub action: HierarchyAction,
    pub max_depth: Option<usize>,
    pub target_id: Option<String>,
    pub recursive: bool,
    pub transitive: bool,
    pub only_blocking: bool,
    pub timeout_ms: Option<u64>,
}

impl HierarchyRequest {
    #[must_use]
    pub fn get(id: &str, relation: HierarchyRelation) -> Self {
        Self {
            id: Some(id.to_string()),
            relation,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn edit(action: HierarchyAction, id: &str, relation: HierarchyRelation, target_id: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            relation,
            action,
            target_id: Some(target_id.to_string()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn validate() -> Self {
        Self {
            action: HierarchyAction::Validate,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HierarchyResponse {
    Items { items: Vec<WorkItem> },
    Tree { nodes: Vec<HierarchyNode> },
    Item { item: WorkItem },
    Removed { removed: bool },
    Validation { report: ValidationReport },
    Path { path: CriticalPath },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    #[default]
    Sync,
    Status,
    Backup,
    Restore,
}

/// Run a sync pass, report status, or take/restore a snapshot.
///
/// `ids` and `item_type` narrow the scope; at most one may be given.
/// `backup` names the snapshot to restore, defaulting to the newest.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SyncRequest {
    pub action: SyncAction,
    pub direction: Option<String>,
    pub strategy: Option<String>,
    pub ids: Option<Vec<String>>,
    #[serde(alias = "type")]
    pub item_type: Option<String>,
    pub backup: Option<String>,
}

impl SyncRequest {
    #[must_use]
    pub fn new(action: SyncAction) -> Self {
        Self {
            action,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_direction(mut self, direction: &str) -> Self {
        self.direction = Some(direction.to_string());
        self
    }

    #[must_use]
    pub fn with_strategy(mut self, strategy: &str) -> Self {
        self.strategy = Some(strategy.to_string());
        self
    }

    fn options(&self) -> Result<SyncOptions> {
        let direction = self
            .direction
            .as_deref()
            .map(str::parse::<SyncDirection>)
            .transpose()?
            .unwrap_or_default();
        let mut options = SyncOptions::new(direction).with_scope(self.scope()?);
        if let Some(strategy) = self.strategy.as_deref() {
            options = options.with_strategy(strategy.parse::<MergeStrategy>()?);
        }
        Ok(options)
    }

    fn scope(&self) -> Result<SyncScope> {
        match (&self.ids, &self.item_type) {
            (Some(_), Some(_)) => Err(Error::validation(
                "scope",
                "give either ids or item_type, not both",
            )),
            (Some(ids), None) => Ok(SyncScope::Ids(ids.clone())),
            (None, Some(t)) => Ok(SyncScope::ItemType(parse_type(t)?)),
            (None, None) => Ok(SyncScope::All),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SyncResponse {
    Sync { report: SyncReport },
    Status { report: StatusReport, backups: Vec<String> },
    Backup { backup: BackupInfo },
    Restore { backup: BackupInfo },
}

#[derive(Debug, Clone, Deserialize)]
struct ResolveArgs {
    id: String,
    resolution: Resolution,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolveResponse {
    pub id: String,
    pub resolution: &'static str,
    /// Surviving content; `None` when the item was deleted.
    pub item: Option<WorkItem>,
}

// ── Tools ─────────────────────────────────────────────────────

/// The call surface over a [`NamespaceRouter`].
#[derive(Debug, Clone)]
pub struct Tools {
    router: Arc<NamespaceRouter>,
}

impl Tools {
    #[must_use]
    pub fn new(router: Arc<NamespaceRouter>) -> Self {
        Self { router }
    }

    #[must_use]
    pub fn router(&self) -> &NamespaceRouter {
        &self.router
    }

    /// Run a tool by name with JSON arguments.
    ///
    /// Never fails: errors come back as `{"ok": false, "error": {...}}`.
    pub async fn call(&self, tool: &str, namespace: &str, args: Value) -> Value {
        match self.dispatch(tool, namespace, args).await {
            Ok(result) => serde_json::json!({ "ok": true, "result": result }),
            Err(err) => {
                warn!(tool, namespace, code = err.error_code().as_str(), "Tool call failed: {err}");
                let mut body = err.to_structured_json();
                body["ok"] = Value::Bool(false);
                body
            }
        }
    }

    async fn dispatch(&self, tool: &str, namespace: &str, args: Value) -> Result<Value> {
        debug!(tool, namespace, "Tool call");
        let value = match tool {
            "manage_work_item" => {
                serde_json::to_value(self.manage_work_item(namespace, parse_args(args)?).await?)?
            }
            "get_work_item" => {
                serde_json::to_value(self.get_work_item(namespace, parse_args_or_default(args)?).await?)?
            }
            "search_content" => {
                serde_json::to_value(self.search_content(namespace, parse_args(args)?).await?)?
            }
            "get_hierarchy" => {
                serde_json::to_value(self.get_hierarchy(namespace, parse_args_or_default(args)?).await?)?
            }
            "sync_data" => {
                serde_json::to_value(self.sync_data(namespace, parse_args_or_default(args)?).await?)?
            }
            "resolve_conflict" => {
                let ResolveArgs { id, resolution } = parse_args(args)?;
                serde_json::to_value(self.resolve_conflict(namespace, &id, resolution).await?)?
            }
            other => {
                return Err(Error::validation(
                    "tool",
                    format!("unknown tool '{other}', expected one of: {}", TOOL_NAMES.join(", ")),
                ));
            }
        };
        Ok(value)
    }

    /// Create, update or delete an item.
    ///
    /// Writes go through the hierarchy engine, so a change that breaks a
    /// rank, reference or cycle rule is rejected with `GraphViolation`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` for missing or unknown field values,
    /// `Error::NotFoundSimilar`/`NotFound` for an unknown id,
    /// `Error::GraphViolation` for a structural problem and
    /// `Error::HasDependents` for a delete that would orphan items.
    pub async fn manage_work_item(&self, namespace: &str, request: ManageRequest) -> Result<ManageResponse> {
        match request.action {
            ManageAction::Create => {
                let ws = self.router.workspace_or_create(namespace).await?;
                let item = create_item(&ws, &request).await?;
                Ok(ManageResponse {
                    action: ManageAction::Create,
                    item: Some(strip(item)),
                    deleted: None,
                })
            }
            ManageAction::Update => {
                let ws = self.router.workspace(namespace).await?;
                let id = required_id(request.id.as_deref())?;
                let guard = ws.store.lock(id).await;
                let mut item = ws.store.get(id)?.ok_or_else(|| not_found(&ws.store, id))?;
                apply_fields(&mut item, &request)?;
                item.touch();
                let stored = ws.hierarchy.put_checked_locked(&guard, item).await?;
                Ok(ManageResponse {
                    action: ManageAction::Update,
                    item: Some(strip(stored)),
                    deleted: None,
                })
            }
            ManageAction::Delete => {
                let ws = self.router.workspace(namespace).await?;
                let id = required_id(request.id.as_deref())?;
                if !ws.store.delete(id).await? {
                    return Err(not_found(&ws.store, id));
                }
                Ok(ManageResponse {
                    action: ManageAction::Delete,
                    item: None,
                    deleted: Some(id.to_string()),
                })
            }
        }
    }

    /// Fetch an item by id, or a filtered, sorted page.
    ///
    /// An unknown id yields an empty response carrying similar ids.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` for an unknown filter value.
    pub async fn get_work_item(&self, namespace: &str, request: GetRequest) -> Result<GetResponse> {
        let ws = self.router.workspace(namespace).await?;

        let items = match request.id.as_deref() {
            Some(id) => match ws.store.get(id)? {
                Some(item) => vec![item],
                None => {
                    debug!(id, "Lookup found no item");
                    return Ok(GetResponse {
                        items: Vec::new(),
                        count: 0,
                        similar: similar_ids(&ws.store, id),
                    });
                }
            },
            None => {
                let filter = request.filters.to_filter()?;
                ws.store.scan(&filter, request.sort, Some(request.limit), request.offset)?
            }
        };

        let sync_states: HashMap<String, SyncStatus> = if request.include_metadata && !items.is_empty() {
            let ids = items.iter().map(|i| i.id.clone()).collect();
            ws.sync
                .status(&SyncScope::Ids(ids))?
                .items
                .into_iter()
                .map(|s| (s.id, s.status))
                .collect()
        } else {
            HashMap::new()
        };

        let mut views = Vec::with_capacity(items.len());
        for item in items {
            let children = if request.include_children {
                Some(
                    ws.hierarchy
                        .get_children(&item.id, false, None)?
                        .into_iter()
                        .map(strip)
                        .collect(),
                )
            } else {
                None
            };
            let metadata = if request.include_metadata {
                Some(ItemMetadata {
                    created_at: item.created_at,
                    updated_at: item.updated_at,
                    checksum: item.checksum.clone(),
                    sync_status: sync_states.get(&item.id).copied(),
                    execution_logs: ws.store.execution_logs(&item.id)?,
                    events: ws.store.events_for(&item.id, Some(EVENTS_PER_ITEM))?,
                })
            } else {
                None
            };
            views.push(ItemView {
                item: strip(item),
                children,
                metadata,
            });
        }

        Ok(GetResponse {
            count: views.len(),
            items: views,
            similar: Vec::new(),
        })
    }

    /// Keyword, semantic or hybrid search within a namespace.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` for an empty query, or a storage error.
    pub async fn search_content(&self, namespace: &str, request: SearchRequest) -> Result<SearchOutcome> {
        let ws = self.router.workspace(namespace).await?;
        let mut outcome = ws.search.search(&request).await?;
        for hit in &mut outcome.results {
            hit.item.embedding = None;
        }
        Ok(outcome)
    }

    /// Traverse, edit or validate the hierarchy and dependency graphs.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` for a missing id or target or an
    /// unsupported relation/action pair, `Error::NotFound` for unknown ids
    /// and `Error::GraphViolation` for an edit that breaks a graph rule.
    pub async fn get_hierarchy(&self, namespace: &str, request: HierarchyRequest) -> Result<HierarchyResponse> {
        let ws = self.router.workspace(namespace).await?;
        let engine = &ws.hierarchy;

        match request.action {
            HierarchyAction::Validate => {
                let scope = request.id.clone().map(|id| vec![id]);
                let report = engine.validate(scope.as_deref(), Deadline::from_millis(request.timeout_ms))?;
                Ok(HierarchyResponse::Validation { report })
            }
            HierarchyAction::Get => {
                let items = match request.relation {
                    HierarchyRelation::FullHierarchy => {
                        let nodes = engine.full_hierarchy(request.id.as_deref(), request.max_depth)?;
                        return Ok(HierarchyResponse::Tree { nodes });
                    }
                    HierarchyRelation::CriticalPath => {
                        let id = required_id(request.id.as_deref())?;
                        return Ok(HierarchyResponse::Path {
                            path: engine.critical_path(id)?,
                        });
                    }
                    HierarchyRelation::Children => engine.get_children(
                        required_id(request.id.as_deref())?,
                        request.recursive,
                        request.max_depth,
                    )?,
                    HierarchyRelation::Ancestors => engine.get_ancestors(required_id(request.id.as_deref())?)?,
                    HierarchyRelation::Dependencies => engine.get_dependencies(
                        required_id(request.id.as_deref())?,
                        request.transitive,
                        request.only_blocking,
                    )?,
                    HierarchyRelation::Dependents => {
                        engine.get_dependents(required_id(request.id.as_deref())?, request.transitive)?
                    }
                };
                Ok(HierarchyResponse::Items {
                    items: items.into_iter().map(strip).collect(),
                })
            }
            HierarchyAction::Add | HierarchyAction::Remove => {
                let id = required_id(request.id.as_deref())?;
                let target = request
                    .target_id
                    .as_deref()
                    .ok_or_else(|| Error::validation("target_id", "required to edit a relation"))?;
                let adding = request.action == HierarchyAction::Add;
                match (request.relation, adding) {
                    (HierarchyRelation::Dependencies, true) => Ok(HierarchyResponse::Item {
                        item: strip(engine.add_dependency(id, target).await?),
                    }),
                    (HierarchyRelation::Dependencies, false) => Ok(HierarchyResponse::Removed {
                        removed: engine.remove_dependency(id, target).await?,
                    }),
                    (HierarchyRelation::Children, true) => {
                        let item = set_parent(&ws, target, Some(id)).await?;
                        Ok(HierarchyResponse::Item { item: strip(item) })
                    }
                    (HierarchyRelation::Children, false) => Ok(HierarchyResponse::Removed {
                        removed: detach_child(&ws, id, target).await?,
                    }),
                    (relation, _) => Err(Error::validation(
                        "relation",
                        format!("{} cannot be edited; use children or dependencies", relation.as_str()),
                    )),
                }
            }
        }
    }

    /// Run a sync pass, report status, back up or restore a namespace.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` for an unknown direction, strategy or
    /// backup name; per-item failures of a pass are collected in the report.
    pub async fn sync_data(&self, namespace: &str, request: SyncRequest) -> Result<SyncResponse> {
        let ws = self.router.workspace(namespace).await?;
        match request.action {
            SyncAction::Sync => {
                let options = request.options()?;
                let mut report = ws.sync.sync(&options, &CancellationFlag::new()).await?;
                for conflict in &mut report.conflicts_pending {
                    for item in [&mut conflict.file, &mut conflict.database, &mut conflict.baseline]
                        .into_iter()
                        .flatten()
                    {
                        item.embedding = None;
                    }
                }
                Ok(SyncResponse::Sync { report })
            }
            SyncAction::Status => Ok(SyncResponse::Status {
                report: ws.sync.status(&request.scope()?)?,
                backups: ws.sync.list_backups()?,
            }),
            SyncAction::Backup => Ok(SyncResponse::Backup {
                backup: ws.sync.backup().await?,
            }),
            SyncAction::Restore => Ok(SyncResponse::Restore {
                backup: ws.sync.restore(request.backup.as_deref()).await?,
            }),
        }
    }

    /// Settle a parked sync conflict.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if no conflict is pending for `id`, or
    /// `Error::GraphViolation` if merged content breaks a graph rule.
    pub async fn resolve_conflict(&self, namespace: &str, id: &str, resolution: Resolution) -> Result<ResolveResponse> {
        let ws = self.router.workspace(namespace).await?;
        let choice = resolution.as_str();
        let item = ws.sync.resolve_conflict(id, resolution).await?;
        Ok(ResolveResponse {
            id: id.to_string(),
            resolution: choice,
            item: item.map(strip),
        })
    }
}

// ── Helpers ───────────────────────────────────────────────────

async fn create_item(ws: &Workspace, request: &ManageRequest) -> Result<WorkItem> {
    let item_type = parse_type(
        request
            .item_type
            .as_deref()
            .ok_or_else(|| Error::validation("item_type", "required for create"))?,
    )?;
    let title = request
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::validation("title", "required for create"))?;

    let mut item = WorkItem::new(item_type, title);
    if let Some(id) = request.id.as_deref() {
        item.id = required_id(Some(id))?.to_string();
    }
    apply_fields(&mut item, request)?;
    item.created_by = Some(ws.store.actor().to_string());
    item.refresh_checksum();

    let guard = ws.store.lock(&item.id).await;
    if ws.store.exists(&item.id)? {
        return Err(Error::validation("id", format!("'{}' already exists", item.id)));
    }
    ws.hierarchy.put_checked_locked(&guard, item).await
}

/// Copy every field present in the request onto `item`.
fn apply_fields(item: &mut WorkItem, request: &ManageRequest) -> Result<()> {
    if let Some(t) = request.item_type.as_deref() {
        item.item_type = parse_type(t)?;
    }
    if let Some(title) = request.title.as_deref() {
        let title = title.trim();
        if title.is_empty() {
            return Err(Error::validation("title", "cannot be empty"));
        }
        item.title = title.to_string();
    }
    if let Some(description) = &request.description {
        item.description.clone_from(description);
    }
    if let Some(status) = request.status.as_deref() {
        item.status = parse_status(status)?;
    }
    if let Some(priority) = request.priority.as_deref() {
        item.priority = parse_priority(priority)?;
    }
    if let Some(parent) = request.parent_id.as_deref() {
        item.parent_id = match parent.trim() {
            "" => None,
            p => Some(p.to_string()),
        };
    }
    if let Some(deps) = &request.dependency_ids {
        item.dependency_ids = deps.iter().cloned().collect();
    }
    if let Some(tags) = &request.tags {
        item.tags = tags
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
    }
    if let Some(criteria) = &request.acceptance_criteria {
        item.acceptance_criteria.clone_from(criteria);
    }
    if let Some(effort) = request.effort_estimate {
        if !effort.is_finite() || effort < 0.0 {
            return Err(Error::validation("effort_estimate", "must be a non-negative number"));
        }
        item.effort_estimate = Some(effort);
    }
    Ok(())
}

async fn set_parent(ws: &Workspace, child: &str, parent: Option<&str>) -> Result<WorkItem> {
    let guard = ws.store.lock(child).await;
    let mut item = ws.store.get(child)?.ok_or_else(|| not_found(&ws.store, child))?;
    item.parent_id = parent.map(ToString::to_string);
    item.touch();
    ws.hierarchy.put_checked_locked(&guard, item).await
}

async fn detach_child(ws: &Workspace, parent: &str, child: &str) -> Result<bool> {
    let current = ws.store.get(child)?.ok_or_else(|| not_found(&ws.store, child))?;
    if current.parent_id.as_deref() != Some(parent) {
        return Ok(false);
    }
    set_parent(ws, child, None).await?;
    Ok(true)
}

fn required_id(id: Option<&str>) -> Result<&str> {
    let id = id
        .map(str::trim)
        .filter(|i| !i.is_empty())
        .ok_or_else(|| Error::validation("id", "required"))?;
    if !is_valid_item_id(id) {
        return Err(Error::validation("id", format!("'{id}' is not a valid item id")));
    }
    Ok(id)
}

/// `NotFound`, with close matches when there are any.
fn similar_ids(store: &RecordStore, id: &str) -> Vec<String> {
    let existing: Vec<String> = store
        .ids()
        .map(|ids| ids.into_iter().collect())
        .unwrap_or_default();
    find_similar_ids(id, &existing, MAX_SUGGESTIONS)
}

fn not_found(store: &RecordStore, id: &str) -> Error {
    let similar = similar_ids(store, id);
    if similar.is_empty() {
        Error::NotFound { id: id.to_string() }
    } else {
        Error::NotFoundSimilar {
            id: id.to_string(),
            similar,
        }
    }
}

fn strip(mut item: WorkItem) -> WorkItem {
    item.embedding = None;
    item
}

fn parse_type(input: &str) -> Result<ItemType> {
    normalize_type(input).map_err(|(v, s)| invalid("item_type", "type", &v, s.as_deref()))
}

fn parse_status(input: &str) -> Result<Status> {
    normalize_status(input).map_err(|(v, s)| invalid("status", "status", &v, s.as_deref()))
}

fn parse_priority(input: &str) -> Result<Priority> {
    normalize_priority(input).map_err(|(v, s)| invalid("priority", "priority", &v, s.as_deref()))
}

fn invalid(field: &str, noun: &str, input: &str, suggestion: Option<&str>) -> Error {
    Error::validation(field, describe_invalid(noun, input, suggestion))
}

fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T> {
    serde_json::from_value(args).map_err(|e| Error::validation("arguments", e.to_string()))
}

fn parse_args_or_default<T: DeserializeOwned + Default>(args: Value) -> Result<T> {
    if args.is_null() {
        Ok(T::default())
    } else {
        parse_args(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use serde_json::json;
    use tempfile::TempDir;

    const NS: &str = "proj";

    fn tools(temp: &TempDir) -> Tools {
        let router = NamespaceRouter::with_embedder(EngineConfig::with_root(temp.path()), None)
            .unwrap()
            .with_actor("tester");
        Tools::new(Arc::new(router))
    }

    async fn seed(tools: &Tools) {
        tools
            .manage_work_item(NS, ManageRequest::create("feature", "Payments").with_id("F1"))
            .await
            .unwrap();
        tools
            .manage_work_item(NS, ManageRequest::create("story", "Card form").with_id("S1").with_parent("F1"))
            .await
            .unwrap();
        tools
            .manage_work_item(
                NS,
                ManageRequest::create("story", "Checkout")
                    .with_id("S2")
                    .with_parent("F1")
                    .with_dependencies(&["S1"]),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_create_normalizes_synonyms() {
        let temp = TempDir::new().unwrap();
        let tools = tools(&temp);

        let response = tools
            .manage_work_item(
                NS,
                ManageRequest::create("bug", "Fix login")
                    .with_status("wip")
                    .with_priority("p0"),
            )
            .await
            .unwrap();
        let item = response.item.unwrap();
        assert_eq!(item.item_type, ItemType::Task);
        assert_eq!(item.status, Status::InProgress);
        assert_eq!(item.priority, Priority::Critical);
        assert_eq!(item.created_by.as_deref(), Some("tester"));
    }

    #[tokio::test]
    async fn test_create_rejects_unknown_status_with_suggestion() {
        let temp = TempDir::new().unwrap();
        let tools = tools(&temp);

        let err = tools
            .manage_work_item(NS, ManageRequest::create("task", "Typo").with_status("complet"))
            .await
            .unwrap_err();
        match err {
            Error::Validation { field, message } => {
                assert_eq!(field, "status");
                assert!(message.contains("did you mean"), "{message}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_create_duplicate_id_rejected() {
        let temp = TempDir::new().unwrap();
        let tools = tools(&temp);
        seed(&tools).await;

        let err = tools
            .manage_work_item(NS, ManageRequest::create("feature", "Again").with_id("F1"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation { ref field, .. } if field == "id"));
    }

    #[tokio::test]
    async fn test_update_unknown_id_suggests_similar() {
        let temp = TempDir::new().unwrap();
        let tools = tools(&temp);
        seed(&tools).await;

        let err = tools
            .manage_work_item(NS, ManageRequest::update("S3").with_status("done"))
            .await
            .unwrap_err();
        match err {
            Error::NotFoundSimilar { id, similar } => {
                assert_eq!(id, "S3");
                assert!(similar.contains(&"S1".to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_update_rank_skip_rejected() {
        let temp = TempDir::new().unwrap();
        let tools = tools(&temp);
        seed(&tools).await;
        tools
            .manage_work_item(NS, ManageRequest::create("epic", "Commerce").with_id("E1"))
            .await
            .unwrap();

        let err = tools
            .manage_work_item(NS, ManageRequest::update("S1").with_parent("E1"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::GraphViolation(ref v) if v[0].kind() == "rank_skip"));

        let ws = tools.router().workspace(NS).await.unwrap();
        assert_eq!(ws.store.get("S1").unwrap().unwrap().parent_id.as_deref(), Some("F1"));
    }

    #[tokio::test]
    async fn test_delete_with_children_refused() {
        let temp = TempDir::new().unwrap();
        let tools = tools(&temp);
        seed(&tools).await;

        let err = tools
            .manage_work_item(NS, ManageRequest::delete("F1"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::HasDependents { ref children, .. } if children.len() == 2));

        let response = tools
            .manage_work_item(NS, ManageRequest::delete("S2"))
            .await
            .unwrap();
        assert_eq!(response.deleted.as_deref(), Some("S2"));
    }

    #[tokio::test]
    async fn test_get_with_filters_and_metadata() {
        let temp = TempDir::new().unwrap();
        let tools = tools(&temp);
        seed(&tools).await;

        let request = GetRequest {
            filters: GetFilters {
                item_types: vec!["stories".into()],
                ..GetFilters::default()
            },
            ..GetRequest::default()
        };
        let response = tools.get_work_item(NS, request).await.unwrap();
        assert_eq!(response.count, 2);

        let request = GetRequest {
            include_children: true,
            include_metadata: true,
            ..GetRequest::by_id("F1")
        };
        let response = tools.get_work_item(NS, request).await.unwrap();
        let view = &response.items[0];
        let children: Vec<&str> = view.children.as_ref().unwrap().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(children, vec!["S1", "S2"]);
        let metadata = view.metadata.as_ref().unwrap();
        assert_eq!(metadata.checksum, view.item.checksum);
        assert!(!metadata.events.is_empty());
    }

    #[tokio::test]
    async fn test_get_unknown_id_returns_empty_with_suggestions() {
        let temp = TempDir::new().unwrap();
        let tools = tools(&temp);
        seed(&tools).await;

        let response = tools.get_work_item(NS, GetRequest::by_id("S3")).await.unwrap();
        assert_eq!(response.count, 0);
        assert!(response.items.is_empty());
        assert!(response.similar.contains(&"S1".to_string()));

        let response = tools.get_work_item(NS, GetRequest::by_id("zzzzzzzz")).await.unwrap();
        assert_eq!(response.count, 0);
        assert!(response.similar.is_empty());
        let body = serde_json::to_value(&response).unwrap();
        assert!(body.get("similar").is_none());
    }

    #[tokio::test]
    async fn test_hierarchy_add_dependency_cycle_rejected() {
        let temp = TempDir::new().unwrap();
        let tools = tools(&temp);
        seed(&tools).await;

        let request = HierarchyRequest::edit(HierarchyAction::Add, "S1", HierarchyRelation::Dependencies, "S2");
        let err = tools.get_hierarchy(NS, request).await.unwrap_err();
        assert!(matches!(err, Error::GraphViolation(ref v) if v[0].kind() == "circular_dependency"));

        let report = tools.get_hierarchy(NS, HierarchyRequest::validate()).await.unwrap();
        assert!(matches!(report, HierarchyResponse::Validation { ref report } if report.is_valid()));
    }

    #[tokio::test]
    async fn test_hierarchy_children_edit() {
        let temp = TempDir::new().unwrap();
        let tools = tools(&temp);
        seed(&tools).await;
        tools
            .manage_work_item(NS, ManageRequest::create("task", "Loose end").with_id("T1"))
            .await
            .unwrap();

        let add = HierarchyRequest::edit(HierarchyAction::Add, "S1", HierarchyRelation::Children, "T1");
        let HierarchyResponse::Item { item } = tools.get_hierarchy(NS, add).await.unwrap() else {
            panic!("expected an item");
        };
        assert_eq!(item.parent_id.as_deref(), Some("S1"));

        let remove = HierarchyRequest::edit(HierarchyAction::Remove, "S1", HierarchyRelation::Children, "T1");
        let response = tools.get_hierarchy(NS, remove).await.unwrap();
        assert!(matches!(response, HierarchyResponse::Removed { removed: true }));

        let children = tools
            .get_hierarchy(NS, HierarchyRequest::get("S1", HierarchyRelation::Children))
            .await
            .unwrap();
        assert!(matches!(children, HierarchyResponse::Items { ref items } if items.is_empty()));
    }

    #[tokio::test]
    async fn test_sync_data_round_trip() {
        let temp = TempDir::new().unwrap();
        let tools = tools(&temp);
        seed(&tools).await;

        let SyncResponse::Sync { report } = tools
            .sync_data(NS, SyncRequest::new(SyncAction::Sync).with_direction("db_to_file"))
            .await
            .unwrap()
        else {
            panic!("expected a sync report");
        };
        assert_eq!(report.created_on_file, 3);

        let SyncResponse::Status { report, .. } =
            tools.sync_data(NS, SyncRequest::new(SyncAction::Status)).await.unwrap()
        else {
            panic!("expected a status report");
        };
        assert!(report.is_clean());

        let err = tools
            .sync_data(NS, SyncRequest::new(SyncAction::Sync).with_strategy("coin_flip"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation { ref field, .. } if field == "strategy"));
    }

    #[tokio::test]
    async fn test_call_wraps_results_and_errors() {
        let temp = TempDir::new().unwrap();
        let tools = tools(&temp);

        let created = tools
            .call(
                "manage_work_item",
                NS,
                json!({"action": "create", "type": "epic", "title": "Platform", "id": "E1"}),
            )
            .await;
        assert_eq!(created["ok"], json!(true));
        assert_eq!(created["result"]["item"]["id"], json!("E1"));

        let lookup = tools.call("get_work_item", NS, json!({"id": "E2"})).await;
        assert_eq!(lookup["ok"], json!(true));
        assert_eq!(lookup["result"]["count"], json!(0));
        assert_eq!(lookup["result"]["similar"], json!(["E1"]));

        let missing = tools
            .call("manage_work_item", NS, json!({"action": "update", "id": "E2", "title": "x"}))
            .await;
        assert_eq!(missing["ok"], json!(false));
        assert_eq!(missing["error"]["code"], json!("NOT_FOUND"));
        assert_eq!(missing["error"]["similar"], json!(["E1"]));

        let unknown_ns = tools.call("get_work_item", "nowhere", Value::Null).await;
        assert_eq!(unknown_ns["error"]["code"], json!("NAMESPACE_NOT_FOUND"));

        let bad_tool = tools.call("drop_tables", NS, Value::Null).await;
        assert_eq!(bad_tool["error"]["field"], json!("tool"));

        let bad_args = tools.call("manage_work_item", NS, json!({"action": "explode"})).await;
        assert_eq!(bad_args["error"]["field"], json!("arguments"));
    }
}
