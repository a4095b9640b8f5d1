//! End-to-end scenarios through the tool surface.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tempfile::TempDir;
use workgraph::config::EngineConfig;
use workgraph::embeddings::{BoxedProvider, EmbeddingProvider, HashingProvider, ProviderInfo};
use workgraph::hierarchy::Violation;
use workgraph::model::{ItemField, ItemType, Priority, Status};
use workgraph::search::{SearchMode, SearchRequest};
use workgraph::sync::Resolution;
use workgraph::tools::{
    HierarchyAction, HierarchyRelation, HierarchyRequest, HierarchyResponse, ManageRequest,
    SyncAction, SyncRequest, SyncResponse,
};
use workgraph::{Error, NamespaceRouter, Tools};

const NS: &str = "shop";

struct OfflineProvider;

impl EmbeddingProvider for OfflineProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "offline".into(),
            model: "none".into(),
            dimensions: 32,
            max_chars: 2000,
        }
    }

    async fn is_available(&self) -> bool {
        false
    }

    async fn generate_embedding(&self, _text: &str) -> workgraph::Result<Vec<f32>> {
        Err(Error::Embedding("connection refused".into()))
    }
}

fn tools_with(temp: &TempDir, provider: Option<BoxedProvider>) -> Tools {
    let router = NamespaceRouter::with_embedder(EngineConfig::with_root(temp.path()), provider.map(Arc::new))
        .unwrap()
        .with_actor("scenario");
    Tools::new(Arc::new(router))
}

fn tools(temp: &TempDir) -> Tools {
    tools_with(temp, Some(BoxedProvider::new(HashingProvider::new(64))))
}

/// Feature F1 with stories S1 and S2, where S2 depends on S1.
async fn seed(tools: &Tools) {
    for request in [
        ManageRequest::create("feature", "Payments").with_id("F1"),
        ManageRequest::create("story", "Card form").with_id("S1").with_parent("F1"),
        ManageRequest::create("story", "Checkout")
            .with_id("S2")
            .with_parent("F1")
            .with_dependencies(&["S1"]),
    ] {
        tools.manage_work_item(NS, request).await.unwrap();
    }
}

async fn sync(tools: &Tools, direction: &str) -> workgraph::sync::SyncReport {
    match tools
        .sync_data(NS, SyncRequest::new(SyncAction::Sync).with_direction(direction))
        .await
        .unwrap()
    {
        SyncResponse::Sync { report } => report,
        other => panic!("expected a sync report, got {other:?}"),
    }
}

fn story_path(temp: &TempDir, id: &str) -> PathBuf {
    temp.path().join(NS).join("stories").join(format!("{id}.json"))
}

fn edit_file(path: &PathBuf, field: &str, value: &str) {
    let mut doc: Value = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
    doc[field] = Value::String(value.to_string());
    fs::write(path, serde_json::to_string_pretty(&doc).unwrap()).unwrap();
}

#[tokio::test]
async fn test_build_hierarchy_and_validate() {
    let temp = TempDir::new().unwrap();
    let tools = tools(&temp);
    seed(&tools).await;

    let children = tools
        .get_hierarchy(NS, HierarchyRequest::get("F1", HierarchyRelation::Children))
        .await
        .unwrap();
    let HierarchyResponse::Items { items } = children else {
        panic!("expected items");
    };
    let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, vec!["S1", "S2"]);

    let deps = tools
        .get_hierarchy(NS, HierarchyRequest::get("S2", HierarchyRelation::Dependencies))
        .await
        .unwrap();
    assert!(matches!(deps, HierarchyResponse::Items { ref items } if items[0].id == "S1"));

    let report = tools.get_hierarchy(NS, HierarchyRequest::validate()).await.unwrap();
    assert!(matches!(report, HierarchyResponse::Validation { ref report } if report.is_valid()));
}

#[tokio::test]
async fn test_circular_dependency_rejected() {
    let temp = TempDir::new().unwrap();
    let tools = tools(&temp);
    seed(&tools).await;

    let request = HierarchyRequest::edit(HierarchyAction::Add, "S1", HierarchyRelation::Dependencies, "S2");
    let err = tools.get_hierarchy(NS, request).await.unwrap_err();
    match err {
        Error::GraphViolation(violations) => {
            assert!(matches!(&violations[0], Violation::CircularDependency { path } if path.len() == 3));
        }
        other => panic!("unexpected error: {other}"),
    }

    let ws = tools.router().workspace(NS).await.unwrap();
    assert!(ws.store.get("S1").unwrap().unwrap().dependency_ids.is_empty());
}

#[tokio::test]
async fn test_file_edit_flows_into_database() {
    let temp = TempDir::new().unwrap();
    let tools = tools(&temp);
    seed(&tools).await;
    let first = sync(&tools, "bidirectional").await;
    assert_eq!(first.created_on_file, 3);

    edit_file(&story_path(&temp, "S2"), "status", "in_progress");
    let report = sync(&tools, "file_to_db").await;
    assert_eq!(report.file_to_db, 1);
    assert!(report.errors.is_empty());

    let ws = tools.router().workspace(NS).await.unwrap();
    let stored = ws.store.get("S2").unwrap().unwrap();
    assert_eq!(stored.status, Status::InProgress);
    let (on_file, checksum) = ws.sync.files().read(&story_path(&temp, "S2")).unwrap();
    assert_eq!(checksum, stored.checksum);
    assert_eq!(on_file.status, Status::InProgress);
}

#[tokio::test]
async fn test_disjoint_edits_auto_merge() {
    let temp = TempDir::new().unwrap();
    let tools = tools(&temp);
    seed(&tools).await;
    sync(&tools, "bidirectional").await;

    edit_file(&story_path(&temp, "S2"), "status", "in_progress");
    tools
        .manage_work_item(NS, ManageRequest::update("S2").with_priority("high"))
        .await
        .unwrap();

    let report = sync(&tools, "bidirectional").await;
    assert!(report.conflicts_pending.is_empty());
    assert_eq!(report.conflicts_resolved, 1);

    let ws = tools.router().workspace(NS).await.unwrap();
    let stored = ws.store.get("S2").unwrap().unwrap();
    assert_eq!(stored.status, Status::InProgress);
    assert_eq!(stored.priority, Priority::High);
    let (on_file, _) = ws.sync.files().read(&story_path(&temp, "S2")).unwrap();
    assert!(on_file.same_content(&stored));

    let again = sync(&tools, "bidirectional").await;
    assert_eq!(again.total_changes(), 0);
}

#[tokio::test]
async fn test_same_field_conflict_parks_then_resolves() {
    let temp = TempDir::new().unwrap();
    let tools = tools(&temp);
    seed(&tools).await;
    sync(&tools, "bidirectional").await;

    edit_file(&story_path(&temp, "S1"), "title", "Card form v2");
    let mut update = ManageRequest::update("S1");
    update.title = Some("Card entry form".into());
    tools.manage_work_item(NS, update).await.unwrap();

    let report = sync(&tools, "bidirectional").await;
    assert_eq!(report.conflicts_pending.len(), 1);
    assert_eq!(report.conflicts_pending[0].fields, vec![ItemField::Title]);

    let resolved = tools.resolve_conflict(NS, "S1", Resolution::File).await.unwrap();
    assert_eq!(resolved.item.unwrap().title, "Card form v2");

    let ws = tools.router().workspace(NS).await.unwrap();
    assert_eq!(ws.store.get("S1").unwrap().unwrap().title, "Card form v2");
    let clean = sync(&tools, "bidirectional").await;
    assert!(clean.conflicts_pending.is_empty());
    assert_eq!(clean.total_changes(), 0);
}

#[tokio::test]
async fn test_delete_parent_with_children_refused() {
    let temp = TempDir::new().unwrap();
    let tools = tools(&temp);
    seed(&tools).await;

    let err = tools
        .manage_work_item(NS, ManageRequest::delete("F1"))
        .await
        .unwrap_err();
    match err {
        Error::HasDependents { id, children, .. } => {
            assert_eq!(id, "F1");
            assert_eq!(children, vec!["S1".to_string(), "S2".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }

    let ws = tools.router().workspace(NS).await.unwrap();
    assert!(ws.store.exists("F1").unwrap());
}

#[tokio::test]
async fn test_embedding_outage_degrades_search() {
    let temp = TempDir::new().unwrap();
    let tools = tools_with(&temp, Some(BoxedProvider::new(OfflineProvider)));
    seed(&tools).await;

    let outcome = tools
        .search_content(NS, SearchRequest::new("checkout", SearchMode::Hybrid))
        .await
        .unwrap();
    assert!(outcome.degraded);
    assert_eq!(outcome.mode, SearchMode::Keyword);
    assert_eq!(outcome.results[0].item.id, "S2");
}

#[tokio::test]
async fn test_file_round_trip_preserves_content() {
    let temp = TempDir::new().unwrap();
    let tools = tools(&temp);
    seed(&tools).await;
    let mut update = ManageRequest::update("S1");
    update.tags = Some(vec!["frontend".into(), "pci".into()]);
    update.acceptance_criteria = Some(vec!["Rejects expired cards".into()]);
    update.effort_estimate = Some(3.5);
    tools.manage_work_item(NS, update).await.unwrap();

    let ws = tools.router().workspace(NS).await.unwrap();
    let stored = ws.store.get("S1").unwrap().unwrap();
    let path = ws.sync.files().write_item(&stored, &[]).unwrap();
    let (read_back, checksum) = ws.sync.files().read(&path).unwrap();

    assert!(read_back.same_content(&stored));
    assert_eq!(checksum, stored.checksum);
    assert_eq!(read_back.created_at, stored.created_at);
    assert_eq!(read_back.item_type, ItemType::Story);
}

#[tokio::test]
async fn test_status_reports_missing_file_after_removal() {
    let temp = TempDir::new().unwrap();
    let tools = tools(&temp);
    seed(&tools).await;
    sync(&tools, "bidirectional").await;

    fs::remove_file(story_path(&temp, "S2")).unwrap();
    let SyncResponse::Status { report, .. } = tools
        .sync_data(NS, SyncRequest::new(SyncAction::Status))
        .await
        .unwrap()
    else {
        panic!("expected a status report");
    };
    assert!(!report.is_clean());
    assert_eq!(report.count(workgraph::sync::SyncStatus::MissingOnFile), 1);
}
