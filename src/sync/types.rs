//! Types for sync operations.
//!
//! This module defines the data structures that flow through a sync pass:
//! - `SyncState`: per-item record of the last reconciled checksums and baseline
//! - `MergeStrategy`, `SyncDirection`, `SyncScope`: pass options
//! - `Conflict` and `Resolution`: divergent edits and how they are settled
//! - `SyncReport` / `StatusReport`: pass outcomes

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::model::{ItemField, ItemType, WorkItem};

/// Classification of one item relative to its last sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    InSync,
    FileNewer,
    DbNewer,
    Conflict,
    MissingOnFile,
    MissingInDb,
}

impl SyncStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InSync => "in_sync",
            Self::FileNewer => "file_newer",
            Self::DbNewer => "db_newer",
            Self::Conflict => "conflict",
            Self::MissingOnFile => "missing_on_file",
            Self::MissingInDb => "missing_in_db",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last reconciled view of one item.
///
/// `file_checksum` and `db_checksum` are `None` when that side did not exist
/// at the last sync. `baseline` is the semantic content both sides agreed on
/// and feeds the three-way merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    pub id: String,
    pub file_checksum: Option<String>,
    pub db_checksum: Option<String>,
    /// Unix milliseconds of the last reconciliation.
    pub last_synced: i64,
    #[serde(default)]
    pub baseline: Option<WorkItem>,
    #[serde(default)]
    pub status: SyncStatus,
}

impl SyncState {
    /// State for an item whose two sides now carry the same content.
    #[must_use]
    pub fn in_sync(item: &WorkItem) -> Self {
        let mut baseline = item.clone();
        baseline.embedding = None;
        Self {
            id: item.id.clone(),
            file_checksum: Some(item.checksum.clone()),
            db_checksum: Some(item.checksum.clone()),
            last_synced: chrono::Utc::now().timestamp_millis(),
            baseline: Some(baseline),
            status: SyncStatus::InSync,
        }
    }

    /// Same checksums and baseline, flagged as a pending conflict.
    #[must_use]
    pub fn parked(mut self) -> Self {
        self.status = SyncStatus::Conflict;
        self
    }
}

/// How both-sides-changed conflicts are settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Field-wise three-way merge against the baseline.
    #[default]
    AutoMerge,
    FileWins,
    DatabaseWins,
    /// Park the conflict until `resolve_conflict` is called.
    ManualResolution,
}

impl MergeStrategy {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AutoMerge => "auto_merge",
            Self::FileWins => "file_wins",
            Self::DatabaseWins => "database_wins",
            Self::ManualResolution => "manual_resolution",
        }
    }
}

impl FromStr for MergeStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "auto_merge" | "auto" | "merge" => Ok(Self::AutoMerge),
            "file_wins" | "file" => Ok(Self::FileWins),
            "database_wins" | "db_wins" | "database" | "db" => Ok(Self::DatabaseWins),
            "manual_resolution" | "manual" => Ok(Self::ManualResolution),
            other => Err(Error::validation(
                "strategy",
                format!(
                    "unknown merge strategy '{other}' (expected auto_merge, file_wins, database_wins or manual_resolution)"
                ),
            )),
        }
    }
}

/// Which side's changes a pass propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    FileToDb,
    DbToFile,
    #[default]
    Bidirectional,
}

impl SyncDirection {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::FileToDb => "file_to_db",
            Self::DbToFile => "db_to_file",
            Self::Bidirectional => "bidirectional",
        }
    }

    #[must_use]
    pub const fn pulls_files(&self) -> bool {
        matches!(self, Self::FileToDb | Self::Bidirectional)
    }

    #[must_use]
    pub const fn pushes_db(&self) -> bool {
        matches!(self, Self::DbToFile | Self::Bidirectional)
    }
}

impl FromStr for SyncDirection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "file_to_db" | "import" => Ok(Self::FileToDb),
            "db_to_file" | "export" => Ok(Self::DbToFile),
            "bidirectional" | "both" => Ok(Self::Bidirectional),
            other => Err(Error::validation(
                "direction",
                format!("unknown sync direction '{other}' (expected file_to_db, db_to_file or bidirectional)"),
            )),
        }
    }
}

/// Which items a pass or status call covers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncScope {
    #[default]
    All,
    Ids(Vec<String>),
    ItemType(ItemType),
}

impl SyncScope {
    /// Whether an item with this id and (any known) type is covered.
    #[must_use]
    pub fn includes(&self, id: &str, types: &[ItemType]) -> bool {
        match self {
            Self::All => true,
            Self::Ids(ids) => ids.iter().any(|i| i == id),
            Self::ItemType(t) => types.contains(t),
        }
    }
}

/// How a delete on one side relates to the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Both sides edited the item differently.
    Content,
    /// One side deleted the item, the other edited it.
    DeleteModify,
}

/// Divergent edits of one item, with both versions and the baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub id: String,
    pub kind: ConflictKind,
    pub file: Option<WorkItem>,
    pub database: Option<WorkItem>,
    pub baseline: Option<WorkItem>,
    /// Fields changed to different values on both sides. Empty when the
    /// conflict was not examined field by field.
    #[serde(default)]
    pub fields: Vec<ItemField>,
    pub detected_at: i64,
}

impl Conflict {
    /// The conflict as a `ConflictUnresolved` error carrying both versions.
    #[must_use]
    pub fn to_error(&self) -> Error {
        Error::ConflictUnresolved {
            id: self.id.clone(),
            file: self.file.clone().map(Box::new),
            database: self.database.clone().map(Box::new),
        }
    }
}

/// Winning content for a parked conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "choice", rename_all = "snake_case")]
pub enum Resolution {
    /// Keep the current file version (or its absence).
    File,
    /// Keep the current database version (or its absence).
    Database,
    /// Write caller-supplied content to both sides.
    Merged { item: Box<WorkItem> },
    /// Remove the item from both sides.
    Delete,
}

impl Resolution {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Database => "database",
            Self::Merged { .. } => "merged",
            Self::Delete => "delete",
        }
    }
}

/// Cooperative cancellation for a sync pass.
///
/// Cancelling stops scheduling new items; items already in flight finish.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Options for one sync pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncOptions {
    #[serde(default)]
    pub direction: SyncDirection,
    /// Falls back to the configured default strategy.
    #[serde(default)]
    pub strategy: Option<MergeStrategy>,
    #[serde(default)]
    pub scope: SyncScope,
}

impl SyncOptions {
    #[must_use]
    pub fn new(direction: SyncDirection) -> Self {
        Self {
            direction,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn with_strategy(mut self, strategy: MergeStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    #[must_use]
    pub fn with_scope(mut self, scope: SyncScope) -> Self {
        self.scope = scope;
        self
    }
}

/// A per-item failure collected during a pass.
#[derive(Debug, Clone, Serialize)]
pub struct SyncItemError {
    pub id: Option<String>,
    pub path: Option<PathBuf>,
    pub code: String,
    pub message: String,
    /// Structured error payload from [`Error::to_structured_json`].
    pub detail: serde_json::Value,
}

impl SyncItemError {
    #[must_use]
    pub fn new(id: Option<&str>, path: Option<PathBuf>, error: &Error) -> Self {
        Self {
            id: id.map(ToString::to_string),
            path,
            code: error.error_code().as_str().to_string(),
            message: error.to_string(),
            detail: error.to_structured_json(),
        }
    }
}

/// Outcome of a sync pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub direction: SyncDirection,
    pub strategy: MergeStrategy,
    pub in_sync: usize,
    /// Existing items updated from their file.
    pub file_to_db: usize,
    /// Existing files rewritten from the database.
    pub db_to_file: usize,
    pub created_in_db: usize,
    pub created_on_file: usize,
    pub deleted_in_db: usize,
    pub deleted_on_file: usize,
    pub conflicts_resolved: usize,
    pub conflicts_pending: Vec<Conflict>,
    /// Changes seen on the side this direction does not propagate.
    pub skipped: usize,
    pub errors: Vec<SyncItemError>,
    /// The pass stopped scheduling before every item was visited.
    pub cancelled: bool,
}

impl SyncReport {
    #[must_use]
    pub fn new(direction: SyncDirection, strategy: MergeStrategy) -> Self {
        Self {
            direction,
            strategy,
            ..Self::default()
        }
    }

    /// Number of writes the pass performed.
    #[must_use]
    pub const fn total_changes(&self) -> usize {
        self.file_to_db
            + self.db_to_file
            + self.created_in_db
            + self.created_on_file
            + self.deleted_in_db
            + self.deleted_on_file
            + self.conflicts_resolved
    }

    /// Nothing changed and nothing is left to look at.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.total_changes() == 0
            && self.conflicts_pending.is_empty()
            && self.errors.is_empty()
            && !self.cancelled
    }
}

/// Classification of one item in a status report.
#[derive(Debug, Clone, Serialize)]
pub struct ItemSyncStatus {
    pub id: String,
    pub item_type: Option<ItemType>,
    pub status: SyncStatus,
}

/// Read-only view of where both sides stand.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusReport {
    pub items: Vec<ItemSyncStatus>,
    pub counts: BTreeMap<SyncStatus, usize>,
    pub errors: Vec<SyncItemError>,
}

impl StatusReport {
    #[must_use]
    pub fn count(&self, status: SyncStatus) -> usize {
        self.counts.get(&status).copied().unwrap_or(0)
    }

    /// Everything is in sync and every file parsed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.items.iter().all(|i| i.status == SyncStatus::InSync)
    }
}

/// A whole-namespace snapshot under `sync/backups/`.
#[derive(Debug, Clone, Serialize)]
pub struct BackupInfo {
    pub name: String,
    pub path: PathBuf,
    pub items: usize,
    pub created_at: i64,
}
