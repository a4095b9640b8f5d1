//! Reconciliation between a namespace's record store and its file tree.
//!
//! A pass scans both sides, classifies every item against its [`SyncState`],
//! and propagates one-sided changes. Items are visited rank by rank so
//! parents exist before their children are validated; items of one rank run
//! concurrently up to `max_concurrency`. An item that references another
//! item arriving from the file tree in the same pass is retried once that
//! item lands. Deletions are deferred to a second, bottom-up phase so
//! children go before their parents. Sync state is flushed after each rank.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::file::{FileItem, FileStore, ScanResult};
use super::hash::has_changed;
use super::merge::{MergeOutcome, auto_merge};
use super::state::SyncStateFile;
use super::types::{
    BackupInfo, CancellationFlag, Conflict, ConflictKind, ItemSyncStatus, MergeStrategy,
    Resolution, StatusReport, SyncDirection, SyncItemError, SyncOptions, SyncReport, SyncScope,
    SyncState, SyncStatus,
};
use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::hierarchy::{HierarchyEngine, Violation};
use crate::model::{ItemType, WorkItem};
use crate::storage::{Event, EventType, ItemGuard, RecordStore, WORK_ITEM_ENTITY};

const NAMESPACE_ENTITY: &str = "namespace";
const SNAPSHOT_PREFIX: &str = "snapshot-";
const SNAPSHOT_DB: &str = "workitems.db";
const SNAPSHOT_FILES: &str = "files";
const SNAPSHOT_STATE: &str = "sync-state.json";

/// Where one item stands relative to its last reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Divergence {
    InSync,
    /// Both sides exist with equal content but no state was recorded yet.
    Adopt,
    FileNewer,
    DbNewer,
    NewOnFile,
    NewInDb,
    DeletedOnFile,
    DeletedInDb,
    Conflict,
    /// Neither side exists; only a stale state remains.
    Gone,
}

impl Divergence {
    const fn status(self) -> SyncStatus {
        match self {
            Self::InSync | Self::Adopt | Self::Gone => SyncStatus::InSync,
            Self::FileNewer => SyncStatus::FileNewer,
            Self::DbNewer => SyncStatus::DbNewer,
            Self::NewOnFile | Self::DeletedInDb => SyncStatus::MissingInDb,
            Self::NewInDb | Self::DeletedOnFile => SyncStatus::MissingOnFile,
            Self::Conflict => SyncStatus::Conflict,
        }
    }
}

fn classify(file: Option<&str>, db: Option<&str>, state: Option<&SyncState>) -> Divergence {
    let Some(state) = state else {
        return match (file, db) {
            (Some(f), Some(d)) if f == d => Divergence::Adopt,
            (Some(_), Some(_)) => Divergence::Conflict,
            (Some(_), None) => Divergence::NewOnFile,
            (None, Some(_)) => Divergence::NewInDb,
            (None, None) => Divergence::Gone,
        };
    };

    let changed = |current: Option<&str>, recorded: Option<&str>| match current {
        Some(checksum) => has_changed(checksum, recorded),
        None => recorded.is_some(),
    };
    let file_changed = changed(file, state.file_checksum.as_deref());
    let db_changed = changed(db, state.db_checksum.as_deref());
    match (file_changed, db_changed) {
        _ if file.is_none() && db.is_none() => Divergence::Gone,
        (false, false) => Divergence::InSync,
        (true, false) if file.is_none() => Divergence::DeletedOnFile,
        (true, false) if state.file_checksum.is_none() => Divergence::NewOnFile,
        (true, false) => Divergence::FileNewer,
        (false, true) if db.is_none() => Divergence::DeletedInDb,
        (false, true) if state.db_checksum.is_none() => Divergence::NewInDb,
        (false, true) => Divergence::DbNewer,
        (true, true) if file == db => Divergence::Adopt,
        (true, true) => Divergence::Conflict,
    }
}

/// What reconciling one item did.
#[derive(Debug)]
enum Change {
    InSync,
    Forgotten,
    Skipped,
    FileToDb,
    DbToFile,
    CreatedInDb,
    CreatedOnFile,
    DeletedInDb,
    DeletedOnFile,
    Resolved,
    Pending(Box<Conflict>),
    /// A deletion held back for the bottom-up phase.
    Deferred,
}

impl SyncReport {
    fn tally(&mut self, change: Change) {
        match change {
            Change::InSync => self.in_sync += 1,
            Change::Forgotten | Change::Deferred => {}
            Change::Skipped => self.skipped += 1,
            Change::FileToDb => self.file_to_db += 1,
            Change::DbToFile => self.db_to_file += 1,
            Change::CreatedInDb => self.created_in_db += 1,
            Change::CreatedOnFile => self.created_on_file += 1,
            Change::DeletedInDb => self.deleted_in_db += 1,
            Change::DeletedOnFile => self.deleted_on_file += 1,
            Change::Resolved => self.conflicts_resolved += 1,
            Change::Pending(conflict) => self.conflicts_pending.push(*conflict),
        }
    }

    fn fail(&mut self, candidate: &Candidate, error: &Error) {
        warn!(id = %candidate.id, error = %error, "Sync failed for item");
        self.errors.push(SyncItemError::new(
            Some(candidate.id.as_str()),
            candidate.file_path.clone(),
            error,
        ));
    }
}

/// Whether `error` only names items that are still to be created in this pass.
fn awaits_arrival(error: &Error, arriving: &HashSet<String>) -> bool {
    match error {
        Error::GraphViolation(violations) => {
            !violations.is_empty()
                && violations.iter().all(|v| {
                    matches!(v, Violation::MissingReference { to, .. } if arriving.contains(to))
                })
        }
        _ => false,
    }
}

/// One item a pass will visit.
#[derive(Debug, Clone)]
struct Candidate {
    id: String,
    rank: u8,
    file_path: Option<PathBuf>,
    file_checksum: Option<String>,
    db_checksum: Option<String>,
    item_type: Option<ItemType>,
}

/// Bidirectional sync for one namespace.
#[derive(Debug, Clone)]
pub struct SyncEngine {
    namespace: String,
    store: Arc<RecordStore>,
    hierarchy: HierarchyEngine,
    files: Arc<FileStore>,
    state: Arc<SyncStateFile>,
    config: SyncConfig,
    /// One pass, backup or restore at a time.
    pass: Arc<Mutex<()>>,
}

impl SyncEngine {
    /// Create the engine, loading `sync/sync-state.json` if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the state file exists but cannot be parsed.
    pub fn new(
        namespace: &str,
        hierarchy: HierarchyEngine,
        files: FileStore,
        config: SyncConfig,
    ) -> Result<Self> {
        let state = SyncStateFile::load(&files.state_path())?;
        Ok(Self {
            namespace: namespace.to_string(),
            store: Arc::clone(hierarchy.store()),
            hierarchy,
            files: Arc::new(files),
            state: Arc::new(state),
            config,
            pass: Arc::new(Mutex::new(())),
        })
    }

    #[must_use]
    pub fn files(&self) -> &FileStore {
        &self.files
    }

    #[must_use]
    pub fn state(&self) -> &SyncStateFile {
        &self.state
    }

    /// Reconcile both sides.
    ///
    /// Per-item failures (malformed files, graph violations, blocked
    /// deletes) are collected in the report and leave that item unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error only when the pass cannot start: the file tree or
    /// the record store cannot be read.
    pub async fn sync(&self, options: &SyncOptions, cancel: &CancellationFlag) -> Result<SyncReport> {
        let _pass = self.pass.lock().await;
        self.files.init()?;

        let direction = options.direction;
        let strategy = options.strategy.unwrap_or(self.config.default_strategy);
        let mut report = SyncReport::new(direction, strategy);

        let scan = self.files.scan()?;
        report.errors.extend(scan_errors(&scan));
        let candidates = self.plan(&scan, &options.scope)?;

        let arriving: HashSet<String> = candidates
            .iter()
            .filter(|c| c.file_checksum.is_some() && c.db_checksum.is_none())
            .map(|c| c.id.clone())
            .collect();
        let mut by_rank: BTreeMap<u8, Vec<Candidate>> = BTreeMap::new();
        for candidate in candidates {
            by_rank.entry(candidate.rank).or_default().push(candidate);
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut deferred: Vec<Candidate> = Vec::new();
        let mut waiting: Vec<(Candidate, Error)> = Vec::new();

        for candidates in by_rank.into_values() {
            let mut set = JoinSet::new();
            for candidate in candidates {
                if cancel.is_cancelled() {
                    report.cancelled = true;
                    break;
                }
                let permit = Arc::clone(&semaphore)
                    .acquire_owned()
                    .await
                    .map_err(|e| Error::Other(e.to_string()))?;
                let this = self.clone();
                set.spawn(async move {
                    let _permit = permit;
                    let result = this
                        .reconcile(&candidate, direction, strategy, false)
                        .await;
                    (candidate, result)
                });
            }

            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok((candidate, Ok(Change::Deferred))) => deferred.push(candidate),
                    Ok((_, Ok(change))) => report.tally(change),
                    Ok((candidate, Err(e))) if awaits_arrival(&e, &arriving) => {
                        debug!(id = %candidate.id, "Waiting on items created later in the pass");
                        waiting.push((candidate, e));
                    }
                    Ok((candidate, Err(e))) => report.fail(&candidate, &e),
                    Err(e) => {
                        report
                            .errors
                            .push(SyncItemError::new(None, None, &Error::Other(e.to_string())));
                    }
                }
            }
            self.state.flush().await?;

            if report.cancelled {
                break;
            }
        }

        // Items referencing same-pass arrivals retry until a round makes no progress.
        while !waiting.is_empty() && !report.cancelled {
            waiting.sort_by(|(a, _), (b, _)| a.rank.cmp(&b.rank).then_with(|| a.id.cmp(&b.id)));
            let before = waiting.len();
            let mut still = Vec::new();
            for (candidate, previous) in waiting {
                if cancel.is_cancelled() {
                    report.cancelled = true;
                    still.push((candidate, previous));
                    continue;
                }
                match self.reconcile(&candidate, direction, strategy, false).await {
                    Ok(Change::Deferred) => deferred.push(candidate),
                    Ok(change) => report.tally(change),
                    Err(e) if awaits_arrival(&e, &arriving) => still.push((candidate, e)),
                    Err(e) => report.fail(&candidate, &e),
                }
            }
            self.state.flush().await?;
            waiting = still;
            if waiting.len() == before {
                break;
            }
        }
        if !report.cancelled {
            for (candidate, e) in waiting {
                report.fail(&candidate, &e);
            }
        }

        deferred.sort_by(|a, b| b.rank.cmp(&a.rank).then_with(|| a.id.cmp(&b.id)));
        for candidate in deferred {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            match self.reconcile(&candidate, direction, strategy, true).await {
                Ok(change) => report.tally(change),
                Err(e) => report.fail(&candidate, &e),
            }
        }
        self.state.flush().await?;

        let items = self.store.all_items()?;
        self.files.write_relationships(&items)?;
        self.files.write_metadata(&self.namespace, items.len())?;

        info!(
            namespace = %self.namespace,
            direction = direction.as_str(),
            strategy = strategy.as_str(),
            changes = report.total_changes(),
            in_sync = report.in_sync,
            pending = report.conflicts_pending.len(),
            errors = report.errors.len(),
            cancelled = report.cancelled,
            "Sync pass finished"
        );
        Ok(report)
    }

    /// Classify every item without writing anything.
    ///
    /// # Errors
    ///
    /// Returns an error if the file tree or the record store cannot be read.
    pub fn status(&self, scope: &SyncScope) -> Result<StatusReport> {
        let scan = self.files.scan()?;
        let mut report = StatusReport {
            errors: scan_errors(&scan),
            ..StatusReport::default()
        };

        for candidate in self.plan(&scan, scope)? {
            let state = self.state.get(&candidate.id);
            let divergence = classify(
                candidate.file_checksum.as_deref(),
                candidate.db_checksum.as_deref(),
                state.as_ref(),
            );
            if divergence == Divergence::Gone {
                continue;
            }
            let status = divergence.status();
            *report.counts.entry(status).or_default() += 1;
            report.items.push(ItemSyncStatus {
                id: candidate.id,
                item_type: candidate.item_type,
                status,
            });
        }
        Ok(report)
    }

    /// Conflicts currently parked under `sync/conflicts/`.
    ///
    /// # Errors
    ///
    /// Returns an error if a parked document cannot be read.
    pub fn pending_conflicts(&self) -> Result<Vec<Conflict>> {
        self.files.conflicts()
    }

    /// Settle a parked conflict with explicit winning content.
    ///
    /// Returns the item as now stored on both sides, or `None` when the
    /// resolution removed it.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if `id` has no pending conflict or the
    /// merged item carries another id, and graph or storage errors from the
    /// write.
    pub async fn resolve_conflict(&self, id: &str, resolution: Resolution) -> Result<Option<WorkItem>> {
        let guard = self.store.lock(id).await;

        let parked = self.files.load_conflict(id)?;
        let flagged = self
            .state
            .get(id)
            .is_some_and(|s| s.status == SyncStatus::Conflict);
        if parked.is_none() && !flagged {
            return Err(Error::validation(
                "id",
                format!("'{id}' has no pending sync conflict"),
            ));
        }

        let file = self.read_file_side(id, None)?;
        let db = self.store.get(id)?;
        let choice = resolution.as_str();

        let outcome = match resolution {
            Resolution::File => match file {
                Some(file) => Some(self.pull(&guard, file, db.as_ref()).await?),
                None => {
                    if let Some(db) = &db {
                        self.delete_db_side(&guard, db).await?;
                    }
                    None
                }
            },
            Resolution::Database => match db {
                Some(db) => {
                    self.push(&db, file.as_ref())?;
                    Some(db)
                }
                None => {
                    if let Some(file) = &file {
                        self.delete_file_side(id, file)?;
                    }
                    None
                }
            },
            Resolution::Merged { item } => {
                if item.id != id {
                    return Err(Error::validation(
                        "item",
                        format!("resolution for '{id}' carries item '{}'", item.id),
                    ));
                }
                Some(self.write_both(&guard, *item, file.as_ref(), db.as_ref()).await?)
            }
            Resolution::Delete => {
                if let Some(db) = &db {
                    self.delete_db_side(&guard, db).await?;
                }
                if let Some(file) = &file {
                    self.delete_file_side(id, file)?;
                }
                None
            }
        };

        if outcome.is_none() {
            self.state.remove(id);
        }
        self.state.flush().await?;
        self.files.remove_conflict(id)?;
        self.record(
            Event::new(WORK_ITEM_ENTITY, id, EventType::ConflictResolved, self.store.actor())
                .with_comment(&format!("manual: {choice}")),
        )?;
        info!(id, resolution = choice, "Resolved sync conflict");
        Ok(outcome)
    }

    /// Snapshot the database, the file tree and the sync state under
    /// `sync/backups/snapshot-<timestamp>-<suffix>/`.
    ///
    /// # Errors
    ///
    /// Returns an error if any part of the snapshot cannot be written.
    pub async fn backup(&self) -> Result<BackupInfo> {
        let _pass = self.pass.lock().await;
        self.files.init()?;

        let now = Utc::now();
        let name = format!(
            "{SNAPSHOT_PREFIX}{}-{}",
            now.format("%Y%m%dT%H%M%S%3fZ"),
            super::file::unique_suffix()
        );
        let dir = self.files.backups_dir().join(&name);
        fs::create_dir_all(&dir)?;

        self.store.backup_to(&dir.join(SNAPSHOT_DB))?;
        let files = self.files.copy_tree_to(&dir.join(SNAPSHOT_FILES))?;
        self.state.flush().await?;
        let state_path = self.files.state_path();
        if state_path.is_file() {
            fs::copy(&state_path, dir.join(SNAPSHOT_STATE))?;
        }

        self.record(
            Event::new(NAMESPACE_ENTITY, &self.namespace, EventType::BackupCreated, self.store.actor())
                .with_comment(&name),
        )?;
        info!(namespace = %self.namespace, snapshot = %name, files, "Created backup");

        Ok(BackupInfo {
            items: self.store.count()?,
            name,
            path: dir,
            created_at: now.timestamp_millis(),
        })
    }

    /// Snapshot names, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the backups directory cannot be listed.
    pub fn list_backups(&self) -> Result<Vec<String>> {
        let dir = self.files.backups_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut names: Vec<String> = fs::read_dir(dir)?
            .filter_map(std::result::Result::ok)
            .filter(|e| e.path().is_dir())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with(SNAPSHOT_PREFIX))
            .collect();
        names.sort();
        Ok(names)
    }

    /// Restore the named snapshot, or the latest one.
    ///
    /// Parked conflicts are discarded; they describe edits the snapshot
    /// predates.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if no matching snapshot exists, or an
    /// error if the database or file tree cannot be replaced.
    pub async fn restore(&self, name: Option<&str>) -> Result<BackupInfo> {
        let _pass = self.pass.lock().await;

        let name = match name {
            Some(n) => n.to_string(),
            None => self
                .list_backups()?
                .pop()
                .ok_or_else(|| Error::validation("backup", "no snapshots to restore"))?,
        };
        let dir = self.files.backups_dir().join(&name);
        if !name.starts_with(SNAPSHOT_PREFIX) || name.contains(['/', '\\']) || !dir.is_dir() {
            return Err(Error::validation("backup", format!("snapshot '{name}' not found")));
        }

        self.store.restore_from(&dir.join(SNAPSHOT_DB))?;
        let files = self.files.replace_tree_from(&dir.join(SNAPSHOT_FILES))?;

        let state_path = self.files.state_path();
        let snapshot_state = dir.join(SNAPSHOT_STATE);
        if snapshot_state.is_file() {
            fs::copy(&snapshot_state, &state_path)?;
        } else if state_path.is_file() {
            fs::remove_file(&state_path)?;
        }
        self.state.reload()?;

        for conflict in self.files.conflicts()? {
            self.files.remove_conflict(&conflict.id)?;
        }

        self.record(
            Event::new(NAMESPACE_ENTITY, &self.namespace, EventType::BackupRestored, self.store.actor())
                .with_comment(&name),
        )?;
        info!(namespace = %self.namespace, snapshot = %name, files, "Restored backup");

        Ok(BackupInfo {
            items: self.store.count()?,
            created_at: Utc::now().timestamp_millis(),
            name,
            path: dir,
        })
    }

    // ── Planning ──────────────────────────────────────────────

    fn plan(&self, scan: &ScanResult, scope: &SyncScope) -> Result<Vec<Candidate>> {
        let blocked = scan.blocked_ids();
        let db_items: HashMap<String, WorkItem> = self
            .store
            .all_items()?
            .into_iter()
            .map(|item| (item.id.clone(), item))
            .collect();

        let ids: BTreeSet<String> = scan
            .items
            .keys()
            .cloned()
            .chain(db_items.keys().cloned())
            .chain(self.state.ids())
            .filter(|id| !blocked.contains(id))
            .collect();

        let mut candidates = Vec::new();
        for id in ids {
            let file = scan.items.get(&id);
            let db = db_items.get(&id);
            let baseline = self.state.get(&id).and_then(|s| s.baseline);

            let types: Vec<ItemType> = file
                .map(|f| f.item.item_type)
                .into_iter()
                .chain(db.map(|d| d.item_type))
                .chain(baseline.as_ref().map(|b| b.item_type))
                .collect();
            if !scope.includes(&id, &types) {
                continue;
            }

            candidates.push(Candidate {
                rank: types.iter().map(ItemType::rank).min().unwrap_or(0),
                item_type: types.first().copied(),
                file_path: file.map(|f| f.path.clone()),
                file_checksum: file.map(|f| f.checksum.clone()),
                db_checksum: db.map(|d| d.checksum.clone()),
                id,
            });
        }
        Ok(candidates)
    }

    // ── Per-item reconciliation ───────────────────────────────

    async fn reconcile(
        &self,
        candidate: &Candidate,
        direction: SyncDirection,
        strategy: MergeStrategy,
        allow_delete: bool,
    ) -> Result<Change> {
        let id = candidate.id.as_str();
        let guard = self.store.lock(id).await;

        let file = self.read_file_side(id, candidate.file_path.clone())?;
        let db = self.store.get(id)?;
        let state = self.state.get(id);
        let divergence = classify(
            file.as_ref().map(|f| f.checksum.as_str()),
            db.as_ref().map(|d| d.checksum.as_str()),
            state.as_ref(),
        );
        debug!(id, divergence = ?divergence, "Classified item");

        let change = match (divergence, file, db) {
            (Divergence::InSync, ..) => Change::InSync,
            (Divergence::Gone, ..) => {
                self.state.remove(id);
                self.files.remove_conflict(id)?;
                Change::Forgotten
            }
            (Divergence::Adopt, _, Some(db)) => {
                self.state.set(SyncState::in_sync(&db));
                if self.files.remove_conflict(id)? {
                    self.mark_resolved(id, "converged")?;
                }
                Change::InSync
            }
            (Divergence::FileNewer | Divergence::NewOnFile, Some(file), db) => {
                if !direction.pulls_files() {
                    return Ok(Change::Skipped);
                }
                let created = db.is_none();
                self.pull(&guard, file, db.as_ref()).await?;
                if created { Change::CreatedInDb } else { Change::FileToDb }
            }
            (Divergence::DbNewer | Divergence::NewInDb, file, Some(db)) => {
                if !direction.pushes_db() {
                    return Ok(Change::Skipped);
                }
                let created = file.is_none();
                self.push(&db, file.as_ref())?;
                if created { Change::CreatedOnFile } else { Change::DbToFile }
            }
            (Divergence::DeletedOnFile, None, Some(db)) => {
                if !direction.pulls_files() {
                    Change::Skipped
                } else if allow_delete {
                    self.delete_db_side(&guard, &db).await?;
                    self.state.remove(id);
                    Change::DeletedInDb
                } else {
                    Change::Deferred
                }
            }
            (Divergence::DeletedInDb, Some(file), None) => {
                if !direction.pushes_db() {
                    Change::Skipped
                } else if allow_delete {
                    self.delete_file_side(id, &file)?;
                    self.state.remove(id);
                    Change::DeletedOnFile
                } else {
                    Change::Deferred
                }
            }
            (Divergence::Conflict, file, db) => {
                self.settle(&guard, file, db, state, strategy, allow_delete)
                    .await?
            }
            (divergence, ..) => {
                return Err(Error::Other(format!(
                    "inconsistent sync classification {divergence:?} for '{id}'"
                )));
            }
        };
        Ok(change)
    }

    async fn settle(
        &self,
        guard: &ItemGuard,
        file: Option<FileItem>,
        db: Option<WorkItem>,
        state: Option<SyncState>,
        strategy: MergeStrategy,
        allow_delete: bool,
    ) -> Result<Change> {
        let id = guard.id();
        let baseline = state.as_ref().and_then(|s| s.baseline.clone());

        match strategy {
            MergeStrategy::FileWins => match (file, db) {
                (Some(file), db) => {
                    self.pull(guard, file, db.as_ref()).await?;
                }
                (None, Some(_)) if !allow_delete => return Ok(Change::Deferred),
                (None, Some(db)) => {
                    self.delete_db_side(guard, &db).await?;
                    self.state.remove(id);
                }
                (None, None) => return Ok(Change::Forgotten),
            },
            MergeStrategy::DatabaseWins => match (file, db) {
                (file, Some(db)) => self.push(&db, file.as_ref())?,
                (Some(_), None) if !allow_delete => return Ok(Change::Deferred),
                (Some(file), None) => {
                    self.delete_file_side(id, &file)?;
                    self.state.remove(id);
                }
                (None, None) => return Ok(Change::Forgotten),
            },
            MergeStrategy::AutoMerge => match (&baseline, file, db) {
                (Some(base), Some(file), Some(db)) => match auto_merge(base, &file.item, &db) {
                    MergeOutcome::Merged(item) => {
                        self.write_both(guard, item, Some(&file), Some(&db)).await?;
                    }
                    MergeOutcome::Conflict(fields) => {
                        let conflict =
                            new_conflict(id, Some(file.item), Some(db), baseline.clone(), fields);
                        return self.park(conflict, state);
                    }
                },
                (_, file, db) => {
                    let conflict =
                        new_conflict(id, file.map(|f| f.item), db, baseline.clone(), Vec::new());
                    return self.park(conflict, state);
                }
            },
            MergeStrategy::ManualResolution => {
                let (file, db) = (file.map(|f| f.item), db);
                let fields = match (&baseline, &file, &db) {
                    (Some(base), Some(f), Some(d)) => match auto_merge(base, f, d) {
                        MergeOutcome::Conflict(fields) => fields,
                        MergeOutcome::Merged(_) => Vec::new(),
                    },
                    _ => Vec::new(),
                };
                return self.park(new_conflict(id, file, db, baseline, fields), state);
            }
        }

        self.mark_resolved(id, strategy.as_str())?;
        Ok(Change::Resolved)
    }

    fn park(&self, conflict: Conflict, state: Option<SyncState>) -> Result<Change> {
        let already_parked = self.files.load_conflict(&conflict.id)?.is_some();
        self.files.park_conflict(&conflict)?;

        let state = state.unwrap_or_else(|| SyncState {
            id: conflict.id.clone(),
            file_checksum: None,
            db_checksum: None,
            last_synced: Utc::now().timestamp_millis(),
            baseline: None,
            status: SyncStatus::Conflict,
        });
        self.state.set(state.parked());

        if !already_parked {
            let fields: Vec<&str> = conflict.fields.iter().map(|f| f.as_str()).collect();
            self.record(
                Event::new(WORK_ITEM_ENTITY, &conflict.id, EventType::ConflictRaised, self.store.actor())
                    .with_comment(&fields.join(",")),
            )?;
            warn!(id = %conflict.id, kind = ?conflict.kind, fields = ?fields, "Sync conflict parked");
        }
        Ok(Change::Pending(Box::new(conflict)))
    }

    fn mark_resolved(&self, id: &str, how: &str) -> Result<()> {
        self.files.remove_conflict(id)?;
        self.record(
            Event::new(WORK_ITEM_ENTITY, id, EventType::ConflictResolved, self.store.actor())
                .with_comment(how),
        )
    }

    /// Take the file version into the database.
    ///
    /// A file edited without bumping `updated_at` gets a fresh stamp, written
    /// back to the file so both sides carry the same one.
    async fn pull(&self, guard: &ItemGuard, file: FileItem, db: Option<&WorkItem>) -> Result<WorkItem> {
        let mut item = file.item;
        let mut restamped = false;
        if let Some(db) = db {
            self.files.backup_record(db)?;
            if item.created_by.is_none() {
                item.created_by.clone_from(&db.created_by);
            }
            if !db.same_content(&item) && item.updated_at <= db.updated_at {
                item.touch();
                restamped = true;
            }
        }

        let stored = self.hierarchy.put_checked_locked(guard, item).await?;
        if restamped {
            let children = self.child_ids(&stored.id)?;
            self.files.write_item(&stored, &children)?;
        }
        self.state.set(SyncState::in_sync(&stored));
        self.record(
            Event::new(WORK_ITEM_ENTITY, &stored.id, EventType::SyncPropagated, self.store.actor())
                .with_values(db.map(|d| d.checksum.clone()), Some(stored.checksum.clone()))
                .with_comment(SyncDirection::FileToDb.as_str()),
        )?;
        debug!(id = %stored.id, "Propagated file to database");
        Ok(stored)
    }

    /// Write the database version to its file.
    fn push(&self, db: &WorkItem, file: Option<&FileItem>) -> Result<()> {
        if let Some(file) = file {
            self.files.backup_file(&db.id, &file.path)?;
        }
        let children = self.child_ids(&db.id)?;
        let path = self.files.write_item(db, &children)?;

        self.state.set(SyncState::in_sync(db));
        self.record(
            Event::new(WORK_ITEM_ENTITY, &db.id, EventType::SyncPropagated, self.store.actor())
                .with_values(file.map(|f| f.checksum.clone()), Some(db.checksum.clone()))
                .with_comment(SyncDirection::DbToFile.as_str()),
        )?;
        debug!(id = %db.id, path = %path.display(), "Propagated database to file");
        Ok(())
    }

    /// Write merged or chosen content to both sides.
    async fn write_both(
        &self,
        guard: &ItemGuard,
        item: WorkItem,
        file: Option<&FileItem>,
        db: Option<&WorkItem>,
    ) -> Result<WorkItem> {
        if let Some(db) = db {
            self.files.backup_record(db)?;
        }
        if let Some(file) = file {
            self.files.backup_file(&item.id, &file.path)?;
        }

        let stored = self.hierarchy.put_checked_locked(guard, item).await?;
        let children = self.child_ids(&stored.id)?;
        self.files.write_item(&stored, &children)?;

        self.state.set(SyncState::in_sync(&stored));
        self.record(
            Event::new(WORK_ITEM_ENTITY, &stored.id, EventType::SyncPropagated, self.store.actor())
                .with_values(db.map(|d| d.checksum.clone()), Some(stored.checksum.clone()))
                .with_comment("both"),
        )?;
        debug!(id = %stored.id, "Wrote item to both sides");
        Ok(stored)
    }

    async fn delete_db_side(&self, guard: &ItemGuard, db: &WorkItem) -> Result<()> {
        self.files.backup_record(db)?;
        self.store.delete_locked(guard, &db.id).await?;
        self.record(
            Event::new(WORK_ITEM_ENTITY, &db.id, EventType::SyncPropagated, self.store.actor())
                .with_values(Some(db.checksum.clone()), None)
                .with_comment(SyncDirection::FileToDb.as_str()),
        )?;
        debug!(id = %db.id, "Propagated file deletion to database");
        Ok(())
    }

    fn delete_file_side(&self, id: &str, file: &FileItem) -> Result<()> {
        self.files.backup_file(id, &file.path)?;
        self.files.remove(id)?;
        if file.path.is_file() {
            fs::remove_file(&file.path)?;
        }
        self.record(
            Event::new(WORK_ITEM_ENTITY, id, EventType::SyncPropagated, self.store.actor())
                .with_values(Some(file.checksum.clone()), None)
                .with_comment(SyncDirection::DbToFile.as_str()),
        )?;
        debug!(id, "Propagated database deletion to file");
        Ok(())
    }

    fn read_file_side(&self, id: &str, hint: Option<PathBuf>) -> Result<Option<FileItem>> {
        match hint.filter(|p| p.is_file()).or_else(|| self.files.locate(id)) {
            Some(path) => self.files.read_file(&path).map(Some),
            None => Ok(None),
        }
    }

    fn child_ids(&self, id: &str) -> Result<Vec<String>> {
        Ok(self
            .store
            .children_of(id)?
            .into_iter()
            .map(|c| c.id)
            .collect())
    }

    fn record(&self, event: Event) -> Result<()> {
        self.store.record_event(&event)
    }
}

fn new_conflict(
    id: &str,
    file: Option<WorkItem>,
    database: Option<WorkItem>,
    baseline: Option<WorkItem>,
    fields: Vec<crate::model::ItemField>,
) -> Conflict {
    let kind = if file.is_some() && database.is_some() {
        ConflictKind::Content
    } else {
        ConflictKind::DeleteModify
    };
    let strip = |item: Option<WorkItem>| {
        item.map(|mut i| {
            i.embedding = None;
            i
        })
    };
    Conflict {
        id: id.to_string(),
        kind,
        file: strip(file),
        database: strip(database),
        baseline,
        fields,
        detected_at: Utc::now().timestamp_millis(),
    }
}

/// Report unreadable and duplicated files.
fn scan_errors(scan: &ScanResult) -> Vec<SyncItemError> {
    let mut errors: Vec<SyncItemError> = scan
        .errors
        .iter()
        .map(|e| SyncItemError::new(e.id_hint.as_deref(), Some(e.path.clone()), &e.error))
        .collect();

    for (id, copies) in &scan.duplicates {
        let parents: BTreeSet<String> = copies
            .iter()
            .filter_map(|c| c.item.parent_id.clone())
            .collect();
        let error = if parents.len() > 1 {
            Error::GraphViolation(vec![Violation::MultipleParents {
                child: id.clone(),
                parents: parents.into_iter().collect(),
            }])
        } else {
            let paths: Vec<String> = copies.iter().map(|c| c.path.display().to_string()).collect();
            Error::validation("id", format!("'{id}' is stored in several files: {}", paths.join(", ")))
        };
        errors.push(SyncItemError::new(
            Some(id.as_str()),
            copies.first().map(|c| c.path.clone()),
            &error,
        ));
    }
    errors
}
