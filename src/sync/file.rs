//! File representation of a namespace.
//!
//! One human-editable JSON document per work item under a directory per
//! rank (`initiatives/`, `epics/`, ...), plus `relationships.json`,
//! `metadata.json` and the `sync/` area (state, parked conflicts, backups).
//!
//! All writes are atomic: write to a temp file, sync to disk, then rename,
//! so a crash never leaves a half-written document behind.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{Error, FormatError, Result};
use crate::model::{ItemType, WorkItem};
use crate::sync::types::Conflict;
use crate::validate::{
    describe_invalid, is_valid_item_id, normalize_priority, normalize_status, normalize_type,
};

/// Version written to `metadata.file_version`; newer documents are rejected.
pub const FILE_VERSION: u32 = 1;

const SYNC_DIR: &str = "sync";
const STATE_FILE: &str = "sync-state.json";
const CONFLICTS_DIR: &str = "conflicts";
const BACKUPS_DIR: &str = "backups";
const RELATIONSHIPS_FILE: &str = "relationships.json";
const METADATA_FILE: &str = "metadata.json";

/// Write content to a file atomically.
///
/// This function:
/// 1. Writes content to a temporary file next to the target
/// 2. Calls `fsync` to ensure data is on disk
/// 3. Atomically renames the temp file to the target path
///
/// If any step fails, the original file (if any) remains untouched.
///
/// # Errors
///
/// Returns an error if any file operation fails.
pub fn atomic_write(path: &Path, content: &str) -> Result<()> {
    let temp_path = temp_path_for(path);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    {
        let file = File::create(&temp_path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(content.as_bytes())?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }

    fs::rename(&temp_path, path)?;
    Ok(())
}

/// Eight hex characters from a fresh v4 uuid.
pub(crate) fn unique_suffix() -> String {
    let mut suffix = uuid::Uuid::new_v4().simple().to_string();
    suffix.truncate(8);
    suffix
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// A parsed work-item file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileItem {
    pub item: WorkItem,
    /// Semantic checksum of `item`, comparable with the database row.
    pub checksum: String,
    /// Derived list as written; never fed back into the item.
    pub children_ids: Vec<String>,
    pub last_synced: Option<i64>,
    pub path: PathBuf,
}

/// A file that could not be read during a scan.
#[derive(Debug)]
pub struct ScanError {
    pub path: PathBuf,
    /// File stem, which names the item when the document follows the layout.
    pub id_hint: Option<String>,
    pub error: Error,
}

/// Outcome of scanning every rank directory.
#[derive(Debug, Default)]
pub struct ScanResult {
    pub items: BTreeMap<String, FileItem>,
    /// Ids found in more than one file. Excluded from `items`.
    pub duplicates: BTreeMap<String, Vec<FileItem>>,
    pub errors: Vec<ScanError>,
}

impl ScanResult {
    /// Ids that must not be reconciled this pass: unreadable or duplicated.
    #[must_use]
    pub fn blocked_ids(&self) -> BTreeSet<String> {
        self.errors
            .iter()
            .filter_map(|e| e.id_hint.clone())
            .chain(self.duplicates.keys().cloned())
            .collect()
    }
}

#[derive(Serialize)]
struct ItemDocument<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    item_type: ItemType,
    title: &'a str,
    description: &'a str,
    status: &'a str,
    priority: &'a str,
    effort_estimate: Option<f64>,
    acceptance_criteria: &'a [String],
    parent_id: Option<&'a str>,
    children_ids: &'a [String],
    dependencies: Vec<&'a str>,
    tags: Vec<&'a str>,
    metadata: DocumentMetadata<'a>,
}

#[derive(Serialize)]
struct DocumentMetadata<'a> {
    created_at: String,
    updated_at: String,
    created_by: Option<&'a str>,
    last_synced: String,
    file_version: u32,
    checksum: &'a str,
}

/// File tree of one namespace.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the rank directories and the `sync/` area.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory cannot be created.
    pub fn init(&self) -> Result<()> {
        for item_type in ItemType::ALL {
            fs::create_dir_all(self.root.join(item_type.dir_name()))?;
        }
        fs::create_dir_all(self.conflicts_dir())?;
        fs::create_dir_all(self.backups_dir())?;
        Ok(())
    }

    #[must_use]
    pub fn sync_dir(&self) -> PathBuf {
        self.root.join(SYNC_DIR)
    }

    #[must_use]
    pub fn state_path(&self) -> PathBuf {
        self.sync_dir().join(STATE_FILE)
    }

    #[must_use]
    pub fn conflicts_dir(&self) -> PathBuf {
        self.sync_dir().join(CONFLICTS_DIR)
    }

    #[must_use]
    pub fn backups_dir(&self) -> PathBuf {
        self.sync_dir().join(BACKUPS_DIR)
    }

    /// Canonical location of an item's file: `<rank dir>/<id>.json`.
    #[must_use]
    pub fn path_for(&self, item: &WorkItem) -> PathBuf {
        self.path_for_id(item.item_type, &item.id)
    }

    #[must_use]
    pub fn path_for_id(&self, item_type: ItemType, id: &str) -> PathBuf {
        self.root.join(item_type.dir_name()).join(format!("{id}.json"))
    }

    /// Find an item's file in any rank directory.
    #[must_use]
    pub fn locate(&self, id: &str) -> Option<PathBuf> {
        ItemType::ALL
            .into_iter()
            .map(|t| self.path_for_id(t, id))
            .find(|p| p.is_file())
    }

    /// Read and validate one document.
    ///
    /// # Errors
    ///
    /// Returns `Error::Format` naming the offending field for a malformed
    /// document, or `Error::Io` if the file cannot be read.
    pub fn read(&self, path: &Path) -> Result<(WorkItem, String)> {
        let file = self.read_file(path)?;
        Ok((file.item, file.checksum))
    }

    /// [`FileStore::read`] with the derived and sync metadata kept.
    ///
    /// # Errors
    ///
    /// See [`FileStore::read`].
    pub fn read_file(&self, path: &Path) -> Result<FileItem> {
        let text = fs::read_to_string(path)?;
        parse_document(path, &text).map_err(Error::Format)
    }

    /// Semantic checksum of the item stored at `path`.
    ///
    /// # Errors
    ///
    /// See [`FileStore::read`].
    pub fn checksum_of(&self, path: &Path) -> Result<String> {
        self.read(path).map(|(_, checksum)| checksum)
    }

    /// Write an item at an explicit path without a children list.
    ///
    /// # Errors
    ///
    /// Returns an error if the item id cannot name a file or the write fails.
    pub fn write(&self, item: &WorkItem, path: &Path) -> Result<()> {
        self.write_document(item, &[], path)
    }

    /// Write an item at its canonical path, removing a copy left in another
    /// rank directory after a type change. Returns the written path.
    ///
    /// # Errors
    ///
    /// Returns an error if the item id cannot name a file or the write fails.
    pub fn write_item(&self, item: &WorkItem, children_ids: &[String]) -> Result<PathBuf> {
        check_file_id(&item.id)?;
        let path = self.path_for(item);
        self.write_document(item, children_ids, &path)?;

        for item_type in ItemType::ALL {
            let other = self.path_for_id(item_type, &item.id);
            if other != path && other.is_file() {
                fs::remove_file(&other)?;
                debug!(id = %item.id, path = %other.display(), "Removed file from previous rank directory");
            }
        }
        Ok(path)
    }

    fn write_document(&self, item: &WorkItem, children_ids: &[String], path: &Path) -> Result<()> {
        check_file_id(&item.id)?;
        let checksum = item.compute_checksum();
        let document = ItemDocument {
            id: &item.id,
            item_type: item.item_type,
            title: &item.title,
            description: &item.description,
            status: item.status.as_str(),
            priority: item.priority.as_str(),
            effort_estimate: item.effort_estimate,
            acceptance_criteria: &item.acceptance_criteria,
            parent_id: item.parent_id.as_deref(),
            children_ids,
            dependencies: item.dependency_ids.iter().map(String::as_str).collect(),
            tags: item.tags.iter().map(String::as_str).collect(),
            metadata: DocumentMetadata {
                created_at: format_timestamp(item.created_at),
                updated_at: format_timestamp(item.updated_at),
                created_by: item.created_by.as_deref(),
                last_synced: format_timestamp(Utc::now().timestamp_millis()),
                file_version: FILE_VERSION,
                checksum: &checksum,
            },
        };

        let mut content = serde_json::to_string_pretty(&document)?;
        content.push('\n');
        atomic_write(path, &content)
    }

    /// Remove every file of `id`. Returns whether one existed.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be removed.
    pub fn remove(&self, id: &str) -> Result<bool> {
        let mut removed = false;
        for item_type in ItemType::ALL {
            let path = self.path_for_id(item_type, id);
            if path.is_file() {
                fs::remove_file(&path)?;
                removed = true;
            }
        }
        Ok(removed)
    }

    /// Parse every document in the rank directories.
    ///
    /// Unreadable files are collected in `errors`; the scan itself only fails
    /// when a directory cannot be listed.
    ///
    /// # Errors
    ///
    /// Returns an error if a rank directory exists but cannot be read.
    pub fn scan(&self) -> Result<ScanResult> {
        let mut result = ScanResult::default();

        for item_type in ItemType::ALL {
            let dir = self.root.join(item_type.dir_name());
            if !dir.is_dir() {
                continue;
            }

            let mut paths: Vec<PathBuf> = fs::read_dir(&dir)?
                .filter_map(std::result::Result::ok)
                .map(|e| e.path())
                .filter(|p| p.is_file() && p.extension().is_some_and(|e| e == "json"))
                .collect();
            paths.sort();

            for path in paths {
                match self.read_file(&path) {
                    Ok(file) => {
                        let id = file.item.id.clone();
                        if let Some(copies) = result.duplicates.get_mut(&id) {
                            copies.push(file);
                        } else if let Some(first) = result.items.remove(&id) {
                            warn!(id = %id, "Item stored in more than one file");
                            result.duplicates.insert(id, vec![first, file]);
                        } else {
                            result.items.insert(id, file);
                        }
                    }
                    Err(error) => {
                        warn!(path = %path.display(), error = %error, "Skipping unreadable work-item file");
                        result.errors.push(ScanError {
                            id_hint: path.file_stem().map(|s| s.to_string_lossy().into_owned()),
                            path,
                            error,
                        });
                    }
                }
            }
        }

        Ok(result)
    }

    /// Write `relationships.json`: parent, children and dependency maps.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write_relationships(&self, items: &[WorkItem]) -> Result<()> {
        let mut parents = BTreeMap::new();
        let mut children: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        let mut dependencies = BTreeMap::new();

        for item in items {
            if let Some(parent) = &item.parent_id {
                parents.insert(item.id.as_str(), parent.as_str());
                children.entry(parent.as_str()).or_default().push(item.id.as_str());
            }
            if !item.dependency_ids.is_empty() {
                let deps: Vec<&str> = item.dependency_ids.iter().map(String::as_str).collect();
                dependencies.insert(item.id.as_str(), deps);
            }
        }

        let document = serde_json::json!({
            "generated_at": format_timestamp(Utc::now().timestamp_millis()),
            "parents": parents,
            "children": children,
            "dependencies": dependencies,
        });
        let mut content = serde_json::to_string_pretty(&document)?;
        content.push('\n');
        atomic_write(&self.root.join(RELATIONSHIPS_FILE), &content)
    }

    /// Write `metadata.json`, keeping the original `created_at`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write_metadata(&self, namespace: &str, item_count: usize) -> Result<()> {
        let path = self.root.join(METADATA_FILE);
        let now = format_timestamp(Utc::now().timestamp_millis());
        let created_at = fs::read_to_string(&path)
            .ok()
            .and_then(|text| serde_json::from_str::<Value>(&text).ok())
            .and_then(|v| v.get("created_at").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| now.clone());

        let document = serde_json::json!({
            "namespace": namespace,
            "file_version": FILE_VERSION,
            "created_at": created_at,
            "updated_at": now,
            "item_count": item_count,
        });
        let mut content = serde_json::to_string_pretty(&document)?;
        content.push('\n');
        atomic_write(&path, &content)
    }

    // ── Conflicts ─────────────────────────────────────────────

    fn conflict_path(&self, id: &str) -> PathBuf {
        self.conflicts_dir().join(format!("{id}.json"))
    }

    /// Park a conflict as `sync/conflicts/<id>.json`.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be written.
    pub fn park_conflict(&self, conflict: &Conflict) -> Result<()> {
        check_file_id(&conflict.id)?;
        let content = serde_json::to_string_pretty(conflict)?;
        atomic_write(&self.conflict_path(&conflict.id), &content)
    }

    /// Load a parked conflict.
    ///
    /// # Errors
    ///
    /// Returns an error if the document exists but cannot be parsed.
    pub fn load_conflict(&self, id: &str) -> Result<Option<Conflict>> {
        let path = self.conflict_path(id);
        if !path.is_file() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&text)?))
    }

    /// Discard a parked conflict. Returns whether one existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be removed.
    pub fn remove_conflict(&self, id: &str) -> Result<bool> {
        let path = self.conflict_path(id);
        if !path.is_file() {
            return Ok(false);
        }
        fs::remove_file(path)?;
        Ok(true)
    }

    /// All parked conflicts, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or a document cannot be read.
    pub fn conflicts(&self) -> Result<Vec<Conflict>> {
        let dir = self.conflicts_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut conflicts = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "json") {
                let text = fs::read_to_string(&path)?;
                conflicts.push(serde_json::from_str::<Conflict>(&text)?);
            }
        }
        conflicts.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(conflicts)
    }

    // ── Backups ───────────────────────────────────────────────

    /// `<ms timestamp>-<suffix>-<side>.json`; the random suffix keeps two
    /// backups taken within one millisecond apart.
    fn item_backup_path(&self, id: &str, side: &str) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%3fZ");
        self.backups_dir()
            .join("items")
            .join(id)
            .join(format!("{stamp}-{}-{side}.json", unique_suffix()))
    }

    /// Copy an item's file aside before it is overwritten or removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the copy fails.
    pub fn backup_file(&self, id: &str, path: &Path) -> Result<PathBuf> {
        let target = self.item_backup_path(id, "file");
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(path, &target)?;
        Ok(target)
    }

    /// Save a database row aside before it is overwritten or deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the copy cannot be written.
    pub fn backup_record(&self, item: &WorkItem) -> Result<PathBuf> {
        let mut record = item.clone();
        record.embedding = None;
        let target = self.item_backup_path(&item.id, "db");
        atomic_write(&target, &serde_json::to_string_pretty(&record)?)?;
        Ok(target)
    }

    /// Copy the rank directories into `dest`.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be copied.
    pub fn copy_tree_to(&self, dest: &Path) -> Result<usize> {
        let mut copied = 0;
        for item_type in ItemType::ALL {
            let from = self.root.join(item_type.dir_name());
            let to = dest.join(item_type.dir_name());
            fs::create_dir_all(&to)?;
            if !from.is_dir() {
                continue;
            }
            for entry in fs::read_dir(&from)? {
                let path = entry?.path();
                if path.is_file() && path.extension().is_some_and(|e| e == "json") {
                    if let Some(name) = path.file_name() {
                        fs::copy(&path, to.join(name))?;
                        copied += 1;
                    }
                }
            }
        }
        Ok(copied)
    }

    /// Replace the rank directories with the copies under `source`.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory cannot be cleared or a file copied.
    pub fn replace_tree_from(&self, source: &Path) -> Result<usize> {
        for item_type in ItemType::ALL {
            let dir = self.root.join(item_type.dir_name());
            if dir.is_dir() {
                fs::remove_dir_all(&dir)?;
            }
        }
        let restored = Self::new(source).copy_tree_to(&self.root)?;
        Ok(restored)
    }
}

/// Reject ids that would escape their rank directory.
fn check_file_id(id: &str) -> Result<()> {
    if !is_valid_item_id(id) {
        return Err(Error::validation(
            "id",
            format!("'{id}' cannot be used as a file name"),
        ));
    }
    Ok(())
}

fn format_timestamp(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ── Document parsing ──────────────────────────────────────────

struct DocumentParser<'a> {
    path: &'a Path,
}

impl DocumentParser<'_> {
    fn error(&self, field: Option<&str>, message: impl Into<String>) -> FormatError {
        FormatError {
            path: self.path.to_path_buf(),
            field: field.map(str::to_string),
            message: message.into(),
        }
    }

    fn required_str<'v>(
        &self,
        obj: &'v Map<String, Value>,
        field: &str,
    ) -> std::result::Result<&'v str, FormatError> {
        match obj.get(field) {
            Some(Value::String(s)) if !s.trim().is_empty() => Ok(s),
            Some(Value::String(_)) => Err(self.error(Some(field), "must not be empty")),
            Some(_) => Err(self.error(Some(field), "expected a string")),
            None => Err(self.error(Some(field), "missing required field")),
        }
    }

    fn optional_str<'v>(
        &self,
        obj: &'v Map<String, Value>,
        field: &str,
    ) -> std::result::Result<Option<&'v str>, FormatError> {
        match obj.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(_) => Err(self.error(Some(field), "expected a string or null")),
        }
    }

    fn string_list(
        &self,
        obj: &Map<String, Value>,
        field: &str,
    ) -> std::result::Result<Vec<String>, FormatError> {
        match obj.get(field) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(values)) => values
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| self.error(Some(field), "expected an array of strings"))
                })
                .collect(),
            Some(_) => Err(self.error(Some(field), "expected an array of strings")),
        }
    }

    fn timestamp(
        &self,
        obj: &Map<String, Value>,
        field: &str,
    ) -> std::result::Result<Option<i64>, FormatError> {
        let qualified = format!("metadata.{field}");
        match obj.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
                .map(|dt| Some(dt.timestamp_millis()))
                .map_err(|e| self.error(Some(&qualified), format!("invalid RFC 3339 timestamp: {e}"))),
            Some(Value::Number(n)) => n
                .as_i64()
                .map(Some)
                .ok_or_else(|| self.error(Some(&qualified), "expected integer milliseconds")),
            Some(_) => Err(self.error(Some(&qualified), "expected a timestamp")),
        }
    }
}

fn parse_document(path: &Path, text: &str) -> std::result::Result<FileItem, FormatError> {
    let parser = DocumentParser { path };
    let value: Value = serde_json::from_str(text)
        .map_err(|e| parser.error(None, format!("invalid JSON: {e}")))?;
    let obj = value
        .as_object()
        .ok_or_else(|| parser.error(None, "expected a JSON object"))?;

    let id = parser.required_str(obj, "id")?.to_string();
    let title = parser.required_str(obj, "title")?.to_string();

    let item_type = normalize_type(parser.required_str(obj, "type")?).map_err(|(input, suggestion)| {
        parser.error(Some("type"), describe_invalid("type", &input, suggestion.as_deref()))
    })?;

    let status = match parser.optional_str(obj, "status")? {
        Some(s) => normalize_status(s).map_err(|(input, suggestion)| {
            parser.error(Some("status"), describe_invalid("status", &input, suggestion.as_deref()))
        })?,
        None => crate::model::Status::default(),
    };
    let priority = match parser.optional_str(obj, "priority")? {
        Some(s) => normalize_priority(s).map_err(|(input, suggestion)| {
            parser.error(Some("priority"), describe_invalid("priority", &input, suggestion.as_deref()))
        })?,
        None => crate::model::Priority::default(),
    };

    let effort_estimate = match obj.get("effort_estimate") {
        None | Some(Value::Null) => None,
        Some(Value::Number(n)) => n.as_f64(),
        Some(_) => return Err(parser.error(Some("effort_estimate"), "expected a number or null")),
    };

    let parent_id = parser
        .optional_str(obj, "parent_id")?
        .filter(|p| !p.trim().is_empty())
        .map(str::to_string);

    let empty = Map::new();
    let metadata = match obj.get("metadata") {
        None | Some(Value::Null) => &empty,
        Some(Value::Object(m)) => m,
        Some(_) => return Err(parser.error(Some("metadata"), "expected an object")),
    };
    if let Some(version) = metadata.get("file_version") {
        let version = version
            .as_u64()
            .ok_or_else(|| parser.error(Some("metadata.file_version"), "expected an integer"))?;
        if version > u64::from(FILE_VERSION) {
            return Err(parser.error(
                Some("metadata.file_version"),
                format!("unsupported version {version} (newest supported is {FILE_VERSION})"),
            ));
        }
    }

    let now = Utc::now().timestamp_millis();
    let updated_at = parser.timestamp(metadata, "updated_at")?;
    let created_at = parser.timestamp(metadata, "created_at")?.or(updated_at).unwrap_or(now);
    let last_synced = parser.timestamp(metadata, "last_synced")?;
    let created_by = parser.optional_str(metadata, "created_by")?.map(str::to_string);

    let mut item = WorkItem::new(item_type, title);
    item.id = id;
    item.description = parser.optional_str(obj, "description")?.unwrap_or_default().to_string();
    item.status = status;
    item.priority = priority;
    item.effort_estimate = effort_estimate;
    item.acceptance_criteria = parser.string_list(obj, "acceptance_criteria")?;
    item.parent_id = parent_id;
    item.dependency_ids = parser.string_list(obj, "dependencies")?.into_iter().collect();
    item.tags = parser.string_list(obj, "tags")?.into_iter().collect();
    item.created_by = created_by;
    item.created_at = created_at;
    item.updated_at = updated_at.unwrap_or(created_at);
    item.refresh_checksum();

    Ok(FileItem {
        checksum: item.checksum.clone(),
        children_ids: parser.string_list(obj, "children_ids")?,
        last_synced,
        path: path.to_path_buf(),
        item,
    })
}
