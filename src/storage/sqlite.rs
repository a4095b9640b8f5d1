//! SQLite record store.
//!
//! One `RecordStore` per namespace. It follows the mutation protocol of an
//! IMMEDIATE transaction per write with audit events inserted in the same
//! transaction, so a reader observes either the previous or the new row and
//! never a partial one.
//!
//! The connection sits behind a blocking mutex that is only ever held inside
//! synchronous sections; embedding calls and lock waits happen outside it.

use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rusqlite::types::{Type, Value};
use rusqlite::{Connection, DatabaseName, OptionalExtension, Row, Transaction};
use tracing::{debug, warn};

use crate::embeddings::{tokenize, truncate_for_model, BoxedProvider};
use crate::error::{Error, Result};
use crate::model::{ExecutionLog, ExecutionStatus, ItemType, Priority, Status, WorkItem};
use crate::retry::{with_retry, RetryPolicy};
use crate::storage::events::{get_events, insert_event, Event, EventType};
use crate::storage::filter::{ItemFilter, Sort, SortField, SortOrder};
use crate::storage::locks::{ItemGuard, ItemLocks};
use crate::storage::schema::apply_schema;

/// Entity type recorded on work-item audit events.
pub const WORK_ITEM_ENTITY: &str = "work_item";

const ITEM_COLUMNS: &str = "w.id, w.item_type, w.title, w.description, w.status, w.priority, \
     w.parent_id, w.dependency_ids, w.tags, w.acceptance_criteria, w.effort_estimate, \
     w.created_by, w.created_at, w.updated_at, w.checksum";

/// Column index of the first extra column after `ITEM_COLUMNS`.
const EXTRA_COLUMN: usize = 15;

/// Context for a mutation, collecting audit events for the transaction.
pub struct MutationContext {
    /// Name of the operation being performed.
    pub op_name: String,
    /// Actor performing the operation.
    pub actor: String,
    /// Events to write at the end of the transaction.
    pub events: Vec<Event>,
}

impl MutationContext {
    #[must_use]
    pub fn new(op_name: &str, actor: &str) -> Self {
        Self {
            op_name: op_name.to_string(),
            actor: actor.to_string(),
            events: Vec::new(),
        }
    }

    /// Record an event for this operation.
    pub fn record_event(&mut self, entity_type: &str, entity_id: &str, event_type: EventType) {
        self.events
            .push(Event::new(entity_type, entity_id, event_type, &self.actor));
    }

    /// Record an event with old/new values.
    pub fn record_change(
        &mut self,
        entity_type: &str,
        entity_id: &str,
        event_type: EventType,
        old_value: Option<String>,
        new_value: Option<String>,
    ) {
        self.events.push(
            Event::new(entity_type, entity_id, event_type, &self.actor)
                .with_values(old_value, new_value),
        );
    }
}

/// Durable work-item table set for one namespace.
#[derive(Debug)]
pub struct RecordStore {
    conn: Mutex<Connection>,
    locks: ItemLocks,
    embedder: Option<Arc<BoxedProvider>>,
    actor: String,
    retry: RetryPolicy,
}

impl RecordStore {
    /// Open a database at the given path, creating the schema if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema fails.
    pub fn open(path: &Path, embedder: Option<Arc<BoxedProvider>>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        apply_schema(&conn)?;
        debug!(path = %path.display(), "Opened record store");
        Ok(Self::from_connection(conn, embedder))
    }

    /// Open an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open_memory(embedder: Option<Arc<BoxedProvider>>) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self::from_connection(conn, embedder))
    }

    fn from_connection(conn: Connection, embedder: Option<Arc<BoxedProvider>>) -> Self {
        Self {
            conn: Mutex::new(conn),
            locks: ItemLocks::new(),
            embedder,
            actor: crate::config::default_actor(),
            retry: RetryPolicy::default(),
        }
    }

    /// Set the actor recorded on audit events.
    #[must_use]
    pub fn with_actor(mut self, actor: &str) -> Self {
        self.actor = actor.to_string();
        self
    }

    /// Set the retry policy for transient write failures.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn actor(&self) -> &str {
        &self.actor
    }

    #[must_use]
    pub fn embedder(&self) -> Option<&Arc<BoxedProvider>> {
        self.embedder.as_ref()
    }

    /// Per-item lock table shared by every writer of this namespace.
    #[must_use]
    pub fn locks(&self) -> &ItemLocks {
        &self.locks
    }

    /// Wait for the write lock of one item.
    pub async fn lock(&self, id: &str) -> ItemGuard {
        self.locks.acquire(id).await
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic mid-transaction rolls the transaction back on unwind.
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Execute a mutation with the transaction protocol.
    ///
    /// 1. Begins an IMMEDIATE transaction (for write locking)
    /// 2. Executes the mutation closure
    /// 3. Writes audit events
    /// 4. Commits (or rolls back on error)
    ///
    /// # Errors
    ///
    /// Returns an error if any step fails. The transaction is rolled back on error.
    pub fn mutate<F, R>(&self, op: &str, f: F) -> Result<R>
    where
        F: FnOnce(&Transaction, &mut MutationContext) -> Result<R>,
    {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

        let mut ctx = MutationContext::new(op, &self.actor);
        let result = f(&tx, &mut ctx)?;

        for event in &ctx.events {
            insert_event(&tx, event)?;
        }

        tx.commit()?;
        Ok(result)
    }

    // ==================
    // Writes
    // ==================

    /// Upsert an item, taking its write lock.
    ///
    /// # Errors
    ///
    /// See [`RecordStore::put_locked`].
    pub async fn put(&self, item: WorkItem) -> Result<WorkItem> {
        let guard = self.locks.acquire(&item.id).await;
        self.put_locked(&guard, item).await
    }

    /// Upsert an item while the caller holds its write lock.
    ///
    /// Recomputes the checksum. The embedding is owned by the store: it is
    /// kept when the embedded text is unchanged and regenerated otherwise.
    /// A provider failure stores the item without an embedding. Returns the
    /// item as stored.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if `id` or `title` is empty, or a storage
    /// error if the write fails after retries.
    pub async fn put_locked(&self, guard: &ItemGuard, mut item: WorkItem) -> Result<WorkItem> {
        check_guard(guard, &item.id)?;
        validate_required(&item)?;

        let existing = self.get(&item.id)?;
        item.refresh_checksum();

        let text = item.embedding_text();
        let reusable = existing
            .as_ref()
            .filter(|e| e.embedding_text() == text)
            .and_then(|e| e.embedding.clone());
        item.embedding = match reusable {
            Some(embedding) => Some(embedding),
            None => self.embed(&text).await,
        };

        let old_checksum = existing.map(|e| e.checksum);
        let model = self.embedder.as_ref().map(|p| p.info().model);

        let stored = &item;
        let old = old_checksum.as_deref();
        let model_name = model.as_deref();
        with_retry(&self.retry, "put", move || async move {
            self.write_item(stored, old, model_name)
        })
        .await?;

        debug!(
            id = %item.id,
            item_type = %item.item_type,
            created = old_checksum.is_none(),
            embedded = item.embedding.is_some(),
            "Stored work item"
        );
        Ok(item)
    }

    fn write_item(&self, item: &WorkItem, old_checksum: Option<&str>, model: Option<&str>) -> Result<()> {
        let dependency_ids = serde_json::to_string(&item.dependency_ids)?;
        let tags = serde_json::to_string(&item.tags)?;
        let criteria = serde_json::to_string(&item.acceptance_criteria)?;
        let blob = item.embedding.as_deref().map(encode_embedding);

        self.mutate("put", |tx, ctx| {
            tx.execute(
                "INSERT INTO work_items (id, item_type, title, description, status, priority, parent_id,
                    dependency_ids, tags, acceptance_criteria, effort_estimate, created_by,
                    created_at, updated_at, checksum, embedding, embedding_model)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
                 ON CONFLICT(id) DO UPDATE SET
                    item_type = excluded.item_type,
                    title = excluded.title,
                    description = excluded.description,
                    status = excluded.status,
                    priority = excluded.priority,
                    parent_id = excluded.parent_id,
                    dependency_ids = excluded.dependency_ids,
                    tags = excluded.tags,
                    acceptance_criteria = excluded.acceptance_criteria,
                    effort_estimate = excluded.effort_estimate,
                    created_by = excluded.created_by,
                    created_at = excluded.created_at,
                    updated_at = excluded.updated_at,
                    checksum = excluded.checksum,
                    embedding = excluded.embedding,
                    embedding_model = excluded.embedding_model",
                rusqlite::params![
                    item.id,
                    item.item_type.as_str(),
                    item.title,
                    item.description,
                    item.status.as_str(),
                    item.priority.as_str(),
                    item.parent_id,
                    dependency_ids,
                    tags,
                    criteria,
                    item.effort_estimate,
                    item.created_by,
                    item.created_at,
                    item.updated_at,
                    item.checksum,
                    blob,
                    item.embedding.as_ref().and(model),
                ],
            )?;

            tx.execute("DELETE FROM search_index WHERE item_id = ?1", [&item.id])?;
            tx.execute(
                "INSERT INTO search_index (item_id, title, description, tags, acceptance_criteria)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    item.id,
                    item.title,
                    item.description,
                    item.tags.iter().cloned().collect::<Vec<_>>().join(" "),
                    item.acceptance_criteria.join("\n"),
                ],
            )?;

            match old_checksum {
                None => ctx.record_change(
                    WORK_ITEM_ENTITY,
                    &item.id,
                    EventType::ItemCreated,
                    None,
                    Some(item.checksum.clone()),
                ),
                Some(old) if old != item.checksum => ctx.record_change(
                    WORK_ITEM_ENTITY,
                    &item.id,
                    EventType::ItemUpdated,
                    Some(old.to_string()),
                    Some(item.checksum.clone()),
                ),
                Some(_) => {}
            }

            Ok(())
        })
    }

    async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        let provider = self.embedder.as_ref()?;
        let text = truncate_for_model(text, provider.info().max_chars);

        match provider.generate_embedding(text).await {
            Ok(embedding) if !embedding.is_empty() => Some(embedding),
            Ok(_) => {
                warn!("Embedding provider returned an empty vector");
                None
            }
            Err(e) => {
                warn!(error = %e, "Embedding failed; storing item without embedding");
                None
            }
        }
    }

    /// Embed a search query.
    ///
    /// # Errors
    ///
    /// Returns `Error::Embedding` if no provider is configured or the call fails.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let provider = self
            .embedder
            .as_ref()
            .ok_or_else(|| Error::Embedding("no embedding provider configured".into()))?;
        let text = truncate_for_model(text, provider.info().max_chars);
        provider.generate_embedding(text).await
    }

    /// Delete an item, taking its write lock.
    ///
    /// # Errors
    ///
    /// See [`RecordStore::delete_locked`].
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let guard = self.locks.acquire(id).await;
        self.delete_locked(&guard, id).await
    }

    /// Delete an item while the caller holds its write lock.
    ///
    /// Returns `false` if the item does not exist. The item's execution logs
    /// and search row go with it.
    ///
    /// # Errors
    ///
    /// Returns `Error::HasDependents` while any child or dependent still
    /// references the item, or a storage error.
    pub async fn delete_locked(&self, guard: &ItemGuard, id: &str) -> Result<bool> {
        check_guard(guard, id)?;
        let deleted = with_retry(&self.retry, "delete", move || async move {
            self.delete_row(id)
        })
        .await?;

        if deleted {
            debug!(id, "Deleted work item");
        }
        Ok(deleted)
    }

    fn delete_row(&self, id: &str) -> Result<bool> {
        self.mutate("delete", |tx, ctx| {
            let checksum: Option<String> = tx
                .query_row("SELECT checksum FROM work_items WHERE id = ?1", [id], |row| {
                    row.get(0)
                })
                .optional()?;
            let Some(checksum) = checksum else {
                return Ok(false);
            };

            let children = query_ids(tx, "SELECT id FROM work_items WHERE parent_id = ?1 ORDER BY id", id)?;
            let dependents = query_ids(
                tx,
                "SELECT w.id FROM work_items w
                 WHERE EXISTS (SELECT 1 FROM json_each(w.dependency_ids) WHERE json_each.value = ?1)
                 ORDER BY w.id",
                id,
            )?;
            if !children.is_empty() || !dependents.is_empty() {
                return Err(Error::HasDependents {
                    id: id.to_string(),
                    children,
                    dependents,
                });
            }

            tx.execute("DELETE FROM work_items WHERE id = ?1", [id])?;
            tx.execute("DELETE FROM search_index WHERE item_id = ?1", [id])?;
            tx.execute("DELETE FROM execution_logs WHERE item_id = ?1", [id])?;
            ctx.record_change(
                WORK_ITEM_ENTITY,
                id,
                EventType::ItemDeleted,
                Some(checksum),
                None,
            );
            Ok(true)
        })
    }

    /// Generate embeddings for items stored without one.
    ///
    /// Rows whose checksum changed while the embedding was computed are left
    /// for the next call. Returns the number of items updated.
    ///
    /// # Errors
    ///
    /// Returns a storage error if reading or writing fails.
    pub async fn reindex_missing_embeddings(&self) -> Result<usize> {
        let Some(provider) = self.embedder.clone() else {
            return Ok(0);
        };
        let model = provider.info().model;

        let pending: Vec<WorkItem> = {
            let conn = self.conn();
            let sql = format!("SELECT {ITEM_COLUMNS} FROM work_items w WHERE w.embedding IS NULL ORDER BY w.id");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], |row| row_to_item(row, false))?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        let mut updated = 0;
        for item in pending {
            let Some(embedding) = self.embed(&item.embedding_text()).await else {
                continue;
            };
            let changed = self.conn().execute(
                "UPDATE work_items SET embedding = ?1, embedding_model = ?2
                 WHERE id = ?3 AND checksum = ?4 AND embedding IS NULL",
                rusqlite::params![encode_embedding(&embedding), model, item.id, item.checksum],
            )?;
            updated += changed;
        }

        debug!(updated, "Backfilled missing embeddings");
        Ok(updated)
    }

    // ==================
    // Reads
    // ==================

    /// Point lookup, embedding included.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get(&self, id: &str) -> Result<Option<WorkItem>> {
        let conn = self.conn();
        let sql = format!("SELECT {ITEM_COLUMNS}, w.embedding FROM work_items w WHERE w.id = ?1");
        let item = conn
            .query_row(&sql, [id], |row| row_to_item(row, true))
            .optional()?;
        Ok(item)
    }

    /// Whether an item exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn exists(&self, id: &str) -> Result<bool> {
        let conn = self.conn();
        let found: Option<i64> = conn
            .query_row("SELECT 1 FROM work_items WHERE id = ?1", [id], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    /// Filtered, sorted, paginated scan. Embeddings are not loaded.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn scan(
        &self,
        filter: &ItemFilter,
        sort: Sort,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<WorkItem>> {
        let mut params = Vec::new();
        let where_sql = filter.to_sql("w", &mut params);
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM work_items w WHERE {where_sql} ORDER BY {} LIMIT ? OFFSET ?",
            sort.to_sql("w")
        );
        params.push(Value::Integer(limit.map_or(-1, to_i64)));
        params.push(Value::Integer(to_i64(offset)));

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(params.iter()), |row| {
            row_to_item(row, false)
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// Every item, highest rank first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn all_items(&self) -> Result<Vec<WorkItem>> {
        self.scan(
            &ItemFilter::default(),
            Sort::new(SortField::Rank, SortOrder::Asc),
            None,
            0,
        )
    }

    /// Set of all item ids.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn ids(&self) -> Result<HashSet<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id FROM work_items")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// Number of items.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn count(&self) -> Result<usize> {
        let conn = self.conn();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM work_items", [], |row| row.get(0))?;
        Ok(usize::try_from(n).unwrap_or_default())
    }

    /// Direct children, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn children_of(&self, id: &str) -> Result<Vec<WorkItem>> {
        let filter = ItemFilter {
            parent_id: Some(id.to_string()),
            ..ItemFilter::default()
        };
        self.scan(&filter, Sort::new(SortField::CreatedAt, SortOrder::Asc), None, 0)
    }

    /// Items whose `dependency_ids` contain `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn dependents_of(&self, id: &str) -> Result<Vec<WorkItem>> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM work_items w
             WHERE EXISTS (SELECT 1 FROM json_each(w.dependency_ids) WHERE json_each.value = ?1)
             ORDER BY w.created_at ASC, w.id ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([id], |row| row_to_item(row, false))?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// Brute-force cosine similarity over stored embeddings.
    ///
    /// The filter is applied in SQL before scoring. Rows whose embedding has
    /// a different length than the query are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn vector_query(
        &self,
        embedding: &[f32],
        k: usize,
        filter: &ItemFilter,
    ) -> Result<Vec<(WorkItem, f64)>> {
        if embedding.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let mut params = Vec::new();
        let where_sql = filter.to_sql("w", &mut params);
        let sql = format!(
            "SELECT {ITEM_COLUMNS}, w.embedding FROM work_items w
             WHERE w.embedding IS NOT NULL AND {where_sql}"
        );

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(params.iter()), |row| {
            row_to_item(row, true)
        })?;

        let mut scored = Vec::new();
        for row in rows {
            let item = row?;
            let Some(stored) = item.embedding.as_deref() else {
                continue;
            };
            if stored.len() != embedding.len() {
                continue;
            }
            let score = f64::from(cosine_similarity(embedding, stored));
            scored.push((item, score));
        }

        scored.sort_by(|(a, sa), (b, sb)| {
            sb.partial_cmp(sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.updated_at.cmp(&a.updated_at))
                .then(a.id.cmp(&b.id))
        });
        scored.truncate(k);
        Ok(scored)
    }

    /// Full-text query over title, description, tags and acceptance criteria.
    ///
    /// The query is tokenized and the tokens OR-ed. Scores are the negated
    /// FTS5 bm25 rank, so higher is better. Returns nothing for a query with
    /// no tokens.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn text_query(&self, query: &str, k: usize, filter: &ItemFilter) -> Result<Vec<(WorkItem, f64)>> {
        let Some(fts) = fts_query(query) else {
            return Ok(Vec::new());
        };
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut params = vec![Value::Text(fts)];
        let where_sql = filter.to_sql("w", &mut params);
        let sql = format!(
            "SELECT {ITEM_COLUMNS}, s.rank
             FROM (SELECT item_id, rank FROM search_index WHERE search_index MATCH ?) s
             JOIN work_items w ON w.id = s.item_id
             WHERE {where_sql}
             ORDER BY s.rank ASC, w.updated_at DESC, w.id ASC
             LIMIT ?"
        );
        params.push(Value::Integer(to_i64(k)));

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(params.iter()), |row| {
            let item = row_to_item(row, false)?;
            let rank: f64 = row.get(EXTRA_COLUMN)?;
            Ok((item, -rank))
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    // ==================
    // Execution logs
    // ==================

    /// Append an execution log entry (or replace one with the same id).
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the item does not exist.
    pub fn append_execution_log(&self, log: &ExecutionLog) -> Result<()> {
        if !self.exists(&log.item_id)? {
            return Err(Error::NotFound {
                id: log.item_id.clone(),
            });
        }
        self.conn().execute(
            "INSERT OR REPLACE INTO execution_logs (id, item_id, status, message, started_at, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                log.id,
                log.item_id,
                log.status.as_str(),
                log.message,
                log.started_at,
                log.finished_at,
            ],
        )?;
        Ok(())
    }

    /// Execution logs for an item, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn execution_logs(&self, item_id: &str) -> Result<Vec<ExecutionLog>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, item_id, status, message, started_at, finished_at
             FROM execution_logs WHERE item_id = ?1
             ORDER BY started_at DESC, id ASC",
        )?;
        let rows = stmt.query_map([item_id], |row| {
            Ok(ExecutionLog {
                id: row.get(0)?,
                item_id: row.get(1)?,
                status: ExecutionStatus::from_str(&row.get::<_, String>(2)?),
                message: row.get(3)?,
                started_at: row.get(4)?,
                finished_at: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    // ==================
    // Audit events
    // ==================

    /// Write a standalone audit event.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn record_event(&self, event: &Event) -> Result<()> {
        insert_event(&self.conn(), event)?;
        Ok(())
    }

    /// Audit events for a work item, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn events_for(&self, id: &str, limit: Option<u32>) -> Result<Vec<Event>> {
        Ok(get_events(&self.conn(), WORK_ITEM_ENTITY, id, limit)?)
    }

    // ==================
    // Backup
    // ==================

    /// Copy the whole database to `path` with the online backup API.
    ///
    /// # Errors
    ///
    /// Returns an error if the backup fails.
    pub fn backup_to(&self, path: &Path) -> Result<()> {
        self.conn().backup(DatabaseName::Main, path, None)?;
        debug!(path = %path.display(), "Backed up record store");
        Ok(())
    }

    /// Replace the database contents with a backup taken by [`RecordStore::backup_to`].
    ///
    /// # Errors
    ///
    /// Returns an error if the restore fails.
    pub fn restore_from(&self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("backup not found: {}", path.display()),
            )));
        }
        self.conn()
            .restore(DatabaseName::Main, path, None::<fn(rusqlite::backup::Progress)>)?;
        debug!(path = %path.display(), "Restored record store");
        Ok(())
    }
}

fn check_guard(guard: &ItemGuard, id: &str) -> Result<()> {
    if guard.id() == id {
        Ok(())
    } else {
        Err(Error::Other(format!(
            "write lock for '{}' used to modify '{id}'",
            guard.id()
        )))
    }
}

fn validate_required(item: &WorkItem) -> Result<()> {
    if item.id.trim().is_empty() {
        return Err(Error::validation("id", "must not be empty"));
    }
    if item.title.trim().is_empty() {
        return Err(Error::validation("title", "must not be empty"));
    }
    Ok(())
}

fn query_ids(tx: &Transaction, sql: &str, id: &str) -> Result<Vec<String>> {
    let mut stmt = tx.prepare(sql)?;
    let rows = stmt.query_map([id], |row| row.get(0))?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

/// Build an FTS5 MATCH expression: quoted tokens joined with OR.
fn fts_query(query: &str) -> Option<String> {
    let tokens = tokenize(query);
    if tokens.is_empty() {
        return None;
    }
    Some(
        tokens
            .iter()
            .map(|t| format!("\"{t}\""))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

fn to_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn json_column<T: serde::de::DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn row_to_item(row: &Row, with_embedding: bool) -> rusqlite::Result<WorkItem> {
    let item_type: String = row.get(1)?;
    let status: String = row.get(4)?;
    let priority: String = row.get(5)?;

    let embedding = if with_embedding {
        row.get::<_, Option<Vec<u8>>>(EXTRA_COLUMN)?
            .map(|blob| decode_embedding(&blob))
    } else {
        None
    };

    Ok(WorkItem {
        id: row.get(0)?,
        item_type: ItemType::parse(&item_type)
            .ok_or_else(|| conversion_error(1, format!("unknown item type '{item_type}'")))?,
        title: row.get(2)?,
        description: row.get(3)?,
        status: Status::parse(&status)
            .ok_or_else(|| conversion_error(4, format!("unknown status '{status}'")))?,
        priority: Priority::parse(&priority)
            .ok_or_else(|| conversion_error(5, format!("unknown priority '{priority}'")))?,
        parent_id: row.get(6)?,
        dependency_ids: json_column::<BTreeSet<String>>(row, 7)?,
        tags: json_column::<BTreeSet<String>>(row, 8)?,
        acceptance_criteria: json_column(row, 9)?,
        effort_estimate: row.get(10)?,
        created_by: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
        checksum: row.get(14)?,
        embedding,
    })
}

/// Little-endian f32 bytes.
fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn decode_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|bytes| f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        .collect()
}

/// Cosine similarity between two vectors; 0.0 for mismatched or zero vectors.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot_product = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;

    for (x, y) in a.iter().zip(b.iter()) {
        dot_product += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let magnitude = (norm_a * norm_b).sqrt();
    if magnitude == 0.0 {
        0.0
    } else {
        dot_product / magnitude
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::{EmbeddingProvider, HashingProvider, ProviderInfo};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Wraps the hashing provider and counts calls.
    struct CountingProvider {
        inner: HashingProvider,
        calls: Arc<AtomicUsize>,
    }

    impl EmbeddingProvider for CountingProvider {
        fn info(&self) -> ProviderInfo {
            self.inner.info()
        }

        async fn is_available(&self) -> bool {
            true
        }

        async fn generate_embedding(&self, text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.inner.embed(text))
        }
    }

    struct FailingProvider;

    impl EmbeddingProvider for FailingProvider {
        fn info(&self) -> ProviderInfo {
            ProviderInfo {
                name: "failing".into(),
                model: "none".into(),
                dimensions: 8,
                max_chars: 100,
            }
        }

        async fn is_available(&self) -> bool {
            false
        }

        async fn generate_embedding(&self, _text: &str) -> Result<Vec<f32>> {
            Err(Error::Embedding("connection refused".into()))
        }
    }

    fn hashing_store() -> RecordStore {
        let provider = Arc::new(BoxedProvider::new(HashingProvider::new(64)));
        RecordStore::open_memory(Some(provider)).unwrap().with_actor("test")
    }

    fn counting_store() -> (RecordStore, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = CountingProvider {
            inner: HashingProvider::new(32),
            calls: Arc::clone(&calls),
        };
        let store = RecordStore::open_memory(Some(Arc::new(BoxedProvider::new(provider)))).unwrap();
        (store, calls)
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let store = hashing_store();
        let item = WorkItem::new(ItemType::Epic, "Authentication")
            .with_description("Login and sessions")
            .with_tags(["auth", "security"]);
        let id = item.id.clone();

        let stored = store.put(item).await.unwrap();
        assert_eq!(stored.checksum, stored.compute_checksum());

        let loaded = store.get(&id).unwrap().unwrap();
        assert_eq!(loaded.title, "Authentication");
        assert!(loaded.tags.contains("security"));
        assert_eq!(loaded.embedding.as_ref().map(Vec::len), Some(64));
        assert_eq!(loaded, stored);
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let store = hashing_store();
        assert!(store.get("wi_missing").unwrap().is_none());
        assert!(!store.delete("wi_missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_put_requires_title() {
        let store = hashing_store();
        let item = WorkItem::new(ItemType::Task, "  ");
        let err = store.put(item).await.unwrap_err();
        assert!(matches!(err, Error::Validation { ref field, .. } if field == "title"));
    }

    #[tokio::test]
    async fn test_put_is_idempotent() {
        let store = hashing_store();
        let item = WorkItem::new(ItemType::Task, "Write tests").with_id("wi_t1");
        store.put(item.clone()).await.unwrap();
        store.put(item).await.unwrap();

        assert_eq!(store.count().unwrap(), 1);
        let events = store.events_for("wi_t1", None).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::ItemCreated);
    }

    #[tokio::test]
    async fn test_put_recomputes_stale_checksum() {
        let store = hashing_store();
        let mut item = WorkItem::new(ItemType::Task, "A");
        item.title = "B".into();
        let stored = store.put(item).await.unwrap();
        assert_eq!(stored.checksum, stored.compute_checksum());
    }

    #[tokio::test]
    async fn test_embedding_reused_when_text_unchanged() {
        let (store, calls) = counting_store();
        let item = WorkItem::new(ItemType::Story, "Login form").with_id("wi_s1");
        store.put(item).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let mut update = store.get("wi_s1").unwrap().unwrap();
        update.status = Status::InProgress;
        store.put(update).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let mut retitled = store.get("wi_s1").unwrap().unwrap();
        retitled.title = "Signup form".into();
        store.put(retitled).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_provider_failure_stores_without_embedding() {
        let store = RecordStore::open_memory(Some(Arc::new(BoxedProvider::new(FailingProvider)))).unwrap();
        let item = WorkItem::new(ItemType::Task, "Offline").with_id("wi_off");
        store.put(item).await.unwrap();

        let loaded = store.get("wi_off").unwrap().unwrap();
        assert!(loaded.embedding.is_none());
    }

    #[tokio::test]
    async fn test_reindex_missing_embeddings() {
        let plain = RecordStore::open_memory(None).unwrap();
        assert_eq!(plain.reindex_missing_embeddings().await.unwrap(), 0);

        let store = hashing_store();
        store.put(WorkItem::new(ItemType::Task, "A").with_id("wi_a")).await.unwrap();
        store
            .conn()
            .execute("UPDATE work_items SET embedding = NULL", [])
            .unwrap();

        assert_eq!(store.reindex_missing_embeddings().await.unwrap(), 1);
        assert!(store.get("wi_a").unwrap().unwrap().embedding.is_some());
    }

    #[tokio::test]
    async fn test_scan_filters_before_limit() {
        let store = hashing_store();
        for i in 0..5 {
            let status = if i % 2 == 0 { Status::Completed } else { Status::NotStarted };
            store
                .put(WorkItem::new(ItemType::Task, format!("Task {i}")).with_status(status))
                .await
                .unwrap();
        }

        let filter = ItemFilter::default().with_status(Status::NotStarted);
        let open = store
            .scan(&filter, Sort::new(SortField::Title, SortOrder::Asc), Some(10), 0)
            .unwrap();
        assert_eq!(open.len(), 2);
        assert!(open.iter().all(|i| i.status == Status::NotStarted));
        assert!(open.iter().all(|i| i.embedding.is_none()));

        let page = store
            .scan(&ItemFilter::default(), Sort::new(SortField::Title, SortOrder::Asc), Some(2), 2)
            .unwrap();
        assert_eq!(page.iter().map(|i| i.title.as_str()).collect::<Vec<_>>(), ["Task 2", "Task 3"]);
    }

    #[tokio::test]
    async fn test_text_query_ranks_and_filters() {
        let store = hashing_store();
        store
            .put(
                WorkItem::new(ItemType::Story, "Authentication service")
                    .with_id("wi_auth")
                    .with_description("authentication with tokens"),
            )
            .await
            .unwrap();
        store
            .put(
                WorkItem::new(ItemType::Task, "Session timeout")
                    .with_id("wi_sess")
                    .with_description("expire after authentication"),
            )
            .await
            .unwrap();
        store
            .put(WorkItem::new(ItemType::Task, "Billing").with_id("wi_bill"))
            .await
            .unwrap();

        let hits = store.text_query("authentication", 10, &ItemFilter::default()).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0.id, "wi_auth");
        assert!(hits[0].1 >= hits[1].1);

        let tasks_only = store
            .text_query("authentication", 10, &ItemFilter::default().with_type(ItemType::Task))
            .unwrap();
        assert_eq!(tasks_only.len(), 1);
        assert_eq!(tasks_only[0].0.id, "wi_sess");

        assert!(store.text_query("  \"*  ", 10, &ItemFilter::default()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_text_query_sees_updates() {
        let store = hashing_store();
        store.put(WorkItem::new(ItemType::Task, "Old name").with_id("wi_1")).await.unwrap();
        let mut item = store.get("wi_1").unwrap().unwrap();
        item.title = "Fresh name".into();
        store.put(item).await.unwrap();

        assert!(store.text_query("old", 5, &ItemFilter::default()).unwrap().is_empty());
        assert_eq!(store.text_query("fresh", 5, &ItemFilter::default()).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_vector_query() {
        let store = hashing_store();
        store
            .put(WorkItem::new(ItemType::Story, "Password reset email").with_id("wi_pw"))
            .await
            .unwrap();
        store
            .put(WorkItem::new(ItemType::Story, "Quarterly revenue report").with_id("wi_rev"))
            .await
            .unwrap();

        let query = store.embed_query("[story] Password reset email").await.unwrap();
        let hits = store.vector_query(&query, 1, &ItemFilter::default()).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.id, "wi_pw");
        assert!(hits[0].1 > 0.9);

        let none = store
            .vector_query(&query, 5, &ItemFilter::default().with_type(ItemType::Epic))
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_delete_rejected_with_children_or_dependents() {
        let store = hashing_store();
        store.put(WorkItem::new(ItemType::Epic, "E1").with_id("E1")).await.unwrap();
        store
            .put(WorkItem::new(ItemType::Feature, "F1").with_id("F1").with_parent("E1"))
            .await
            .unwrap();
        store
            .put(WorkItem::new(ItemType::Feature, "F2").with_id("F2").with_dependency("F1"))
            .await
            .unwrap();

        match store.delete("E1").await {
            Err(Error::HasDependents { children, dependents, .. }) => {
                assert_eq!(children, vec!["F1"]);
                assert!(dependents.is_empty());
            }
            other => panic!("expected HasDependents, got {other:?}"),
        }
        match store.delete("F1").await {
            Err(Error::HasDependents { dependents, .. }) => assert_eq!(dependents, vec!["F2"]),
            other => panic!("expected HasDependents, got {other:?}"),
        }

        assert!(store.delete("F2").await.unwrap());
        assert!(store.delete("F1").await.unwrap());
        assert!(store.delete("E1").await.unwrap());
        assert_eq!(store.count().unwrap(), 0);
        assert!(store.text_query("E1", 5, &ItemFilter::default()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wrong_guard_is_rejected() {
        let store = hashing_store();
        let guard = store.lock("wi_a").await;
        let item = WorkItem::new(ItemType::Task, "B").with_id("wi_b");
        assert!(matches!(store.put_locked(&guard, item).await, Err(Error::Other(_))));
    }

    #[tokio::test]
    async fn test_children_and_dependents() {
        let store = hashing_store();
        store.put(WorkItem::new(ItemType::Feature, "F").with_id("F")).await.unwrap();
        store
            .put(WorkItem::new(ItemType::Story, "S1").with_id("S1").with_parent("F"))
            .await
            .unwrap();
        store
            .put(
                WorkItem::new(ItemType::Story, "S2")
                    .with_id("S2")
                    .with_parent("F")
                    .with_dependency("S1"),
            )
            .await
            .unwrap();

        let mut children: Vec<String> = store.children_of("F").unwrap().into_iter().map(|i| i.id).collect();
        children.sort();
        assert_eq!(children, vec!["S1", "S2"]);
        assert_eq!(store.dependents_of("S1").unwrap()[0].id, "S2");
        assert_eq!(store.ids().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_execution_logs() {
        let store = hashing_store();
        store.put(WorkItem::new(ItemType::Task, "Run").with_id("wi_run")).await.unwrap();

        let log = ExecutionLog::start("wi_run");
        store.append_execution_log(&log).unwrap();
        store
            .append_execution_log(&log.finish(ExecutionStatus::Succeeded, Some("ok")))
            .unwrap();

        let logs = store.execution_logs("wi_run").unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, ExecutionStatus::Succeeded);

        let orphan = ExecutionLog::start("wi_nope");
        assert!(matches!(store.append_execution_log(&orphan), Err(Error::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_backup_and_restore() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = RecordStore::open(&dir.path().join("workitems.db"), None).unwrap();
        store.put(WorkItem::new(ItemType::Task, "Keep").with_id("wi_keep")).await.unwrap();

        let backup = dir.path().join("backup.db");
        store.backup_to(&backup).unwrap();

        store.put(WorkItem::new(ItemType::Task, "Later").with_id("wi_later")).await.unwrap();
        assert_eq!(store.count().unwrap(), 2);

        store.restore_from(&backup).unwrap();
        assert_eq!(store.count().unwrap(), 1);
        assert!(store.get("wi_keep").unwrap().is_some());
        assert_eq!(store.text_query("keep", 5, &ItemFilter::default()).unwrap().len(), 1);

        assert!(store.restore_from(&dir.path().join("nope.db")).is_err());
    }

    #[test]
    fn test_embedding_codec() {
        let v = vec![0.5_f32, -1.25, 3.0];
        assert_eq!(decode_embedding(&encode_embedding(&v)), v);
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0], &[1.0, 2.0]).abs() < f32::EPSILON);
        assert!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]).abs() < f32::EPSILON);
    }

    #[test]
    fn test_fts_query_building() {
        assert_eq!(fts_query("Auth login").as_deref(), Some("\"auth\" OR \"login\""));
        assert_eq!(fts_query("!!"), None);
    }
}
