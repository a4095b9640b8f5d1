//! Database schema for one namespace's record store.
//!
//! Timestamps are stored as INTEGER (Unix milliseconds). Set-valued fields
//! (`dependency_ids`, `tags`, `acceptance_criteria`) are JSON arrays queried
//! with `json_each`. Embeddings are little-endian f32 BLOBs.

use rusqlite::{Connection, Result};

/// Current schema version for migration tracking.
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

pub const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS work_items (
    id TEXT PRIMARY KEY,
    item_type TEXT NOT NULL CHECK (item_type IN ('initiative', 'epic', 'feature', 'story', 'task')),
    title TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL DEFAULT 'not_started',
    priority TEXT NOT NULL DEFAULT 'medium',
    parent_id TEXT,
    dependency_ids TEXT NOT NULL DEFAULT '[]',
    tags TEXT NOT NULL DEFAULT '[]',
    acceptance_criteria TEXT NOT NULL DEFAULT '[]',
    effort_estimate REAL,
    created_by TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    checksum TEXT NOT NULL,
    embedding BLOB,
    embedding_model TEXT
);

CREATE INDEX IF NOT EXISTS idx_work_items_parent ON work_items(parent_id);
CREATE INDEX IF NOT EXISTS idx_work_items_type ON work_items(item_type);
CREATE INDEX IF NOT EXISTS idx_work_items_status ON work_items(status);
CREATE INDEX IF NOT EXISTS idx_work_items_updated ON work_items(updated_at DESC);

CREATE TABLE IF NOT EXISTS execution_logs (
    id TEXT PRIMARY KEY,
    item_id TEXT NOT NULL,
    status TEXT NOT NULL,
    message TEXT,
    started_at INTEGER NOT NULL,
    finished_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_execution_logs_item ON execution_logs(item_id, started_at DESC);

CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_type TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    event_type TEXT NOT NULL,
    actor TEXT NOT NULL,
    old_value TEXT,
    new_value TEXT,
    comment TEXT,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id, created_at DESC);
";

/// Full-text index over the searchable text of each item.
///
/// FTS5 `CREATE VIRTUAL TABLE` has no `IF NOT EXISTS` guarantee across
/// versions, so existence is checked first.
const SEARCH_INDEX_SQL: &str = r"
CREATE VIRTUAL TABLE search_index USING fts5(
    item_id UNINDEXED,
    title,
    description,
    tags,
    acceptance_criteria
);
";

/// Apply pragmas and create all tables.
///
/// # Errors
///
/// Returns an error if any statement fails.
pub fn apply_schema(conn: &Connection) -> Result<()> {
    // In-memory databases report "memory" and ignore WAL
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;

    conn.execute_batch(SCHEMA_SQL)?;

    let fts_exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = 'search_index'",
        [],
        |row| row.get(0),
    )?;
    if !fts_exists {
        conn.execute_batch(SEARCH_INDEX_SQL)?;
    }

    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
        rusqlite::params![
            format!("v{CURRENT_SCHEMA_VERSION}"),
            chrono::Utc::now().timestamp_millis()
        ],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();
        apply_schema(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();

        for expected in ["events", "execution_logs", "search_index", "work_items"] {
            assert!(tables.iter().any(|t| t == expected), "missing {expected}");
        }
    }

    #[test]
    fn test_item_type_is_checked() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();
        let result = conn.execute(
            "INSERT INTO work_items (id, item_type, title, created_at, updated_at, checksum)
             VALUES ('wi_1', 'bug', 'x', 0, 0, '')",
            [],
        );
        assert!(result.is_err());
    }
}
