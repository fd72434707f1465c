//! SQLite-backed record store for long-term items
//!
//! Stores the authoritative `ContextItem` record per long-term id. The
//! record carries everything needed to rebuild retrievability: re-chunking
//! and re-indexing the keyword index plus resubmitting vectors reconstructs
//! the search paths from this table alone.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, Row};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StratumError};
use crate::types::{ContextItem, ItemKind, Priority};

/// Configuration for the record store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordStoreConfig {
    /// Path to the SQLite database, ":memory:" for ephemeral
    pub db_path: String,
}

impl Default for RecordStoreConfig {
    fn default() -> Self {
        Self {
            db_path: ":memory:".to_string(),
        }
    }
}

/// Long-term record store wrapping a single SQLite connection
pub struct RecordStore {
    conn: Arc<Mutex<Connection>>,
}

impl RecordStore {
    /// Open or create the record database
    pub fn open(config: &RecordStoreConfig) -> Result<Self> {
        let conn = Self::create_connection(&config.db_path)?;
        Self::run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Ephemeral store for tests and embedded use
    pub fn open_in_memory() -> Result<Self> {
        Self::open(&RecordStoreConfig::default())
    }

    fn create_connection(db_path: &str) -> Result<Connection> {
        let conn = if db_path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = Path::new(db_path).parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StratumError::Internal(format!("create db dir: {}", e)))?;
            }
            let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX;
            Connection::open_with_flags(db_path, flags)?
        };

        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA busy_timeout=30000;
            PRAGMA temp_store=MEMORY;
            "#,
        )?;

        Ok(conn)
    }

    fn run_migrations(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS longterm_records (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                kind TEXT NOT NULL,
                priority TEXT NOT NULL,
                metadata TEXT NOT NULL,
                token_estimate INTEGER NOT NULL,
                access_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                last_accessed_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_records_kind ON longterm_records(kind);
            CREATE INDEX IF NOT EXISTS idx_records_created ON longterm_records(created_at);
            "#,
        )?;
        Ok(())
    }

    /// Insert or replace a record
    pub fn put(&self, item: &ContextItem) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT OR REPLACE INTO longterm_records
                (id, content, kind, priority, metadata, token_estimate,
                 access_count, created_at, last_accessed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                item.id,
                item.content,
                item.kind.as_str(),
                item.priority.as_str(),
                serde_json::to_string(&item.metadata)?,
                item.token_estimate,
                item.access_count,
                item.created_at.to_rfc3339(),
                item.last_accessed_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<ContextItem>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, content, kind, priority, metadata, token_estimate,
                    access_count, created_at, last_accessed_at
             FROM longterm_records WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id], item_from_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Delete a record, reporting whether it existed
    pub fn delete(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute("DELETE FROM longterm_records WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    /// All records, ordered by id for deterministic iteration
    pub fn scan(&self) -> Result<Vec<ContextItem>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, content, kind, priority, metadata, token_estimate,
                    access_count, created_at, last_accessed_at
             FROM longterm_records ORDER BY id",
        )?;
        let rows = stmt.query_map([], item_from_row)?;
        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(items)
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM longterm_records", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Persist updated access tracking for a record
    pub fn touch(&self, id: &str, access_count: u32, last_accessed_at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE longterm_records SET access_count = ?2, last_accessed_at = ?3 WHERE id = ?1",
            params![id, access_count, last_accessed_at.to_rfc3339()],
        )?;
        Ok(())
    }
}

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<ContextItem> {
    let metadata_json: String = row.get("metadata")?;
    let metadata: HashMap<String, serde_json::Value> =
        serde_json::from_str(&metadata_json).unwrap_or_default();

    let kind_str: String = row.get("kind")?;
    let priority_str: String = row.get("priority")?;
    let created_at: String = row.get("created_at")?;
    let last_accessed_at: String = row.get("last_accessed_at")?;

    Ok(ContextItem {
        id: row.get("id")?,
        content: row.get("content")?,
        kind: kind_str.parse::<ItemKind>().unwrap_or_default(),
        priority: priority_str.parse::<Priority>().unwrap_or_default(),
        metadata,
        created_at: parse_timestamp(&created_at),
        last_accessed_at: parse_timestamp(&last_accessed_at),
        access_count: row.get("access_count")?,
        token_estimate: row.get("token_estimate")?,
        tier_hint: None,
    })
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::estimate_tokens;
    use serde_json::json;

    fn make_item(id: &str, content: &str) -> ContextItem {
        ContextItem {
            id: id.to_string(),
            content: content.to_string(),
            kind: ItemKind::Fact,
            priority: Priority::High,
            metadata: HashMap::from([("project".to_string(), json!("stratum"))]),
            created_at: Utc::now(),
            last_accessed_at: Utc::now(),
            access_count: 2,
            token_estimate: estimate_tokens(content),
            tier_hint: None,
        }
    }

    #[test]
    fn test_put_get_roundtrip() {
        let store = RecordStore::open_in_memory().unwrap();
        let item = make_item("r1", "persisted fact");
        store.put(&item).unwrap();

        let loaded = store.get("r1").unwrap().unwrap();
        assert_eq!(loaded.id, "r1");
        assert_eq!(loaded.content, "persisted fact");
        assert_eq!(loaded.kind, ItemKind::Fact);
        assert_eq!(loaded.priority, Priority::High);
        assert_eq!(loaded.access_count, 2);
        assert_eq!(loaded.metadata.get("project"), Some(&json!("stratum")));
    }

    #[test]
    fn test_get_missing_is_none() {
        let store = RecordStore::open_in_memory().unwrap();
        assert!(store.get("nope").unwrap().is_none());
    }

    #[test]
    fn test_delete_reports_existence() {
        let store = RecordStore::open_in_memory().unwrap();
        store.put(&make_item("r1", "x")).unwrap();
        assert!(store.delete("r1").unwrap());
        assert!(!store.delete("r1").unwrap());
    }

    #[test]
    fn test_scan_is_ordered() {
        let store = RecordStore::open_in_memory().unwrap();
        store.put(&make_item("b", "second")).unwrap();
        store.put(&make_item("a", "first")).unwrap();

        let items = store.scan().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, "a");
        assert_eq!(items[1].id, "b");
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn test_touch_updates_access() {
        let store = RecordStore::open_in_memory().unwrap();
        store.put(&make_item("r1", "x")).unwrap();

        let later = Utc::now();
        store.touch("r1", 9, later).unwrap();
        let loaded = store.get("r1").unwrap().unwrap();
        assert_eq!(loaded.access_count, 9);
    }

    #[test]
    fn test_file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("records.db").to_string_lossy().to_string();

        {
            let store = RecordStore::open(&RecordStoreConfig {
                db_path: db_path.clone(),
            })
            .unwrap();
            store.put(&make_item("r1", "survives reopen")).unwrap();
        }

        let store = RecordStore::open(&RecordStoreConfig { db_path }).unwrap();
        let loaded = store.get("r1").unwrap().unwrap();
        assert_eq!(loaded.content, "survives reopen");
    }
}
