//! Durable key-value persistence on the device.
//!
//! The offline queue, sync metadata and the cached chore snapshot all live
//! here. Writes are committed before `set` returns so a crash right after an
//! enqueue does not lose the action.

use crate::config::STORE_DIR;
use chrono::Utc;
use eyre::{Context, Result, eyre};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

/// SQLite database file for device state.
const DEVICE_DB_FILE: &str = "device.db";

/// Minimal durable store contract.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// Read and deserialize a JSON value.
pub fn load_json<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Result<Option<T>> {
    match store.get(key)? {
        Some(raw) => {
            let value =
                serde_json::from_str(&raw).with_context(|| format!("Failed to parse stored value for {}", key))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

/// Serialize and durably write a JSON value.
pub fn store_json<T: Serialize>(store: &dyn KeyValueStore, key: &str, value: &T) -> Result<()> {
    let raw = serde_json::to_string(value).with_context(|| format!("Failed to serialize value for {}", key))?;
    store.set(key, &raw)
}

/// SQLite-backed key-value store.
pub struct SqliteKv {
    db: Mutex<Connection>,
}

impl SqliteKv {
    /// Open (creating if needed) the device store under `root`.
    pub fn open(root: &Path) -> Result<Self> {
        let dir = root.join(STORE_DIR);
        fs::create_dir_all(&dir).context("Failed to create .chorekeeper directory")?;

        let db = Connection::open(dir.join(DEVICE_DB_FILE)).context("Failed to open device database")?;
        Self::with_connection(db)
    }

    /// Open a throwaway in-memory store.
    pub fn open_in_memory() -> Result<Self> {
        let db = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::with_connection(db)
    }

    fn with_connection(db: Connection) -> Result<Self> {
        db.pragma_update(None, "synchronous", "FULL")
            .context("Failed to set synchronous mode")?;
        db.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .context("Failed to initialize device schema")?;

        Ok(Self { db: Mutex::new(db) })
    }
}

impl KeyValueStore for SqliteKv {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let db = self.db.lock().map_err(|_| eyre!("device store lock poisoned"))?;
        db.query_row("SELECT value FROM kv WHERE key = ?", params![key], |row| row.get(0))
            .optional()
            .with_context(|| format!("Failed to read {}", key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let db = self.db.lock().map_err(|_| eyre!("device store lock poisoned"))?;
        db.execute(
            r#"
            INSERT INTO kv (key, value, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
            params![key, value, Utc::now().to_rfc3339()],
        )
        .with_context(|| format!("Failed to write {}", key))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SyncMetadata;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_database() {
        let temp_dir = TempDir::new().unwrap();
        let _kv = SqliteKv::open(temp_dir.path()).unwrap();
        assert!(temp_dir.path().join(STORE_DIR).join(DEVICE_DB_FILE).exists());
    }

    #[test]
    fn test_get_missing_key() {
        let kv = SqliteKv::open_in_memory().unwrap();
        assert_eq!(kv.get("nothing").unwrap(), None);
    }

    #[test]
    fn test_set_overwrites() {
        let kv = SqliteKv::open_in_memory().unwrap();
        kv.set("k", "one").unwrap();
        kv.set("k", "two").unwrap();
        assert_eq!(kv.get("k").unwrap().as_deref(), Some("two"));
    }

    #[test]
    fn test_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let kv = SqliteKv::open(temp_dir.path()).unwrap();
            kv.set("sync_queue", "{\"operations\":[]}").unwrap();
        }
        let kv = SqliteKv::open(temp_dir.path()).unwrap();
        assert_eq!(kv.get("sync_queue").unwrap().as_deref(), Some("{\"operations\":[]}"));
    }

    #[test]
    fn test_json_helpers() {
        let kv = SqliteKv::open_in_memory().unwrap();
        let meta = SyncMetadata {
            last_sync: None,
            pending_count: 3,
        };
        store_json(&kv, "sync_metadata", &meta).unwrap();
        let loaded: Option<SyncMetadata> = load_json(&kv, "sync_metadata").unwrap();
        assert_eq!(loaded, Some(meta));
    }

    #[test]
    fn test_load_json_reports_corruption() {
        let kv = SqliteKv::open_in_memory().unwrap();
        kv.set("sync_metadata", "{not json").unwrap();
        let loaded: Result<Option<SyncMetadata>> = load_json(&kv, "sync_metadata");
        assert!(loaded.is_err());
    }
}
