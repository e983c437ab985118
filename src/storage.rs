//! Storage layer for the hub: JSONL log + SQLite cache.
//!
//! `documents.jsonl` is the source of truth. Every write appends one record;
//! the last record for a `(collection, id)` pair wins and a `deleted` record
//! is a tombstone. `hub.db` is a cache rebuilt whenever its recorded line
//! count disagrees with the log.

use crate::config::STORE_DIR;
use crate::remote::Document;
use crate::types::Timestamp;
use eyre::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// JSONL file for documents.
const DOCUMENTS_FILE: &str = "documents.jsonl";

/// SQLite database file.
const DB_FILE: &str = "hub.db";

/// Meta key tracking how many JSONL lines the cache reflects.
const LINES_META_KEY: &str = "jsonl_documents_lines";

/// One line of the document log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRecord {
    pub collection: String,
    pub id: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
    /// Idempotency key of the client operation that created the document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_op_id: Option<String>,
    pub written_at: Timestamp,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
}

impl DocumentRecord {
    pub fn live(collection: &str, id: &str, fields: Map<String, Value>, written_at: Timestamp) -> Self {
        Self {
            collection: collection.to_string(),
            id: id.to_string(),
            fields,
            client_op_id: None,
            written_at,
            deleted: false,
        }
    }

    pub fn tombstone(collection: &str, id: &str, written_at: Timestamp) -> Self {
        Self {
            deleted: true,
            ..Self::live(collection, id, Map::new(), written_at)
        }
    }
}

/// Storage handle for the hub's documents.
pub struct Storage {
    root: PathBuf,
    db: Connection,
}

impl Storage {
    /// Initialize storage in the given directory.
    pub fn init(root: &Path) -> Result<Self> {
        let dir = root.join(STORE_DIR);
        fs::create_dir_all(&dir).context("Failed to create .chorekeeper directory")?;

        let documents_path = dir.join(DOCUMENTS_FILE);
        if !documents_path.exists() {
            File::create(&documents_path).context("Failed to create documents.jsonl")?;
        }

        let db = Connection::open(dir.join(DB_FILE)).context("Failed to open SQLite database")?;
        let mut storage = Self {
            root: root.to_path_buf(),
            db,
        };

        storage.init_schema()?;
        storage.rebuild_from_jsonl()?;

        Ok(storage)
    }

    /// Open existing storage.
    pub fn open(root: &Path) -> Result<Self> {
        let dir = root.join(STORE_DIR);
        if !dir.join(DOCUMENTS_FILE).exists() {
            eyre::bail!("No hub data found in {:?}. Run 'ck init' first.", dir);
        }

        let db = Connection::open(dir.join(DB_FILE)).context("Failed to open SQLite database")?;
        let mut storage = Self {
            root: root.to_path_buf(),
            db,
        };

        storage.init_schema()?;

        if storage.needs_rebuild()? {
            log::info!("Hub cache out of date, rebuilding from JSONL");
            storage.rebuild_from_jsonl()?;
        }

        Ok(storage)
    }

    fn documents_path(&self) -> PathBuf {
        self.root.join(STORE_DIR).join(DOCUMENTS_FILE)
    }

    fn init_schema(&self) -> Result<()> {
        self.db
            .execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS documents (
                    collection TEXT NOT NULL,
                    id TEXT NOT NULL,
                    body TEXT NOT NULL,
                    client_op_id TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    PRIMARY KEY (collection, id)
                );
                CREATE INDEX IF NOT EXISTS idx_documents_client_op ON documents(collection, client_op_id);

                CREATE TABLE IF NOT EXISTS meta (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );
            "#,
            )
            .context("Failed to initialize schema")?;

        Ok(())
    }

    fn needs_rebuild(&self) -> Result<bool> {
        let lines = count_lines(&self.documents_path())?;

        let stored: i64 = self
            .db
            .query_row(
                "SELECT CAST(COALESCE((SELECT value FROM meta WHERE key = ?), '0') AS INTEGER)",
                params![LINES_META_KEY],
                |row| row.get(0),
            )
            .unwrap_or(0);

        Ok(lines as i64 != stored)
    }

    /// Rebuild the SQLite cache by replaying the JSONL log.
    pub fn rebuild_from_jsonl(&mut self) -> Result<()> {
        let path = self.documents_path();
        let tx = self.db.transaction().context("Failed to start rebuild")?;
        tx.execute("DELETE FROM documents", [])
            .context("Failed to clear documents")?;

        let mut line_count = 0;
        if path.exists() {
            let file = File::open(&path).context("Failed to open documents.jsonl")?;
            for line in BufReader::new(file).lines() {
                line_count += 1;
                let line = match line {
                    Ok(l) => l,
                    Err(e) => {
                        log::warn!("Failed to read line {}: {}", line_count, e);
                        continue;
                    }
                };

                if line.trim().is_empty() {
                    continue;
                }

                match serde_json::from_str::<DocumentRecord>(&line) {
                    Ok(record) => apply_record(&tx, &record)?,
                    Err(e) => log::warn!("Failed to parse document at line {}: {}", line_count, e),
                }
            }
        }

        tx.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES (?, ?)",
            params![LINES_META_KEY, line_count.to_string()],
        )?;
        tx.commit().context("Failed to commit rebuild")?;

        log::debug!("Rebuilt hub cache from {} lines", line_count);
        Ok(())
    }

    /// Append a record to the log and apply it to the cache.
    pub fn append_record(&mut self, record: &DocumentRecord) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.documents_path())
            .context("Failed to open documents.jsonl for append")?;

        let json = serde_json::to_string(record).context("Failed to serialize document")?;
        writeln!(file, "{}", json).context("Failed to write to documents.jsonl")?;
        file.sync_all().context("Failed to sync documents.jsonl")?;

        apply_record(&self.db, record)?;

        self.db.execute(
            r#"
            INSERT INTO meta (key, value) VALUES (?1, '1')
            ON CONFLICT(key) DO UPDATE SET value = CAST(CAST(value AS INTEGER) + 1 AS TEXT)
            "#,
            params![LINES_META_KEY],
        )?;

        Ok(())
    }

    pub fn get_document(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let body: Option<String> = self
            .db
            .query_row(
                "SELECT body FROM documents WHERE collection = ? AND id = ?",
                params![collection, id],
                |row| row.get(0),
            )
            .optional()?;

        body.map(|b| to_document(id.to_string(), &b)).transpose()
    }

    /// Live documents in a collection, oldest first.
    pub fn list_documents(&self, collection: &str) -> Result<Vec<Document>> {
        let mut stmt = self
            .db
            .prepare("SELECT id, body FROM documents WHERE collection = ? ORDER BY created_at ASC, id ASC")?;

        let rows: Vec<(String, String)> = stmt
            .query_map(params![collection], |row| Ok((row.get(0)?, row.get(1)?)))?
            .filter_map(|r| r.ok())
            .collect();

        rows.into_iter().map(|(id, body)| to_document(id, &body)).collect()
    }

    /// The live document created by the given client operation, if any.
    pub fn find_by_client_op(&self, collection: &str, client_op_id: &str) -> Result<Option<String>> {
        let id = self
            .db
            .query_row(
                "SELECT id FROM documents WHERE collection = ? AND client_op_id = ?",
                params![collection, client_op_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }
}

fn apply_record(db: &Connection, record: &DocumentRecord) -> Result<()> {
    if record.deleted {
        db.execute(
            "DELETE FROM documents WHERE collection = ? AND id = ?",
            params![record.collection, record.id],
        )?;
        return Ok(());
    }

    let body = serde_json::to_string(&record.fields).context("Failed to serialize document body")?;
    let written_at = record.written_at.to_rfc3339();
    db.execute(
        r#"
        INSERT INTO documents (collection, id, body, client_op_id, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?5)
        ON CONFLICT(collection, id) DO UPDATE SET
            body = excluded.body,
            client_op_id = COALESCE(excluded.client_op_id, documents.client_op_id),
            updated_at = excluded.updated_at
        "#,
        params![record.collection, record.id, body, record.client_op_id, written_at],
    )?;
    Ok(())
}

fn to_document(id: String, body: &str) -> Result<Document> {
    let fields: Map<String, Value> =
        serde_json::from_str(body).with_context(|| format!("Corrupt cached document {}", id))?;
    Ok(Document { id, fields })
}

/// Count lines in a file.
fn count_lines(path: &Path) -> Result<usize> {
    if !path.exists() {
        return Ok(0);
    }
    let file = File::open(path).context("Failed to open file for line count")?;
    let reader = BufReader::new(file);
    Ok(reader.lines().count())
}
