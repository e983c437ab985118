//! High-level document API served by the hub daemon.

use crate::decode::{CLIENT_OP_ID_FIELD, decode_chores, decode_fields};
use crate::graph::{DependencyError, validate_dependencies};
use crate::id::{DOCUMENT_PREFIX, generate_id};
use crate::remote::{CHORES, CHORES_ARCHIVE, Document, USERS};
use crate::storage::{DocumentRecord, Storage};
use crate::types::ValidationError;
use crate::types::Timestamp;
use chrono::Utc;
use eyre::{Context, Result};
use serde_json::{Map, Value};
use std::path::Path;

/// Errors that can occur during hub operations.
#[derive(Debug)]
pub enum HubError {
    /// Document not found.
    NotFound { collection: String, id: String },
    /// A document with this id is already live.
    AlreadyExists { collection: String, id: String },
    /// Collection is not served by the hub.
    UnknownCollection(String),
    /// Completion written to a chore that is already completed.
    AlreadyCompleted(String),
    /// Document fails chore decoding or validation.
    Invalid(String),
    /// Dependency edit rejected.
    Dependency(DependencyError),
}

impl std::fmt::Display for HubError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HubError::NotFound { collection, id } => write!(f, "document not found: {}/{}", collection, id),
            HubError::AlreadyExists { collection, id } => write!(f, "document already exists: {}/{}", collection, id),
            HubError::UnknownCollection(name) => write!(f, "unknown collection: {}", name),
            HubError::AlreadyCompleted(id) => write!(f, "chore already completed: {}", id),
            HubError::Invalid(reason) => write!(f, "invalid document: {}", reason),
            HubError::Dependency(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for HubError {}

impl From<ValidationError> for HubError {
    fn from(e: ValidationError) -> Self {
        HubError::Invalid(e.to_string())
    }
}

fn has_value(fields: &Map<String, Value>, key: &str) -> bool {
    fields.get(key).is_some_and(|v| !v.is_null())
}

/// The hub's document store.
pub struct Hub {
    storage: Storage,
}

impl Hub {
    /// Initialize a new hub in the given directory.
    pub fn init(root: &Path) -> Result<Self> {
        let storage = Storage::init(root)?;
        Ok(Self { storage })
    }

    /// Open an existing hub.
    pub fn open(root: &Path) -> Result<Self> {
        let storage = Storage::open(root)?;
        Ok(Self { storage })
    }

    fn check_collection(collection: &str) -> Result<()> {
        if collection != CHORES && collection != USERS && collection != CHORES_ARCHIVE {
            return Err(eyre::eyre!(HubError::UnknownCollection(collection.to_string())));
        }
        Ok(())
    }

    /// The archive is only written by archiving and restoring.
    fn check_writable(collection: &str) -> Result<()> {
        Self::check_collection(collection)?;
        if collection == CHORES_ARCHIVE {
            return Err(eyre::eyre!(HubError::Invalid(format!(
                "{} is written by archiving only",
                collection
            ))));
        }
        Ok(())
    }

    pub(crate) fn existing(&self, collection: &str, id: &str) -> Result<Document> {
        self.storage.get_document(collection, id)?.ok_or_else(|| {
            eyre::eyre!(HubError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })
        })
    }

    /// Validate a chore document, including its dependency edges.
    fn check_chore(&self, id: &str, fields: &Map<String, Value>) -> Result<()> {
        let chore = decode_fields(id, fields).map_err(|e| eyre::eyre!(HubError::Invalid(e.to_string())))?;
        chore.validate().map_err(|e| eyre::eyre!(HubError::from(e)))?;

        if !chore.dependencies.is_empty() {
            let all = decode_chores(&self.storage.list_documents(CHORES)?);
            validate_dependencies(id, &chore.dependencies, &all).map_err(|e| eyre::eyre!(HubError::Dependency(e)))?;
        }
        Ok(())
    }

    /// Create a document, assigning its id and timestamps.
    ///
    /// A create carrying a `clientOpId` that already produced a live document
    /// returns that document without writing.
    pub fn create(&mut self, collection: &str, mut fields: Map<String, Value>) -> Result<Document> {
        Self::check_writable(collection)?;

        let client_op_id = match fields.remove(CLIENT_OP_ID_FIELD) {
            Some(Value::String(op)) if !op.is_empty() => Some(op),
            _ => None,
        };

        if let Some(op) = &client_op_id
            && let Some(id) = self.storage.find_by_client_op(collection, op)?
        {
            log::info!("Create {} already applied as {}/{}", op, collection, id);
            return self.existing(collection, &id);
        }

        let now = Utc::now();
        let id = generate_id(DOCUMENT_PREFIX, collection, now);
        let stamp = Value::String(now.to_rfc3339());
        fields.insert("createdAt".into(), stamp.clone());
        fields.insert("updatedAt".into(), stamp);

        if collection == CHORES {
            self.check_chore(&id, &fields)?;
        }

        let mut record = DocumentRecord::live(collection, &id, fields.clone(), now);
        record.client_op_id = client_op_id;
        self.storage.append_record(&record).context("Failed to persist document")?;

        log::debug!("Created {}/{}", collection, id);
        Ok(Document { id, fields })
    }

    /// Merge fields into a document. `null` removes a field.
    pub fn update(&mut self, collection: &str, id: &str, patch: Map<String, Value>) -> Result<Document> {
        Self::check_writable(collection)?;
        let existing = self.existing(collection, id)?;

        if collection == CHORES && has_value(&patch, "completedAt") && has_value(&existing.fields, "completedAt") {
            return Err(eyre::eyre!(HubError::AlreadyCompleted(id.to_string())));
        }

        let mut fields = existing.fields;
        for (key, value) in patch {
            if key == "createdAt" || key == CLIENT_OP_ID_FIELD {
                continue;
            }
            if value.is_null() {
                fields.remove(&key);
            } else {
                fields.insert(key, value);
            }
        }

        let now = Utc::now();
        fields.insert("updatedAt".into(), Value::String(now.to_rfc3339()));

        if collection == CHORES {
            self.check_chore(id, &fields)?;
        }

        let record = DocumentRecord::live(collection, id, fields.clone(), now);
        self.storage
            .append_record(&record)
            .context("Failed to persist updated document")?;

        Ok(Document {
            id: id.to_string(),
            fields,
        })
    }

    pub fn delete(&mut self, collection: &str, id: &str) -> Result<()> {
        Self::check_collection(collection)?;
        self.existing(collection, id)?;

        let record = DocumentRecord::tombstone(collection, id, Utc::now());
        self.storage
            .append_record(&record)
            .context("Failed to persist deletion")?;
        Ok(())
    }

    /// Write a document under a caller-chosen id. Chores are validated first.
    pub(crate) fn put(
        &mut self,
        collection: &str,
        id: &str,
        fields: Map<String, Value>,
        now: Timestamp,
    ) -> Result<Document> {
        Self::check_collection(collection)?;
        if collection == CHORES {
            self.check_chore(id, &fields)?;
        }

        let record = DocumentRecord::live(collection, id, fields.clone(), now);
        self.storage.append_record(&record).context("Failed to persist document")?;
        Ok(Document {
            id: id.to_string(),
            fields,
        })
    }

    pub fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        Self::check_collection(collection)?;
        self.storage.get_document(collection, id)
    }

    pub fn list(&self, collection: &str) -> Result<Vec<Document>> {
        Self::check_collection(collection)?;
        self.storage.list_documents(collection)
    }
}
