//! Remote mutation API the sync engine drains against.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Collection holding chore documents.
pub const CHORES: &str = "chores";

/// Collection holding household members.
pub const USERS: &str = "users";

/// Collection holding archived chores, keyed by their original chore id.
pub const CHORES_ARCHIVE: &str = "choresArchive";

/// A remote document: id plus loosely-typed fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub fields: Map<String, Value>,
}

/// Failures reported by a remote store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// The remote could not be reached; nothing was applied.
    #[error("remote store unavailable: {0}")]
    Unavailable(String),

    #[error("document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    /// The write conflicts with the document's current state.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("write rejected: {0}")]
    Rejected(String),
}

impl RemoteError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, RemoteError::Unavailable(_))
    }
}

/// Document-store primitives. Queued operations map onto these.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Create a document and return the id the remote assigned.
    async fn create(&self, collection: &str, document: Map<String, Value>) -> Result<String, RemoteError>;

    /// Merge `fields` into an existing document.
    async fn update(&self, collection: &str, id: &str, fields: Map<String, Value>) -> Result<(), RemoteError>;

    async fn delete(&self, collection: &str, id: &str) -> Result<(), RemoteError>;

    async fn list(&self, collection: &str) -> Result<Vec<Document>, RemoteError>;
}
