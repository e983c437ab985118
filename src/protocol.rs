//! IPC protocol types for hub communication.

use crate::archive::{ArchiveResult, ArchiveStats, ArchivedChore};
use crate::config::ArchivePolicy;
use crate::remote::Document;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Request sent from client to hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    /// Create a document.
    Create {
        collection: String,
        fields: Map<String, Value>,
    },

    /// Merge fields into a document.
    Update {
        collection: String,
        id: String,
        fields: Map<String, Value>,
    },

    /// Delete a document.
    Delete { collection: String, id: String },

    /// Get a document by ID.
    Get { collection: String, id: String },

    /// List a collection.
    List { collection: String },

    /// Archive chores completed before the policy's cutoff.
    ArchiveCompleted { policy: ArchivePolicy, archived_by: String },

    /// Archive one chore.
    ArchiveChore { id: String, archived_by: String },

    /// Move an archived chore back into `chores`.
    RestoreChore { id: String, restored_by: String },

    /// List archived chores, newest first.
    ListArchived { limit: usize },

    /// Get archive statistics.
    ArchiveStats,

    /// Delete archived chores past the policy's retention.
    CleanupArchive { policy: ArchivePolicy },

    /// Shutdown the hub.
    Shutdown,

    /// Ping to check if the hub is alive.
    Ping,
}

/// Classifies hub-side failures so clients can map them to remote errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The write conflicts with current state
    Conflict,
    /// The write was rejected as invalid
    Rejected,
    /// The hub itself failed
    Internal,
}

/// Response sent from hub to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    /// Single document response.
    Document { document: Document },

    /// Multiple documents response.
    Documents { documents: Vec<Document> },

    /// Document not found.
    NotFound { collection: String, id: String },

    /// Archive run response.
    Archived { result: ArchiveResult },

    /// Archived chores response.
    ArchivedChores { chores: Vec<ArchivedChore> },

    /// Archive statistics response.
    ArchiveStats { stats: ArchiveStats },

    /// Count of removed documents.
    Removed { count: usize },

    /// Operation succeeded.
    Ok,

    /// Pong response to ping.
    Pong,

    /// Error response.
    Error { message: String, kind: ErrorKind },
}

impl Response {
    /// Create an error response.
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            kind,
        }
    }
}
