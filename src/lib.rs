//! Chorekeeper: an offline-first household chore tracker.
//!
//! Chores form a graph of prerequisites and a chore can only be completed
//! once everything it depends on has been. Mutations are queued durably on
//! the device and replayed against a remote document store when it becomes
//! reachable.
//!
//! # Example
//!
//! ```no_run
//! use chorekeeper::{Client, OfflineSync, OperationPayload, RetryPolicy, SqliteKv, SyncTrigger, check_completion};
//! use std::path::Path;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> eyre::Result<()> {
//! let root = Path::new(".");
//! let client = Arc::new(Client::new(root, Duration::from_secs(5)));
//! let kv = Arc::new(SqliteKv::open(root)?);
//! let sync = OfflineSync::open(kv, client.clone(), RetryPolicy::default())?;
//!
//! let chores = sync.cache_chores(client.chores().await?).await?;
//! let laundry = &chores[0];
//! check_completion(laundry, &chores)?;
//!
//! sync.queue_action(OperationPayload::CompleteChore {
//!     chore_id: laundry.id.clone(),
//!     completed_at: chrono::Utc::now(),
//!     completed_by: None,
//! })
//! .await?;
//! sync.process_queued_actions(SyncTrigger::Manual).await?;
//! # Ok(())
//! # }
//! ```

mod id;
mod storage;
mod types;

pub mod archive;
pub mod bulk;
pub mod client;
pub mod config;
pub mod connectivity;
pub mod daemon;
pub mod decode;
pub mod graph;
pub mod hub;
pub mod kv;
pub mod protocol;
pub mod remote;
pub mod sync;

// Re-export public API
pub use archive::{ArchiveResult, ArchiveStats, ArchivedChore, HubArchiveExt};
pub use bulk::{BulkResult, BulkStats, SyncBulkExt, bulk_stats};
pub use client::Client;
pub use config::{ArchivePolicy, Config, DaemonConfig, HubSettings, RetryPolicy, STORE_DIR};
pub use connectivity::{BackgroundMessage, Connectivity, SyncCoordinator, SyncSignal};
pub use daemon::{Daemon, is_daemon_running, start_daemon};
pub use decode::{DecodeError, decode_chore, decode_chores, decode_timestamp};
pub use graph::{
    ChoreState, CompletionBlocked, DependencyError, can_complete_chore, check_completion, chore_state,
    completable_chores, dependents, get_dependencies, pending_dependencies, validate_dependencies,
};
pub use hub::{Hub, HubError};
pub use id::{generate_id, is_local_id};
pub use kv::{KeyValueStore, SqliteKv};
pub use protocol::{ErrorKind, Request, Response};
pub use remote::{CHORES, CHORES_ARCHIVE, Document, RemoteError, RemoteStore, USERS};
pub use sync::{DrainReport, OfflineSync, SyncError, SyncTrigger};
pub use types::{
    Chore, ChoreDraft, ChorePatch, OfflineSummary, OperationKind, OperationPayload, OperationStatus, Priority,
    QueuedOperation, Recurrence, SyncMetadata, SyncStatus, Timestamp, ValidationError,
};
