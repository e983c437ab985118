//! Async client for the hub daemon.
//!
//! Each request opens its own connection and is bounded by the configured
//! timeout. Failing to reach the hub is reported as
//! [`RemoteError::Unavailable`] so the sync engine treats it as lost
//! connectivity rather than a rejected write.

use crate::archive::{ArchiveResult, ArchiveStats, ArchivedChore};
use crate::config::{ArchivePolicy, DaemonConfig, HubSettings};
use crate::daemon::{is_daemon_running, start_daemon};
use crate::decode::decode_chores;
use crate::protocol::{ErrorKind, Request, Response};
use crate::remote::{CHORES, Document, RemoteError, RemoteStore};
use crate::types::Chore;
use async_trait::async_trait;
use eyre::{Context, Result, bail};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

/// Client for communicating with the hub.
#[derive(Debug, Clone)]
pub struct Client {
    socket_path: PathBuf,
    timeout: Duration,
}

impl Client {
    /// Create a client for the hub at `root`. Does not connect.
    pub fn new(root: &Path, timeout: Duration) -> Self {
        Self {
            socket_path: DaemonConfig::new(root).socket_path(),
            timeout,
        }
    }

    /// Create a client, auto-starting the hub if configured and not running.
    pub async fn connect(root: &Path, settings: &HubSettings) -> Result<Self> {
        let client = Self::new(root, settings.request_timeout());

        if settings.auto_start && !is_daemon_running(root) {
            start_daemon(root).context("Failed to auto-start hub")?;

            let mut attempts = 0;
            loop {
                if attempts > 20 {
                    bail!("Hub failed to start in time");
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
                if client.ping().await.is_ok() {
                    break;
                }
                attempts += 1;
            }
        }

        Ok(client)
    }

    /// Send a request and receive a response.
    async fn request(&self, request: Request) -> Result<Response, RemoteError> {
        match tokio::time::timeout(self.timeout, self.exchange(&request)).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Unavailable(format!(
                "hub did not answer within {:?}",
                self.timeout
            ))),
        }
    }

    async fn exchange(&self, request: &Request) -> Result<Response, RemoteError> {
        let unavailable = |e: std::io::Error| RemoteError::Unavailable(e.to_string());

        let stream = UnixStream::connect(&self.socket_path).await.map_err(unavailable)?;
        let (reader, mut writer) = stream.into_split();

        let mut line = serde_json::to_string(request).map_err(|e| RemoteError::Rejected(e.to_string()))?;
        line.push('\n');
        writer.write_all(line.as_bytes()).await.map_err(unavailable)?;
        writer.flush().await.map_err(unavailable)?;

        let mut response_line = String::new();
        let read = BufReader::new(reader)
            .read_line(&mut response_line)
            .await
            .map_err(unavailable)?;
        if read == 0 {
            return Err(RemoteError::Unavailable("hub closed the connection".to_string()));
        }

        serde_json::from_str(&response_line)
            .map_err(|e| RemoteError::Unavailable(format!("malformed hub response: {}", e)))
    }

    /// Fetch one document.
    pub async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, RemoteError> {
        let response = self
            .request(Request::Get {
                collection: collection.to_string(),
                id: id.to_string(),
            })
            .await?;

        match response {
            Response::Document { document } => Ok(Some(document)),
            Response::NotFound { .. } => Ok(None),
            other => Err(unexpected(other)),
        }
    }

    /// Fetch and decode every chore.
    pub async fn chores(&self) -> Result<Vec<Chore>, RemoteError> {
        let documents = self.list(CHORES).await?;
        Ok(decode_chores(&documents))
    }

    /// Archive chores completed before the policy's cutoff.
    pub async fn archive_completed(
        &self,
        policy: &ArchivePolicy,
        archived_by: &str,
    ) -> Result<ArchiveResult, RemoteError> {
        let response = self
            .request(Request::ArchiveCompleted {
                policy: policy.clone(),
                archived_by: archived_by.to_string(),
            })
            .await?;

        match response {
            Response::Archived { result } => Ok(result),
            other => Err(unexpected(other)),
        }
    }

    pub async fn archive_chore(&self, id: &str, archived_by: &str) -> Result<Document, RemoteError> {
        let response = self
            .request(Request::ArchiveChore {
                id: id.to_string(),
                archived_by: archived_by.to_string(),
            })
            .await?;

        match response {
            Response::Document { document } => Ok(document),
            other => Err(unexpected(other)),
        }
    }

    pub async fn restore_chore(&self, id: &str, restored_by: &str) -> Result<Document, RemoteError> {
        let response = self
            .request(Request::RestoreChore {
                id: id.to_string(),
                restored_by: restored_by.to_string(),
            })
            .await?;

        match response {
            Response::Document { document } => Ok(document),
            other => Err(unexpected(other)),
        }
    }

    pub async fn archived_chores(&self, limit: usize) -> Result<Vec<ArchivedChore>, RemoteError> {
        match self.request(Request::ListArchived { limit }).await? {
            Response::ArchivedChores { chores } => Ok(chores),
            other => Err(unexpected(other)),
        }
    }

    pub async fn archive_stats(&self) -> Result<ArchiveStats, RemoteError> {
        match self.request(Request::ArchiveStats).await? {
            Response::ArchiveStats { stats } => Ok(stats),
            other => Err(unexpected(other)),
        }
    }

    /// Delete archived chores past the policy's retention. Returns how many went.
    pub async fn cleanup_archive(&self, policy: &ArchivePolicy) -> Result<usize, RemoteError> {
        let request = Request::CleanupArchive { policy: policy.clone() };
        match self.request(request).await? {
            Response::Removed { count } => Ok(count),
            other => Err(unexpected(other)),
        }
    }

    /// Shutdown the hub.
    pub async fn shutdown(&self) -> Result<(), RemoteError> {
        match self.request(Request::Shutdown).await? {
            Response::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Ping the hub.
    pub async fn ping(&self) -> Result<(), RemoteError> {
        match self.request(Request::Ping).await? {
            Response::Pong => Ok(()),
            other => Err(unexpected(other)),
        }
    }
}

/// Map a non-success response to a remote error.
fn unexpected(response: Response) -> RemoteError {
    match response {
        Response::NotFound { collection, id } => RemoteError::NotFound { collection, id },
        Response::Error {
            message,
            kind: ErrorKind::Conflict,
        } => RemoteError::Conflict(message),
        Response::Error {
            message,
            kind: ErrorKind::Rejected,
        } => RemoteError::Rejected(message),
        // Hub-side failures are transient from the client's point of view
        Response::Error {
            message,
            kind: ErrorKind::Internal,
        } => RemoteError::Unavailable(message),
        other => RemoteError::Unavailable(format!("unexpected hub response: {:?}", other)),
    }
}

#[async_trait]
impl RemoteStore for Client {
    async fn create(&self, collection: &str, document: Map<String, Value>) -> Result<String, RemoteError> {
        let response = self
            .request(Request::Create {
                collection: collection.to_string(),
                fields: document,
            })
            .await?;

        match response {
            Response::Document { document } => Ok(document.id),
            other => Err(unexpected(other)),
        }
    }

    async fn update(&self, collection: &str, id: &str, fields: Map<String, Value>) -> Result<(), RemoteError> {
        let response = self
            .request(Request::Update {
                collection: collection.to_string(),
                id: id.to_string(),
                fields,
            })
            .await?;

        match response {
            Response::Document { .. } => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), RemoteError> {
        let response = self
            .request(Request::Delete {
                collection: collection.to_string(),
                id: id.to_string(),
            })
            .await?;

        match response {
            Response::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn list(&self, collection: &str) -> Result<Vec<Document>, RemoteError> {
        let response = self
            .request(Request::List {
                collection: collection.to_string(),
            })
            .await?;

        match response {
            Response::Documents { documents } => Ok(documents),
            other => Err(unexpected(other)),
        }
    }
}
