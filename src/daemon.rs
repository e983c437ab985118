//! Hub daemon: serves the document store over a Unix socket.
//!
//! Connections are accepted concurrently but every request is funnelled
//! through one channel into the main loop, so the hub has a single writer.

use crate::archive::HubArchiveExt;
use crate::config::DaemonConfig;
use crate::hub::{Hub, HubError};
use crate::protocol::{ErrorKind, Request, Response};
use chrono::Utc;
use eyre::{Context, Result, eyre};
use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};

type Envelope = (Request, oneshot::Sender<Response>);

/// The hub daemon.
pub struct Daemon {
    config: DaemonConfig,
    hub: Hub,
    shutdown: Arc<AtomicBool>,
}

impl Daemon {
    /// Create a new daemon instance.
    pub fn new(config: DaemonConfig) -> Result<Self> {
        let hub = Hub::open(&config.root).context("Failed to open hub")?;

        Ok(Self {
            config,
            hub,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Get a shutdown handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Run the daemon until a shutdown request arrives.
    pub async fn run(&mut self) -> Result<()> {
        let socket_path = self.config.socket_path();
        if socket_path.exists() {
            fs::remove_file(&socket_path).ok();
        }

        let pid_path = self.config.pid_path();
        fs::write(&pid_path, std::process::id().to_string()).context("Failed to write PID file")?;

        let listener = UnixListener::bind(&socket_path).context("Failed to bind to Unix socket")?;
        log::info!("Hub listening on {:?}", socket_path);

        let (tx, mut rx) = mpsc::channel::<Envelope>(100);
        let mut check_shutdown = tokio::time::interval(Duration::from_millis(100));

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let tx = tx.clone();
                        tokio::spawn(async move {
                            if let Err(e) = Self::handle_connection(stream, tx).await {
                                log::warn!("Connection error: {:#}", e);
                            }
                        });
                    }
                    Err(e) => {
                        log::error!("Accept error: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },

                Some((request, reply)) = rx.recv() => {
                    let response = self.handle_request(request);
                    let _ = reply.send(response);
                }

                _ = check_shutdown.tick() => {}
            }

            if self.shutdown.load(Ordering::Relaxed) {
                log::info!("Hub shutting down");
                break;
            }
        }

        // Let the connection that asked for shutdown receive its reply
        tokio::time::sleep(Duration::from_millis(50)).await;

        fs::remove_file(&socket_path).ok();
        fs::remove_file(&pid_path).ok();

        Ok(())
    }

    /// Handle a single client connection.
    async fn handle_connection(stream: UnixStream, tx: mpsc::Sender<Envelope>) -> Result<()> {
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        while let Some(line) = lines.next_line().await.context("Failed to read line")? {
            if line.trim().is_empty() {
                continue;
            }

            let response = match serde_json::from_str::<Request>(&line) {
                Ok(request) => {
                    let is_shutdown = matches!(request, Request::Shutdown);
                    let (reply_tx, reply_rx) = oneshot::channel();
                    tx.send((request, reply_tx))
                        .await
                        .map_err(|_| eyre!("Hub loop is not running"))?;
                    let response = reply_rx.await.context("Hub dropped the request")?;
                    write_response(&mut writer, &response).await?;
                    if is_shutdown {
                        break;
                    }
                    continue;
                }
                Err(e) => Response::error(ErrorKind::Rejected, format!("malformed request: {}", e)),
            };
            write_response(&mut writer, &response).await?;
        }

        Ok(())
    }

    /// Handle a single request.
    fn handle_request(&mut self, request: Request) -> Response {
        match request {
            Request::Create { collection, fields } => match self.hub.create(&collection, fields) {
                Ok(document) => Response::Document { document },
                Err(e) => error_response(e),
            },

            Request::Update { collection, id, fields } => match self.hub.update(&collection, &id, fields) {
                Ok(document) => Response::Document { document },
                Err(e) => error_response(e),
            },

            Request::Delete { collection, id } => match self.hub.delete(&collection, &id) {
                Ok(()) => Response::Ok,
                Err(e) => error_response(e),
            },

            Request::Get { collection, id } => match self.hub.get(&collection, &id) {
                Ok(Some(document)) => Response::Document { document },
                Ok(None) => Response::NotFound { collection, id },
                Err(e) => error_response(e),
            },

            Request::List { collection } => match self.hub.list(&collection) {
                Ok(documents) => Response::Documents { documents },
                Err(e) => error_response(e),
            },

            Request::ArchiveCompleted { policy, archived_by } => {
                match self.hub.archive_completed(&policy, &archived_by, Utc::now()) {
                    Ok(result) => Response::Archived { result },
                    Err(e) => error_response(e),
                }
            }

            Request::ArchiveChore { id, archived_by } => match self.hub.archive_chore(&id, &archived_by) {
                Ok(document) => Response::Document { document },
                Err(e) => error_response(e),
            },

            Request::RestoreChore { id, restored_by } => match self.hub.restore_chore(&id, &restored_by) {
                Ok(document) => Response::Document { document },
                Err(e) => error_response(e),
            },

            Request::ListArchived { limit } => match self.hub.archived_chores(limit) {
                Ok(chores) => Response::ArchivedChores { chores },
                Err(e) => error_response(e),
            },

            Request::ArchiveStats => match self.hub.archive_stats() {
                Ok(stats) => Response::ArchiveStats { stats },
                Err(e) => error_response(e),
            },

            Request::CleanupArchive { policy } => match self.hub.cleanup_archive(&policy, Utc::now()) {
                Ok(count) => Response::Removed { count },
                Err(e) => error_response(e),
            },

            Request::Shutdown => {
                self.shutdown.store(true, Ordering::Relaxed);
                Response::Ok
            }

            Request::Ping => Response::Pong,
        }
    }
}

async fn write_response(writer: &mut tokio::net::unix::OwnedWriteHalf, response: &Response) -> Result<()> {
    let mut json = serde_json::to_string(response)?;
    json.push('\n');
    writer.write_all(json.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Classify a hub failure for the wire.
fn error_response(e: eyre::Report) -> Response {
    match e.downcast_ref::<HubError>() {
        Some(HubError::NotFound { collection, id }) => Response::NotFound {
            collection: collection.clone(),
            id: id.clone(),
        },
        Some(HubError::AlreadyCompleted(_) | HubError::AlreadyExists { .. }) => {
            Response::error(ErrorKind::Conflict, e.to_string())
        }
        Some(HubError::Invalid(_) | HubError::UnknownCollection(_) | HubError::Dependency(_)) => {
            Response::error(ErrorKind::Rejected, e.to_string())
        }
        None => {
            log::error!("Hub request failed: {:#}", e);
            Response::error(ErrorKind::Internal, format!("{:#}", e))
        }
    }
}

/// Check if a hub is running for the given store path.
pub fn is_daemon_running(root: &Path) -> bool {
    let config = DaemonConfig::new(root);
    let socket_path = config.socket_path();
    let pid_path = config.pid_path();

    if !socket_path.exists() {
        return false;
    }

    if let Ok(pid_str) = fs::read_to_string(&pid_path)
        && let Ok(pid) = pid_str.trim().parse::<i32>()
    {
        // Signal 0 only checks that the process exists
        unsafe {
            if libc::kill(pid, 0) == 0 {
                return true;
            }
        }
    }

    // Stale socket, clean up
    fs::remove_file(&socket_path).ok();
    fs::remove_file(&pid_path).ok();
    false
}

/// Start the hub as a background process.
pub fn start_daemon(root: &Path) -> Result<()> {
    let exe = std::env::current_exe().context("Failed to get current executable")?;

    Command::new(exe)
        .arg("--dir")
        .arg(root)
        .arg("hub")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .context("Failed to spawn hub process")?;

    Ok(())
}
