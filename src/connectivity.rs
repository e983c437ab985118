//! Funnels connectivity changes, user requests and background-platform
//! messages into the single drain routine.

use crate::sync::{DrainReport, OfflineSync, SyncTrigger};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Background message type announcing that queued data should be synced.
pub const SYNC_OFFLINE_DATA: &str = "SYNC_OFFLINE_DATA";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Online,
    Offline,
}

/// A message posted by a background platform hook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackgroundMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

impl BackgroundMessage {
    /// The message a periodic scheduler posts when queued data should be pushed.
    pub fn sync_due() -> Self {
        Self {
            kind: SYNC_OFFLINE_DATA.to_string(),
            data: Value::Null,
        }
    }

    /// Parse a raw message; anything that is not a typed object yields `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }

    pub fn is_sync_due(&self) -> bool {
        self.kind == SYNC_OFFLINE_DATA
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncSignal {
    Connectivity(Connectivity),
    /// User-initiated "sync now"
    SyncNow,
    Background(BackgroundMessage),
}

/// Tracks connectivity and decides which signals start a drain.
pub struct SyncCoordinator {
    engine: Arc<OfflineSync>,
    online: bool,
}

impl SyncCoordinator {
    pub fn new(engine: Arc<OfflineSync>, initial: Connectivity) -> Self {
        Self {
            engine,
            online: initial == Connectivity::Online,
        }
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    /// Handle one signal, returning the drain report if a drain ran.
    pub async fn handle(&mut self, signal: SyncSignal) -> Option<DrainReport> {
        let trigger = match signal {
            SyncSignal::Connectivity(Connectivity::Offline) => {
                if self.online {
                    log::info!("Connectivity lost");
                }
                self.online = false;
                return None;
            }
            SyncSignal::Connectivity(Connectivity::Online) => {
                let was_online = std::mem::replace(&mut self.online, true);
                if was_online {
                    return None;
                }
                log::info!("Connectivity restored");
                SyncTrigger::Reconnected
            }
            SyncSignal::SyncNow => SyncTrigger::Manual,
            SyncSignal::Background(message) => {
                if !message.is_sync_due() {
                    log::debug!("Ignoring background message {}", message.kind);
                    return None;
                }
                SyncTrigger::Background
            }
        };

        if !self.online {
            log::debug!("Offline, skipping {:?} drain", trigger);
            return None;
        }

        match self.engine.process_queued_actions(trigger).await {
            Ok(report) => {
                if report.interrupted {
                    self.online = false;
                }
                Some(report)
            }
            Err(e) => {
                log::error!("Drain failed: {:#}", e);
                None
            }
        }
    }

    /// Consume signals until every sender is dropped.
    pub async fn run(mut self, mut rx: mpsc::Receiver<SyncSignal>) {
        while let Some(signal) = rx.recv().await {
            self.handle(signal).await;
        }
        log::debug!("Sync coordinator stopped");
    }
}
