//! Device configuration loaded from `.chorekeeper/config.yaml`.
//!
//! Every key is optional; a missing file yields the defaults.

use crate::types::{QueuedOperation, Timestamp};
use chrono::Duration as ChronoDuration;
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory holding all chorekeeper state under a root.
pub const STORE_DIR: &str = ".chorekeeper";

/// Config file name within the store directory.
pub const CONFIG_FILE: &str = "config.yaml";

/// Socket file name within the store directory.
const SOCKET_FILE: &str = "hub.sock";

/// PID file name within the store directory.
const PID_FILE: &str = "hub.pid";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub hub: HubSettings,
    pub sync: RetryPolicy,
    pub archive: ArchivePolicy,
    /// Seconds between background drains in `ck watch`
    pub watch_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hub: HubSettings::default(),
            sync: RetryPolicy::default(),
            archive: ArchivePolicy::default(),
            watch_interval_secs: 30,
        }
    }
}

impl Config {
    /// Load config for the store at `root`.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(STORE_DIR).join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(&path).with_context(|| format!("Failed to read {:?}", path))?;
        Self::parse(&raw).with_context(|| format!("Invalid config at {:?}", path))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw).context("Failed to parse config YAML")
    }

    /// Write the config, creating the store directory if needed.
    pub fn save(&self, root: &Path) -> Result<()> {
        let dir = root.join(STORE_DIR);
        fs::create_dir_all(&dir).context("Failed to create .chorekeeper directory")?;
        let raw = serde_yaml::to_string(self).context("Failed to serialize config")?;
        fs::write(dir.join(CONFIG_FILE), raw).context("Failed to write config")?;
        Ok(())
    }

    pub fn watch_interval(&self) -> Duration {
        Duration::from_secs(self.watch_interval_secs.max(1))
    }
}

/// Client-side hub settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubSettings {
    pub request_timeout_secs: u64,
    /// Spawn the hub in the background when a command needs it
    pub auto_start: bool,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: 5,
            auto_start: false,
        }
    }
}

impl HubSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

/// Bounded exponential backoff for failed operations.
///
/// Only a manual sync re-attempts a failed operation, and only while
/// `attempts < max_attempts` and the backoff since the failure has elapsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff_secs: u64,
    pub max_backoff_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff_secs: 30,
            max_backoff_secs: 3600,
        }
    }
}

impl RetryPolicy {
    /// Backoff after the given number of attempts: `base * 2^(attempts-1)`, capped.
    pub fn backoff(&self, attempts: u32) -> ChronoDuration {
        if attempts == 0 {
            return ChronoDuration::zero();
        }
        let factor = 1u64.checked_shl(attempts - 1).unwrap_or(u64::MAX);
        let secs = self.base_backoff_secs.saturating_mul(factor).min(self.max_backoff_secs);
        ChronoDuration::seconds(i64::try_from(secs).unwrap_or(i64::MAX))
    }

    /// Whether a failed operation may be re-attempted at `now`.
    pub fn allows_retry(&self, op: &QueuedOperation, now: Timestamp) -> bool {
        if op.attempts >= self.max_attempts {
            return false;
        }
        match op.failed_at {
            Some(failed_at) => now >= failed_at + self.backoff(op.attempts),
            None => true,
        }
    }
}

/// When completed chores move to the archive and how long they stay there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchivePolicy {
    /// Completed chores older than this are archived
    pub after_days: u32,
    /// Archived chores older than this are deleted by cleanup
    pub keep_days: u32,
    /// Most chores handled by one archive or cleanup run
    pub batch_size: usize,
}

impl Default for ArchivePolicy {
    fn default() -> Self {
        Self {
            after_days: 90,
            keep_days: 365,
            batch_size: 500,
        }
    }
}

impl ArchivePolicy {
    pub fn archive_cutoff(&self, now: Timestamp) -> Timestamp {
        now - ChronoDuration::days(i64::from(self.after_days))
    }

    pub fn cleanup_cutoff(&self, now: Timestamp) -> Timestamp {
        now - ChronoDuration::days(i64::from(self.keep_days))
    }
}

/// Filesystem layout of the hub daemon.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Root directory containing .chorekeeper
    pub root: PathBuf,
}

impl DaemonConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn socket_path(&self) -> PathBuf {
        self.root.join(STORE_DIR).join(SOCKET_FILE)
    }

    pub fn pid_path(&self) -> PathBuf {
        self.root.join(STORE_DIR).join(PID_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OperationPayload;
    use chrono::Utc;
    use tempfile::TempDir;

    fn failed_op(attempts: u32, failed_at: Timestamp) -> QueuedOperation {
        let mut op = QueuedOperation::new(
            "op-0000000001",
            OperationPayload::DeleteChore {
                chore_id: "ch-abc".to_string(),
            },
            failed_at,
        );
        op.attempts = attempts;
        op.failed_at = Some(failed_at);
        op
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::load(temp_dir.path()).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = Config::parse("sync:\n  max_attempts: 2\n").unwrap();
        assert_eq!(config.sync.max_attempts, 2);
        assert_eq!(config.sync.base_backoff_secs, 30);
        assert_eq!(config.hub, HubSettings::default());
    }

    #[test]
    fn test_archive_policy_from_yaml() {
        let config = Config::parse("archive:\n  after_days: 30\n").unwrap();
        assert_eq!(config.archive.after_days, 30);
        assert_eq!(config.archive.keep_days, 365);

        let now = Utc::now();
        assert_eq!(config.archive.archive_cutoff(now), now - ChronoDuration::days(30));
    }

    #[test]
    fn test_invalid_yaml_is_error() {
        assert!(Config::parse("sync: [unterminated").is_err());
    }

    #[test]
    fn test_save_then_load() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.hub.auto_start = true;
        config.watch_interval_secs = 5;
        config.save(temp_dir.path()).unwrap();

        assert_eq!(Config::load(temp_dir.path()).unwrap(), config);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_backoff_secs: 10,
            max_backoff_secs: 60,
        };
        assert_eq!(policy.backoff(0), ChronoDuration::zero());
        assert_eq!(policy.backoff(1), ChronoDuration::seconds(10));
        assert_eq!(policy.backoff(2), ChronoDuration::seconds(20));
        assert_eq!(policy.backoff(3), ChronoDuration::seconds(40));
        assert_eq!(policy.backoff(4), ChronoDuration::seconds(60));
        assert_eq!(policy.backoff(200), ChronoDuration::seconds(60));
    }

    #[test]
    fn test_allows_retry_waits_for_backoff() {
        let policy = RetryPolicy::default();
        let failed_at = Utc::now();
        let op = failed_op(1, failed_at);

        assert!(!policy.allows_retry(&op, failed_at));
        assert!(policy.allows_retry(&op, failed_at + ChronoDuration::seconds(30)));
    }

    #[test]
    fn test_allows_retry_stops_at_max_attempts() {
        let policy = RetryPolicy::default();
        let failed_at = Utc::now() - ChronoDuration::days(1);
        let op = failed_op(policy.max_attempts, failed_at);
        assert!(!policy.allows_retry(&op, Utc::now()));
    }

    #[test]
    fn test_daemon_paths() {
        let config = DaemonConfig::new("/test/path");
        assert_eq!(config.socket_path(), PathBuf::from("/test/path/.chorekeeper/hub.sock"));
        assert_eq!(config.pid_path(), PathBuf::from("/test/path/.chorekeeper/hub.pid"));
    }
}
