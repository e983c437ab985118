//! Shared test infrastructure for chorekeeper integration tests.
//!
//! Provides TestEnv for sync engine setup/teardown and an in-memory
//! MockRemote that records every mutation it receives.

#![allow(dead_code)]

use async_trait::async_trait;
use chorekeeper::decode::CLIENT_OP_ID_FIELD;
use chorekeeper::{
    Chore, ChoreDraft, Document, KeyValueStore, OfflineSync, OperationPayload, QueuedOperation, RemoteError,
    RemoteStore, RetryPolicy, SqliteKv, decode_chores,
};
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

// =============================================================================
// Mock remote
// =============================================================================

/// A mutation as seen by the remote.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Create { id: String, fields: Map<String, Value> },
    Update { id: String, fields: Map<String, Value> },
    Delete { id: String },
}

impl Call {
    pub fn id(&self) -> &str {
        match self {
            Call::Create { id, .. } | Call::Update { id, .. } | Call::Delete { id } => id,
        }
    }

    pub fn is_create(&self) -> bool {
        matches!(self, Call::Create { .. })
    }
}

#[derive(Default)]
struct MockState {
    online: bool,
    next_id: u64,
    documents: BTreeMap<String, Map<String, Value>>,
    calls: Vec<Call>,
    attempts: usize,
    rejected_ids: HashSet<String>,
    rejected_titles: HashSet<String>,
    offline_after: Option<usize>,
    conflict_on_repeat: bool,
}

/// In-memory document store standing in for the hub.
///
/// Every mutation attempt counts, including rejected ones; only accepted
/// mutations are recorded in `calls`.
pub struct MockRemote {
    state: Mutex<MockState>,
}

impl MockRemote {
    pub fn online() -> Self {
        Self {
            state: Mutex::new(MockState {
                online: true,
                ..MockState::default()
            }),
        }
    }

    pub fn offline() -> Self {
        let remote = Self::online();
        remote.set_online(false);
        remote
    }

    /// Also cancels any pending `go_offline_after`.
    pub fn set_online(&self, online: bool) {
        let mut state = self.state.lock().unwrap();
        state.online = online;
        state.offline_after = None;
    }

    /// Reject updates and deletes targeting `id`.
    pub fn reject_id(&self, id: &str) {
        self.state.lock().unwrap().rejected_ids.insert(id.to_string());
    }

    /// Reject creates carrying this title.
    pub fn reject_title(&self, title: &str) {
        self.state.lock().unwrap().rejected_titles.insert(title.to_string());
    }

    /// Drop offline once `n` mutation attempts have been served.
    pub fn go_offline_after(&self, n: usize) {
        self.state.lock().unwrap().offline_after = Some(n);
    }

    /// Report a conflict when an update or delete repeats one already applied.
    pub fn conflict_on_repeat(&self) {
        self.state.lock().unwrap().conflict_on_repeat = true;
    }

    /// Seed a chore directly, bypassing the call log.
    pub fn seed(&self, title: &str) -> String {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("ch-{:010}", state.next_id);
        let now = Value::String(Utc::now().to_rfc3339());
        let mut fields = Map::new();
        fields.insert("title".to_string(), Value::String(title.to_string()));
        fields.insert("createdAt".to_string(), now.clone());
        fields.insert("updatedAt".to_string(), now);
        state.documents.insert(id.clone(), fields);
        id
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Mutation attempts received while online, accepted or not.
    pub fn attempts(&self) -> usize {
        self.state.lock().unwrap().attempts
    }

    pub fn document(&self, id: &str) -> Option<Map<String, Value>> {
        self.state.lock().unwrap().documents.get(id).cloned()
    }

    pub fn chores(&self) -> Vec<Chore> {
        let state = self.state.lock().unwrap();
        let documents: Vec<Document> = state
            .documents
            .iter()
            .map(|(id, fields)| Document {
                id: id.clone(),
                fields: fields.clone(),
            })
            .collect();
        decode_chores(&documents)
    }

    /// Gate a mutation attempt on connectivity.
    fn admit(state: &mut MockState) -> Result<(), RemoteError> {
        if let Some(limit) = state.offline_after
            && state.attempts >= limit
        {
            state.online = false;
        }
        if !state.online {
            return Err(RemoteError::Unavailable("mock remote offline".to_string()));
        }
        state.attempts += 1;
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MockRemote {
    async fn create(&self, _collection: &str, mut document: Map<String, Value>) -> Result<String, RemoteError> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock().unwrap();
        Self::admit(&mut state)?;

        let title = document.get("title").and_then(Value::as_str).unwrap_or_default();
        if state.rejected_titles.contains(title) {
            return Err(RemoteError::Rejected(format!("title not allowed: {}", title)));
        }

        let client_op = document.get(CLIENT_OP_ID_FIELD).cloned();
        if let Some(op) = &client_op
            && let Some((id, _)) = state.documents.iter().find(|(_, f)| f.get(CLIENT_OP_ID_FIELD) == Some(op))
        {
            return Ok(id.clone());
        }

        state.next_id += 1;
        let id = format!("ch-{:010}", state.next_id);
        let now = Value::String(Utc::now().to_rfc3339());
        document.entry("createdAt").or_insert_with(|| now.clone());
        document.entry("updatedAt").or_insert(now);
        state.documents.insert(id.clone(), document.clone());
        state.calls.push(Call::Create {
            id: id.clone(),
            fields: document,
        });
        Ok(id)
    }

    async fn update(&self, _collection: &str, id: &str, fields: Map<String, Value>) -> Result<(), RemoteError> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock().unwrap();
        Self::admit(&mut state)?;

        if state.rejected_ids.contains(id) {
            return Err(RemoteError::Rejected(format!("update refused for {}", id)));
        }
        let repeated = state
            .calls
            .iter()
            .any(|c| matches!(c, Call::Update { id: i, fields: f } if i == id && *f == fields));
        if state.conflict_on_repeat && repeated {
            return Err(RemoteError::Conflict(format!("{} already has these fields", id)));
        }
        let Some(document) = state.documents.get_mut(id) else {
            return Err(RemoteError::NotFound {
                collection: "chores".to_string(),
                id: id.to_string(),
            });
        };
        for (key, value) in fields.clone() {
            if value.is_null() {
                document.remove(&key);
            } else {
                document.insert(key, value);
            }
        }
        state.calls.push(Call::Update {
            id: id.to_string(),
            fields,
        });
        Ok(())
    }

    async fn delete(&self, _collection: &str, id: &str) -> Result<(), RemoteError> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock().unwrap();
        Self::admit(&mut state)?;

        if state.rejected_ids.contains(id) {
            return Err(RemoteError::Rejected(format!("delete refused for {}", id)));
        }
        if state.documents.remove(id).is_none() {
            return Err(RemoteError::NotFound {
                collection: "chores".to_string(),
                id: id.to_string(),
            });
        }
        state.calls.push(Call::Delete { id: id.to_string() });
        Ok(())
    }

    async fn list(&self, _collection: &str) -> Result<Vec<Document>, RemoteError> {
        tokio::task::yield_now().await;
        let state = self.state.lock().unwrap();
        if !state.online {
            return Err(RemoteError::Unavailable("mock remote offline".to_string()));
        }
        Ok(state
            .documents
            .iter()
            .map(|(id, fields)| Document {
                id: id.clone(),
                fields: fields.clone(),
            })
            .collect())
    }
}

// =============================================================================
// Failing key-value store
// =============================================================================

/// Key-value store whose writes can be switched to fail.
pub struct FailingKv {
    inner: SqliteKv,
    fail_writes: AtomicBool,
}

impl FailingKv {
    pub fn new() -> Self {
        Self {
            inner: SqliteKv::open_in_memory().expect("Failed to open in-memory kv"),
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl KeyValueStore for FailingKv {
    fn get(&self, key: &str) -> eyre::Result<Option<String>> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> eyre::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            eyre::bail!("disk full");
        }
        self.inner.set(key, value)
    }
}

// =============================================================================
// Test environment
// =============================================================================

/// Retry policy with no backoff, so manual drains re-attempt immediately.
pub fn eager_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_backoff_secs: 0,
        max_backoff_secs: 0,
    }
}

/// Test environment with automatic cleanup.
pub struct TestEnv {
    pub temp_dir: TempDir,
    pub kv: Arc<SqliteKv>,
    pub remote: Arc<MockRemote>,
    pub sync: Arc<OfflineSync>,
    pub policy: RetryPolicy,
}

impl TestEnv {
    /// Online remote, default retry policy.
    pub fn new() -> Self {
        Self::with(MockRemote::online(), RetryPolicy::default())
    }

    /// Remote starts offline.
    pub fn offline() -> Self {
        Self::with(MockRemote::offline(), RetryPolicy::default())
    }

    pub fn with(remote: MockRemote, policy: RetryPolicy) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let kv = Arc::new(SqliteKv::open(temp_dir.path()).expect("Failed to open device store"));
        let remote = Arc::new(remote);
        let sync =
            Arc::new(OfflineSync::open(kv.clone(), remote.clone(), policy.clone()).expect("Failed to open sync"));
        Self {
            temp_dir,
            kv,
            remote,
            sync,
            policy,
        }
    }

    /// Simulate a process restart: reopen the device store from disk.
    pub fn restart(&mut self) {
        self.kv = Arc::new(SqliteKv::open(self.temp_dir.path()).expect("Failed to reopen device store"));
        let sync = OfflineSync::open(self.kv.clone(), self.remote.clone(), self.policy.clone());
        self.sync = Arc::new(sync.expect("Failed to reopen sync"));
    }

    /// Queue a create for a new chore, returning its local id.
    pub async fn queue_create(&self, title: &str) -> String {
        self.queue_draft(ChoreDraft::new(title)).await
    }

    pub async fn queue_draft(&self, draft: ChoreDraft) -> String {
        let local_id = draft.local_id.clone();
        self.sync
            .queue_action(OperationPayload::CreateChore { draft })
            .await
            .expect("Failed to queue create");
        local_id
    }

    pub async fn queue_complete(&self, chore_id: &str) -> QueuedOperation {
        self.sync
            .queue_action(OperationPayload::CompleteChore {
                chore_id: chore_id.to_string(),
                completed_at: Utc::now(),
                completed_by: None,
            })
            .await
            .expect("Failed to queue completion")
    }

    pub async fn queue_delete(&self, chore_id: &str) -> QueuedOperation {
        self.sync
            .queue_action(OperationPayload::DeleteChore {
                chore_id: chore_id.to_string(),
            })
            .await
            .expect("Failed to queue delete")
    }

    pub async fn queue_claim(&self, chore_id: &str, user: &str) -> QueuedOperation {
        self.sync
            .queue_action(OperationPayload::ClaimChore {
                chore_id: chore_id.to_string(),
                assignee_id: user.to_string(),
                assignee_name: None,
            })
            .await
            .expect("Failed to queue claim")
    }

    pub async fn queue_len(&self) -> usize {
        self.sync.operations().await.len()
    }

    /// The remote's chores with unsynced operations overlaid, as the CLI sees them.
    pub async fn snapshot(&self) -> Vec<Chore> {
        self.sync
            .cache_chores(self.remote.chores())
            .await
            .expect("Failed to cache chores")
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}
