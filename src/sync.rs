//! Offline-first synchronization engine.
//!
//! Mutations are appended to a durable FIFO queue and later replayed against a
//! [`RemoteStore`]. The queue and the map from device-local chore ids to
//! remote ids are persisted together under [`QUEUE_KEY`], so every step of a
//! drain is a single write.
//!
//! Operation lifecycle: Pending -> InFlight -> removed on success, or
//! Failed (kept, counted in `pendingCount`) on rejection. An InFlight
//! operation found at startup is demoted to Pending.
//!
//! ```ignore
//! let sync = Arc::new(OfflineSync::open(kv, remote, config.sync)?);
//! sync.queue_action(OperationPayload::DeleteChore { chore_id }).await?;
//! let report = sync.process_queued_actions(SyncTrigger::Reconnected).await?;
//! ```

use crate::config::RetryPolicy;
use crate::decode::{encode_claim, encode_completion, encode_draft, encode_patch};
use crate::id::{OPERATION_PREFIX, generate_id, is_local_id};
use crate::kv::{KeyValueStore, load_json, store_json};
use crate::remote::{CHORES, RemoteError, RemoteStore};
use crate::types::{
    Chore, OfflineSummary, OperationPayload, OperationStatus, QueuedOperation, SyncMetadata, SyncStatus, Timestamp,
};
use chrono::Utc;
use eyre::{Result, eyre};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::Mutex;

/// Key holding the queue and id map.
pub const QUEUE_KEY: &str = "sync_queue";

/// Key holding [`SyncMetadata`].
pub const METADATA_KEY: &str = "sync_metadata";

/// Key holding the device's chore snapshot.
pub const CHORES_KEY: &str = "offline_chores";

/// Errors surfaced by the sync engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// The durable store could not be written; the action is not guaranteed.
    #[error("failed to persist sync state: {0}")]
    Persistence(String),

    #[error("queued operation not found: {0}")]
    OperationNotFound(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

/// What started a drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// Connectivity came back
    Reconnected,
    /// User asked for a sync; the only trigger that re-attempts failed operations
    Manual,
    /// Background platform hook said a sync is due
    Background,
}

/// Outcome of one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub applied: usize,
    pub failed: usize,
    /// Pending operations held back behind a failed operation on the same chore
    pub held: usize,
    /// Queue depth after the pass
    pub remaining: usize,
    /// Another drain was running; this call did nothing
    pub already_running: bool,
    /// The remote became unreachable mid-pass
    pub interrupted: bool,
    /// Chores created this pass, as (local id, remote id)
    pub created: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueueState {
    operations: Vec<QueuedOperation>,
    #[serde(default)]
    id_map: BTreeMap<String, String>,
}

/// Per-pass bookkeeping: operations already considered and chore keys held back.
#[derive(Default)]
struct Pass {
    visited: HashSet<String>,
    blocked: HashSet<String>,
}

impl Pass {
    fn block(&mut self, op: &QueuedOperation, id_map: &BTreeMap<String, String>) {
        let key = op.payload.chore_key();
        self.blocked.insert(key.to_string());
        self.blocked.insert(resolve_id(id_map, key));
    }

    fn is_held(&self, op: &QueuedOperation, id_map: &BTreeMap<String, String>) -> bool {
        op.payload
            .referenced_ids()
            .into_iter()
            .any(|id| self.blocked.contains(id) || self.blocked.contains(&resolve_id(id_map, id)))
    }
}

struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A queued operation translated into a remote primitive.
#[derive(Debug, Clone, PartialEq)]
enum RemoteCall {
    Create(Map<String, Value>),
    Update { id: String, fields: Map<String, Value> },
    Delete { id: String },
}

fn resolve_id(id_map: &BTreeMap<String, String>, id: &str) -> String {
    id_map.get(id).cloned().unwrap_or_else(|| id.to_string())
}

fn resolve_remote(id_map: &BTreeMap<String, String>, id: &str) -> Result<String, String> {
    let resolved = resolve_id(id_map, id);
    if is_local_id(&resolved) {
        return Err(format!("chore {} has not been created remotely", id));
    }
    Ok(resolved)
}

fn resolve_all(id_map: &BTreeMap<String, String>, ids: &[String]) -> Result<Vec<String>, String> {
    ids.iter().map(|id| resolve_remote(id_map, id)).collect()
}

fn prepare_call(op: &QueuedOperation, id_map: &BTreeMap<String, String>) -> Result<RemoteCall, String> {
    match &op.payload {
        OperationPayload::CreateChore { draft } => {
            let mut draft = draft.clone();
            draft.dependencies = resolve_all(id_map, &draft.dependencies)?;
            Ok(RemoteCall::Create(encode_draft(&draft, Some(&op.operation_id))))
        }
        OperationPayload::CompleteChore {
            chore_id,
            completed_at,
            completed_by,
        } => Ok(RemoteCall::Update {
            id: resolve_remote(id_map, chore_id)?,
            fields: encode_completion(*completed_at, completed_by.as_deref()),
        }),
        OperationPayload::UpdateChore { chore_id, patch } => {
            let mut patch = patch.clone();
            if let Some(deps) = &patch.dependencies {
                patch.dependencies = Some(resolve_all(id_map, deps)?);
            }
            Ok(RemoteCall::Update {
                id: resolve_remote(id_map, chore_id)?,
                fields: encode_patch(&patch),
            })
        }
        OperationPayload::DeleteChore { chore_id } => Ok(RemoteCall::Delete {
            id: resolve_remote(id_map, chore_id)?,
        }),
        OperationPayload::ClaimChore {
            chore_id,
            assignee_id,
            assignee_name,
        } => Ok(RemoteCall::Update {
            id: resolve_remote(id_map, chore_id)?,
            fields: encode_claim(assignee_id, assignee_name.as_deref()),
        }),
    }
}

/// Apply a queued operation to a local snapshot as if it had already synced.
fn apply_optimistic(
    chores: &mut Vec<Chore>,
    payload: &OperationPayload,
    id_map: &BTreeMap<String, String>,
    now: Timestamp,
) {
    let target = resolve_id(id_map, payload.chore_key());

    if let OperationPayload::CreateChore { draft } = payload {
        if chores.iter().any(|c| c.id == target) {
            return;
        }
        let mut chore = draft.to_chore(target, now);
        chore.dependencies = chore.dependencies.iter().map(|d| resolve_id(id_map, d)).collect();
        chores.push(chore);
        return;
    }

    if let OperationPayload::DeleteChore { .. } = payload {
        chores.retain(|c| c.id != target);
        return;
    }

    let Some(chore) = chores.iter_mut().find(|c| c.id == target) else {
        return;
    };
    match payload {
        OperationPayload::CompleteChore {
            completed_at,
            completed_by,
            ..
        } => {
            if chore.completed_at.is_none() {
                chore.completed_at = Some(*completed_at);
                chore.completed_by = completed_by.clone();
                chore.updated_at = now.max(chore.updated_at);
            }
        }
        OperationPayload::UpdateChore { patch, .. } => {
            let mut patch = patch.clone();
            if let Some(deps) = &patch.dependencies {
                patch.dependencies = Some(deps.iter().map(|d| resolve_id(id_map, d)).collect());
            }
            patch.apply_to(chore, now);
        }
        OperationPayload::ClaimChore {
            assignee_id,
            assignee_name,
            ..
        } => {
            chore.assignee_id = Some(assignee_id.clone());
            chore.assignee_name = assignee_name.clone();
            chore.updated_at = now.max(chore.updated_at);
        }
        OperationPayload::CreateChore { .. } | OperationPayload::DeleteChore { .. } => {}
    }
}

fn validate_payload(payload: &OperationPayload) -> Result<(), SyncError> {
    if payload.chore_key().is_empty() {
        return Err(SyncError::InvalidOperation("missing chore id".to_string()));
    }
    match payload {
        OperationPayload::CreateChore { draft } => draft
            .validate()
            .map_err(|e| SyncError::InvalidOperation(e.to_string())),
        OperationPayload::UpdateChore { patch, .. } => {
            if patch.is_empty() {
                return Err(SyncError::InvalidOperation("update changes nothing".to_string()));
            }
            patch.validate().map_err(|e| SyncError::InvalidOperation(e.to_string()))
        }
        OperationPayload::ClaimChore { assignee_id, .. } if assignee_id.is_empty() => {
            Err(SyncError::InvalidOperation("missing assignee".to_string()))
        }
        _ => Ok(()),
    }
}

/// The offline queue and its drain routine.
///
/// Constructed once at startup and shared by `Arc`. The state lock is never
/// held across a remote call.
pub struct OfflineSync {
    kv: Arc<dyn KeyValueStore>,
    remote: Arc<dyn RemoteStore>,
    policy: RetryPolicy,
    state: Mutex<QueueState>,
    draining: AtomicBool,
}

impl OfflineSync {
    /// Load persisted state, demoting InFlight operations to Pending.
    pub fn open(kv: Arc<dyn KeyValueStore>, remote: Arc<dyn RemoteStore>, policy: RetryPolicy) -> Result<Self> {
        let mut state: QueueState = load_json(kv.as_ref(), QUEUE_KEY)?.unwrap_or_default();

        let before = state.operations.len();
        state.operations.retain(|op| op.status != OperationStatus::Applied);
        let mut changed = state.operations.len() != before;

        for op in state.operations.iter_mut() {
            if op.status == OperationStatus::InFlight {
                log::info!("Recovering in-flight operation {} as pending", op.operation_id);
                op.status = OperationStatus::Pending;
                changed = true;
            }
        }

        if changed {
            store_json(kv.as_ref(), QUEUE_KEY, &state).map_err(|e| eyre!(SyncError::Persistence(format!("{:#}", e))))?;
        }

        log::debug!("Opened offline queue with {} operations", state.operations.len());

        Ok(Self {
            kv,
            remote,
            policy,
            state: Mutex::new(state),
            draining: AtomicBool::new(false),
        })
    }

    fn persist(&self, state: &QueueState) -> Result<()> {
        store_json(self.kv.as_ref(), QUEUE_KEY, state).map_err(|e| eyre!(SyncError::Persistence(format!("{:#}", e))))
    }

    fn metadata(&self) -> Result<SyncMetadata> {
        Ok(load_json(self.kv.as_ref(), METADATA_KEY)?.unwrap_or_default())
    }

    fn write_metadata(&self, last_sync: Option<Timestamp>, pending_count: usize) -> Result<()> {
        let mut metadata = self.metadata()?;
        if last_sync.is_some() {
            metadata.last_sync = last_sync;
        }
        metadata.pending_count = pending_count;
        store_json(self.kv.as_ref(), METADATA_KEY, &metadata)
    }

    fn update_cache(&self, f: impl FnOnce(&mut Vec<Chore>)) -> Result<()> {
        let mut chores = self.cached_chores()?;
        f(&mut chores);
        store_json(self.kv.as_ref(), CHORES_KEY, &chores)
    }

    /// Durably append a mutation to the queue.
    ///
    /// Returns only after the queue has been written. On a persistence
    /// failure the in-memory queue is rolled back and
    /// [`SyncError::Persistence`] is returned.
    pub async fn queue_action(&self, payload: OperationPayload) -> Result<QueuedOperation> {
        validate_payload(&payload).map_err(|e| eyre!(e))?;

        let now = Utc::now();
        let op = QueuedOperation::new(
            generate_id(OPERATION_PREFIX, &payload.kind().to_string(), now),
            payload,
            now,
        );

        let mut state = self.state.lock().await;
        state.operations.push(op.clone());
        if let Err(e) = self.persist(&state) {
            state.operations.pop();
            log::error!("Failed to queue {} operation: {:#}", op.kind, e);
            return Err(e);
        }

        log::info!("Queued {} operation {} for {}", op.kind, op.operation_id, op.payload.chore_key());

        if let Err(e) = self.write_metadata(None, state.operations.len()) {
            log::warn!("Failed to update sync metadata: {:#}", e);
        }
        let id_map = &state.id_map;
        if let Err(e) = self.update_cache(|chores| apply_optimistic(chores, &op.payload, id_map, now)) {
            log::warn!("Failed to update offline chore cache: {:#}", e);
        }

        Ok(op)
    }

    /// Drain the queue against the remote.
    ///
    /// The single entry point for every trigger. An overlapping call returns
    /// immediately with `already_running` set.
    pub async fn process_queued_actions(&self, trigger: SyncTrigger) -> Result<DrainReport> {
        if self.draining.swap(true, Ordering::AcqRel) {
            log::debug!("Drain already running, ignoring {:?} trigger", trigger);
            return Ok(DrainReport {
                already_running: true,
                ..DrainReport::default()
            });
        }
        let _guard = DrainGuard(&self.draining);

        log::info!("Starting drain ({:?})", trigger);
        let mut report = DrainReport::default();
        let mut pass = Pass::default();

        loop {
            let (operation_id, call, prior_status) = {
                let mut state = self.state.lock().await;
                let now = Utc::now();
                let Some(index) = self.next_candidate(&state, trigger, now, &mut pass, &mut report) else {
                    break;
                };

                let prepared = prepare_call(&state.operations[index], &state.id_map);
                let previous = state.operations[index].clone();
                let prior_status = previous.status;
                let op = &mut state.operations[index];
                op.attempts += 1;

                match prepared {
                    Ok(call) => {
                        op.status = OperationStatus::InFlight;
                        let operation_id = op.operation_id.clone();
                        if let Err(e) = self.persist(&state) {
                            state.operations[index] = previous;
                            return Err(e);
                        }
                        (operation_id, call, prior_status)
                    }
                    Err(reason) => {
                        log::warn!("Operation {} cannot be sent: {}", op.operation_id, reason);
                        op.status = OperationStatus::Failed;
                        op.last_error = Some(reason);
                        op.failed_at = Some(now);
                        let failed = op.clone();
                        pass.block(&failed, &state.id_map);
                        report.failed += 1;
                        self.persist(&state)?;
                        continue;
                    }
                }
            };

            log::debug!("Applying operation {}", operation_id);
            let outcome = self.execute(call).await;

            let mut state = self.state.lock().await;
            let Some(index) = state.operations.iter().position(|op| op.operation_id == operation_id) else {
                log::warn!("Operation {} left the queue while in flight", operation_id);
                continue;
            };

            match outcome {
                Ok(created) => {
                    let op = state.operations.remove(index);
                    if let (OperationPayload::CreateChore { draft }, Some(remote_id)) = (&op.payload, created) {
                        log::info!("Chore {} created remotely as {}", draft.local_id, remote_id);
                        state.id_map.insert(draft.local_id.clone(), remote_id.clone());
                        report.created.push((draft.local_id.clone(), remote_id));
                    }
                    self.persist(&state)?;
                    report.applied += 1;
                }
                Err(e) if e.is_unavailable() => {
                    log::warn!("Remote unavailable, stopping drain: {}", e);
                    // A failed operation retried by hand stays failed; its error and failure time are untouched
                    let op = &mut state.operations[index];
                    op.status = prior_status;
                    op.attempts = op.attempts.saturating_sub(1);
                    self.persist(&state)?;
                    report.interrupted = true;
                    break;
                }
                Err(e) => {
                    log::warn!("Operation {} rejected: {}", operation_id, e);
                    let op = &mut state.operations[index];
                    op.status = OperationStatus::Failed;
                    op.last_error = Some(e.to_string());
                    op.failed_at = Some(Utc::now());
                    let failed = op.clone();
                    pass.block(&failed, &state.id_map);
                    report.failed += 1;
                    self.persist(&state)?;
                }
            }
        }

        let mut state = self.state.lock().await;
        if self.prune_id_map(&mut state) {
            self.persist(&state)?;
        }
        report.remaining = state.operations.len();
        let last_sync = (!report.interrupted).then(Utc::now);
        self.write_metadata(last_sync, report.remaining)?;
        drop(state);

        if !report.created.is_empty()
            && let Err(e) = self.update_cache(|chores| remap_chores(chores, &report.created))
        {
            log::warn!("Failed to remap offline chore cache: {:#}", e);
        }

        log::info!(
            "Drain finished: {} applied, {} failed, {} held, {} remaining",
            report.applied,
            report.failed,
            report.held,
            report.remaining
        );
        Ok(report)
    }

    /// Find the earliest operation eligible for this pass.
    fn next_candidate(
        &self,
        state: &QueueState,
        trigger: SyncTrigger,
        now: Timestamp,
        pass: &mut Pass,
        report: &mut DrainReport,
    ) -> Option<usize> {
        for (index, op) in state.operations.iter().enumerate() {
            if !pass.visited.insert(op.operation_id.clone()) {
                continue;
            }

            if pass.is_held(op, &state.id_map) {
                if op.status == OperationStatus::Failed {
                    pass.block(op, &state.id_map);
                } else {
                    log::debug!("Holding operation {} behind a failed operation", op.operation_id);
                    report.held += 1;
                }
                continue;
            }

            match op.status {
                OperationStatus::Pending => return Some(index),
                OperationStatus::Failed => {
                    if trigger == SyncTrigger::Manual && self.policy.allows_retry(op, now) {
                        log::info!("Retrying failed operation {} (attempt {})", op.operation_id, op.attempts + 1);
                        return Some(index);
                    }
                    pass.block(op, &state.id_map);
                }
                OperationStatus::InFlight | OperationStatus::Applied => {}
            }
        }
        None
    }

    async fn execute(&self, call: RemoteCall) -> Result<Option<String>, RemoteError> {
        match call {
            RemoteCall::Create(fields) => self.remote.create(CHORES, fields).await.map(Some),
            RemoteCall::Update { id, fields } => self.remote.update(CHORES, &id, fields).await.map(|_| None),
            RemoteCall::Delete { id } => self.remote.delete(CHORES, &id).await.map(|_| None),
        }
    }

    /// Drop id mappings no remaining operation refers to.
    fn prune_id_map(&self, state: &mut QueueState) -> bool {
        let referenced: HashSet<&str> = state
            .operations
            .iter()
            .flat_map(|op| op.payload.referenced_ids())
            .collect();
        let before = state.id_map.len();
        state.id_map.retain(|local, _| referenced.contains(local.as_str()));
        state.id_map.len() != before
    }

    /// Manual drain.
    pub async fn sync_pending_data(&self) -> Result<DrainReport> {
        self.process_queued_actions(SyncTrigger::Manual).await
    }

    pub async fn get_offline_summary(&self) -> Result<OfflineSummary> {
        let pending_chores = self.state.lock().await.operations.len();
        Ok(OfflineSummary {
            total_chores: self.cached_chores()?.len(),
            pending_chores,
            last_sync: self.metadata()?.last_sync,
        })
    }

    pub async fn get_sync_status(&self) -> Result<SyncStatus> {
        let metadata = self.metadata()?;
        Ok(SyncStatus {
            pending: metadata.pending_count,
            last_sync: metadata.last_sync,
        })
    }

    /// Operations not yet applied and not failed, in queue order.
    pub async fn pending_operations(&self) -> Vec<QueuedOperation> {
        let state = self.state.lock().await;
        state
            .operations
            .iter()
            .filter(|op| op.status != OperationStatus::Failed)
            .cloned()
            .collect()
    }

    pub async fn failed_operations(&self) -> Vec<QueuedOperation> {
        let state = self.state.lock().await;
        state
            .operations
            .iter()
            .filter(|op| op.status == OperationStatus::Failed)
            .cloned()
            .collect()
    }

    /// Every queued operation, in queue order.
    pub async fn operations(&self) -> Vec<QueuedOperation> {
        self.state.lock().await.operations.clone()
    }

    /// The earliest failed operation on a chore this operation touches, if any.
    ///
    /// A drain holds an operation back while such an operation sits ahead of it.
    pub async fn blocking_operation(&self, operation_id: &str) -> Option<QueuedOperation> {
        let state = self.state.lock().await;
        let position = state.operations.iter().position(|op| op.operation_id == operation_id)?;
        let touched: HashSet<String> = state.operations[position]
            .payload
            .referenced_ids()
            .into_iter()
            .map(|id| resolve_id(&state.id_map, id))
            .collect();
        state.operations[..position]
            .iter()
            .find(|op| {
                op.status == OperationStatus::Failed
                    && touched.contains(&resolve_id(&state.id_map, op.payload.chore_key()))
            })
            .cloned()
    }

    /// Reset a failed operation so the next drain attempts it again.
    pub async fn retry_operation(&self, operation_id: &str) -> Result<QueuedOperation> {
        let mut state = self.state.lock().await;
        let index = state
            .operations
            .iter()
            .position(|op| op.operation_id == operation_id)
            .ok_or_else(|| eyre!(SyncError::OperationNotFound(operation_id.to_string())))?;

        if state.operations[index].status != OperationStatus::Failed {
            return Err(eyre!(SyncError::InvalidOperation(format!(
                "operation {} has not failed",
                operation_id
            ))));
        }

        let previous = state.operations[index].clone();
        let op = &mut state.operations[index];
        op.status = OperationStatus::Pending;
        op.attempts = 0;
        op.last_error = None;
        op.failed_at = None;
        let reset = op.clone();

        if let Err(e) = self.persist(&state) {
            state.operations[index] = previous;
            return Err(e);
        }
        log::info!("Operation {} reset for retry", operation_id);
        Ok(reset)
    }

    /// Discard every failed operation. Returns how many were dropped.
    pub async fn clear_failed(&self) -> Result<usize> {
        let mut state = self.state.lock().await;
        let previous = state.operations.clone();
        state.operations.retain(|op| op.status != OperationStatus::Failed);
        let removed = previous.len() - state.operations.len();
        if removed == 0 {
            return Ok(0);
        }

        if let Err(e) = self.persist(&state) {
            state.operations = previous;
            return Err(e);
        }
        self.write_metadata(None, state.operations.len())?;
        log::info!("Cleared {} failed operations", removed);
        Ok(removed)
    }

    /// Drop the whole queue.
    pub async fn clear_sync_queue(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let cleared = QueueState::default();
        store_json(self.kv.as_ref(), QUEUE_KEY, &cleared)
            .map_err(|e| eyre!(SyncError::Persistence(format!("{:#}", e))))?;
        *state = cleared;
        self.write_metadata(None, 0)?;
        log::info!("Sync queue cleared");
        Ok(())
    }

    /// The remote id for a chore, following local id mappings.
    pub async fn resolve_chore_id(&self, id: &str) -> String {
        resolve_id(&self.state.lock().await.id_map, id)
    }

    /// Store a fresh remote snapshot, overlaying operations that have not synced yet.
    pub async fn cache_chores(&self, snapshot: Vec<Chore>) -> Result<Vec<Chore>> {
        let state = self.state.lock().await;
        let mut chores = snapshot;
        for op in state.operations.iter().filter(|op| op.status != OperationStatus::Failed) {
            apply_optimistic(&mut chores, &op.payload, &state.id_map, op.enqueued_at);
        }
        store_json(self.kv.as_ref(), CHORES_KEY, &chores)?;
        Ok(chores)
    }

    /// The device's chore snapshot; empty if nothing has been cached.
    pub fn cached_chores(&self) -> Result<Vec<Chore>> {
        Ok(load_json(self.kv.as_ref(), CHORES_KEY)?.unwrap_or_default())
    }
}

fn remap_chores(chores: &mut [Chore], remapped: &[(String, String)]) {
    for chore in chores.iter_mut() {
        for (local, remote) in remapped {
            if chore.id == *local {
                chore.id = remote.clone();
            }
            for dep in chore.dependencies.iter_mut() {
                if dep == local {
                    *dep = remote.clone();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::CLIENT_OP_ID_FIELD;
    use crate::types::{ChoreDraft, ChorePatch};
    use chrono::Duration;

    fn op(payload: OperationPayload) -> QueuedOperation {
        QueuedOperation::new("op-0000000001", payload, Utc::now())
    }

    #[test]
    fn test_prepare_create_carries_client_op_id_and_resolves_deps() {
        let mut id_map = BTreeMap::new();
        id_map.insert("local-aaaaaaaaaa".to_string(), "ch-0000000001".to_string());
        let draft = ChoreDraft::new("Hang shelf").with_dependencies(["local-aaaaaaaaaa", "ch-0000000002"]);

        let call = prepare_call(&op(OperationPayload::CreateChore { draft }), &id_map).unwrap();
        let RemoteCall::Create(fields) = call else {
            panic!("expected create");
        };
        assert_eq!(fields[CLIENT_OP_ID_FIELD], "op-0000000001");
        assert_eq!(fields["dependencies"], serde_json::json!(["ch-0000000001", "ch-0000000002"]));
        assert!(!fields.contains_key("localId"));
    }

    #[test]
    fn test_prepare_rejects_unmapped_local_target() {
        let payload = OperationPayload::DeleteChore {
            chore_id: "local-bbbbbbbbbb".to_string(),
        };
        let err = prepare_call(&op(payload), &BTreeMap::new()).unwrap_err();
        assert!(err.contains("local-bbbbbbbbbb"));
    }

    #[test]
    fn test_prepare_complete_maps_to_update() {
        let mut id_map = BTreeMap::new();
        id_map.insert("local-cccccccccc".to_string(), "ch-0000000003".to_string());
        let payload = OperationPayload::CompleteChore {
            chore_id: "local-cccccccccc".to_string(),
            completed_at: Utc::now(),
            completed_by: Some("u-sam".to_string()),
        };
        match prepare_call(&op(payload), &id_map).unwrap() {
            RemoteCall::Update { id, fields } => {
                assert_eq!(id, "ch-0000000003");
                assert!(fields.contains_key("completedAt"));
                assert_eq!(fields["completedBy"], "u-sam");
            }
            other => panic!("unexpected call {:?}", other),
        }
    }

    #[test]
    fn test_optimistic_create_then_complete() {
        let draft = ChoreDraft::new("Sweep porch");
        let local = draft.local_id.clone();
        let now = Utc::now();
        let id_map = BTreeMap::new();
        let mut chores = Vec::new();

        apply_optimistic(&mut chores, &OperationPayload::CreateChore { draft: draft.clone() }, &id_map, now);
        apply_optimistic(&mut chores, &OperationPayload::CreateChore { draft }, &id_map, now);
        assert_eq!(chores.len(), 1);

        let later = now + Duration::seconds(5);
        let complete = OperationPayload::CompleteChore {
            chore_id: local.clone(),
            completed_at: later,
            completed_by: None,
        };
        apply_optimistic(&mut chores, &complete, &id_map, later);
        assert_eq!(chores[0].completed_at, Some(later));
        assert_eq!(chores[0].updated_at, later);
    }

    #[test]
    fn test_optimistic_update_and_delete() {
        let now = Utc::now();
        let id_map = BTreeMap::new();
        let mut chores = vec![ChoreDraft::new("Mow lawn").to_chore("ch-0000000001", now)];

        let patch = ChorePatch {
            title: Some("Mow front lawn".to_string()),
            ..ChorePatch::default()
        };
        let update = OperationPayload::UpdateChore {
            chore_id: "ch-0000000001".to_string(),
            patch,
        };
        apply_optimistic(&mut chores, &update, &id_map, now);
        assert_eq!(chores[0].title, "Mow front lawn");

        let delete = OperationPayload::DeleteChore {
            chore_id: "ch-0000000001".to_string(),
        };
        apply_optimistic(&mut chores, &delete, &id_map, now);
        assert!(chores.is_empty());
    }

    #[test]
    fn test_remap_rewrites_ids_and_dependencies() {
        let now = Utc::now();
        let mut chores = vec![
            ChoreDraft::new("Buy paint").to_chore("local-dddddddddd", now),
            ChoreDraft::new("Paint fence")
                .with_dependencies(["local-dddddddddd"])
                .to_chore("ch-0000000009", now),
        ];
        remap_chores(&mut chores, &[("local-dddddddddd".to_string(), "ch-0000000008".to_string())]);
        assert_eq!(chores[0].id, "ch-0000000008");
        assert_eq!(chores[1].dependencies, vec!["ch-0000000008"]);
    }

    #[test]
    fn test_validate_payload_rejects_empty_patch() {
        let payload = OperationPayload::UpdateChore {
            chore_id: "ch-0000000001".to_string(),
            patch: ChorePatch::default(),
        };
        assert!(matches!(
            validate_payload(&payload),
            Err(SyncError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_validate_payload_rejects_bad_draft() {
        let payload = OperationPayload::CreateChore {
            draft: ChoreDraft::new(""),
        };
        assert!(validate_payload(&payload).is_err());
    }
}
