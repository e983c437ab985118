//! Bulk actions over many chores.
//!
//! A bulk action queues one operation per chore, so each chore drains,
//! fails and retries on its own. Nothing is sent to the remote here.

use crate::graph::{CompletionBlocked, check_completion, validate_dependencies};
use crate::sync::{OfflineSync, SyncError};
use crate::types::{Chore, ChorePatch, OperationPayload, Priority, QueuedOperation, Timestamp};
use async_trait::async_trait;
use eyre::{Result, eyre};
use std::collections::HashSet;

/// Result of a bulk action.
#[derive(Debug, Default)]
pub struct BulkResult {
    /// Operations queued, in queue order.
    pub queued: Vec<QueuedOperation>,
    /// IDs that matched no chore in the snapshot.
    pub not_found: Vec<String>,
    /// Chores left alone (id, reason).
    pub skipped: Vec<(String, String)>,
}

/// Counts over a selection of chores.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkStats {
    pub total: usize,
    pub completed: usize,
    pub pending: usize,
    pub overdue: usize,
    pub unassigned: usize,
    pub high_priority: usize,
    pub medium_priority: usize,
    pub low_priority: usize,
}

/// Extension trait for bulk actions on the offline queue.
///
/// Every method takes the caller's current chore snapshot; ids may be
/// device-local ids of chores that have not synced yet.
#[async_trait]
pub trait SyncBulkExt {
    /// Complete several chores. Each completion is gated on its prerequisites,
    /// counting prerequisites completed earlier in the same call.
    async fn bulk_complete(
        &self,
        chore_ids: &[String],
        chores: &[Chore],
        completed_by: Option<&str>,
        completed_at: Timestamp,
    ) -> Result<BulkResult>;

    async fn bulk_delete(&self, chore_ids: &[String], chores: &[Chore]) -> Result<BulkResult>;

    /// Assign several chores to one user.
    async fn bulk_assign(
        &self,
        chore_ids: &[String],
        chores: &[Chore],
        assignee_id: &str,
        assignee_name: Option<&str>,
    ) -> Result<BulkResult>;

    /// Apply the same patch to several chores. A dependency change that would
    /// close a cycle skips that chore.
    async fn bulk_update(&self, chore_ids: &[String], chores: &[Chore], patch: &ChorePatch) -> Result<BulkResult>;
}

/// Resolve ids against the snapshot: (index into the snapshot) per distinct chore.
async fn select(sync: &OfflineSync, chore_ids: &[String], chores: &[Chore], result: &mut BulkResult) -> Vec<usize> {
    let mut seen = HashSet::new();
    let mut selected = Vec::new();
    for id in chore_ids {
        let resolved = sync.resolve_chore_id(id).await;
        match chores.iter().position(|c| c.id == resolved) {
            Some(index) if seen.insert(index) => selected.push(index),
            Some(_) => log::debug!("Chore {} listed twice, ignoring repeat", id),
            None => result.not_found.push(id.clone()),
        }
    }
    selected
}

/// Queue one payload; an invalid payload is recorded as skipped.
async fn queue(sync: &OfflineSync, chore_id: &str, payload: OperationPayload, result: &mut BulkResult) -> Result<bool> {
    match sync.queue_action(payload).await {
        Ok(op) => {
            result.queued.push(op);
            Ok(true)
        }
        Err(e) => match e.downcast_ref::<SyncError>() {
            Some(SyncError::InvalidOperation(reason)) => {
                result.skipped.push((chore_id.to_string(), reason.clone()));
                Ok(false)
            }
            _ => Err(e),
        },
    }
}

#[async_trait]
impl SyncBulkExt for OfflineSync {
    async fn bulk_complete(
        &self,
        chore_ids: &[String],
        chores: &[Chore],
        completed_by: Option<&str>,
        completed_at: Timestamp,
    ) -> Result<BulkResult> {
        let mut result = BulkResult::default();
        let mut waiting = select(self, chore_ids, chores, &mut result).await;
        let mut working = chores.to_vec();

        // Rounds until nothing more unblocks, so selection order does not matter
        loop {
            let mut progressed = false;
            let mut still_waiting = Vec::new();

            for index in waiting {
                match check_completion(&working[index], &working) {
                    Ok(()) => {
                        let chore_id = working[index].id.clone();
                        let payload = OperationPayload::CompleteChore {
                            chore_id: chore_id.clone(),
                            completed_at,
                            completed_by: completed_by.map(str::to_string),
                        };
                        if queue(self, &chore_id, payload, &mut result).await? {
                            working[index].completed_at = Some(completed_at);
                            progressed = true;
                        }
                    }
                    Err(CompletionBlocked::AlreadyCompleted { chore_id, .. }) => {
                        result.skipped.push((chore_id, "already completed".to_string()));
                    }
                    Err(CompletionBlocked::WaitingOn { .. }) => still_waiting.push(index),
                }
            }

            waiting = still_waiting;
            if !progressed || waiting.is_empty() {
                break;
            }
        }

        for index in waiting {
            if let Err(e) = check_completion(&working[index], &working) {
                result.skipped.push((working[index].id.clone(), e.to_string()));
            }
        }

        log::info!(
            "Bulk complete: {} queued, {} skipped, {} not found",
            result.queued.len(),
            result.skipped.len(),
            result.not_found.len()
        );
        Ok(result)
    }

    async fn bulk_delete(&self, chore_ids: &[String], chores: &[Chore]) -> Result<BulkResult> {
        let mut result = BulkResult::default();
        for index in select(self, chore_ids, chores, &mut result).await {
            let chore_id = chores[index].id.clone();
            let payload = OperationPayload::DeleteChore {
                chore_id: chore_id.clone(),
            };
            queue(self, &chore_id, payload, &mut result).await?;
        }
        log::info!("Bulk delete: {} queued", result.queued.len());
        Ok(result)
    }

    async fn bulk_assign(
        &self,
        chore_ids: &[String],
        chores: &[Chore],
        assignee_id: &str,
        assignee_name: Option<&str>,
    ) -> Result<BulkResult> {
        if assignee_id.is_empty() {
            return Err(eyre!(SyncError::InvalidOperation("missing assignee".to_string())));
        }

        let mut result = BulkResult::default();
        for index in select(self, chore_ids, chores, &mut result).await {
            let chore_id = chores[index].id.clone();
            let payload = OperationPayload::ClaimChore {
                chore_id: chore_id.clone(),
                assignee_id: assignee_id.to_string(),
                assignee_name: assignee_name.map(str::to_string),
            };
            queue(self, &chore_id, payload, &mut result).await?;
        }
        log::info!("Bulk assign to {}: {} queued", assignee_id, result.queued.len());
        Ok(result)
    }

    async fn bulk_update(&self, chore_ids: &[String], chores: &[Chore], patch: &ChorePatch) -> Result<BulkResult> {
        if patch.is_empty() {
            return Err(eyre!(SyncError::InvalidOperation("update changes nothing".to_string())));
        }
        patch
            .validate()
            .map_err(|e| eyre!(SyncError::InvalidOperation(e.to_string())))?;

        let mut result = BulkResult::default();
        let mut working = chores.to_vec();
        for index in select(self, chore_ids, chores, &mut result).await {
            let chore_id = working[index].id.clone();
            if let Some(deps) = &patch.dependencies {
                if let Err(e) = validate_dependencies(&chore_id, deps, &working) {
                    result.skipped.push((chore_id, e.to_string()));
                    continue;
                }
                working[index].dependencies = deps.clone();
            }

            let payload = OperationPayload::UpdateChore {
                chore_id: chore_id.clone(),
                patch: patch.clone(),
            };
            queue(self, &chore_id, payload, &mut result).await?;
        }
        log::info!("Bulk update: {} queued", result.queued.len());
        Ok(result)
    }
}

/// Summarize the selected chores; ids not in the snapshot are ignored.
pub fn bulk_stats(chores: &[Chore], selected: &[String], now: Timestamp) -> BulkStats {
    let mut stats = BulkStats::default();
    for chore in chores.iter().filter(|c| selected.contains(&c.id)) {
        stats.total += 1;
        if chore.is_completed() {
            stats.completed += 1;
        } else {
            stats.pending += 1;
            if chore.due_date.is_some_and(|due| now > due) {
                stats.overdue += 1;
            }
        }
        if chore.is_unassigned() {
            stats.unassigned += 1;
        }
        match chore.priority {
            Priority::High => stats.high_priority += 1,
            Priority::Medium => stats.medium_priority += 1,
            Priority::Low => stats.low_priority += 1,
        }
    }
    stats
}
