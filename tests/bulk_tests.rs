//! Integration tests for bulk actions on the offline queue.

mod common;

use chorekeeper::{ChoreDraft, ChorePatch, OperationKind, Priority, SyncBulkExt, SyncError, SyncTrigger};
use chrono::Utc;
use common::{Call, TestEnv};

fn ids(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

// =============================================================================
// Bulk Complete
// =============================================================================

#[tokio::test]
async fn test_bulk_complete_orders_prerequisites_first() {
    let env = TestEnv::offline();
    let wash = env.queue_create("Wash dishes").await;
    let dry = env
        .queue_draft(ChoreDraft::new("Dry dishes").with_dependencies([wash.clone()]))
        .await;
    let chores = env.snapshot().await;

    let result = env
        .sync
        .bulk_complete(&ids(&[&dry, &wash]), &chores, Some("u-kim"), Utc::now())
        .await
        .unwrap();

    let targets: Vec<&str> = result.queued.iter().map(|op| op.payload.chore_key()).collect();
    assert_eq!(targets, vec![wash.as_str(), dry.as_str()]);
    assert!(result.skipped.is_empty());

    env.remote.set_online(true);
    let report = env.sync.process_queued_actions(SyncTrigger::Reconnected).await.unwrap();
    assert_eq!(report.applied, 4);
    assert!(env.remote.chores().iter().all(|c| c.is_completed()));
}

#[tokio::test]
async fn test_bulk_complete_skips_blocked_and_completed() {
    let env = TestEnv::offline();
    let paint = env.queue_create("Buy paint").await;
    let wall = env
        .queue_draft(ChoreDraft::new("Paint wall").with_dependencies([paint.clone()]))
        .await;
    let sweep = env.queue_create("Sweep").await;
    env.queue_complete(&sweep).await;
    let chores = env.snapshot().await;
    let before = env.queue_len().await;

    let result = env
        .sync
        .bulk_complete(&ids(&[&wall, &sweep, "ch-missing0001", &wall]), &chores, None, Utc::now())
        .await
        .unwrap();

    assert!(result.queued.is_empty());
    assert_eq!(result.not_found, vec!["ch-missing0001"]);
    assert_eq!(result.skipped.len(), 2);
    assert!(result.skipped.iter().any(|(id, reason)| id == &wall && reason.contains("Buy paint")));
    assert!(result.skipped.iter().any(|(id, reason)| id == &sweep && reason.contains("already completed")));
    assert_eq!(env.queue_len().await, before);
}

// =============================================================================
// Assign, Delete, Update
// =============================================================================

#[tokio::test]
async fn test_bulk_assign_and_delete_follow_local_ids() {
    let env = TestEnv::offline();
    let bins = env.queue_create("Take out bins").await;
    let mail = env.queue_create("Sort mail").await;
    let seeded = env.remote.seed("Water plants");
    let chores = env.snapshot().await;

    let assigned = env
        .sync
        .bulk_assign(&ids(&[&bins, &mail]), &chores, "u-sam", Some("Sam"))
        .await
        .unwrap();
    assert_eq!(assigned.queued.len(), 2);
    assert!(assigned.queued.iter().all(|op| op.kind == OperationKind::ClaimChore));

    let deleted = env.sync.bulk_delete(&ids(&[&seeded]), &chores).await.unwrap();
    assert_eq!(deleted.queued.len(), 1);

    env.remote.set_online(true);
    let report = env.sync.process_queued_actions(SyncTrigger::Reconnected).await.unwrap();
    assert_eq!(report.applied, 5);
    assert_eq!(report.remaining, 0);

    let remaining = env.remote.chores();
    assert_eq!(remaining.len(), 2);
    assert!(remaining.iter().all(|c| c.assignee_id.as_deref() == Some("u-sam")));
    assert!(env.remote.calls().contains(&Call::Delete { id: seeded }));
}

#[tokio::test]
async fn test_bulk_assign_requires_assignee() {
    let env = TestEnv::new();
    let id = env.remote.seed("Feed fish");
    let chores = env.snapshot().await;

    let err = env.sync.bulk_assign(&ids(&[&id]), &chores, "", None).await.unwrap_err();
    assert!(matches!(err.downcast_ref::<SyncError>(), Some(SyncError::InvalidOperation(_))));
    assert_eq!(env.queue_len().await, 0);
}

#[tokio::test]
async fn test_bulk_update_applies_patch_to_each_chore() {
    let env = TestEnv::new();
    let a = env.remote.seed("Vacuum stairs");
    let b = env.remote.seed("Vacuum hall");
    let chores = env.snapshot().await;

    let patch = ChorePatch {
        priority: Some(Priority::High),
        ..ChorePatch::default()
    };
    let result = env.sync.bulk_update(&ids(&[&a, &b]), &chores, &patch).await.unwrap();
    assert_eq!(result.queued.len(), 2);

    env.sync.process_queued_actions(SyncTrigger::Manual).await.unwrap();
    assert!(env.remote.chores().iter().all(|c| c.priority == Priority::High));
}

#[tokio::test]
async fn test_bulk_update_skips_chore_that_would_cycle() {
    let env = TestEnv::offline();
    let first = env.queue_create("Strip bed").await;
    let second = env
        .queue_draft(ChoreDraft::new("Wash sheets").with_dependencies([first.clone()]))
        .await;
    let third = env.queue_create("Make bed").await;
    let chores = env.snapshot().await;

    let patch = ChorePatch {
        dependencies: Some(vec![second.clone()]),
        ..ChorePatch::default()
    };
    let result = env
        .sync
        .bulk_update(&ids(&[&first, &third]), &chores, &patch)
        .await
        .unwrap();

    assert_eq!(result.queued.len(), 1);
    assert_eq!(result.queued[0].payload.chore_key(), third);
    assert_eq!(result.skipped.len(), 1);
    assert_eq!(result.skipped[0].0, first);
}

#[tokio::test]
async fn test_bulk_update_rejects_empty_patch() {
    let env = TestEnv::new();
    let id = env.remote.seed("Dust shelves");
    let chores = env.snapshot().await;

    let err = env
        .sync
        .bulk_update(&ids(&[&id]), &chores, &ChorePatch::default())
        .await
        .unwrap_err();
    assert!(matches!(err.downcast_ref::<SyncError>(), Some(SyncError::InvalidOperation(_))));
}
