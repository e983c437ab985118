//! Dependency evaluation over a chore snapshot.
//!
//! A chore's `dependencies` list its prerequisites: chores that must be
//! completed before it may be. Every function here is a pure read over a
//! snapshot slice and never fails. Dependency ids that do not resolve against
//! the snapshot are ignored, since the referenced chore may have been deleted.

use crate::types::Chore;
use std::collections::HashSet;
use thiserror::Error;

/// Completion state derived from a chore and its snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChoreState {
    /// At least one resolvable dependency is still pending.
    Blocked,
    /// Every resolvable dependency is complete.
    Completable,
    /// The chore itself has been completed.
    Completed,
}

/// A completion attempt that the dependency graph does not authorize.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompletionBlocked {
    #[error("cannot complete \"{title}\" - waiting for: {}", .pending.join(", "))]
    WaitingOn {
        chore_id: String,
        title: String,
        /// Titles of the dependencies still pending
        pending: Vec<String>,
    },
    #[error("\"{title}\" is already completed")]
    AlreadyCompleted { chore_id: String, title: String },
}

/// A dependency edit rejected at write time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DependencyError {
    #[error("chore {chore_id} cannot depend on itself")]
    SelfDependency { chore_id: String },
    #[error("making {chore_id} depend on {dependency_id} would create a cycle")]
    CycleDetected { chore_id: String, dependency_id: String },
}

fn find<'a>(all_chores: &'a [Chore], id: &str) -> Option<&'a Chore> {
    if id.is_empty() {
        return None;
    }
    all_chores.iter().find(|c| c.id == id)
}

/// Resolve a chore's dependency ids against the snapshot, in declaration order.
///
/// Unresolved ids are dropped, as are duplicates and self references.
pub fn get_dependencies<'a>(chore: &Chore, all_chores: &'a [Chore]) -> Vec<&'a Chore> {
    let mut seen = HashSet::new();
    chore
        .dependencies
        .iter()
        .filter(|id| **id != chore.id && seen.insert(id.as_str()))
        .filter_map(|id| find(all_chores, id))
        .collect()
}

/// True iff every resolvable dependency has been completed.
pub fn can_complete_chore(chore: &Chore, all_chores: &[Chore]) -> bool {
    get_dependencies(chore, all_chores).iter().all(|dep| dep.is_completed())
}

/// Resolved dependencies that are still pending.
pub fn pending_dependencies<'a>(chore: &Chore, all_chores: &'a [Chore]) -> Vec<&'a Chore> {
    get_dependencies(chore, all_chores)
        .into_iter()
        .filter(|dep| !dep.is_completed())
        .collect()
}

pub fn chore_state(chore: &Chore, all_chores: &[Chore]) -> ChoreState {
    if chore.is_completed() {
        ChoreState::Completed
    } else if can_complete_chore(chore, all_chores) {
        ChoreState::Completable
    } else {
        ChoreState::Blocked
    }
}

/// Authorize the Completable -> Completed transition.
pub fn check_completion(chore: &Chore, all_chores: &[Chore]) -> Result<(), CompletionBlocked> {
    if chore.is_completed() {
        return Err(CompletionBlocked::AlreadyCompleted {
            chore_id: chore.id.clone(),
            title: chore.title.clone(),
        });
    }

    let pending = pending_dependencies(chore, all_chores);
    if pending.is_empty() {
        return Ok(());
    }

    Err(CompletionBlocked::WaitingOn {
        chore_id: chore.id.clone(),
        title: chore.title.clone(),
        pending: pending.iter().map(|dep| dep.title.clone()).collect(),
    })
}

/// Chores that list `chore_id` as a prerequisite. Full scan; there is no reverse index.
pub fn dependents<'a>(chore_id: &str, all_chores: &'a [Chore]) -> Vec<&'a Chore> {
    all_chores
        .iter()
        .filter(|c| c.id != chore_id && c.dependencies.iter().any(|d| d == chore_id))
        .collect()
}

/// Pending chores whose dependencies are all met.
pub fn completable_chores(all_chores: &[Chore]) -> Vec<&Chore> {
    all_chores
        .iter()
        .filter(|c| !c.is_completed() && can_complete_chore(c, all_chores))
        .collect()
}

/// Check whether adding the edge `chore_id -> dependency_id` would close a cycle.
pub fn would_create_cycle(chore_id: &str, dependency_id: &str, all_chores: &[Chore]) -> bool {
    // DFS from the new prerequisite; reaching chore_id means the edge closes a loop
    let mut visited = HashSet::new();
    let mut stack = vec![dependency_id];

    while let Some(node) = stack.pop() {
        if node == chore_id {
            return true;
        }
        if visited.insert(node)
            && let Some(chore) = find(all_chores, node)
        {
            stack.extend(chore.dependencies.iter().map(String::as_str));
        }
    }

    false
}

/// Write-time validation of a chore's proposed dependency set.
pub fn validate_dependencies(chore_id: &str, proposed: &[String], all_chores: &[Chore]) -> Result<(), DependencyError> {
    if proposed.iter().any(|d| d == chore_id) {
        return Err(DependencyError::SelfDependency {
            chore_id: chore_id.to_string(),
        });
    }

    for dependency_id in proposed {
        if would_create_cycle(chore_id, dependency_id, all_chores) {
            return Err(DependencyError::CycleDetected {
                chore_id: chore_id.to_string(),
                dependency_id: dependency_id.clone(),
            });
        }
    }

    Ok(())
}
