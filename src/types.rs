//! Core data types for chorekeeper.

use crate::id::{LOCAL_CHORE_PREFIX, generate_id, is_local_id};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use thiserror::Error;

/// Canonical timestamp. Every wire shape is normalized into this at the decode boundary.
pub type Timestamp = DateTime<Utc>;

/// Maximum title length in characters.
pub const MAX_TITLE_LEN: usize = 100;

/// Maximum description length in characters.
pub const MAX_DESCRIPTION_LEN: usize = 500;

/// A household chore.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Chore {
    /// Remote id, or a `local-` id for chores created offline and not yet synced
    pub id: String,

    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// `Some("")` is an explicit "unassigned", distinct from `None`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<Timestamp>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    /// Prerequisite chore ids
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,

    /// Advisory only
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub blocks_others: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Timestamp>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_by: Option<String>,

    pub created_at: Timestamp,

    pub updated_at: Timestamp,

    #[serde(default)]
    pub priority: Priority,

    #[serde(default)]
    pub is_recurring: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence_pattern: Option<Recurrence>,
}

impl Chore {
    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Unassigned covers both an absent assignee and the empty-string marker.
    pub fn is_unassigned(&self) -> bool {
        self.assignee_id.as_deref().is_none_or(str::is_empty)
    }

    /// True for chores created offline whose create has not reached the remote yet.
    pub fn is_local(&self) -> bool {
        is_local_id(&self.id)
    }

    /// Validate the chore's fields.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_title(&self.title)?;
        validate_description(self.description.as_deref())?;

        if self.updated_at < self.created_at {
            return Err(ValidationError::InvalidTimestamp);
        }

        if !self.id.is_empty() && self.dependencies.iter().any(|d| d == &self.id) {
            return Err(ValidationError::SelfDependency);
        }

        Ok(())
    }
}

fn validate_title(title: &str) -> Result<(), ValidationError> {
    if title.trim().is_empty() {
        return Err(ValidationError::EmptyTitle);
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(ValidationError::TitleTooLong);
    }
    if title.chars().any(|c| c.is_control()) {
        return Err(ValidationError::InvalidCharacters);
    }
    Ok(())
}

fn validate_description(description: Option<&str>) -> Result<(), ValidationError> {
    match description {
        Some(d) if d.chars().count() > MAX_DESCRIPTION_LEN => Err(ValidationError::DescriptionTooLong),
        _ => Ok(()),
    }
}

/// Chore priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }

    /// Parse the wire representation; unknown values yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Priority::Low),
            "medium" => Some(Priority::Medium),
            "high" => Some(Priority::High),
            _ => None,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recurrence cadence for recurring chores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Recurrence {
    Daily,
    Weekly,
    Monthly,
}

impl Recurrence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recurrence::Daily => "daily",
            Recurrence::Weekly => "weekly",
            Recurrence::Monthly => "monthly",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Some(Recurrence::Daily),
            "weekly" => Some(Recurrence::Weekly),
            "monthly" => Some(Recurrence::Monthly),
            _ => None,
        }
    }
}

impl fmt::Display for Recurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields supplied when creating a chore.
///
/// A draft carries a device-local id so that operations queued after the
/// create can reference the chore before the remote has assigned its id.
///
/// ```ignore
/// let draft = ChoreDraft::new("Take out the trash")
///     .with_priority(Priority::High)
///     .with_assignee("u-alex", Some("Alex"))
///     .with_dependencies(["ch-0000000001"]);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChoreDraft {
    pub local_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub is_recurring: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence_pattern: Option<Recurrence>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub blocks_others: bool,
}

impl ChoreDraft {
    /// Create a draft with just a title and a fresh local id.
    pub fn new(title: impl Into<String>) -> Self {
        let title = title.into();
        let local_id = generate_id(LOCAL_CHORE_PREFIX, &title, Utc::now());
        Self {
            local_id,
            title,
            description: None,
            assignee_id: None,
            assignee_name: None,
            due_date: None,
            category: None,
            priority: Priority::default(),
            is_recurring: false,
            recurrence_pattern: None,
            dependencies: Vec::new(),
            blocks_others: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_assignee(mut self, assignee_id: impl Into<String>, assignee_name: Option<&str>) -> Self {
        self.assignee_id = Some(assignee_id.into());
        self.assignee_name = assignee_name.map(String::from);
        self
    }

    pub fn with_due_date(mut self, due_date: Timestamp) -> Self {
        self.due_date = Some(due_date);
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Mark as recurring with the given cadence.
    pub fn recurring(mut self, pattern: Recurrence) -> Self {
        self.is_recurring = true;
        self.recurrence_pattern = Some(pattern);
        self
    }

    pub fn with_dependencies(mut self, dependencies: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.dependencies = dependencies.into_iter().map(|d| d.into()).collect();
        self
    }

    pub fn blocking_others(mut self, blocks: bool) -> Self {
        self.blocks_others = blocks;
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_title(&self.title)?;
        validate_description(self.description.as_deref())?;
        if self.dependencies.iter().any(|d| d == &self.local_id) {
            return Err(ValidationError::SelfDependency);
        }
        Ok(())
    }

    /// Materialize the draft as a pending chore with the given id.
    pub fn to_chore(&self, id: impl Into<String>, now: Timestamp) -> Chore {
        Chore {
            id: id.into(),
            title: self.title.clone(),
            description: self.description.clone(),
            assignee_id: self.assignee_id.clone(),
            assignee_name: self.assignee_name.clone(),
            due_date: self.due_date,
            category: self.category.clone(),
            dependencies: self.dependencies.clone(),
            blocks_others: self.blocks_others,
            completed_at: None,
            completed_by: None,
            created_at: now,
            updated_at: now,
            priority: self.priority,
            is_recurring: self.is_recurring,
            recurrence_pattern: self.recurrence_pattern,
        }
    }
}

/// Partial update to a chore.
///
/// Outer `None` leaves a field alone; `Some(None)` clears an optional field.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChorePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub assignee_name: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub due_date: Option<Option<Timestamp>>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub category: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_recurring: Option<bool>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub recurrence_pattern: Option<Option<Recurrence>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocks_others: Option<bool>,
}

/// Present-but-null must deserialize to `Some(None)`, not `None`.
fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

impl ChorePatch {
    pub fn is_empty(&self) -> bool {
        *self == ChorePatch::default()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(title) = &self.title {
            validate_title(title)?;
        }
        if let Some(description) = &self.description {
            validate_description(description.as_deref())?;
        }
        Ok(())
    }

    /// Apply the patch to a chore in place, bumping `updated_at`.
    pub fn apply_to(&self, chore: &mut Chore, now: Timestamp) {
        if let Some(title) = &self.title {
            chore.title = title.clone();
        }
        if let Some(description) = &self.description {
            chore.description = description.clone();
        }
        if let Some(assignee_id) = &self.assignee_id {
            chore.assignee_id = assignee_id.clone();
        }
        if let Some(assignee_name) = &self.assignee_name {
            chore.assignee_name = assignee_name.clone();
        }
        if let Some(due_date) = self.due_date {
            chore.due_date = due_date;
        }
        if let Some(category) = &self.category {
            chore.category = category.clone();
        }
        if let Some(priority) = self.priority {
            chore.priority = priority;
        }
        if let Some(is_recurring) = self.is_recurring {
            chore.is_recurring = is_recurring;
        }
        if let Some(pattern) = self.recurrence_pattern {
            chore.recurrence_pattern = pattern;
        }
        if let Some(dependencies) = &self.dependencies {
            chore.dependencies = dependencies.clone();
        }
        if let Some(blocks) = self.blocks_others {
            chore.blocks_others = blocks;
        }
        chore.updated_at = now.max(chore.updated_at);
    }
}

/// Kinds of mutation that can be queued while offline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    CreateChore,
    CompleteChore,
    UpdateChore,
    DeleteChore,
    ClaimChore,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationKind::CreateChore => "create",
            OperationKind::CompleteChore => "complete",
            OperationKind::UpdateChore => "update",
            OperationKind::DeleteChore => "delete",
            OperationKind::ClaimChore => "claim",
        };
        f.write_str(s)
    }
}

/// Kind-specific data for a queued operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum OperationPayload {
    CreateChore {
        draft: ChoreDraft,
    },
    CompleteChore {
        chore_id: String,
        completed_at: Timestamp,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        completed_by: Option<String>,
    },
    UpdateChore {
        chore_id: String,
        patch: ChorePatch,
    },
    DeleteChore {
        chore_id: String,
    },
    ClaimChore {
        chore_id: String,
        assignee_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        assignee_name: Option<String>,
    },
}

impl OperationPayload {
    pub fn kind(&self) -> OperationKind {
        match self {
            OperationPayload::CreateChore { .. } => OperationKind::CreateChore,
            OperationPayload::CompleteChore { .. } => OperationKind::CompleteChore,
            OperationPayload::UpdateChore { .. } => OperationKind::UpdateChore,
            OperationPayload::DeleteChore { .. } => OperationKind::DeleteChore,
            OperationPayload::ClaimChore { .. } => OperationKind::ClaimChore,
        }
    }

    /// The chore this operation acts on: the draft's local id for creates.
    pub fn chore_key(&self) -> &str {
        match self {
            OperationPayload::CreateChore { draft } => &draft.local_id,
            OperationPayload::CompleteChore { chore_id, .. }
            | OperationPayload::UpdateChore { chore_id, .. }
            | OperationPayload::DeleteChore { chore_id }
            | OperationPayload::ClaimChore { chore_id, .. } => chore_id,
        }
    }

    /// Every chore id the payload mentions, including dependency references.
    pub fn referenced_ids(&self) -> Vec<&str> {
        let mut ids = vec![self.chore_key()];
        match self {
            OperationPayload::CreateChore { draft } => {
                ids.extend(draft.dependencies.iter().map(String::as_str));
            }
            OperationPayload::UpdateChore { patch, .. } => {
                if let Some(deps) = &patch.dependencies {
                    ids.extend(deps.iter().map(String::as_str));
                }
            }
            _ => {}
        }
        ids
    }
}

/// Lifecycle state of a queued operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    InFlight,
    Applied,
    Failed,
}

/// A mutation captured while offline, awaiting remote application.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueuedOperation {
    pub operation_id: String,
    pub kind: OperationKind,
    pub payload: OperationPayload,
    pub enqueued_at: Timestamp,
    pub status: OperationStatus,

    /// Remote apply attempts made so far
    #[serde(default)]
    pub attempts: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<Timestamp>,
}

impl QueuedOperation {
    pub fn new(operation_id: impl Into<String>, payload: OperationPayload, enqueued_at: Timestamp) -> Self {
        Self {
            operation_id: operation_id.into(),
            kind: payload.kind(),
            payload,
            enqueued_at,
            status: OperationStatus::Pending,
            attempts: 0,
            last_error: None,
            failed_at: None,
        }
    }
}

/// Per-device sync bookkeeping, consumed by status indicators.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncMetadata {
    pub last_sync: Option<Timestamp>,
    pub pending_count: usize,
}

/// Snapshot for the offline status display.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OfflineSummary {
    pub total_chores: usize,
    pub pending_chores: usize,
    pub last_sync: Option<Timestamp>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub pending: usize,
    pub last_sync: Option<Timestamp>,
}

/// Validation errors for chores.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("title cannot be empty")]
    EmptyTitle,
    #[error("title exceeds 100 characters")]
    TitleTooLong,
    #[error("title contains control characters")]
    InvalidCharacters,
    #[error("description exceeds 500 characters")]
    DescriptionTooLong,
    #[error("updatedAt cannot be before createdAt")]
    InvalidTimestamp,
    #[error("a chore cannot depend on itself")]
    SelfDependency,
}
