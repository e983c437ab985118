//! Boundary between loosely-typed remote documents and typed chores.
//!
//! Remote documents arrive as JSON maps whose timestamps may be remote
//! timestamp objects, RFC 3339 strings or epoch milliseconds. Everything is
//! normalized here; nothing past this module sees a raw document.

use crate::remote::Document;
use crate::types::{Chore, ChoreDraft, ChorePatch, Priority, Recurrence, Timestamp};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::HashSet;
use thiserror::Error;

/// Field carrying the idempotency key of the queued operation that created a document.
pub const CLIENT_OP_ID_FIELD: &str = "clientOpId";

/// A document that cannot be turned into a chore.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("document is not an object")]
    NotAnObject,
    #[error("missing or invalid field: {0}")]
    MissingField(&'static str),
}

/// Normalize any supported timestamp shape. Returns `None` for anything else.
pub fn decode_timestamp(value: &Value) -> Option<Timestamp> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => {
            let millis = match n.as_i64() {
                Some(i) => i,
                None => n.as_f64().filter(|f| f.is_finite())?.round() as i64,
            };
            DateTime::<Utc>::from_timestamp_millis(millis)
        }
        Value::Object(map) => {
            let seconds = map
                .get("seconds")
                .or_else(|| map.get("_seconds"))
                .and_then(Value::as_i64)?;
            let nanos = map
                .get("nanoseconds")
                .or_else(|| map.get("_nanoseconds"))
                .and_then(Value::as_u64)
                .unwrap_or(0);
            DateTime::<Utc>::from_timestamp(seconds, u32::try_from(nanos).ok()?)
        }
        _ => None,
    }
}

fn opt_string(fields: &Map<String, Value>, key: &str) -> Option<String> {
    fields.get(key).and_then(Value::as_str).map(String::from)
}

fn opt_timestamp(fields: &Map<String, Value>, key: &str) -> Option<Timestamp> {
    fields.get(key).and_then(decode_timestamp)
}

fn decode_dependencies(id: &str, value: Option<&Value>) -> Vec<String> {
    let Some(Value::Array(entries)) = value else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    entries
        .iter()
        .filter_map(Value::as_str)
        .filter(|dep| !dep.is_empty() && *dep != id)
        .filter(|dep| seen.insert(*dep))
        .map(String::from)
        .collect()
}

/// Decode a raw JSON document into a chore.
pub fn decode_chore(id: &str, document: &Value) -> Result<Chore, DecodeError> {
    let fields = document.as_object().ok_or(DecodeError::NotAnObject)?;
    decode_fields(id, fields)
}

/// Decode a document's field map into a chore.
///
/// Rejects a missing or blank title and a missing or unreadable `createdAt`.
/// Every other field falls back to a default when absent or malformed.
pub fn decode_fields(id: &str, fields: &Map<String, Value>) -> Result<Chore, DecodeError> {
    let title = fields
        .get("title")
        .and_then(Value::as_str)
        .filter(|t| !t.trim().is_empty())
        .ok_or(DecodeError::MissingField("title"))?
        .to_string();

    let created_at = opt_timestamp(fields, "createdAt").ok_or(DecodeError::MissingField("createdAt"))?;
    let updated_at = opt_timestamp(fields, "updatedAt")
        .filter(|u| *u >= created_at)
        .unwrap_or(created_at);

    Ok(Chore {
        id: id.to_string(),
        title,
        description: opt_string(fields, "description"),
        assignee_id: opt_string(fields, "assigneeId"),
        assignee_name: opt_string(fields, "assigneeName"),
        due_date: opt_timestamp(fields, "dueDate"),
        category: opt_string(fields, "category"),
        dependencies: decode_dependencies(id, fields.get("dependencies")),
        blocks_others: fields.get("blocksOthers").and_then(Value::as_bool).unwrap_or(false),
        completed_at: opt_timestamp(fields, "completedAt"),
        completed_by: opt_string(fields, "completedBy"),
        created_at,
        updated_at,
        priority: fields
            .get("priority")
            .and_then(Value::as_str)
            .and_then(Priority::parse)
            .unwrap_or_default(),
        is_recurring: fields.get("isRecurring").and_then(Value::as_bool).unwrap_or(false),
        recurrence_pattern: fields
            .get("recurrencePattern")
            .and_then(Value::as_str)
            .and_then(Recurrence::parse),
    })
}

/// Decode a listing, skipping documents that cannot be decoded.
pub fn decode_chores(documents: &[Document]) -> Vec<Chore> {
    documents
        .iter()
        .filter_map(|doc| match decode_fields(&doc.id, &doc.fields) {
            Ok(chore) => Some(chore),
            Err(e) => {
                log::warn!("Skipping undecodable chore document {}: {}", doc.id, e);
                None
            }
        })
        .collect()
}

fn timestamp_value(ts: Timestamp) -> Value {
    Value::String(ts.to_rfc3339())
}

fn nullable_string(value: &Option<String>) -> Value {
    value.clone().map(Value::String).unwrap_or(Value::Null)
}

fn string_array(values: &[String]) -> Value {
    Value::Array(values.iter().cloned().map(Value::String).collect())
}

/// Encode a draft as remote document fields. The local id stays on the device.
pub fn encode_draft(draft: &ChoreDraft, client_op_id: Option<&str>) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("title".into(), Value::String(draft.title.clone()));
    if let Some(description) = &draft.description {
        fields.insert("description".into(), Value::String(description.clone()));
    }
    if let Some(assignee_id) = &draft.assignee_id {
        fields.insert("assigneeId".into(), Value::String(assignee_id.clone()));
    }
    if let Some(assignee_name) = &draft.assignee_name {
        fields.insert("assigneeName".into(), Value::String(assignee_name.clone()));
    }
    if let Some(due_date) = draft.due_date {
        fields.insert("dueDate".into(), timestamp_value(due_date));
    }
    if let Some(category) = &draft.category {
        fields.insert("category".into(), Value::String(category.clone()));
    }
    fields.insert("priority".into(), Value::String(draft.priority.as_str().into()));
    fields.insert("isRecurring".into(), Value::Bool(draft.is_recurring));
    if let Some(pattern) = draft.recurrence_pattern {
        fields.insert("recurrencePattern".into(), Value::String(pattern.as_str().into()));
    }
    fields.insert("dependencies".into(), string_array(&draft.dependencies));
    fields.insert("blocksOthers".into(), Value::Bool(draft.blocks_others));
    if let Some(op_id) = client_op_id {
        fields.insert(CLIENT_OP_ID_FIELD.into(), Value::String(op_id.to_string()));
    }
    fields
}

/// Encode a patch as a partial field set; cleared fields become `null`.
pub fn encode_patch(patch: &ChorePatch) -> Map<String, Value> {
    let mut fields = Map::new();
    if let Some(title) = &patch.title {
        fields.insert("title".into(), Value::String(title.clone()));
    }
    if let Some(description) = &patch.description {
        fields.insert("description".into(), nullable_string(description));
    }
    if let Some(assignee_id) = &patch.assignee_id {
        fields.insert("assigneeId".into(), nullable_string(assignee_id));
    }
    if let Some(assignee_name) = &patch.assignee_name {
        fields.insert("assigneeName".into(), nullable_string(assignee_name));
    }
    if let Some(due_date) = patch.due_date {
        fields.insert("dueDate".into(), due_date.map(timestamp_value).unwrap_or(Value::Null));
    }
    if let Some(category) = &patch.category {
        fields.insert("category".into(), nullable_string(category));
    }
    if let Some(priority) = patch.priority {
        fields.insert("priority".into(), Value::String(priority.as_str().into()));
    }
    if let Some(is_recurring) = patch.is_recurring {
        fields.insert("isRecurring".into(), Value::Bool(is_recurring));
    }
    if let Some(pattern) = patch.recurrence_pattern {
        let value = pattern.map(|p| Value::String(p.as_str().into())).unwrap_or(Value::Null);
        fields.insert("recurrencePattern".into(), value);
    }
    if let Some(dependencies) = &patch.dependencies {
        fields.insert("dependencies".into(), string_array(dependencies));
    }
    if let Some(blocks) = patch.blocks_others {
        fields.insert("blocksOthers".into(), Value::Bool(blocks));
    }
    fields
}

/// Encode a completion as the partial field set applied to the chore.
pub fn encode_completion(completed_at: Timestamp, completed_by: Option<&str>) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("completedAt".into(), timestamp_value(completed_at));
    if let Some(user) = completed_by {
        fields.insert("completedBy".into(), Value::String(user.to_string()));
    }
    fields
}

/// Encode a claim as the partial field set applied to the chore.
pub fn encode_claim(assignee_id: &str, assignee_name: Option<&str>) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("assigneeId".into(), Value::String(assignee_id.to_string()));
    if let Some(name) = assignee_name {
        fields.insert("assigneeName".into(), Value::String(name.to_string()));
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn minimal(extra: Value) -> Value {
        let mut doc = json!({
            "title": "Sweep porch",
            "createdAt": "2024-03-01T08:00:00Z",
        });
        if let (Some(base), Value::Object(more)) = (doc.as_object_mut(), extra) {
            base.extend(more);
        }
        doc
    }

    #[test]
    fn test_timestamp_shapes_normalize_to_same_instant() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();

        assert_eq!(decode_timestamp(&json!("2024-03-01T08:00:00Z")), Some(expected));
        assert_eq!(decode_timestamp(&json!("2024-03-01T09:00:00+01:00")), Some(expected));
        assert_eq!(decode_timestamp(&json!(expected.timestamp_millis())), Some(expected));
        assert_eq!(
            decode_timestamp(&json!({"seconds": expected.timestamp(), "nanoseconds": 0})),
            Some(expected)
        );
        assert_eq!(
            decode_timestamp(&json!({"_seconds": expected.timestamp(), "_nanoseconds": 0})),
            Some(expected)
        );
        assert_eq!(
            decode_timestamp(&json!(expected.timestamp_millis() as f64 + 0.4)),
            Some(expected)
        );
    }

    #[test]
    fn test_timestamp_sub_second_precision() {
        let ts = decode_timestamp(&json!({"seconds": 1_700_000_000, "nanoseconds": 500_000_000})).unwrap();
        assert_eq!(ts.timestamp_subsec_millis(), 500);
    }

    #[test]
    fn test_timestamp_rejects_garbage() {
        assert_eq!(decode_timestamp(&json!("yesterday")), None);
        assert_eq!(decode_timestamp(&json!(true)), None);
        assert_eq!(decode_timestamp(&json!({"nanoseconds": 5})), None);
        assert_eq!(decode_timestamp(&Value::Null), None);
    }

    #[test]
    fn test_decode_minimal_chore() {
        let chore = decode_chore("ch-1", &minimal(json!({}))).unwrap();
        assert_eq!(chore.id, "ch-1");
        assert_eq!(chore.title, "Sweep porch");
        assert_eq!(chore.priority, Priority::Medium);
        assert!(chore.dependencies.is_empty());
        assert!(!chore.is_completed());
        assert_eq!(chore.updated_at, chore.created_at);
    }

    #[test]
    fn test_decode_rejects_missing_title_and_created_at() {
        assert_eq!(decode_chore("x", &json!([])), Err(DecodeError::NotAnObject));
        assert_eq!(
            decode_chore("x", &json!({"createdAt": "2024-03-01T08:00:00Z"})),
            Err(DecodeError::MissingField("title"))
        );
        assert_eq!(
            decode_chore("x", &json!({"title": "  ", "createdAt": "2024-03-01T08:00:00Z"})),
            Err(DecodeError::MissingField("title"))
        );
        assert_eq!(
            decode_chore("x", &json!({"title": "Mop", "createdAt": "soon"})),
            Err(DecodeError::MissingField("createdAt"))
        );
    }

    #[test]
    fn test_decode_defaults_malformed_fields() {
        let doc = minimal(json!({
            "priority": "urgent",
            "dependencies": "ch-2",
            "blocksOthers": "yes",
            "isRecurring": 1,
            "recurrencePattern": "hourly",
            "completedAt": "not a date",
            "description": 42,
        }));
        let chore = decode_chore("ch-1", &doc).unwrap();
        assert_eq!(chore.priority, Priority::Medium);
        assert!(chore.dependencies.is_empty());
        assert!(!chore.blocks_others);
        assert!(!chore.is_recurring);
        assert_eq!(chore.recurrence_pattern, None);
        assert_eq!(chore.completed_at, None);
        assert_eq!(chore.description, None);
    }

    #[test]
    fn test_decode_dependencies_filters_entries() {
        let doc = minimal(json!({"dependencies": ["ch-2", 7, "", "ch-1", "ch-3", "ch-2"]}));
        let chore = decode_chore("ch-1", &doc).unwrap();
        assert_eq!(chore.dependencies, vec!["ch-2", "ch-3"]);
    }

    #[test]
    fn test_decode_keeps_empty_assignee_distinct() {
        let unassigned = decode_chore("ch-1", &minimal(json!({"assigneeId": ""}))).unwrap();
        assert_eq!(unassigned.assignee_id, Some(String::new()));
        let absent = decode_chore("ch-1", &minimal(json!({}))).unwrap();
        assert_eq!(absent.assignee_id, None);
    }

    #[test]
    fn test_decode_clamps_updated_before_created() {
        let doc = minimal(json!({"updatedAt": "2024-02-01T08:00:00Z"}));
        let chore = decode_chore("ch-1", &doc).unwrap();
        assert_eq!(chore.updated_at, chore.created_at);
    }

    #[test]
    fn test_decode_chores_skips_bad_entries() {
        let good = Document {
            id: "ch-1".to_string(),
            fields: minimal(json!({})).as_object().cloned().unwrap(),
        };
        let bad = Document {
            id: "ch-2".to_string(),
            fields: Map::new(),
        };
        let chores = decode_chores(&[good, bad]);
        assert_eq!(chores.len(), 1);
        assert_eq!(chores[0].id, "ch-1");
    }

    #[test]
    fn test_encode_draft_omits_local_id_and_carries_op_id() {
        let draft = ChoreDraft::new("Rake leaves").with_dependencies(["ch-9"]);
        let fields = encode_draft(&draft, Some("op-0000000001"));
        assert!(!fields.contains_key("localId"));
        assert_eq!(fields[CLIENT_OP_ID_FIELD], "op-0000000001");
        assert_eq!(fields["dependencies"], json!(["ch-9"]));
        assert_eq!(fields["priority"], "medium");
    }

    #[test]
    fn test_encoded_draft_decodes_back() {
        let draft = ChoreDraft::new("Rake leaves")
            .with_priority(Priority::High)
            .recurring(Recurrence::Weekly);
        let mut fields = encode_draft(&draft, None);
        fields.insert("createdAt".into(), json!("2024-03-01T08:00:00Z"));

        let chore = decode_fields("ch-5", &fields).unwrap();
        assert_eq!(chore.title, "Rake leaves");
        assert_eq!(chore.priority, Priority::High);
        assert_eq!(chore.recurrence_pattern, Some(Recurrence::Weekly));
    }

    #[test]
    fn test_encode_patch_nulls_cleared_fields() {
        let patch = ChorePatch {
            assignee_id: Some(None),
            title: Some("New".to_string()),
            ..ChorePatch::default()
        };
        let fields = encode_patch(&patch);
        assert_eq!(fields.len(), 2);
        assert_eq!(fields["assigneeId"], Value::Null);
        assert_eq!(fields["title"], "New");
    }
}
