//! Archiving of old completed chores.
//!
//! Archiving moves a chore document from `chores` to `choresArchive` under
//! the same id, adding `archivedAt` and `archivedBy`. Restoring moves it
//! back. Chores that listed an archived chore as a prerequisite see an
//! unresolved dependency, which never blocks completion.

use crate::config::ArchivePolicy;
use crate::decode::{decode_fields, decode_timestamp};
use crate::hub::{Hub, HubError};
use crate::remote::{CHORES, CHORES_ARCHIVE, Document};
use crate::types::{Chore, Timestamp};
use chrono::Utc;
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const ARCHIVED_AT: &str = "archivedAt";
const ARCHIVED_BY: &str = "archivedBy";

/// A chore as stored in the archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchivedChore {
    pub chore: Chore,
    pub archived_at: Timestamp,
    pub archived_by: String,
}

/// Result of an archive run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveResult {
    /// IDs of archived chores, oldest completion first.
    pub archived: Vec<String>,
    /// Chores that could not be archived (id, error message).
    pub errors: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveStats {
    pub total_archived: usize,
    pub oldest_archived: Option<Timestamp>,
    pub newest_archived: Option<Timestamp>,
}

fn decode_archived(doc: &Document) -> Option<ArchivedChore> {
    let archived_at = doc.fields.get(ARCHIVED_AT).and_then(decode_timestamp)?;
    let chore = match decode_fields(&doc.id, &doc.fields) {
        Ok(chore) => chore,
        Err(e) => {
            log::warn!("Skipping undecodable archived chore {}: {}", doc.id, e);
            return None;
        }
    };
    let archived_by = doc
        .fields
        .get(ARCHIVED_BY)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Some(ArchivedChore {
        chore,
        archived_at,
        archived_by,
    })
}

/// Extension trait for archive operations on the hub.
pub trait HubArchiveExt {
    /// Archive chores completed before the policy's cutoff, up to one batch.
    fn archive_completed(
        &mut self,
        policy: &ArchivePolicy,
        archived_by: &str,
        now: Timestamp,
    ) -> Result<ArchiveResult>;

    /// Archive one chore, completed or not.
    fn archive_chore(&mut self, id: &str, archived_by: &str) -> Result<Document>;

    /// Move an archived chore back under its original id.
    fn restore_chore(&mut self, id: &str, restored_by: &str) -> Result<Document>;

    /// Archived chores, most recently archived first.
    fn archived_chores(&self, limit: usize) -> Result<Vec<ArchivedChore>>;

    fn archive_stats(&self) -> Result<ArchiveStats>;

    /// Delete archived chores older than the policy's retention, up to one batch.
    fn cleanup_archive(&mut self, policy: &ArchivePolicy, now: Timestamp) -> Result<usize>;
}

impl HubArchiveExt for Hub {
    fn archive_completed(
        &mut self,
        policy: &ArchivePolicy,
        archived_by: &str,
        now: Timestamp,
    ) -> Result<ArchiveResult> {
        let cutoff = policy.archive_cutoff(now);
        let documents = self.list(CHORES).context("Failed to list chores")?;

        let mut eligible: Vec<(Timestamp, String)> = documents
            .iter()
            .filter_map(|doc| decode_fields(&doc.id, &doc.fields).ok())
            .filter_map(|chore| chore.completed_at.filter(|t| *t < cutoff).map(|t| (t, chore.id)))
            .collect();
        eligible.sort();
        eligible.truncate(policy.batch_size);

        let mut result = ArchiveResult::default();
        for (_, id) in eligible {
            match self.archive_chore(&id, archived_by) {
                Ok(_) => result.archived.push(id),
                Err(e) => {
                    log::warn!("Failed to archive chore {}: {:#}", id, e);
                    result.errors.push((id, e.to_string()));
                }
            }
        }

        log::info!(
            "Archived {} chores completed before {} ({} errors)",
            result.archived.len(),
            cutoff,
            result.errors.len()
        );
        Ok(result)
    }

    fn archive_chore(&mut self, id: &str, archived_by: &str) -> Result<Document> {
        let chore = self.existing(CHORES, id)?;
        let now = Utc::now();

        let mut fields = chore.fields;
        fields.insert(ARCHIVED_AT.into(), Value::String(now.to_rfc3339()));
        fields.insert(ARCHIVED_BY.into(), Value::String(archived_by.to_string()));

        // Archive copy first: an interrupted move leaves the chore live
        let archived = self.put(CHORES_ARCHIVE, id, fields, now)?;
        self.delete(CHORES, id)?;

        log::debug!("Archived chore {}", id);
        Ok(archived)
    }

    fn restore_chore(&mut self, id: &str, restored_by: &str) -> Result<Document> {
        let archived = self.existing(CHORES_ARCHIVE, id)?;
        if self.get(CHORES, id)?.is_some() {
            return Err(eyre::eyre!(HubError::AlreadyExists {
                collection: CHORES.to_string(),
                id: id.to_string(),
            }));
        }

        let now = Utc::now();
        let mut fields = archived.fields;
        fields.remove(ARCHIVED_AT);
        fields.remove(ARCHIVED_BY);
        let stamp = Value::String(now.to_rfc3339());
        fields.insert("restoredAt".into(), stamp.clone());
        fields.insert("restoredBy".into(), Value::String(restored_by.to_string()));
        fields.insert("updatedAt".into(), stamp);

        let restored = self.put(CHORES, id, fields, now)?;
        self.delete(CHORES_ARCHIVE, id)?;

        log::info!("Restored chore {} for {}", id, restored_by);
        Ok(restored)
    }

    fn archived_chores(&self, limit: usize) -> Result<Vec<ArchivedChore>> {
        let mut archived: Vec<ArchivedChore> = self
            .list(CHORES_ARCHIVE)?
            .iter()
            .filter_map(decode_archived)
            .collect();
        archived.sort_by(|a, b| b.archived_at.cmp(&a.archived_at));
        archived.truncate(limit);
        Ok(archived)
    }

    fn archive_stats(&self) -> Result<ArchiveStats> {
        let mut stats = ArchiveStats::default();
        for doc in self.list(CHORES_ARCHIVE)? {
            stats.total_archived += 1;
            let Some(at) = doc.fields.get(ARCHIVED_AT).and_then(decode_timestamp) else {
                continue;
            };
            stats.oldest_archived = Some(stats.oldest_archived.map_or(at, |o| o.min(at)));
            stats.newest_archived = Some(stats.newest_archived.map_or(at, |n| n.max(at)));
        }
        Ok(stats)
    }

    fn cleanup_archive(&mut self, policy: &ArchivePolicy, now: Timestamp) -> Result<usize> {
        let cutoff = policy.cleanup_cutoff(now);
        let mut expired: Vec<(Timestamp, String)> = self
            .list(CHORES_ARCHIVE)?
            .into_iter()
            .filter_map(|doc| {
                let at = doc.fields.get(ARCHIVED_AT).and_then(decode_timestamp)?;
                (at < cutoff).then_some((at, doc.id))
            })
            .collect();
        expired.sort();
        expired.truncate(policy.batch_size);

        for (_, id) in &expired {
            self.delete(CHORES_ARCHIVE, id)
                .with_context(|| format!("Failed to delete archived chore {}", id))?;
        }

        log::info!("Deleted {} archived chores older than {}", expired.len(), cutoff);
        Ok(expired.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::{Map, json};
    use tempfile::TempDir;

    fn setup_test_hub() -> (TempDir, Hub) {
        let temp_dir = TempDir::new().unwrap();
        let hub = Hub::init(temp_dir.path()).unwrap();
        (temp_dir, hub)
    }

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn completed(hub: &mut Hub, title: &str, days_ago: i64) -> String {
        let id = hub.create(CHORES, fields(json!({"title": title}))).unwrap().id;
        let at = (Utc::now() - Duration::days(days_ago)).to_rfc3339();
        hub.update(CHORES, &id, fields(json!({"completedAt": at}))).unwrap();
        id
    }

    #[test]
    fn test_archive_completed_respects_cutoff() {
        let (_temp_dir, mut hub) = setup_test_hub();
        let old = completed(&mut hub, "Clear gutters", 120);
        let recent = completed(&mut hub, "Mop floor", 10);
        let open = hub.create(CHORES, fields(json!({"title": "Fix fence"}))).unwrap().id;

        let result = hub
            .archive_completed(&ArchivePolicy::default(), "system", Utc::now())
            .unwrap();

        assert_eq!(result.archived, vec![old.clone()]);
        assert!(result.errors.is_empty());
        assert!(hub.get(CHORES, &old).unwrap().is_none());
        assert!(hub.get(CHORES, &recent).unwrap().is_some());
        assert!(hub.get(CHORES, &open).unwrap().is_some());

        let archived = hub.get(CHORES_ARCHIVE, &old).unwrap().unwrap();
        assert_eq!(archived.fields["archivedBy"], "system");
        assert_eq!(archived.fields["title"], "Clear gutters");
    }

    #[test]
    fn test_archive_batch_takes_oldest_first() {
        let (_temp_dir, mut hub) = setup_test_hub();
        let newer = completed(&mut hub, "Newer", 100);
        let oldest = completed(&mut hub, "Oldest", 300);
        let policy = ArchivePolicy {
            batch_size: 1,
            ..ArchivePolicy::default()
        };

        let result = hub.archive_completed(&policy, "system", Utc::now()).unwrap();
        assert_eq!(result.archived, vec![oldest]);
        assert!(hub.get(CHORES, &newer).unwrap().is_some());
    }

    #[test]
    fn test_restore_round_trip_keeps_id() {
        let (_temp_dir, mut hub) = setup_test_hub();
        let id = completed(&mut hub, "Descale kettle", 200);
        hub.archive_chore(&id, "u-kim").unwrap();

        let restored = hub.restore_chore(&id, "u-sam").unwrap();
        assert_eq!(restored.id, id);
        assert_eq!(restored.fields["restoredBy"], "u-sam");
        assert!(!restored.fields.contains_key("archivedAt"));
        assert!(hub.get(CHORES_ARCHIVE, &id).unwrap().is_none());
        assert!(hub.get(CHORES, &id).unwrap().is_some());
    }

    #[test]
    fn test_restore_errors() {
        let (_temp_dir, mut hub) = setup_test_hub();
        let err = hub.restore_chore("ch-missing0001", "u-sam").unwrap_err();
        assert!(matches!(err.downcast_ref::<HubError>(), Some(HubError::NotFound { .. })));

        let id = completed(&mut hub, "Wash windows", 200);
        hub.archive_chore(&id, "system").unwrap();
        let doc = hub.get(CHORES_ARCHIVE, &id).unwrap().unwrap();
        let mut live = doc.fields.clone();
        live.remove("archivedAt");
        live.remove("archivedBy");
        hub.put(CHORES, &id, live, Utc::now()).unwrap();

        let err = hub.restore_chore(&id, "u-sam").unwrap_err();
        assert!(matches!(err.downcast_ref::<HubError>(), Some(HubError::AlreadyExists { .. })));
    }

    #[test]
    fn test_stats_listing_and_cleanup() {
        let (_temp_dir, mut hub) = setup_test_hub();
        assert_eq!(hub.archive_stats().unwrap(), ArchiveStats::default());

        let first = completed(&mut hub, "Rake leaves", 200);
        let second = completed(&mut hub, "Shovel snow", 150);
        hub.archive_chore(&first, "system").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        hub.archive_chore(&second, "u-kim").unwrap();

        let stats = hub.archive_stats().unwrap();
        assert_eq!(stats.total_archived, 2);
        assert!(stats.oldest_archived <= stats.newest_archived);

        let listed = hub.archived_chores(1).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].chore.id, second);
        assert_eq!(listed[0].archived_by, "u-kim");

        // Nothing has been archived for a year yet
        assert_eq!(hub.cleanup_archive(&ArchivePolicy::default(), Utc::now()).unwrap(), 0);

        let later = Utc::now() + Duration::days(400);
        assert_eq!(hub.cleanup_archive(&ArchivePolicy::default(), later).unwrap(), 2);
        assert_eq!(hub.archive_stats().unwrap().total_archived, 0);
    }
}
