//! # Case Store
//!
//! Durable load/save of case records with optimistic concurrency: one JSON
//! document per case, keyed under `case_records/`. Loading captures the
//! object's version; saving requires that version to be unchanged, failing
//! with a conflict when another writer got there first.
//!
//! The best-effort retry discipline (abandon after a few conflicts, keep the
//! reply flowing) lives in the orchestrator core, not here — this type is the
//! strict contract.

use crate::models::CaseRecord;
use crate::state_machine::CasePhase;
use crate::storage::object_store::{ObjectStore, StoreError, Version};
use std::sync::Arc;
use tracing::{debug, info, warn};

const RECORD_PREFIX: &str = "case_records";

/// Outcome of the orchestrator's best-effort persistence pass. The abandoned
/// branch is deliberate behavior, surfaced as data so callers and tests can
/// assert on it directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The record was written; this is its new version.
    Persisted(Version),
    /// Every attempt conflicted; the write was abandoned and the in-memory
    /// mutations were not persisted.
    FailedAfterRetries { attempts: u32 },
}

impl SaveOutcome {
    pub fn is_persisted(&self) -> bool {
        matches!(self, Self::Persisted(_))
    }
}

/// Store for case record documents.
pub struct CaseStore {
    store: Arc<dyn ObjectStore>,
}

impl CaseStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    fn record_key(case_id: &str) -> String {
        format!("{RECORD_PREFIX}/case_{case_id}/record.json")
    }

    /// Load a record and the version to use for the next conditional save.
    pub async fn load(&self, case_id: &str) -> Result<(CaseRecord, Version), StoreError> {
        let key = Self::record_key(case_id);
        let (bytes, version) = self.store.get(&key).await?;
        let record: CaseRecord = serde_json::from_slice(&bytes)?;
        debug!(case_id = %case_id, version = %version, "Loaded case record");
        Ok((record, version))
    }

    /// Save a record conditionally. `expected = None` writes unconditionally
    /// (first save of a fresh record). Refreshes `last_updated`.
    pub async fn save(
        &self,
        record: &mut CaseRecord,
        expected: Option<Version>,
    ) -> Result<Version, StoreError> {
        record.touch();
        let key = Self::record_key(record.case_id());
        let bytes = serde_json::to_vec(record)?;
        let version = self.store.put(&key, bytes, expected).await?;
        debug!(case_id = %record.case_id(), version = %version, "Saved case record");
        Ok(version)
    }

    /// Initialize a fresh record and perform the first save unconditionally.
    pub async fn create(
        &self,
        case_id: &str,
        correlation_id: Option<String>,
    ) -> Result<(CaseRecord, Version), StoreError> {
        let mut record = CaseRecord::create_new(case_id, correlation_id);
        let version = self.save(&mut record, None).await?;
        info!(case_id = %case_id, "📁 Created new case record");
        Ok((record, version))
    }

    pub async fn exists(&self, case_id: &str) -> bool {
        self.store.get(&Self::record_key(case_id)).await.is_ok()
    }

    /// Remove a record document (administrative reset).
    pub async fn delete(&self, case_id: &str) -> Result<bool, StoreError> {
        self.store.delete(&Self::record_key(case_id)).await
    }

    /// All case ids with a stored record.
    pub async fn list_case_ids(&self) -> Result<Vec<String>, StoreError> {
        let keys = self.store.list(RECORD_PREFIX).await?;
        let ids = keys
            .iter()
            .filter_map(|key| {
                key.strip_prefix(&format!("{RECORD_PREFIX}/case_"))
                    .and_then(|rest| rest.strip_suffix("/record.json"))
                    .map(str::to_string)
            })
            .collect();
        Ok(ids)
    }

    /// Case ids currently in the follow-up phase with wake-ups active.
    /// Used by the heartbeat scheduler to recover its roster on startup.
    pub async fn list_follow_up_cases(&self) -> Result<Vec<String>, StoreError> {
        let mut follow_up = Vec::new();
        for case_id in self.list_case_ids().await? {
            match self.load(&case_id).await {
                Ok((record, _))
                    if record.current_phase() == CasePhase::FollowUp
                        && record.follow_up.active =>
                {
                    follow_up.push(case_id);
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(case_id = %case_id, error = %err, "Skipping unreadable case record");
                }
            }
        }
        Ok(follow_up)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::object_store::InMemoryObjectStore;

    fn case_store() -> CaseStore {
        CaseStore::new(Arc::new(InMemoryObjectStore::new()))
    }

    #[tokio::test]
    async fn test_load_missing_is_not_found() {
        let store = case_store();
        let err = store.load("CASE-404").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_create_then_load_round_trip() {
        let store = case_store();
        let (record, version) = store.create("CASE-1", None).await.unwrap();
        assert_eq!(record.current_phase(), CasePhase::Intake);

        let (loaded, loaded_version) = store.load("CASE-1").await.unwrap();
        assert_eq!(loaded.case_id(), "CASE-1");
        assert_eq!(loaded_version, version);
        assert!(store.exists("CASE-1").await);
    }

    #[tokio::test]
    async fn test_conditional_save_conflicts_on_stale_version() {
        let store = case_store();
        let (mut record, version) = store.create("CASE-1", None).await.unwrap();

        // A second writer wins the race
        let (mut other, _) = store.load("CASE-1").await.unwrap();
        store.save(&mut other, Some(version)).await.unwrap();

        let err = store.save(&mut record, Some(version)).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_list_follow_up_cases_filters_by_phase_and_flag() {
        let store = case_store();
        store.create("CASE-A", None).await.unwrap();

        let (mut active, version) = store.create("CASE-B", None).await.unwrap();
        active.enter_phase(CasePhase::FollowUp);
        active.follow_up.active = true;
        store.save(&mut active, Some(version)).await.unwrap();

        let (mut dormant, version) = store.create("CASE-C", None).await.unwrap();
        dormant.enter_phase(CasePhase::FollowUp);
        store.save(&mut dormant, Some(version)).await.unwrap();

        assert_eq!(store.list_follow_up_cases().await.unwrap(), vec!["CASE-B"]);

        let mut ids = store.list_case_ids().await.unwrap();
        ids.sort();
        assert_eq!(ids, vec!["CASE-A", "CASE-B", "CASE-C"]);
    }

    #[tokio::test]
    async fn test_delete_removes_record() {
        let store = case_store();
        store.create("CASE-1", None).await.unwrap();
        assert!(store.delete("CASE-1").await.unwrap());
        assert!(!store.exists("CASE-1").await);
    }
}
