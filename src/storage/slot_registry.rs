//! # Slot Registry
//!
//! Durable registry of exclusive time-slot reservations with expiring holds,
//! independent of any one case's record. A single JSON document holds every
//! hold ever created (holds are status-transitioned, never deleted, so the
//! document is also the audit trail).
//!
//! Persistence discipline: load, mutate in memory, write back conditionally.
//! On a version conflict the whole operation is redone from a fresh load —
//! registry mutations are idempotent set-operations, so redoing is safe.

use crate::config::SlotRegistryConfig;
use crate::models::{HoldStatus, SlotCandidate, SlotHold};
use crate::storage::object_store::{ObjectStore, StoreError, Version};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const REGISTRY_KEY: &str = "slot_registry/registry.json";

/// Serialisable registry state — the single shared document.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RegistryDocument {
    #[serde(default)]
    holds: Vec<SlotHold>,
    last_updated: DateTime<Utc>,
}

impl Default for RegistryDocument {
    fn default() -> Self {
        Self {
            holds: Vec::new(),
            last_updated: Utc::now(),
        }
    }
}

impl RegistryDocument {
    /// Lazy expiry sweep: cancel every held hold whose TTL has passed.
    /// Runs before any query logic on every load.
    fn sweep_expired(&mut self, now: DateTime<Utc>) -> usize {
        let mut expired = 0;
        for hold in &mut self.holds {
            if hold.status == HoldStatus::Held && hold.expires_at < now {
                hold.cancel(now);
                expired += 1;
            }
        }
        expired
    }

    /// An active hold for this slot belonging to a different case blocks it.
    fn slot_taken(&self, slot: &SlotCandidate, exclude_case: &str) -> bool {
        self.holds.iter().any(|hold| {
            hold.is_active()
                && hold.case_id != exclude_case
                && hold.covers_slot(&slot.date, &slot.time, &slot.resource)
        })
    }
}

/// Persistent slot-hold registry over the object store.
pub struct SlotRegistry {
    store: Arc<dyn ObjectStore>,
    config: SlotRegistryConfig,
}

impl SlotRegistry {
    pub fn new(store: Arc<dyn ObjectStore>, config: SlotRegistryConfig) -> Self {
        Self { store, config }
    }

    /// Create holds for candidate slots in order, skipping slots already
    /// taken by another case, stopping after `max_holds` successes. Returns
    /// only the holds actually created — silently fewer than requested when
    /// candidates are taken.
    pub async fn hold_slots(
        &self,
        case_id: &str,
        candidates: &[SlotCandidate],
        max_holds: usize,
    ) -> Result<Vec<SlotHold>, StoreError> {
        self.with_registry(|doc| {
            let mut held = Vec::new();
            for slot in candidates {
                if held.len() >= max_holds {
                    break;
                }
                if doc.slot_taken(slot, case_id) {
                    debug!(
                        case_id = %case_id,
                        date = %slot.date,
                        time = %slot.time,
                        "Slot already taken — skipping"
                    );
                    continue;
                }
                let hold = SlotHold::new(case_id, slot, self.config.hold_ttl());
                doc.holds.push(hold.clone());
                held.push(hold);
            }
            let dirty = !held.is_empty();
            (held, dirty)
        })
        .await
    }

    /// Promote a held slot to confirmed, stamping the downstream booking
    /// reference and cancelling the case's other un-confirmed holds (a case
    /// confirms at most one slot at a time). Returns `None` when the hold is
    /// missing or its TTL already passed — the caller must re-offer slots.
    pub async fn confirm_slot(
        &self,
        case_id: &str,
        hold_id: &str,
        linked_reference: &str,
    ) -> Result<Option<SlotHold>, StoreError> {
        let confirmed = self
            .with_registry(|doc| {
                let now = Utc::now();
                let Some(index) = doc.holds.iter().position(|h| {
                    h.hold_id == hold_id && h.case_id == case_id && h.status == HoldStatus::Held
                }) else {
                    return (None, false);
                };

                if doc.holds[index].expires_at < now {
                    doc.holds[index].cancel(now);
                    return (None, true);
                }

                doc.holds[index].status = HoldStatus::Confirmed;
                doc.holds[index].confirmed_at = Some(now);
                doc.holds[index].linked_reference = Some(linked_reference.to_string());
                let confirmed = doc.holds[index].clone();

                for (i, other) in doc.holds.iter_mut().enumerate() {
                    if i != index && other.case_id == case_id && other.status == HoldStatus::Held {
                        other.cancel(now);
                    }
                }
                (Some(confirmed), true)
            })
            .await?;

        match &confirmed {
            Some(hold) => info!(
                case_id = %case_id,
                hold_id = %hold_id,
                linked_reference = %linked_reference,
                date = %hold.date,
                time = %hold.time,
                "🔒 Confirmed slot hold"
            ),
            None => warn!(
                case_id = %case_id,
                hold_id = %hold_id,
                "Hold missing or expired — caller must re-offer slots"
            ),
        }
        Ok(confirmed)
    }

    /// Cancel the case's confirmed booking (rescheduling path), freeing the
    /// slot for every other case. Returns the cancelled hold, if one existed.
    pub async fn cancel_booking(&self, case_id: &str) -> Result<Option<SlotHold>, StoreError> {
        let cancelled = self
            .with_registry(|doc| {
                let now = Utc::now();
                match doc
                    .holds
                    .iter_mut()
                    .find(|h| h.case_id == case_id && h.status == HoldStatus::Confirmed)
                {
                    Some(hold) => {
                        hold.cancel(now);
                        (Some(hold.clone()), true)
                    }
                    None => (None, false),
                }
            })
            .await?;

        match &cancelled {
            Some(hold) => info!(
                case_id = %case_id,
                hold_id = %hold.hold_id,
                "Cancelled confirmed booking"
            ),
            None => debug!(case_id = %case_id, "No confirmed booking to cancel"),
        }
        Ok(cancelled)
    }

    /// Cancel all of the case's un-confirmed holds. Returns the count released.
    pub async fn release_holds(&self, case_id: &str) -> Result<usize, StoreError> {
        let released = self
            .with_registry(|doc| {
                let now = Utc::now();
                let mut count = 0;
                for hold in &mut doc.holds {
                    if hold.case_id == case_id && hold.status == HoldStatus::Held {
                        hold.cancel(now);
                        count += 1;
                    }
                }
                (count, count > 0)
            })
            .await?;

        if released > 0 {
            info!(case_id = %case_id, released = released, "Released slot holds");
        }
        Ok(released)
    }

    /// The case's current confirmed booking, if any.
    pub async fn booking_for_case(&self, case_id: &str) -> Result<Option<SlotHold>, StoreError> {
        let (doc, _) = self.load_document().await?;
        Ok(doc
            .holds
            .iter()
            .find(|h| h.case_id == case_id && h.status == HoldStatus::Confirmed)
            .cloned())
    }

    /// All currently active (held or confirmed) holds across all cases.
    pub async fn active_holds(&self) -> Result<Vec<SlotHold>, StoreError> {
        let (doc, _) = self.load_document().await?;
        Ok(doc.holds.iter().filter(|h| h.is_active()).cloned().collect())
    }

    // ── Internal persistence ──

    /// Run one registry operation under the load-mutate-save discipline.
    /// The closure returns (result, dirty); a clean operation skips the
    /// write. On a version conflict the operation is redone from a fresh
    /// load, up to the configured attempt bound.
    async fn with_registry<T>(
        &self,
        mut operation: impl FnMut(&mut RegistryDocument) -> (T, bool),
    ) -> Result<T, StoreError> {
        for attempt in 1..=self.config.write_attempts {
            let (mut doc, version) = self.load_document().await?;
            let (result, dirty) = operation(&mut doc);
            if !dirty {
                return Ok(result);
            }
            match self.save_document(&mut doc, version).await {
                Ok(_) => return Ok(result),
                Err(err) if err.is_conflict() => {
                    warn!(
                        attempt = attempt,
                        "Slot registry write conflict — reloading and redoing operation"
                    );
                    tokio::time::sleep(Duration::from_millis(50 * u64::from(attempt))).await;
                }
                Err(err) => return Err(err),
            }
        }
        Err(StoreError::Unavailable(format!(
            "slot registry write contention persisted across {} attempts",
            self.config.write_attempts
        )))
    }

    async fn load_document(&self) -> Result<(RegistryDocument, Option<Version>), StoreError> {
        let (mut doc, version) = match self.store.get(REGISTRY_KEY).await {
            Ok((bytes, version)) => {
                let doc: RegistryDocument = serde_json::from_slice(&bytes)?;
                (doc, Some(version))
            }
            Err(err) if err.is_not_found() => (RegistryDocument::default(), None),
            Err(err) => return Err(err),
        };

        let expired = doc.sweep_expired(Utc::now());
        if expired > 0 {
            debug!(expired = expired, "Expired holds swept on load");
        }
        Ok((doc, version))
    }

    async fn save_document(
        &self,
        doc: &mut RegistryDocument,
        version: Option<Version>,
    ) -> Result<Version, StoreError> {
        doc.last_updated = Utc::now();
        let bytes = serde_json::to_vec(doc)?;
        self.store.put(REGISTRY_KEY, bytes, version).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::object_store::InMemoryObjectStore;

    fn registry() -> SlotRegistry {
        SlotRegistry::new(
            Arc::new(InMemoryObjectStore::new()),
            SlotRegistryConfig::default(),
        )
    }

    fn expiring_registry() -> SlotRegistry {
        // Holds created by this registry are already expired
        SlotRegistry::new(
            Arc::new(InMemoryObjectStore::new()),
            SlotRegistryConfig {
                hold_ttl_minutes: -1,
                ..Default::default()
            },
        )
    }

    fn slots() -> Vec<SlotCandidate> {
        vec![
            SlotCandidate::new("2026-08-14", "09:00", "room-1"),
            SlotCandidate::new("2026-08-14", "10:00", "room-1"),
            SlotCandidate::new("2026-08-15", "09:00", "room-2"),
        ]
    }

    #[tokio::test]
    async fn test_hold_slots_respects_max_holds() {
        let registry = registry();
        let held = registry.hold_slots("CASE-X", &slots(), 2).await.unwrap();
        assert_eq!(held.len(), 2);
        assert!(held.iter().all(|h| h.status == HoldStatus::Held));
    }

    #[tokio::test]
    async fn test_no_double_booking_across_cases() {
        let registry = registry();
        let held_x = registry.hold_slots("CASE-X", &slots()[..1], 3).await.unwrap();
        assert_eq!(held_x.len(), 1);

        // Y requests a slot set including X's held slot — it must be excluded
        let held_y = registry.hold_slots("CASE-Y", &slots(), 3).await.unwrap();
        assert_eq!(held_y.len(), 2);
        assert!(held_y
            .iter()
            .all(|h| !h.covers_slot("2026-08-14", "09:00", "room-1")));
    }

    #[tokio::test]
    async fn test_same_case_may_re_hold_its_own_slot() {
        let registry = registry();
        let first = registry.hold_slots("CASE-X", &slots()[..1], 3).await.unwrap();
        let again = registry.hold_slots("CASE-X", &slots()[..1], 3).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(again.len(), 1);
        assert_ne!(first[0].hold_id, again[0].hold_id);
    }

    #[tokio::test]
    async fn test_expired_hold_frees_the_slot() {
        let registry = expiring_registry();
        let held = registry.hold_slots("CASE-X", &slots()[..1], 1).await.unwrap();
        assert_eq!(held.len(), 1);

        // The sweep on the next load cancels X's expired hold
        let held_y = registry.hold_slots("CASE-Y", &slots()[..1], 1).await.unwrap();
        assert_eq!(held_y.len(), 1);
        assert_eq!(held_y[0].case_id, "CASE-Y");
    }

    #[tokio::test]
    async fn test_confirm_is_exclusive_per_case() {
        let registry = registry();
        let held = registry.hold_slots("CASE-X", &slots(), 3).await.unwrap();
        assert_eq!(held.len(), 3);

        let confirmed = registry
            .confirm_slot("CASE-X", &held[1].hold_id, "booking-77")
            .await
            .unwrap()
            .expect("hold should confirm");
        assert_eq!(confirmed.status, HoldStatus::Confirmed);
        assert_eq!(confirmed.linked_reference.as_deref(), Some("booking-77"));

        // Every other hold of the case is now cancelled
        let active = registry.active_holds().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].hold_id, held[1].hold_id);
    }

    #[tokio::test]
    async fn test_confirm_expired_hold_returns_none() {
        let registry = expiring_registry();
        let held = registry.hold_slots("CASE-X", &slots()[..1], 1).await.unwrap();

        let result = registry
            .confirm_slot("CASE-X", &held[0].hold_id, "booking-1")
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(registry.booking_for_case("CASE-X").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_confirm_unknown_hold_returns_none() {
        let registry = registry();
        let result = registry
            .confirm_slot("CASE-X", "nope1234", "booking-1")
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_cancel_booking_frees_slot_for_reacquisition() {
        let registry = registry();
        let held = registry.hold_slots("CASE-X", &slots()[..1], 1).await.unwrap();
        registry
            .confirm_slot("CASE-X", &held[0].hold_id, "booking-1")
            .await
            .unwrap()
            .expect("hold should confirm");

        // Confirmed slot blocks other cases
        let held_y = registry.hold_slots("CASE-Y", &slots()[..1], 1).await.unwrap();
        assert!(held_y.is_empty());

        // Deterioration loop-back: cancel, then the same case re-holds the slot
        let cancelled = registry.cancel_booking("CASE-X").await.unwrap().unwrap();
        assert_eq!(cancelled.status, HoldStatus::Cancelled);

        let reheld = registry.hold_slots("CASE-X", &slots()[..1], 1).await.unwrap();
        assert_eq!(reheld.len(), 1);
        assert!(reheld[0].covers_slot("2026-08-14", "09:00", "room-1"));
    }

    #[tokio::test]
    async fn test_release_holds_only_touches_unconfirmed() {
        let registry = registry();
        let held = registry.hold_slots("CASE-X", &slots(), 3).await.unwrap();
        registry
            .confirm_slot("CASE-X", &held[0].hold_id, "booking-1")
            .await
            .unwrap()
            .expect("hold should confirm");

        // confirm_slot already cancelled the others; re-hold two more
        let more = registry.hold_slots("CASE-X", &slots()[1..], 2).await.unwrap();
        assert_eq!(more.len(), 2);

        let released = registry.release_holds("CASE-X").await.unwrap();
        assert_eq!(released, 2);
        assert!(registry.booking_for_case("CASE-X").await.unwrap().is_some());
    }
}
