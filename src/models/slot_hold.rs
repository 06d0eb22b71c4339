//! Slot holds — time-bounded, exclusive reservations of one resource slot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle status of a hold. Holds are never deleted, only transitioned,
/// so the registry doubles as an audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldStatus {
    /// Reserved with a TTL, awaiting confirmation
    Held,
    /// Promoted to a confirmed booking
    Confirmed,
    /// Expired, released, or cancelled
    Cancelled,
}

impl fmt::Display for HoldStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Held => write!(f, "held"),
            Self::Confirmed => write!(f, "confirmed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A candidate slot offered to `hold_slots`, identified by date, time, and
/// resource key. An empty resource key means "any resource at that time".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotCandidate {
    pub date: String,
    pub time: String,
    #[serde(default)]
    pub resource: String,
}

impl SlotCandidate {
    pub fn new(
        date: impl Into<String>,
        time: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            date: date.into(),
            time: time.into(),
            resource: resource.into(),
        }
    }
}

/// A slot reference embedded in a case record's reservation section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlotOption {
    pub date: String,
    pub time: String,
    #[serde(default)]
    pub resource: String,
    #[serde(default)]
    pub hold_id: String,
}

/// A single slot hold or confirmed booking in the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotHold {
    pub hold_id: String,
    pub case_id: String,
    pub date: String,
    pub time: String,
    #[serde(default)]
    pub resource: String,
    pub status: HoldStatus,
    pub held_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Downstream booking identifier, set once confirmed
    pub linked_reference: Option<String>,
}

impl SlotHold {
    /// Create a fresh `held` hold for a candidate slot.
    pub fn new(case_id: impl Into<String>, slot: &SlotCandidate, ttl: chrono::Duration) -> Self {
        let now = Utc::now();
        Self {
            hold_id: new_hold_id(),
            case_id: case_id.into(),
            date: slot.date.clone(),
            time: slot.time.clone(),
            resource: slot.resource.clone(),
            status: HoldStatus::Held,
            held_at: now,
            expires_at: now + ttl,
            confirmed_at: None,
            cancelled_at: None,
            linked_reference: None,
        }
    }

    /// Held or confirmed — the states that block the slot for other cases.
    pub fn is_active(&self) -> bool {
        matches!(self.status, HoldStatus::Held | HoldStatus::Confirmed)
    }

    /// Slot identity check against a candidate. Resource keys only
    /// discriminate when both sides specify one.
    pub fn covers_slot(&self, date: &str, time: &str, resource: &str) -> bool {
        if self.date != date || self.time != time {
            return false;
        }
        if !resource.is_empty() && !self.resource.is_empty() && self.resource != resource {
            return false;
        }
        true
    }

    /// Transition to cancelled, stamping the cancellation time.
    pub fn cancel(&mut self, now: DateTime<Utc>) {
        self.status = HoldStatus::Cancelled;
        self.cancelled_at = Some(now);
    }
}

/// Short unique hold identifier (compact form, 8 hex chars).
pub fn new_hold_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate() -> SlotCandidate {
        SlotCandidate::new("2026-08-14", "09:30", "suite-a")
    }

    #[test]
    fn test_new_hold_is_active_with_ttl() {
        let hold = SlotHold::new("CASE-1", &candidate(), chrono::Duration::minutes(15));
        assert_eq!(hold.status, HoldStatus::Held);
        assert!(hold.is_active());
        assert!(hold.expires_at > hold.held_at);
        assert_eq!(hold.hold_id.len(), 8);
    }

    #[test]
    fn test_covers_slot_resource_matching() {
        let hold = SlotHold::new("CASE-1", &candidate(), chrono::Duration::minutes(15));
        assert!(hold.covers_slot("2026-08-14", "09:30", "suite-a"));
        assert!(hold.covers_slot("2026-08-14", "09:30", ""));
        assert!(!hold.covers_slot("2026-08-14", "09:30", "suite-b"));
        assert!(!hold.covers_slot("2026-08-14", "10:00", "suite-a"));
    }

    #[test]
    fn test_cancel_transition() {
        let mut hold = SlotHold::new("CASE-1", &candidate(), chrono::Duration::minutes(15));
        hold.cancel(Utc::now());
        assert_eq!(hold.status, HoldStatus::Cancelled);
        assert!(hold.cancelled_at.is_some());
        assert!(!hold.is_active());
    }
}
