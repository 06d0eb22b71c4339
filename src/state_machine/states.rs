use serde::{Deserialize, Serialize};
use std::fmt;

/// Case phase definitions — the single routing key for the orchestrator.
///
/// Exactly one phase is current per case at any time. Sub-state within a
/// phase belongs to that phase's record section, not to this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CasePhase {
    /// Initial data collection for a new case
    Intake,
    /// Evaluation of collected data, producing a priority level
    Assessment,
    /// Slot selection and confirmation against the slot registry
    Reservation,
    /// Long-lived observation after the reservation is confirmed
    FollowUp,
    /// Administratively closed — log-only, no handler
    Closed,
}

impl CasePhase {
    /// Check if this is a terminal phase (no handler, no further transitions)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Check if this phase is subject to a maximum dwell time. The follow-up
    /// phase is long-lived by design and never goes stale.
    pub fn has_dwell_limit(&self) -> bool {
        !matches!(self, Self::FollowUp | Self::Closed)
    }
}

impl fmt::Display for CasePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Intake => write!(f, "intake"),
            Self::Assessment => write!(f, "assessment"),
            Self::Reservation => write!(f, "reservation"),
            Self::FollowUp => write!(f, "follow_up"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

impl std::str::FromStr for CasePhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "intake" => Ok(Self::Intake),
            "assessment" => Ok(Self::Assessment),
            "reservation" => Ok(Self::Reservation),
            "follow_up" => Ok(Self::FollowUp),
            "closed" => Ok(Self::Closed),
            _ => Err(format!("Invalid case phase: {s}")),
        }
    }
}

/// Default phase for newly created cases
impl Default for CasePhase {
    fn default() -> Self {
        Self::Intake
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_check() {
        assert!(CasePhase::Closed.is_terminal());
        assert!(!CasePhase::Intake.is_terminal());
        assert!(!CasePhase::FollowUp.is_terminal());
    }

    #[test]
    fn test_dwell_limit_coverage() {
        assert!(CasePhase::Intake.has_dwell_limit());
        assert!(CasePhase::Assessment.has_dwell_limit());
        assert!(CasePhase::Reservation.has_dwell_limit());
        assert!(!CasePhase::FollowUp.has_dwell_limit());
        assert!(!CasePhase::Closed.has_dwell_limit());
    }

    #[test]
    fn test_phase_string_conversion() {
        assert_eq!(CasePhase::FollowUp.to_string(), "follow_up");
        assert_eq!("assessment".parse::<CasePhase>().unwrap(), CasePhase::Assessment);
        assert!("bogus".parse::<CasePhase>().is_err());
    }

    #[test]
    fn test_phase_serde() {
        let json = serde_json::to_string(&CasePhase::FollowUp).unwrap();
        assert_eq!(json, "\"follow_up\"");
        let parsed: CasePhase = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, CasePhase::FollowUp);
    }
}
