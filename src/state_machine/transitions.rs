//! Explicit phase-transition table.
//!
//! Every canonical phase change is an entry here: (current phase, trigger
//! event type) → (target phase, side effect). The orchestrator applies the
//! table when a handoff arrives and then routes the event to the handler of
//! the *target* phase, so routing never depends on a handler having mutated
//! the record's phase before emitting.

use super::states::CasePhase;
use crate::events::EventType;

/// Side effect the orchestrator performs while applying a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionEffect {
    None,
    /// Stamp the record's priority level from the handoff payload
    AdoptRiskLevel,
    /// Snapshot baseline data and activate the follow-up section
    ActivateFollowUp,
    /// Cancel the case's confirmed hold in the slot registry
    CancelConfirmedHold,
}

/// One resolved entry of the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTransition {
    pub to: CasePhase,
    pub effect: TransitionEffect,
    /// Backward loops are counted per case and refused past the configured cap.
    pub backward_loop: bool,
}

impl PhaseTransition {
    const fn forward(to: CasePhase, effect: TransitionEffect) -> Self {
        Self {
            to,
            effect,
            backward_loop: false,
        }
    }

    const fn backward(to: CasePhase, effect: TransitionEffect) -> Self {
        Self {
            to,
            effect,
            backward_loop: true,
        }
    }
}

/// Look up the transition for a handoff arriving while the record is in
/// `phase`. `None` means the handoff has no meaning in this phase (stale or
/// misrouted) — the orchestrator logs and drops it. Inbound event types never
/// transition and always return `None`.
pub fn transition_for(phase: CasePhase, trigger: EventType) -> Option<PhaseTransition> {
    use CasePhase::*;
    use EventType::*;

    let transition = match (phase, trigger) {
        (Intake, IntakeComplete) => {
            PhaseTransition::forward(Assessment, TransitionEffect::None)
        }
        // Forward leg of the intake backward loop: the requested data arrived
        (Intake, IntakeDataProvided) => {
            PhaseTransition::forward(Assessment, TransitionEffect::None)
        }
        (Assessment, AssessmentComplete) => {
            PhaseTransition::forward(Reservation, TransitionEffect::AdoptRiskLevel)
        }
        // Backward loop: assessment found required intake data missing
        (Assessment, NeedsIntakeData) => {
            PhaseTransition::backward(Intake, TransitionEffect::None)
        }
        (Reservation, ReservationComplete) => {
            PhaseTransition::forward(FollowUp, TransitionEffect::ActivateFollowUp)
        }
        // Backward loop: deterioration requires re-triage into a new reservation
        (FollowUp, RescheduleRequest) => {
            PhaseTransition::backward(Reservation, TransitionEffect::CancelConfirmedHold)
        }
        // Stays in follow-up; the follow-up handler runs the severity check
        (FollowUp, DeteriorationAlert) => {
            PhaseTransition::forward(FollowUp, TransitionEffect::None)
        }
        _ => return None,
    };

    Some(transition)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_path() {
        let t = transition_for(CasePhase::Intake, EventType::IntakeComplete).unwrap();
        assert_eq!(t.to, CasePhase::Assessment);
        assert!(!t.backward_loop);

        let t = transition_for(CasePhase::Assessment, EventType::AssessmentComplete).unwrap();
        assert_eq!(t.to, CasePhase::Reservation);
        assert_eq!(t.effect, TransitionEffect::AdoptRiskLevel);

        let t = transition_for(CasePhase::Reservation, EventType::ReservationComplete).unwrap();
        assert_eq!(t.to, CasePhase::FollowUp);
        assert_eq!(t.effect, TransitionEffect::ActivateFollowUp);
    }

    #[test]
    fn test_backward_loops() {
        let t = transition_for(CasePhase::Assessment, EventType::NeedsIntakeData).unwrap();
        assert_eq!(t.to, CasePhase::Intake);
        assert!(t.backward_loop);

        let t = transition_for(CasePhase::FollowUp, EventType::RescheduleRequest).unwrap();
        assert_eq!(t.to, CasePhase::Reservation);
        assert!(t.backward_loop);
        assert_eq!(t.effect, TransitionEffect::CancelConfirmedHold);
    }

    #[test]
    fn test_stale_handoffs_have_no_entry() {
        // A completion handoff arriving after the phase already moved on
        assert!(transition_for(CasePhase::FollowUp, EventType::IntakeComplete).is_none());
        assert!(transition_for(CasePhase::Intake, EventType::AssessmentComplete).is_none());
        assert!(transition_for(CasePhase::Closed, EventType::ReservationComplete).is_none());
    }

    #[test]
    fn test_inbound_events_never_transition() {
        for phase in [
            CasePhase::Intake,
            CasePhase::Assessment,
            CasePhase::Reservation,
            CasePhase::FollowUp,
            CasePhase::Closed,
        ] {
            assert!(transition_for(phase, EventType::SubjectMessage).is_none());
            assert!(transition_for(phase, EventType::Wakeup).is_none());
            assert!(transition_for(phase, EventType::StalenessNudge).is_none());
        }
    }

    #[test]
    fn test_deterioration_alert_stays_in_follow_up() {
        let t = transition_for(CasePhase::FollowUp, EventType::DeteriorationAlert).unwrap();
        assert_eq!(t.to, CasePhase::FollowUp);
        assert!(!t.backward_loop);
        assert_eq!(t.effect, TransitionEffect::None);
    }
}
