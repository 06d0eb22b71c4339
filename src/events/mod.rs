//! # Event Envelope & Type Taxonomy
//!
//! Every signal entering the coordination loop — a subject's message, a
//! document upload, a scheduler wake-up, a handler handoff — is wrapped in the
//! same [`EventEnvelope`]. The orchestrator only reads envelope metadata for
//! routing; payload interpretation belongs to the handler boundary.

mod envelope;
mod payload;

pub use envelope::{EventEnvelope, SenderRole};
pub use payload::EventPayload;

use serde::{Deserialize, Serialize};
use std::fmt;

/// All event types recognised by the orchestrator. Closed set: inbound types
/// arrive from outside the loop, handoff types are emitted by handlers and
/// looped back through the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    // Inbound events (from subjects, proxies, external parties, the system)
    SubjectMessage,
    DocumentUploaded,
    ExternalSignal,
    OperatorCommand,
    Wakeup,
    StalenessNudge,

    // Handler handoff events (internal, looped back through the orchestrator)
    IntakeComplete,
    IntakeDataProvided,
    AssessmentComplete,
    ReservationComplete,
    NeedsIntakeData,
    DeteriorationAlert,
    RescheduleRequest,
}

impl EventType {
    /// True for events that originate outside the orchestration loop.
    pub fn is_inbound(&self) -> bool {
        matches!(
            self,
            Self::SubjectMessage
                | Self::DocumentUploaded
                | Self::ExternalSignal
                | Self::OperatorCommand
                | Self::Wakeup
                | Self::StalenessNudge
        )
    }

    /// True for events one handler emits to transfer control to another.
    pub fn is_handoff(&self) -> bool {
        !self.is_inbound()
    }

    /// String representation for logging and log-entry storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SubjectMessage => "subject_message",
            Self::DocumentUploaded => "document_uploaded",
            Self::ExternalSignal => "external_signal",
            Self::OperatorCommand => "operator_command",
            Self::Wakeup => "wakeup",
            Self::StalenessNudge => "staleness_nudge",
            Self::IntakeComplete => "intake_complete",
            Self::IntakeDataProvided => "intake_data_provided",
            Self::AssessmentComplete => "assessment_complete",
            Self::ReservationComplete => "reservation_complete",
            Self::NeedsIntakeData => "needs_intake_data",
            Self::DeteriorationAlert => "deterioration_alert",
            Self::RescheduleRequest => "reschedule_request",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy_partition() {
        assert!(EventType::SubjectMessage.is_inbound());
        assert!(EventType::Wakeup.is_inbound());
        assert!(EventType::StalenessNudge.is_inbound());
        assert!(!EventType::SubjectMessage.is_handoff());

        assert!(EventType::IntakeComplete.is_handoff());
        assert!(EventType::RescheduleRequest.is_handoff());
        assert!(!EventType::RescheduleRequest.is_inbound());
    }

    #[test]
    fn test_event_type_serde() {
        let json = serde_json::to_string(&EventType::AssessmentComplete).unwrap();
        assert_eq!(json, "\"assessment_complete\"");
        let parsed: EventType = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, EventType::AssessmentComplete);
    }
}
