//! The universal event wrapper — the only object that enters the
//! orchestration loop.

use super::payload::EventPayload;
use super::EventType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Who sent the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderRole {
    /// The case's subject themselves
    Subject,
    /// Someone acting on the subject's behalf
    Proxy,
    /// An outside party (upstream system, referring office, webhook origin)
    ExternalParty,
    /// The system itself — schedulers and handler handoffs
    System,
}

impl fmt::Display for SenderRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Subject => write!(f, "subject"),
            Self::Proxy => write!(f, "proxy"),
            Self::ExternalParty => write!(f, "external_party"),
            Self::System => write!(f, "system"),
        }
    }
}

/// Universal event wrapper. Immutable once constructed; the orchestrator
/// reads only envelope metadata for routing and never inspects the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub event_type: EventType,
    pub case_id: String,
    pub payload: EventPayload,
    /// Free-text origin tag: channel name for inbound events, the emitting
    /// handler's name for handoffs.
    pub source: String,
    pub sender_id: String,
    pub sender_role: SenderRole,
    /// Propagated through an entire handoff chain so the chain can be traced
    /// as one logical operation.
    pub correlation_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl EventEnvelope {
    /// General-purpose constructor; the factories below cover the common shapes.
    pub fn new(
        event_type: EventType,
        case_id: impl Into<String>,
        payload: EventPayload,
        source: impl Into<String>,
        sender_id: impl Into<String>,
        sender_role: SenderRole,
        correlation_id: Option<String>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            case_id: case_id.into(),
            payload,
            source: source.into(),
            sender_id: sender_id.into(),
            sender_role,
            correlation_id,
            created_at: Utc::now(),
        }
    }

    /// An inbound message from the case's subject.
    pub fn subject_message(
        case_id: impl Into<String>,
        text: impl Into<String>,
        channel: impl Into<String>,
    ) -> Self {
        let channel = channel.into();
        Self::new(
            EventType::SubjectMessage,
            case_id,
            EventPayload::new()
                .with("text", text.into())
                .with("channel", channel.clone()),
            channel,
            "subject",
            SenderRole::Subject,
            None,
        )
    }

    /// A document upload, referenced by an opaque file handle.
    pub fn document_uploaded(
        case_id: impl Into<String>,
        file_ref: impl Into<String>,
        channel: impl Into<String>,
    ) -> Self {
        let channel = channel.into();
        Self::new(
            EventType::DocumentUploaded,
            case_id,
            EventPayload::new()
                .with("file_ref", file_ref.into())
                .with("channel", channel.clone()),
            channel,
            "subject",
            SenderRole::Subject,
            None,
        )
    }

    /// A handoff emitted by a handler to transfer control. Always carries the
    /// triggering event's correlation id so the whole chain traces together.
    pub fn handoff(
        event_type: EventType,
        case_id: impl Into<String>,
        source_handler: impl Into<String>,
        payload: EventPayload,
        correlation_id: Option<String>,
    ) -> Self {
        let source_handler = source_handler.into();
        Self::new(
            event_type,
            case_id,
            payload,
            source_handler.clone(),
            source_handler,
            SenderRole::System,
            correlation_id,
        )
    }

    /// A scheduler wake-up for a dormant follow-up case.
    pub fn wakeup(case_id: impl Into<String>, days_since_anchor: i64, milestone: &str) -> Self {
        Self::new(
            EventType::Wakeup,
            case_id,
            EventPayload::new()
                .with("days_since_anchor", days_since_anchor)
                .with("milestone", milestone),
            "heartbeat_scheduler",
            "system",
            SenderRole::System,
            None,
        )
    }

    /// A recovery nudge for a case stuck past its phase's dwell limit.
    pub fn staleness_nudge(case_id: impl Into<String>, phase: &str) -> Self {
        Self::new(
            EventType::StalenessNudge,
            case_id,
            EventPayload::new().with("stale_phase", phase),
            "heartbeat_scheduler",
            "system",
            SenderRole::System,
            None,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_message_shape() {
        let event = EventEnvelope::subject_message("CASE-1", "hello there", "sms");
        assert_eq!(event.event_type, EventType::SubjectMessage);
        assert_eq!(event.case_id, "CASE-1");
        assert_eq!(event.sender_role, SenderRole::Subject);
        assert_eq!(event.payload.text(), "hello there");
        assert_eq!(event.payload.channel(), "sms");
        assert_eq!(event.source, "sms");
        assert!(event.correlation_id.is_none());
    }

    #[test]
    fn test_handoff_propagates_correlation() {
        let trigger = EventEnvelope::subject_message("CASE-1", "done", "chat");
        let correlation = Some("chain-42".to_string());
        let handoff = EventEnvelope::handoff(
            EventType::IntakeComplete,
            trigger.case_id.clone(),
            "intake",
            EventPayload::new(),
            correlation.clone(),
        );
        assert_eq!(handoff.sender_role, SenderRole::System);
        assert_eq!(handoff.source, "intake");
        assert_eq!(handoff.correlation_id, correlation);
        assert!(handoff.event_type.is_handoff());
    }

    #[test]
    fn test_event_ids_are_unique() {
        let a = EventEnvelope::wakeup("CASE-1", 14, "wakeup_14d");
        let b = EventEnvelope::wakeup("CASE-1", 14, "wakeup_14d");
        assert_ne!(a.event_id, b.event_id);
        assert_eq!(a.payload.i64_field("days_since_anchor"), Some(14));
    }

    #[test]
    fn test_envelope_equality() {
        let event = EventEnvelope::subject_message("CASE-1", "hi", "chat");
        let same = event.clone();
        assert_eq!(event, same);
    }

    #[test]
    fn test_envelope_serde_round_trip() {
        let event = EventEnvelope::staleness_nudge("CASE-9", "intake");
        let json = serde_json::to_string(&event).unwrap();
        let parsed: EventEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }
}
