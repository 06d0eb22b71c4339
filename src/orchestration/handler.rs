//! # Case Handler Contract
//!
//! The universal interface every phase handler implements. The orchestrator
//! guarantees the record is loaded and current before `process` is called,
//! that emitted events are looped back through the orchestrator, and that
//! responses are dispatched via the registry.
//!
//! Handlers must absorb their own external-service failures and fall back
//! deterministically — an error returned here is treated as exceptional and
//! dead-letters the event.

use crate::events::EventEnvelope;
use crate::models::CaseRecord;
use crate::orchestration::dispatcher::OutboundResponse;
use async_trait::async_trait;

/// Everything a handler returns after processing one event.
#[derive(Debug)]
pub struct HandlerResult {
    /// The record with all of the handler's mutations applied
    pub record: CaseRecord,
    /// New events for the orchestrator to loop back (handoffs, alerts)
    pub emitted: Vec<EventEnvelope>,
    /// Messages to deliver via the dispatcher registry
    pub responses: Vec<OutboundResponse>,
}

impl HandlerResult {
    /// A result that changes nothing and says nothing.
    pub fn unchanged(record: CaseRecord) -> Self {
        Self {
            record,
            emitted: Vec::new(),
            responses: Vec::new(),
        }
    }

    pub fn with_response(mut self, response: OutboundResponse) -> Self {
        self.responses.push(response);
        self
    }

    pub fn with_emitted(mut self, event: EventEnvelope) -> Self {
        self.emitted.push(event);
        self
    }
}

/// Failure escaping a handler. Should be rare — handlers are expected to
/// degrade deterministically rather than fail.
#[derive(Debug, thiserror::Error)]
#[error("handler failure: {0}")]
pub struct HandlerError(pub String);

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

/// Contract implemented once per phase.
#[async_trait]
pub trait CaseHandler: Send + Sync {
    /// Handler name, used in logs, metrics, and dead letters.
    fn name(&self) -> &str;

    /// Process a single event against the case record. Pure with respect to
    /// its inputs plus whatever external services the handler calls; must
    /// bound its own timeouts and never block the case queue indefinitely.
    async fn process(
        &self,
        event: &EventEnvelope,
        record: CaseRecord,
    ) -> Result<HandlerResult, HandlerError>;
}
