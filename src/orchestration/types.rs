//! # Orchestration Types
//!
//! Shared types for the orchestrator core: processing-log entries, dead
//! letters, metrics snapshots, and the health report.

use crate::events::{EventEnvelope, EventType, SenderRole};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Terminal status of one processed event, recorded in the processing log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    /// The handler processed the event
    Ok,
    /// The handler failed; the event was dead-lettered
    Error,
    /// The handoff chain exceeded the maximum depth and was truncated
    CircuitBreaker,
    /// The event id was already processed for this case
    Duplicate,
    /// The case exceeded its message rate limit
    RateLimited,
    /// No handler owns the event in the record's current phase
    NoTarget,
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Error => write!(f, "error"),
            Self::CircuitBreaker => write!(f, "circuit_breaker"),
            Self::Duplicate => write!(f, "duplicate"),
            Self::RateLimited => write!(f, "rate_limited"),
            Self::NoTarget => write!(f, "no_target"),
        }
    }
}

/// One entry of the append-only processing log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingLogEntry {
    pub event_id: Uuid,
    pub event_type: EventType,
    pub case_id: String,
    pub sender_id: String,
    pub sender_role: SenderRole,
    pub status: ProcessingStatus,
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ProcessingLogEntry {
    pub fn new(event: &EventEnvelope, status: ProcessingStatus, detail: Option<String>) -> Self {
        Self {
            event_id: event.event_id,
            event_type: event.event_type,
            case_id: event.case_id.clone(),
            sender_id: event.sender_id.clone(),
            sender_role: event.sender_role,
            status,
            detail,
            timestamp: Utc::now(),
        }
    }
}

/// A durably retained event that could not be processed, kept for operator
/// replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub event: EventEnvelope,
    pub handler: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

/// Per-handler invocation statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HandlerStats {
    pub invocations: u64,
    pub failures: u64,
    pub total_duration_ms: u64,
}

impl HandlerStats {
    pub fn record(&mut self, duration: Duration, failed: bool) {
        self.invocations += 1;
        if failed {
            self.failures += 1;
        }
        self.total_duration_ms += duration.as_millis() as u64;
    }

    pub fn average_ms(&self) -> f64 {
        if self.invocations == 0 {
            0.0
        } else {
            self.total_duration_ms as f64 / self.invocations as f64
        }
    }
}

/// Snapshot of the orchestrator's counters for observability.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreMetrics {
    pub events_processed: u64,
    pub events_failed: u64,
    pub events_rate_limited: u64,
    pub save_failures: u64,
    pub circuit_breaker_trips: u64,
    pub handler_stats: HashMap<String, HandlerStats>,
}

/// Health check result across the orchestrator's collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub handlers_registered: Vec<String>,
    pub channels_registered: Vec<String>,
    pub events_processed: u64,
    pub events_failed: u64,
    pub dead_letter_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processing_status_display() {
        assert_eq!(ProcessingStatus::CircuitBreaker.to_string(), "circuit_breaker");
        assert_eq!(ProcessingStatus::Ok.to_string(), "ok");
    }

    #[test]
    fn test_handler_stats_accumulate() {
        let mut stats = HandlerStats::default();
        stats.record(Duration::from_millis(10), false);
        stats.record(Duration::from_millis(30), true);
        assert_eq!(stats.invocations, 2);
        assert_eq!(stats.failures, 1);
        assert!((stats.average_ms() - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_log_entry_captures_envelope_metadata() {
        let event = EventEnvelope::subject_message("CASE-1", "hi", "chat");
        let entry = ProcessingLogEntry::new(&event, ProcessingStatus::Ok, None);
        assert_eq!(entry.event_id, event.event_id);
        assert_eq!(entry.case_id, "CASE-1");
        assert_eq!(entry.status, ProcessingStatus::Ok);
    }
}
