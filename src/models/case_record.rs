//! # Case Record
//!
//! The sole mutable aggregate per case: phase, priority, per-stage sections,
//! and a capped journal of interactions. One structured JSON document per
//! case in the backing store.
//!
//! Sections accrete — handlers add or correct fields, they never erase
//! history. Each section is owned by the handler of its phase but readable by
//! every handler.

use crate::models::slot_hold::SlotOption;
use crate::state_machine::CasePhase;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Journal entries kept per case; older entries are dropped beyond this.
pub const MAX_JOURNAL_ENTRIES: usize = 100;

/// Follow-up observation entries kept per case.
pub const MAX_FOLLOW_UP_ENTRIES: usize = 50;

/// Intake fields that must be collected before intake can complete.
pub const REQUIRED_INTAKE_FIELDS: &[&str] = &[
    "name",
    "date_of_birth",
    "reference_number",
    "phone",
    "contact_preference",
];

/// Priority level assigned by assessment, orthogonal to phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(format!("Invalid risk level: {s}")),
        }
    }
}

impl Default for RiskLevel {
    fn default() -> Self {
        Self::None
    }
}

/// Header block: identity, phase, priority, and bookkeeping timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseHeader {
    pub case_id: String,
    pub current_phase: CasePhase,
    #[serde(default)]
    pub risk_level: RiskLevel,
    pub created: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub correlation_id: Option<String>,
    /// When the current phase was entered — the reference point for
    /// staleness detection.
    pub phase_entered_at: DateTime<Utc>,
}

/// Intake section: free-form collected fields plus completion bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeSection {
    /// Collected field values, keyed by field name
    pub fields: Map<String, Value>,
    pub fields_collected: Vec<String>,
    pub fields_missing: Vec<String>,
    pub complete: bool,
}

impl Default for IntakeSection {
    fn default() -> Self {
        Self {
            fields: Map::new(),
            fields_collected: Vec::new(),
            fields_missing: REQUIRED_INTAKE_FIELDS
                .iter()
                .map(|f| (*f).to_string())
                .collect(),
            complete: false,
        }
    }
}

impl IntakeSection {
    /// Record a collected field value and update the bookkeeping lists.
    pub fn mark_field_collected(&mut self, field: &str, value: impl Into<Value>) {
        self.fields.insert(field.to_string(), value.into());
        if !self.fields_collected.iter().any(|f| f == field) {
            self.fields_collected.push(field.to_string());
        }
        self.fields_missing.retain(|f| f != field);
    }

    /// Required fields not yet collected.
    pub fn missing_required(&self) -> Vec<&'static str> {
        REQUIRED_INTAKE_FIELDS
            .iter()
            .filter(|f| !self.fields_collected.iter().any(|c| c == *f))
            .copied()
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing_required().is_empty()
    }
}

/// One question asked during assessment, with its answer once received.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssessmentQuestion {
    pub question: String,
    pub answer: Option<String>,
    pub answered_by: Option<String>,
    pub asked_at: Option<DateTime<Utc>>,
}

/// A document collected during assessment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssessmentDocument {
    pub kind: String,
    pub source: String,
    pub file_ref: String,
    pub processed: bool,
    /// Content hash for deduplication — the same upload is never processed twice
    pub content_hash: Option<String>,
}

/// Assessment section: findings, flags, risk scoring, and the backward-loop
/// counter bounding how often assessment may send the case back to intake.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssessmentSection {
    pub summary: Option<String>,
    pub findings: Vec<String>,
    pub flags: Vec<String>,
    pub questions: Vec<AssessmentQuestion>,
    pub documents: Vec<AssessmentDocument>,
    pub risk_level: RiskLevel,
    pub risk_reasoning: Option<String>,
    pub backward_loop_count: u32,
}

impl AssessmentSection {
    pub fn has_document_hash(&self, content_hash: &str) -> bool {
        self.documents
            .iter()
            .any(|d| d.content_hash.as_deref() == Some(content_hash))
    }
}

/// Reservation section: offered/selected slots and the confirmed booking.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReservationSection {
    pub slots_offered: Vec<SlotOption>,
    pub slots_rejected: Vec<SlotOption>,
    pub slot_selected: Option<SlotOption>,
    /// Downstream booking identifier once confirmed
    pub linked_reference: Option<String>,
    pub location: Option<String>,
    pub confirmed: bool,
    /// Prior bookings this reservation superseded (reschedule history)
    pub rescheduled_from: Vec<SlotOption>,
}

/// One dated observation in the follow-up log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FollowUpEntry {
    pub date: String,
    pub kind: String,
    pub action: String,
    pub detail: String,
}

/// Follow-up section: baseline snapshot plus a capped observation log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FollowUpSection {
    /// Wake-up scheduling is only performed while this is set
    pub active: bool,
    /// Baseline data snapshotted when the reservation completed
    pub baseline: Map<String, Value>,
    pub entries: Vec<FollowUpEntry>,
    pub alerts_fired: Vec<String>,
    /// Reference date (YYYY-MM-DD) milestones are computed against
    pub anchor_date: Option<String>,
    pub next_scheduled_check: Option<String>,
}

impl FollowUpSection {
    /// Append an observation, dropping the oldest beyond the cap.
    pub fn add_entry(&mut self, entry: FollowUpEntry) {
        self.entries.push(entry);
        if self.entries.len() > MAX_FOLLOW_UP_ENTRIES {
            let excess = self.entries.len() - MAX_FOLLOW_UP_ENTRIES;
            self.entries.drain(..excess);
        }
    }

    /// True if a wake-up for this milestone key was already recorded.
    pub fn has_milestone(&self, milestone: &str) -> bool {
        self.entries.iter().any(|e| e.kind == milestone)
    }
}

/// One interaction in the case journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub timestamp: DateTime<Utc>,
    /// e.g. "subject→core", "core→subject", "system"
    pub direction: String,
    pub channel: String,
    pub message: String,
    /// Machine-readable marker tag for system entries
    pub tag: Option<String>,
}

impl JournalEntry {
    pub fn inbound(role: &str, channel: &str, message: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            direction: format!("{role}→core"),
            channel: channel.to_string(),
            message: message.to_string(),
            tag: None,
        }
    }

    pub fn outbound(recipient: &str, channel: &str, message: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            direction: format!("core→{recipient}"),
            channel: channel.to_string(),
            message: message.to_string(),
            tag: None,
        }
    }

    pub fn system(tag: &str, message: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            direction: "system".to_string(),
            channel: String::new(),
            message: message.to_string(),
            tag: Some(tag.to_string()),
        }
    }
}

/// The versioned state aggregate for one case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseRecord {
    pub header: CaseHeader,
    #[serde(default)]
    pub intake: IntakeSection,
    #[serde(default)]
    pub assessment: AssessmentSection,
    #[serde(default)]
    pub reservation: ReservationSection,
    #[serde(default)]
    pub follow_up: FollowUpSection,
    #[serde(default)]
    pub journal: Vec<JournalEntry>,
}

impl CaseRecord {
    /// Factory for a fresh record in the intake phase.
    pub fn create_new(case_id: impl Into<String>, correlation_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            header: CaseHeader {
                case_id: case_id.into(),
                current_phase: CasePhase::default(),
                risk_level: RiskLevel::default(),
                created: now,
                last_updated: now,
                correlation_id,
                phase_entered_at: now,
            },
            intake: IntakeSection::default(),
            assessment: AssessmentSection::default(),
            reservation: ReservationSection::default(),
            follow_up: FollowUpSection::default(),
            journal: Vec::new(),
        }
    }

    pub fn case_id(&self) -> &str {
        &self.header.case_id
    }

    pub fn current_phase(&self) -> CasePhase {
        self.header.current_phase
    }

    /// Move the record to a new phase, stamping `phase_entered_at`.
    pub fn enter_phase(&mut self, phase: CasePhase) {
        if self.header.current_phase != phase {
            self.header.current_phase = phase;
            self.header.phase_entered_at = Utc::now();
        }
    }

    /// Refresh the last-updated timestamp.
    pub fn touch(&mut self) {
        self.header.last_updated = Utc::now();
    }

    /// Append to the journal, dropping the oldest entries beyond the cap.
    pub fn add_journal(&mut self, entry: JournalEntry) {
        self.journal.push(entry);
        if self.journal.len() > MAX_JOURNAL_ENTRIES {
            let excess = self.journal.len() - MAX_JOURNAL_ENTRIES;
            self.journal.drain(..excess);
        }
    }

    /// Marker tag identifying one staleness episode: the phase plus the
    /// second it was entered. A new episode (re-entering the phase) gets a
    /// fresh tag, so the nudge fires again.
    pub fn staleness_marker_tag(phase: CasePhase, entered_at: DateTime<Utc>) -> String {
        format!("staleness_nudge:{phase}:{}", entered_at.timestamp())
    }

    /// True if a staleness nudge was already surfaced for the current episode.
    pub fn has_staleness_marker(&self) -> bool {
        let tag = Self::staleness_marker_tag(self.header.current_phase, self.header.phase_entered_at);
        self.journal.iter().any(|e| e.tag.as_deref() == Some(&tag))
    }

    /// Record that a staleness nudge was surfaced for the current episode.
    pub fn mark_staleness_nudge(&mut self) {
        let tag = Self::staleness_marker_tag(self.header.current_phase, self.header.phase_entered_at);
        let message = format!(
            "recovery nudge surfaced for case stuck in {}",
            self.header.current_phase
        );
        self.add_journal(JournalEntry::system(&tag, &message));
    }
}
