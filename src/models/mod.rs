//! # Data Models
//!
//! The case record aggregate and the slot-hold types shared by the slot
//! registry and the reservation section.

pub mod case_record;
pub mod slot_hold;

pub use case_record::{
    AssessmentDocument, AssessmentQuestion, AssessmentSection, CaseHeader, CaseRecord,
    FollowUpEntry, FollowUpSection, IntakeSection, JournalEntry, ReservationSection, RiskLevel,
};
pub use slot_hold::{new_hold_id, HoldStatus, SlotCandidate, SlotHold, SlotOption};
