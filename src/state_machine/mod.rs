//! # Case Phase State Machine
//!
//! Phase definitions and the explicit transition table. Transitions are fixed
//! at compile time; the orchestrator core applies them and owns their side
//! effects (priority adoption, follow-up activation, hold cancellation).

pub mod states;
pub mod transitions;

pub use states::CasePhase;
pub use transitions::{transition_for, PhaseTransition, TransitionEffect};
