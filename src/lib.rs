#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Caseflow Core
//!
//! Coordination core for long-running, multi-stage case workflows. Many
//! independently-written phase handlers safely read and mutate a shared,
//! versioned case record; the substrate here is what makes that safe:
//!
//! - **Per-case serialization**: one FIFO queue and worker per case — no two
//!   events for the same case ever process concurrently, while different
//!   cases run fully in parallel.
//! - **Optimistic-concurrency persistence**: case records and the slot
//!   registry live in a key-blob object store with version-matched writes.
//!   Record saves are deliberately best-effort under contention — a subject's
//!   reply is never blocked on winning a write race.
//! - **Handoff cascading with a circuit breaker**: handlers emit events to
//!   each other; chains are processed depth-first and truncated at a fixed
//!   maximum depth, so a misbehaving handler can never hang a case.
//! - **Explicit phase transitions**: a compile-time (phase, trigger) table
//!   with bounded backward loops, applied by the orchestrator before routing.
//! - **Slot reservations**: exclusive time-slot holds with TTL expiry,
//!   confirm-one-cancel-rest semantics, and no double allocation across cases.
//! - **Scheduled wake-ups**: a heartbeat loop that revives dormant follow-up
//!   cases at milestones and nudges cases stuck past their phase's dwell time.
//!
//! ## Module Organization
//!
//! - [`events`] - Event envelope and the closed type taxonomy
//! - [`models`] - Case record aggregate and slot-hold types
//! - [`state_machine`] - Phase enum and the explicit transition table
//! - [`storage`] - Object-store contract, case store, slot registry
//! - [`orchestration`] - The orchestrator core and its handler/dispatcher contracts
//! - [`queue`] - Per-case serialization queues
//! - [`scheduler`] - Heartbeat wake-ups and staleness detection
//! - [`config`] - Configuration management
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use caseflow_core::config::CaseflowConfig;
//! use caseflow_core::orchestration::{DispatcherRegistry, OrchestratorCore};
//! use caseflow_core::queue::{CaseQueueManager, EventProcessor};
//! use caseflow_core::storage::{CaseStore, InMemoryObjectStore, SlotRegistry};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CaseflowConfig::load()?;
//! let store = Arc::new(InMemoryObjectStore::new());
//! let case_store = Arc::new(CaseStore::new(store.clone()));
//! let slot_registry = Arc::new(SlotRegistry::new(store, config.slot_registry.clone()));
//!
//! let core = Arc::new(OrchestratorCore::new(
//!     case_store,
//!     slot_registry,
//!     Arc::new(DispatcherRegistry::new()),
//!     config.orchestration.clone(),
//! ));
//! // core.register_handler(...) once per phase, then build the queue:
//! let queue = CaseQueueManager::new(core as Arc<dyn EventProcessor>, config.queue.clone());
//! queue.start();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod queue;
pub mod scheduler;
pub mod state_machine;
pub mod storage;

pub use config::{
    CaseflowConfig, HeartbeatConfig, OrchestrationConfig, QueueConfig, SlotRegistryConfig,
    StalenessConfig,
};
pub use error::{CaseflowError, Result};
pub use events::{EventEnvelope, EventPayload, EventType, SenderRole};
pub use models::{CaseRecord, HoldStatus, RiskLevel, SlotCandidate, SlotHold};
pub use orchestration::{
    CaseHandler, DispatcherRegistry, HandlerResult, OrchestratorCore, OutboundResponse,
    ProcessingStatus, ResponseDispatcher,
};
pub use queue::{CaseQueueManager, EventProcessor};
pub use scheduler::HeartbeatScheduler;
pub use state_machine::CasePhase;
pub use storage::{CaseStore, InMemoryObjectStore, ObjectStore, SaveOutcome, SlotRegistry};
