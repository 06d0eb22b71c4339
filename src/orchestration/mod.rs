//! # Orchestration
//!
//! The orchestrator core and its contracts: phase handlers, delivery-channel
//! dispatchers, and the observability types (processing log, dead letters,
//! metrics).

pub mod core;
pub mod dispatcher;
pub mod handler;
pub mod types;

pub use self::core::OrchestratorCore;
pub use dispatcher::{DeliveryResult, DispatcherRegistry, OutboundResponse, ResponseDispatcher};
pub use handler::{CaseHandler, HandlerError, HandlerResult};
pub use types::{
    CoreMetrics, DeadLetterEntry, HandlerStats, HealthReport, ProcessingLogEntry, ProcessingStatus,
};
