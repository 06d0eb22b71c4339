//! # Structured Error Handling
//!
//! Top-level error taxonomy for the coordination core. Component seams carry
//! their own error enums (`storage::StoreError`, `orchestration::HandlerError`);
//! this type is what crosses the crate's public boundary.

use crate::storage::StoreError;

/// Errors surfaced by the coordination core's public API.
///
/// Only `StoreUnavailable` escapes `process_event` — every other failure class
/// (handler errors, write conflicts, dispatch failures, breaker trips) is
/// absorbed, logged, and recorded where an operator can find it.
#[derive(Debug, thiserror::Error)]
pub enum CaseflowError {
    /// The backing object store could not be reached for either load or create.
    #[error("case store unavailable: {0}")]
    StoreUnavailable(String),

    /// Configuration failed to load or validate.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The queue manager rejected an event (e.g. enqueue after shutdown).
    #[error("queue error: {0}")]
    Queue(String),
}

impl CaseflowError {
    /// Map a storage failure into the one error class allowed to propagate.
    pub fn from_store(err: StoreError) -> Self {
        CaseflowError::StoreUnavailable(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CaseflowError>;
