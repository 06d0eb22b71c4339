//! # Storage Layer
//!
//! The object-store contract plus the two stores built on it: the per-case
//! record store and the shared slot registry. Both use the same conditional
//! (version-matched) write discipline against their own key namespaces.

pub mod case_store;
pub mod object_store;
pub mod slot_registry;

pub use case_store::{CaseStore, SaveOutcome};
pub use object_store::{InMemoryObjectStore, ObjectStore, StoreError, Version};
pub use slot_registry::SlotRegistry;
