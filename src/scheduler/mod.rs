//! # Scheduling
//!
//! The heartbeat scheduler: periodic wake-ups for dormant follow-up cases
//! and staleness nudges for cases stuck past their phase's dwell limit.

pub mod heartbeat;

pub use heartbeat::HeartbeatScheduler;
