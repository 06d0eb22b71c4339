//! # Caseflow Configuration System
//!
//! Explicit, validated configuration for every component of the coordination
//! core. All values have defaults suitable for development; deployments
//! override them through a YAML file and `CASEFLOW_`-prefixed environment
//! variables.
//!
//! ## Usage
//!
//! ```rust
//! use caseflow_core::config::CaseflowConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CaseflowConfig::load()?;
//! assert!(config.orchestration.max_chain_depth >= 1);
//! # Ok(())
//! # }
//! ```

use crate::error::{CaseflowError, Result};
use crate::state_machine::CasePhase;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration structure for the coordination core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CaseflowConfig {
    /// Orchestrator core limits and guards
    pub orchestration: OrchestrationConfig,

    /// Per-case queue lifecycle
    pub queue: QueueConfig,

    /// Slot registry hold TTL and write discipline
    pub slot_registry: SlotRegistryConfig,

    /// Heartbeat scheduler cadence and wake-up milestones
    pub heartbeat: HeartbeatConfig,

    /// Maximum dwell time per phase before a recovery nudge
    pub staleness: StalenessConfig,
}

/// Limits applied by the orchestrator core while processing one event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationConfig {
    /// Maximum chained handoffs from a single trigger (circuit breaker)
    pub max_chain_depth: u32,

    /// Raw-write retries on a version conflict before the save is abandoned
    pub save_retries: u32,

    /// Backward-loop transitions allowed per case before the loop is refused
    pub max_backward_loops: u32,

    /// Inbound message text beyond this length is truncated
    pub max_message_chars: usize,

    /// Sliding-window length for per-case rate limiting
    pub rate_limit_window_seconds: u64,

    /// Subject messages allowed per case within one window
    pub rate_limit_max_messages: usize,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            max_chain_depth: 10,
            save_retries: 3,
            max_backward_loops: 3,
            max_message_chars: 10_000,
            rate_limit_window_seconds: 60,
            rate_limit_max_messages: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Idle time after which an empty per-case queue is torn down
    pub idle_timeout_seconds: u64,

    /// How often the reaper scans for idle queues
    pub reaper_interval_seconds: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            idle_timeout_seconds: 1800,
            reaper_interval_seconds: 60,
        }
    }
}

impl QueueConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SlotRegistryConfig {
    /// How long a hold blocks its slot before lazy expiry cancels it
    pub hold_ttl_minutes: i64,

    /// Load-mutate-save attempts before a registry operation gives up
    pub write_attempts: u32,
}

impl Default for SlotRegistryConfig {
    fn default() -> Self {
        Self {
            hold_ttl_minutes: 15,
            write_attempts: 4,
        }
    }
}

impl SlotRegistryConfig {
    pub fn hold_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.hold_ttl_minutes)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Seconds between scheduler ticks
    pub check_interval_seconds: u64,

    /// Days after the anchor date at which wake-up events fire
    pub milestone_days: Vec<i64>,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            check_interval_seconds: 3600,
            milestone_days: vec![14, 30, 60, 90],
        }
    }
}

impl HeartbeatConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_seconds)
    }
}

/// Maximum dwell hours per phase. `None` disables the check for that phase;
/// the follow-up phase is long-lived and never has a dwell limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StalenessConfig {
    pub intake_hours: Option<i64>,
    pub assessment_hours: Option<i64>,
    pub reservation_hours: Option<i64>,
}

impl Default for StalenessConfig {
    fn default() -> Self {
        Self {
            intake_hours: Some(48),
            assessment_hours: Some(72),
            reservation_hours: Some(96),
        }
    }
}

impl StalenessConfig {
    /// Dwell limit for a phase, if that phase is subject to staleness detection.
    pub fn dwell_limit(&self, phase: CasePhase) -> Option<chrono::Duration> {
        let hours = match phase {
            CasePhase::Intake => self.intake_hours,
            CasePhase::Assessment => self.assessment_hours,
            CasePhase::Reservation => self.reservation_hours,
            CasePhase::FollowUp | CasePhase::Closed => None,
        };
        hours.map(chrono::Duration::hours)
    }
}

impl CaseflowConfig {
    /// Load configuration from the default file location plus environment
    /// overrides. The file is optional; defaults cover every value.
    ///
    /// File path resolution: `CASEFLOW_CONFIG_PATH` if set, otherwise
    /// `config/caseflow.yaml` relative to the working directory.
    pub fn load() -> Result<Self> {
        let path = std::env::var("CASEFLOW_CONFIG_PATH")
            .unwrap_or_else(|_| "config/caseflow.yaml".to_string());
        Self::load_from_path(&path)
    }

    /// Load configuration from an explicit file path plus environment overrides.
    pub fn load_from_path(path: &str) -> Result<Self> {
        let defaults = config::Config::try_from(&CaseflowConfig::default())
            .map_err(|e| CaseflowError::Configuration(e.to_string()))?;

        let loaded: CaseflowConfig = config::Config::builder()
            .add_source(defaults)
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("CASEFLOW")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| CaseflowError::Configuration(e.to_string()))?
            .try_deserialize()
            .map_err(|e| CaseflowError::Configuration(e.to_string()))?;

        loaded.validate()?;
        Ok(loaded)
    }

    /// Reject configurations that would disable core safety guarantees.
    pub fn validate(&self) -> Result<()> {
        if self.orchestration.max_chain_depth == 0 {
            return Err(CaseflowError::Configuration(
                "orchestration.max_chain_depth must be at least 1".to_string(),
            ));
        }
        if self.slot_registry.hold_ttl_minutes <= 0 {
            return Err(CaseflowError::Configuration(
                "slot_registry.hold_ttl_minutes must be positive".to_string(),
            ));
        }
        if self.slot_registry.write_attempts == 0 {
            return Err(CaseflowError::Configuration(
                "slot_registry.write_attempts must be at least 1".to_string(),
            ));
        }
        if self.heartbeat.check_interval_seconds == 0 {
            return Err(CaseflowError::Configuration(
                "heartbeat.check_interval_seconds must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = CaseflowConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.orchestration.max_chain_depth, 10);
        assert_eq!(config.slot_registry.hold_ttl_minutes, 15);
        assert_eq!(config.heartbeat.milestone_days, vec![14, 30, 60, 90]);
    }

    #[test]
    fn test_dwell_limits() {
        let staleness = StalenessConfig::default();
        assert_eq!(
            staleness.dwell_limit(CasePhase::Intake),
            Some(chrono::Duration::hours(48))
        );
        assert_eq!(staleness.dwell_limit(CasePhase::FollowUp), None);
        assert_eq!(staleness.dwell_limit(CasePhase::Closed), None);
    }

    #[test]
    fn test_load_from_yaml_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".yaml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            "orchestration:\n  max_chain_depth: 5\nslot_registry:\n  hold_ttl_minutes: 30"
        )
        .unwrap();

        let config = CaseflowConfig::load_from_path(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.orchestration.max_chain_depth, 5);
        assert_eq!(config.slot_registry.hold_ttl_minutes, 30);
        // Untouched sections keep their defaults
        assert_eq!(config.queue.idle_timeout_seconds, 1800);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = CaseflowConfig {
            orchestration: OrchestrationConfig {
                max_chain_depth: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
