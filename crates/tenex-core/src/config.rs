// Engine configuration
//
// EngineConfig is a plain, host-constructed configuration struct. There is
// deliberately no flag-parsing or env-loading here: per spec §1, CLI
// front-ends and configuration loading are external collaborators. A host
// builds an EngineConfig however it likes and hands it to the Coordinator.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Default length in hex chars of a short id. Kept as a named constant
/// rather than hardcoded at call sites so a host can shrink it for
/// collision-stress tests without touching engine internals.
pub const DEFAULT_SHORT_ID_LEN: usize = 12;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum time an Execution Queue lock may be held before it is
    /// force-released and the conversation returned to `chat` (spec §4.5, §5).
    #[serde(default = "default_max_duration_ms")]
    pub max_duration_ms: u64,

    /// Fraction of `max_duration_ms` elapsed before a `timeout-warning`
    /// fires, e.g. `0.8` for an 80%-elapsed warning.
    #[serde(default = "default_timeout_warning_fraction")]
    pub timeout_warning_fraction: f64,

    /// Length in hex chars of a short id.
    #[serde(default = "default_short_id_len")]
    pub short_id_len: usize,

    /// Root directory for the filesystem Persistence Adapter, e.g. `.tenex`.
    #[serde(default = "default_persistence_root")]
    pub persistence_root: String,
}

fn default_max_duration_ms() -> u64 {
    15 * 60 * 1000
}

fn default_timeout_warning_fraction() -> f64 {
    0.8
}

fn default_short_id_len() -> usize {
    DEFAULT_SHORT_ID_LEN
}

fn default_persistence_root() -> String {
    ".tenex".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_duration_ms: default_max_duration_ms(),
            timeout_warning_fraction: default_timeout_warning_fraction(),
            short_id_len: default_short_id_len(),
            persistence_root: default_persistence_root(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects nonsensical timing configuration. Not called automatically —
    /// a host calls this once at startup, matching the teacher's
    /// `AgentConfigBuilder` validation posture of refusing to start rather
    /// than silently clamping.
    pub fn validate(&self) -> Result<()> {
        if self.max_duration_ms == 0 {
            return Err(EngineError::configuration(
                "max_duration_ms must be greater than zero",
            ));
        }
        if !(self.timeout_warning_fraction > 0.0 && self.timeout_warning_fraction < 1.0) {
            return Err(EngineError::configuration(
                "timeout_warning_fraction must be in (0.0, 1.0)",
            ));
        }
        if self.short_id_len == 0 {
            return Err(EngineError::configuration("short_id_len must be greater than zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_duration_rejected() {
        let mut config = EngineConfig::default();
        config.max_duration_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn warning_fraction_out_of_range_rejected() {
        let mut config = EngineConfig::default();
        config.timeout_warning_fraction = 1.5;
        assert!(config.validate().is_err());
        config.timeout_warning_fraction = 0.0;
        assert!(config.validate().is_err());
    }
}
