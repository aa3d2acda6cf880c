//! Engine configuration, loaded from environment variables.
//!
//! Follows the donor's `AuthConfig::from_env` pattern (`MAINTENANCE_` prefix in
//! place of `AUTH_`, `std::env::var` + `unwrap_or_else` defaults, bounds applied
//! after parsing rather than trusted from the environment).

use std::time::Duration;

use crate::types::{validate_wait_timeout, WAIT_TIMEOUT_DEFAULT_SECS};

/// Default poll interval outside fast mode.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
/// Poll interval in fast/demo mode.
pub const FAST_MODE_POLL_INTERVAL_SECS: u64 = 1;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub region: Option<String>,
    pub default_wait_timeout_secs: u64,
    pub poll_interval: Duration,
    pub data_dir: Option<String>,
    pub auto_resume: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            region: None,
            default_wait_timeout_secs: WAIT_TIMEOUT_DEFAULT_SECS,
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            data_dir: None,
            auto_resume: false,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let region = std::env::var("MAINTENANCE_REGION").ok();

        let default_wait_timeout_secs = std::env::var("MAINTENANCE_DEFAULT_WAIT_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .and_then(|v| validate_wait_timeout(v).ok())
            .unwrap_or(WAIT_TIMEOUT_DEFAULT_SECS);

        let fast_mode = std::env::var("MAINTENANCE_FAST_MODE")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let poll_interval = std::env::var("MAINTENANCE_POLL_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or_else(|| {
                Duration::from_secs(if fast_mode {
                    FAST_MODE_POLL_INTERVAL_SECS
                } else {
                    DEFAULT_POLL_INTERVAL_SECS
                })
            });

        let data_dir = std::env::var("MAINTENANCE_DATA_DIR").ok();

        let auto_resume = std::env::var("MAINTENANCE_AUTO_RESUME")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Self {
            region,
            default_wait_timeout_secs,
            poll_interval,
            data_dir,
            auto_resume,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_spec_compliant() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.default_wait_timeout_secs, WAIT_TIMEOUT_DEFAULT_SECS);
        assert_eq!(cfg.poll_interval, Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS));
        assert!(!cfg.auto_resume);
    }
}
