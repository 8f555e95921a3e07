//! Forwarding configuration

use crate::ConfigError;
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_COPY_BUFFER_SIZE: usize = 32 * 1024;
const DEFAULT_STATS_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Per-direction read buffer in bytes
    pub copy_buffer_size: usize,

    /// Reject launches beyond this many live tunnels (unlimited if unset)
    pub max_sessions: Option<usize>,

    /// Seconds between aggregate stats lines
    pub stats_interval_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            copy_buffer_size: DEFAULT_COPY_BUFFER_SIZE,
            max_sessions: None,
            stats_interval_secs: DEFAULT_STATS_INTERVAL_SECS,
        }
    }
}

impl ProxyConfig {
    /// Parse and validate a JSON document. Missing fields take their defaults.
    pub fn from_json(input: &str) -> Result<Self, ConfigError> {
        let config: ProxyConfig = serde_json::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.copy_buffer_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "copy_buffer_size",
                reason: "must be greater than 0".to_string(),
            });
        }

        if self.max_sessions == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "max_sessions",
                reason: "must be greater than 0 when set".to_string(),
            });
        }

        if self.stats_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "stats_interval_secs",
                reason: "must be at least 1 second".to_string(),
            });
        }

        Ok(())
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }
}
