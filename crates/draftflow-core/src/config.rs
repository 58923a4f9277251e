//! Tunables for claims, publishing and validation.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{ConfigError, ConfigResult};

/// Idle time after which a local edit claim is released.
pub const DEFAULT_CLAIM_IDLE_TIMEOUT_MS: u64 = 30_000;

/// Time without refresh after which a remote claim is considered stale.
pub const DEFAULT_REMOTE_CLAIM_STALE_MS: u64 = 30_000;

/// Minimum spacing between refresh broadcasts for a held local claim.
pub const DEFAULT_CLAIM_HEARTBEAT_MS: u64 = 10_000;

pub const DEFAULT_PUBLISH_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_PUBLISH_BACKOFF_BASE_MS: u64 = 200;
pub const DEFAULT_PUBLISH_BACKOFF_MAX_MS: u64 = 5_000;

/// Smallest width/height accepted from the property panel.
pub const DEFAULT_MIN_DIMENSION: f64 = 0.01;

/// Configuration for a collaboration session.
///
/// Every field has a default, so a config file only needs the values it
/// overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub claim_idle_timeout_ms: u64,
    pub remote_claim_stale_ms: u64,
    pub claim_heartbeat_ms: u64,
    pub publish_max_attempts: u32,
    pub publish_backoff_base_ms: u64,
    pub publish_backoff_max_ms: u64,
    pub min_dimension: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            claim_idle_timeout_ms: DEFAULT_CLAIM_IDLE_TIMEOUT_MS,
            remote_claim_stale_ms: DEFAULT_REMOTE_CLAIM_STALE_MS,
            claim_heartbeat_ms: DEFAULT_CLAIM_HEARTBEAT_MS,
            publish_max_attempts: DEFAULT_PUBLISH_MAX_ATTEMPTS,
            publish_backoff_base_ms: DEFAULT_PUBLISH_BACKOFF_BASE_MS,
            publish_backoff_max_ms: DEFAULT_PUBLISH_BACKOFF_MAX_MS,
            min_dimension: DEFAULT_MIN_DIMENSION,
        }
    }
}

impl SyncConfig {
    /// Parse a config from JSON.
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config from a JSON file.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_json(&json)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.publish_max_attempts == 0 {
            return Err(ConfigError::Parse(
                "publish_max_attempts must be at least 1".to_string(),
            ));
        }
        if !(self.min_dimension.is_finite() && self.min_dimension > 0.0) {
            return Err(ConfigError::Parse(
                "min_dimension must be a positive number".to_string(),
            ));
        }
        Ok(())
    }

    /// Delay before retry number `attempt` (1-based): exponential, capped.
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        let shift = attempt.saturating_sub(1).min(20);
        self.publish_backoff_base_ms
            .saturating_mul(1u64 << shift)
            .min(self.publish_backoff_max_ms)
    }
}
