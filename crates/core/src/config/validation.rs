//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::AppConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `timeout_ms` is less than 100ms or exceeds 5 minutes
    /// - `user_agent`, `origin` or `cache_name` is empty
    /// - `cache_version` is 0
    /// - a `precache` entry is blank
    /// - `cache_quota_bytes` is 0
    /// - `progress_interval` is set to 0
    /// - `replay_interval_ms` is less than 100ms
    /// - `retry.max_attempts` is outside 1..=10 or `retry.multiplier` is below 1.0
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ms < 100 {
            return Err(ConfigError::Invalid { field: "timeout_ms".into(), reason: "must be at least 100ms".into() });
        }
        if self.timeout_ms > 300_000 {
            return Err(ConfigError::Invalid {
                field: "timeout_ms".into(),
                reason: "must not exceed 5 minutes (300000ms)".into(),
            });
        }

        if self.user_agent.is_empty() {
            return Err(ConfigError::Invalid { field: "user_agent".into(), reason: "must not be empty".into() });
        }
        if self.origin.trim().is_empty() {
            return Err(ConfigError::Invalid { field: "origin".into(), reason: "must not be empty".into() });
        }
        if self.cache_name.trim().is_empty() {
            return Err(ConfigError::Invalid { field: "cache_name".into(), reason: "must not be empty".into() });
        }
        if self.cache_version == 0 {
            return Err(ConfigError::Invalid { field: "cache_version".into(), reason: "must start at 1".into() });
        }
        if self.precache.iter().any(|r| r.trim().is_empty()) {
            return Err(ConfigError::Invalid { field: "precache".into(), reason: "entries must not be blank".into() });
        }
        if self.cache_quota_bytes == 0 {
            return Err(ConfigError::Invalid {
                field: "cache_quota_bytes".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if self.progress_interval == Some(0) {
            return Err(ConfigError::Invalid {
                field: "progress_interval".into(),
                reason: "must be greater than 0 when set".into(),
            });
        }

        if self.replay_interval_ms < 100 {
            return Err(ConfigError::Invalid {
                field: "replay_interval_ms".into(),
                reason: "must be at least 100ms".into(),
            });
        }

        if self.retry.max_attempts == 0 || self.retry.max_attempts > 10 {
            return Err(ConfigError::Invalid {
                field: "retry.max_attempts".into(),
                reason: "must be between 1 and 10".into(),
            });
        }
        if self.retry.multiplier.is_nan() || self.retry.multiplier < 1.0 {
            return Err(ConfigError::Invalid {
                field: "retry.multiplier".into(),
                reason: "must be at least 1.0".into(),
            });
        }

        if self.api_base_url.is_none() {
            tracing::warn!("api_base_url is not set; the live path is an in-process store that does not survive restarts");
        }

        if !self.capabilities.has_persistent_cache {
            tracing::warn!(
                db_path = %self.db_path.display(),
                "persistent cache disabled; cache namespaces and the sync queue are held in memory"
            );
        }

        Ok(())
    }
}
