//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (OUTPOST_*)
//! 2. TOML config file (if OUTPOST_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod capabilities;
mod retry;
mod validation;

pub use capabilities::Capabilities;
pub use retry::RetryConfig;
pub use validation::ConfigError;

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (OUTPOST_*), nested keys separated by `__`
/// 2. TOML config file (if OUTPOST_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the SQLite database holding cache namespaces and the sync queue.
    ///
    /// Set via OUTPOST_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Base URL of the live persistence API (`POST /data`, `GET /data`).
    ///
    /// When unset, an in-process store is used as the live path.
    #[serde(default)]
    pub api_base_url: Option<String>,

    /// Origin that relative manifest resources and record keys resolve against.
    #[serde(default = "default_origin")]
    pub origin: String,

    /// User-Agent string for HTTP requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Upper bound on a single live write or fetch, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Prefix of the agent's cache namespace; the version is appended.
    #[serde(default = "default_cache_name")]
    pub cache_name: String,

    /// Version of the precache manifest. Bumping it moves the agent to a new namespace.
    #[serde(default = "default_cache_version")]
    pub cache_version: u32,

    /// Resources precached at install, relative to `origin` or absolute.
    #[serde(default = "default_precache")]
    pub precache: Vec<String>,

    /// Whether successful live GET responses are written back into the cache.
    #[serde(default)]
    pub cache_live_fetches: bool,

    /// Total body bytes allowed across all cache namespaces.
    #[serde(default = "default_cache_quota_bytes")]
    pub cache_quota_bytes: u64,

    /// Units of work between progress reports. Defaults to 1% of the job.
    #[serde(default)]
    pub progress_interval: Option<u64>,

    /// Period of the agent's retry tick for pending records, in milliseconds.
    #[serde(default = "default_replay_interval_ms")]
    pub replay_interval_ms: u64,

    /// Retry budget and backoff for replaying queued records.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Runtime capabilities, resolved once at startup.
    #[serde(default)]
    pub capabilities: Capabilities,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./outpost-cache.sqlite")
}

fn default_origin() -> String {
    "http://localhost:3000".into()
}

fn default_user_agent() -> String {
    "outpost/0.1".into()
}

fn default_timeout_ms() -> u64 {
    20_000
}

fn default_cache_name() -> String {
    "worker-app".into()
}

fn default_cache_version() -> u32 {
    1
}

fn default_precache() -> Vec<String> {
    vec!["/".into(), "/worker.js".into(), "/manifest.json".into()]
}

fn default_cache_quota_bytes() -> u64 {
    52_428_800 // 50MB
}

fn default_replay_interval_ms() -> u64 {
    30_000
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            api_base_url: None,
            origin: default_origin(),
            user_agent: default_user_agent(),
            timeout_ms: default_timeout_ms(),
            cache_name: default_cache_name(),
            cache_version: default_cache_version(),
            precache: default_precache(),
            cache_live_fetches: false,
            cache_quota_bytes: default_cache_quota_bytes(),
            progress_interval: None,
            replay_interval_ms: default_replay_interval_ms(),
            retry: RetryConfig::default(),
            capabilities: Capabilities::default(),
        }
    }
}

impl AppConfig {
    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Period of the agent's pending-record retry tick.
    pub fn replay_interval(&self) -> Duration {
        Duration::from_millis(self.replay_interval_ms)
    }

    /// Name of the namespace the agent precaches into and serves from.
    pub fn active_cache_name(&self) -> String {
        format!("{}-v{}", self.cache_name, self.cache_version)
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `OUTPOST_`
    /// 2. TOML file from `OUTPOST_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("OUTPOST_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("OUTPOST_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.db_path, PathBuf::from("./outpost-cache.sqlite"));
        assert_eq!(config.user_agent, "outpost/0.1");
        assert_eq!(config.timeout_ms, 20_000);
        assert_eq!(config.precache, vec!["/", "/worker.js", "/manifest.json"]);
        assert!(config.api_base_url.is_none());
        assert!(config.progress_interval.is_none());
        assert!(!config.cache_live_fetches);
        assert!(config.capabilities.has_persistent_cache);
    }

    #[test]
    fn test_timeout_duration() {
        let config = AppConfig::default();
        assert_eq!(config.timeout(), Duration::from_millis(20_000));
        assert_eq!(config.replay_interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_active_cache_name() {
        let config = AppConfig::default();
        assert_eq!(config.active_cache_name(), "worker-app-v1");

        let config = AppConfig { cache_version: 2, ..Default::default() };
        assert_eq!(config.active_cache_name(), "worker-app-v2");
    }

    #[test]
    fn test_load_layers_env_over_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "outpost.toml",
                r#"
                cache_version = 3
                timeout_ms = 5000

                [retry]
                max_attempts = 5
                "#,
            )?;
            jail.set_env("OUTPOST_CONFIG_FILE", "outpost.toml");
            jail.set_env("OUTPOST_TIMEOUT_MS", "7000");
            jail.set_env("OUTPOST_CAPABILITIES__HAS_PUSH_CHANNEL", "false");

            let config = AppConfig::load().expect("config should load");
            assert_eq!(config.cache_version, 3);
            assert_eq!(config.timeout_ms, 7000);
            assert_eq!(config.retry.max_attempts, 5);
            assert!(!config.capabilities.has_push_channel);
            assert!(config.capabilities.has_background_execution);
            Ok(())
        });
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("OUTPOST_CACHE_VERSION", "0");
            let result = AppConfig::load();
            assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "cache_version"));
            Ok(())
        });
    }
}
