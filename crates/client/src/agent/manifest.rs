//! Versioned list of resources precached at install.

use serde::{Deserialize, Serialize};

use outpost_core::{AppConfig, Error};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheManifest {
    pub version: u32,
    /// Paths relative to the origin, or absolute URLs.
    pub resources: Vec<String>,
}

impl CacheManifest {
    pub fn new(version: u32, resources: Vec<String>) -> Result<Self, Error> {
        if version == 0 {
            return Err(Error::InvalidInput("manifest version must be at least 1".into()));
        }
        if resources.iter().any(|r| r.trim().is_empty()) {
            return Err(Error::InvalidInput("manifest resources cannot be blank".into()));
        }
        Ok(Self { version, resources })
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self { version: config.cache_version, resources: config.precache.clone() }
    }

    /// Namespace this manifest is precached into.
    pub fn namespace(&self, cache_name: &str) -> String {
        format!("{cache_name}-v{}", self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_manifest() {
        let config = AppConfig::default();
        let manifest = CacheManifest::from_config(&config);
        assert_eq!(manifest.version, 1);
        assert_eq!(manifest.resources, vec!["/", "/worker.js", "/manifest.json"]);
        assert_eq!(manifest.namespace(&config.cache_name), "worker-app-v1");
        assert_eq!(manifest.namespace(&config.cache_name), config.active_cache_name());
    }

    #[test]
    fn test_manifest_validation() {
        assert!(CacheManifest::new(0, vec!["/".into()]).is_err());
        assert!(CacheManifest::new(2, vec!["/".into(), "  ".into()]).is_err());
        assert!(CacheManifest::new(2, vec![]).is_ok());
    }
}
