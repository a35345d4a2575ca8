//! Application Configuration
//!
//! YAML-loadable settings for the cache and the event store. Every section
//! has defaults, so an empty document is a valid configuration.
//!
//! ```yaml
//! database_url: sqlite://stratum.db
//! cache:
//!   provider: hybrid
//!   strategy: lru
//!   max_size: 5000
//!   remote:
//!     host: redis.local
//!     key_prefix: "app:"
//! event_store:
//!   snapshot_frequency: 50
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::cache::CacheConfig;
use crate::error::{Error, Result};
use crate::events::{EventStoreOptions, TableNames};

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// `sqlite:` URL of the event database
    pub database_url: String,
    pub cache: CacheConfig,
    pub event_store: EventStoreOptions,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://stratum.db".to_string(),
            cache: CacheConfig::default(),
            event_store: EventStoreOptions::default(),
        }
    }
}

impl AppConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn validate(&self) -> Result<()> {
        if self.database_url.is_empty() {
            return Err(Error::Config("database_url must not be empty".into()));
        }
        self.cache.validate()?;
        TableNames::new(&self.event_store.table_prefix)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheProvider, EvictionStrategy};
    use assert_matches::assert_matches;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = AppConfig::from_yaml_str("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.cache.default_ttl_seconds, 3600);
        assert_eq!(config.event_store.snapshot_frequency, 100);
    }

    #[test]
    fn test_partial_document() {
        let yaml = r#"
cache:
  provider: hybrid
  strategy: lfu
  remote:
    host: redis.local
    key_prefix: "app:"
event_store:
  table_prefix: Orders
"#;
        let config = AppConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.cache.provider, CacheProvider::Hybrid);
        assert_eq!(config.cache.strategy, EvictionStrategy::Lfu);
        let remote = config.cache.remote.unwrap();
        assert_eq!(remote.host, "redis.local");
        assert_eq!(remote.port, 6379);
        assert_eq!(config.event_store.table_prefix, "Orders");
        assert_eq!(config.event_store.retention_days, 30);
    }

    #[test]
    fn test_invalid_documents() {
        assert_matches!(
            AppConfig::from_yaml_str("cache:\n  provider: redis\n"),
            Err(Error::Config(_))
        );
        assert_matches!(
            AppConfig::from_yaml_str("event_store:\n  table_prefix: \"a-b\"\n"),
            Err(Error::Config(_))
        );
        assert_matches!(
            AppConfig::from_yaml_str("cache:\n  strategy: random\n"),
            Err(Error::Config(_))
        );
    }

    #[test]
    fn test_missing_file() {
        assert_matches!(
            AppConfig::from_yaml_file("/nonexistent/stratum.yaml"),
            Err(Error::Io(_))
        );
    }
}
