//! Configuration management for the rule store.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, StoreError};

/// Prefix for environment variable overrides, e.g. `RULE_STORE__SERVICE__ENVIRONMENT`.
pub const ENV_PREFIX: &str = "RULE_STORE";

/// Main configuration for the rule store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Service behaviour
    #[serde(default)]
    pub service: ServiceConfig,

    /// Storage backend configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Config Service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Environment name carried in change notifications
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Versions kept per rule
    #[serde(default = "default_version_limit")]
    pub version_limit: usize,

    /// Rule set cache lifetime in seconds
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            version_limit: default_version_limit(),
            cache_ttl_secs: default_cache_ttl(),
        }
    }
}

impl ServiceConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

fn default_environment() -> String {
    "production".to_string()
}

fn default_version_limit() -> usize {
    crate::service::DEFAULT_VERSION_LIMIT
}

fn default_cache_ttl() -> u64 {
    60
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory used by the file storage backend
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl StoreConfig {
    /// Load configuration from an optional file, then apply environment
    /// overrides (`RULE_STORE__SECTION__KEY`).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        builder
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| StoreError::Config(e.to_string()))
    }

    /// Load configuration from a YAML file path.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| StoreError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.service.environment, "production");
        assert_eq!(config.service.version_limit, 50);
        assert_eq!(config.service.cache_ttl(), Duration::from_secs(60));
        assert_eq!(config.storage.data_dir, PathBuf::from("data"));
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
service:
  environment: staging
  version_limit: 5
logging:
  json: true
"#;
        let config = StoreConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.service.environment, "staging");
        assert_eq!(config.service.version_limit, 5);
        assert_eq!(config.service.cache_ttl_secs, 60);
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_invalid_yaml_is_config_error() {
        let err = StoreConfig::from_yaml("service: [unclosed").unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rule-store.yaml");
        std::fs::write(&path, "service:\n  cache_ttl_secs: 5\nstorage:\n  data_dir: /tmp/rules\n")
            .unwrap();

        let config = StoreConfig::load(Some(&path)).unwrap();
        assert_eq!(config.service.cache_ttl_secs, 5);
        assert_eq!(config.storage.data_dir, PathBuf::from("/tmp/rules"));
        assert_eq!(config.service.environment, "production");

        let from_yaml = StoreConfig::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(from_yaml.service.cache_ttl_secs, 5);
    }
}
