//! `strato.yaml` project configuration

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub const DEFAULT_TOKEN_ENV: &str = "STRATOFLOW_API_TOKEN";

/// Parsed project configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// Base URL of the remote API
    pub endpoint: String,

    #[serde(default = "default_region")]
    pub region: String,

    /// Environment variable holding the API token
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// Directory holding `state.json` and `lock.json`, relative to the config file
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Resources reconciled in parallel
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
}

fn default_region() -> String {
    "default".to_string()
}

fn default_token_env() -> String {
    DEFAULT_TOKEN_ENV.to_string()
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".stratoflow")
}

fn default_concurrency() -> usize {
    4
}

/// Per-phase timeouts in seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimeoutConfig {
    pub create: u64,
    pub read: u64,
    pub update: u64,
    pub delete: u64,
    pub poll: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            create: 300,
            read: 180,
            update: 300,
            delete: 300,
            poll: 1200,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Fraction of each delay randomized, 0.0 to 1.0
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Per action
    pub requests_per_second: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 20,
        }
    }
}

/// One declared resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceConfig {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub name: String,
    /// Attribute values, checked against the type's schema by the engine
    #[serde(default)]
    pub config: serde_json::Value,
}

impl ResourceConfig {
    /// `type.name`
    pub fn address(&self) -> String {
        format!("{}.{}", self.resource_type, self.name)
    }
}

impl ProjectConfig {
    pub fn from_yaml(content: &str) -> std::result::Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    /// Check constraints serde cannot express
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.endpoint.trim().is_empty() {
            return Err("endpoint must not be empty".to_string());
        }
        if self.concurrency == 0 {
            return Err("concurrency must be at least 1".to_string());
        }
        if self.rate_limit.requests_per_second == 0 {
            return Err("rate_limit.requests_per_second must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err(format!("retry.jitter must be within 0..1, got {}", self.retry.jitter));
        }
        if self.retry.multiplier < 1.0 {
            return Err(format!(
                "retry.multiplier must be at least 1, got {}",
                self.retry.multiplier
            ));
        }

        let mut seen = HashSet::new();
        for resource in &self.resources {
            if resource.resource_type.is_empty() || resource.name.is_empty() {
                return Err("resources need both a type and a name".to_string());
            }
            if resource.name.contains('.') {
                return Err(format!(
                    "resource name '{}' must not contain '.'",
                    resource.name
                ));
            }
            if !seen.insert(resource.address()) {
                return Err(format!("{} is declared twice", resource.address()));
            }
        }
        Ok(())
    }

    /// Resolve `state_dir` against the directory of the config file
    pub fn state_dir_for(&self, config_path: &Path) -> PathBuf {
        if self.state_dir.is_absolute() {
            return self.state_dir.clone();
        }
        config_path
            .parent()
            .map(|dir| dir.join(&self.state_dir))
            .unwrap_or_else(|| self.state_dir.clone())
    }

    pub fn resource(&self, address: &str) -> Option<&ResourceConfig> {
        self.resources.iter().find(|r| r.address() == address)
    }
}

/// Read, parse and validate a config file
pub fn load(path: &Path) -> Result<ProjectConfig> {
    let content = std::fs::read_to_string(path)?;
    let config = ProjectConfig::from_yaml(&content).map_err(|e| ConfigError::Invalid {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    config.validate().map_err(|message| ConfigError::Invalid {
        path: path.display().to_string(),
        message,
    })?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = ProjectConfig::from_yaml("endpoint: https://api.example.com\n").unwrap();
        assert_eq!(config.region, "default");
        assert_eq!(config.token_env, "STRATOFLOW_API_TOKEN");
        assert_eq!(config.state_dir, PathBuf::from(".stratoflow"));
        assert_eq!(config.timeouts.read, 180);
        assert_eq!(config.timeouts.poll, 1200);
        assert_eq!(config.retry.initial_delay_ms, 1000);
        assert_eq!(config.rate_limit.requests_per_second, 20);
        assert_eq!(config.concurrency, 4);
        assert!(config.resources.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_resources_and_overrides() {
        let yaml = r#"
endpoint: https://api.example.com
region: ap-tokyo
timeouts:
  create: 600
retry:
  jitter: 0.0
resources:
  - type: clickhouse_instance
    name: analytics
    config:
      name: analytics
      zone: ap-tokyo-3
      tags:
        env: prod
"#;
        let config = ProjectConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.region, "ap-tokyo");
        assert_eq!(config.timeouts.create, 600);
        assert_eq!(config.timeouts.delete, 300);
        assert_eq!(config.retry.jitter, 0.0);
        assert_eq!(config.retry.max_delay_ms, 30_000);

        let resource = config.resource("clickhouse_instance.analytics").unwrap();
        assert_eq!(resource.config["zone"], "ap-tokyo-3");
        assert_eq!(resource.config["tags"]["env"], "prod");
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = ProjectConfig::from_yaml("endpoint: x\nendpiont: y\n").unwrap_err();
        assert!(err.to_string().contains("endpiont"));
    }

    #[test]
    fn test_duplicate_address_rejected() {
        let yaml = r#"
endpoint: https://api.example.com
resources:
  - { type: monitor_alarm_notice, name: ops }
  - { type: monitor_alarm_notice, name: ops }
"#;
        let config = ProjectConfig::from_yaml(yaml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("declared twice"));
    }

    #[test]
    fn test_state_dir_relative_to_config() {
        let config = ProjectConfig::from_yaml("endpoint: x\n").unwrap();
        let dir = config.state_dir_for(Path::new("/srv/project/strato.yaml"));
        assert_eq!(dir, PathBuf::from("/srv/project/.stratoflow"));
    }

    #[test]
    fn test_load_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strato.yaml");
        std::fs::write(&path, "endpoint: ''\n").unwrap();

        let err = load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
        assert!(err.to_string().contains("endpoint must not be empty"));
    }
}
