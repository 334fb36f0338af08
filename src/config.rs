//! Configuration Management
//!
//! Handles persistent configuration storage for assessctl and loading of
//! desired assessment configurations.

use crate::assessment::model::{DesiredConfiguration, LocatorScheme};
use crate::assessment::verify::Backoff;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

pub const ENV_ENDPOINT: &str = "ASSESSCTL_ENDPOINT";
pub const ENV_REGION: &str = "ASSESSCTL_REGION";
pub const ENV_ACCOUNT_ID: &str = "ASSESSCTL_ACCOUNT_ID";
pub const ENV_TOKEN: &str = "ASSESSCTL_TOKEN";

const DEFAULT_REGION: &str = "us-east-1";
const DEFAULT_PARTITION: &str = "aws";
const DEFAULT_ACCOUNT_ID: &str = "000000000000";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// User configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    /// Control-plane base URL
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub partition: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub account_id: Option<String>,
    /// Deadline for one command, in seconds
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default)]
    pub poll_initial_ms: Option<u64>,
    #[serde(default)]
    pub poll_max_ms: Option<u64>,
    #[serde(default)]
    pub poll_attempts: Option<u32>,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Get the config file path
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("assessctl").join("config.json"))
    }

    /// Load configuration from disk
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load configuration from `path`; a missing or unreadable file yields defaults
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring invalid config {:?}: {}", path, e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }


    /// Get effective endpoint (CLI > env > config > regional default)
    pub fn effective_endpoint(&self, cli: Option<&str>) -> Result<Url> {
        let raw = cli
            .map(str::to_string)
            .or_else(|| env_var(ENV_ENDPOINT))
            .or_else(|| self.endpoint.clone())
            .unwrap_or_else(|| {
                format!(
                    "https://auditmanager.{}.amazonaws.com",
                    self.effective_region(None)
                )
            });

        Url::parse(&raw).with_context(|| format!("Invalid endpoint URL: {raw}"))
    }

    /// Get effective region (CLI > env > config > default)
    pub fn effective_region(&self, cli: Option<&str>) -> String {
        cli.map(str::to_string)
            .or_else(|| env_var(ENV_REGION))
            .or_else(|| self.region.clone())
            .unwrap_or_else(|| DEFAULT_REGION.to_string())
    }

    /// Get effective account (CLI > env > config > default)
    pub fn effective_account_id(&self, cli: Option<&str>) -> String {
        cli.map(str::to_string)
            .or_else(|| env_var(ENV_ACCOUNT_ID))
            .or_else(|| self.account_id.clone())
            .unwrap_or_else(|| DEFAULT_ACCOUNT_ID.to_string())
    }

    /// Static bearer token from the environment, if any
    pub fn static_token() -> Option<String> {
        env_var(ENV_TOKEN)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(
            self.request_timeout_secs
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
        )
    }

    /// Backoff for existence polling, filling gaps with the defaults
    pub fn backoff(&self) -> Backoff {
        let defaults = Backoff::default();
        Backoff {
            initial: self
                .poll_initial_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.initial),
            max_delay: self
                .poll_max_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_delay),
            max_attempts: self.poll_attempts.unwrap_or(defaults.max_attempts),
        }
    }

    pub fn locator_scheme(&self, region: Option<&str>, account_id: Option<&str>) -> LocatorScheme {
        LocatorScheme {
            partition: self
                .partition
                .clone()
                .unwrap_or_else(|| DEFAULT_PARTITION.to_string()),
            region: self.effective_region(region),
            account_id: self.effective_account_id(account_id),
        }
    }
}

/// Read a desired configuration from a YAML or JSON file, by extension
pub fn load_desired(path: &Path) -> Result<DesiredConfiguration> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let desired: DesiredConfiguration = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?,
        _ => serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?,
    };

    Ok(desired)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_config_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(Config::load_from(&dir.path().join("none.json")), Config::default());
    }

    #[test]
    fn test_invalid_config_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "[1, 2").unwrap();
        assert_eq!(Config::load_from(&path), Config::default());
    }

    #[test]
    fn test_config_values_are_used() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"endpoint":"http://localhost:9000","partition":"aws-us-gov","poll_initial_ms":10,"poll_attempts":3}"#,
        )
        .unwrap();

        let config = Config::load_from(&path);
        assert_eq!(
            config.effective_endpoint(Some("http://cli:1")).unwrap().as_str(),
            "http://cli:1/"
        );
        assert_eq!(
            config.locator_scheme(Some("us-gov-west-1"), Some("123")).partition,
            "aws-us-gov"
        );

        let backoff = config.backoff();
        assert_eq!(backoff.initial, Duration::from_millis(10));
        assert_eq!(backoff.max_delay, Backoff::default().max_delay);
        assert_eq!(backoff.max_attempts, 3);
    }

    #[test]
    fn test_cli_region_wins() {
        let config = Config {
            region: Some("eu-west-1".to_string()),
            ..Config::default()
        };
        assert_eq!(config.effective_region(Some("ap-south-1")), "ap-south-1");
    }

    #[test]
    fn test_invalid_endpoint_is_rejected() {
        let config = Config::default();
        assert!(config.effective_endpoint(Some("not a url")).is_err());
    }

    #[test]
    fn test_load_desired_by_extension() {
        let dir = tempfile::tempdir().unwrap();

        let yaml = dir.path().join("assessment.yaml");
        std::fs::write(
            &yaml,
            "name: from-yaml\nframework_id: fw\nassessment_reports_destination:\n  destination: s3://b\n  destination_type: S3\n",
        )
        .unwrap();
        assert_eq!(load_desired(&yaml).unwrap().name, "from-yaml");

        let json = dir.path().join("assessment.json");
        std::fs::write(
            &json,
            r#"{"name":"from-json","framework_id":"fw","assessment_reports_destination":{"destination":"s3://b","destination_type":"S3"}}"#,
        )
        .unwrap();
        assert_eq!(load_desired(&json).unwrap().name, "from-json");
    }
}
