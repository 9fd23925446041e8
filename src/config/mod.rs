use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PostureError, Result};
use crate::resource::Service;
use crate::rules::policy::Policy;

/// Top-level configuration from `.azposture.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub policy: Policy,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

/// Scan engine and management-plane client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Upper bound on concurrently running enumerators.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Per-request timeout. A timed-out call fails its enumerator.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_management_endpoint")]
    pub management_endpoint: String,
    #[serde(default = "default_login_endpoint")]
    pub login_endpoint: String,
}

fn default_max_workers() -> usize {
    3
}

fn default_request_timeout() -> u64 {
    30
}

fn default_management_endpoint() -> String {
    "https://management.azure.com".into()
}

fn default_login_endpoint() -> String {
    "https://login.microsoftonline.com".into()
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            request_timeout_secs: default_request_timeout(),
            management_endpoint: default_management_endpoint(),
            login_endpoint: default_login_endpoint(),
        }
    }
}

/// Where scan history is kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("./scanner_azure.db")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

impl Config {
    /// Load config from a TOML file. Returns default if file doesn't exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let min_workers = Service::ALL.len();
        if self.scan.max_workers < min_workers {
            return Err(PostureError::Config(format!(
                "scan.max_workers must be at least {min_workers} (one per service)"
            )));
        }
        if self.scan.request_timeout_secs == 0 {
            return Err(PostureError::Config(
                "scan.request_timeout_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Generate a starter config file.
    pub fn starter_toml() -> &'static str {
        r#"# azposture configuration
# Credentials are never read from this file. Set AZURE_TENANT_ID,
# AZURE_CLIENT_ID, AZURE_CLIENT_SECRET and AZURE_SUBSCRIPTION_ID instead.

[policy]
# Minimum severity that makes `azposture scan` exit 1 (low, medium, high).
# Leave unset to always exit 0 after a completed scan.
# fail_on = "high"

# Rule IDs to ignore entirely.
# ignore_rules = ["AZ-VM-PUBIP-001"]

# Per-rule severity overrides.
# [policy.overrides]
# "AZ-Storage-PublicBlob-001" = "medium"

[scan]
# One worker per service at minimum.
max_workers = 3
request_timeout_secs = 30

[store]
path = "./scanner_azure.db"
"#
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::Severity;
    use std::io::Write;

    #[test]
    fn missing_file_gives_defaults() {
        let config = Config::load(Path::new("/nonexistent/.azposture.toml")).unwrap();
        assert_eq!(config.scan.max_workers, 3);
        assert_eq!(config.store.path, PathBuf::from("./scanner_azure.db"));
        assert!(config.policy.fail_on.is_none());
    }

    #[test]
    fn starter_config_parses() {
        let config: Config = toml::from_str(Config::starter_toml()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.scan.request_timeout_secs, 30);
    }

    #[test]
    fn loads_policy_and_scan_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[policy]
fail_on = "medium"
ignore_rules = ["AZ-VM-PUBIP-001"]

[policy.overrides]
"AZ-NSG-OPEN-001" = "Low"

[scan]
max_workers = 8
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.policy.fail_on, Some(Severity::Medium));
        assert!(config.policy.ignore_rules.contains("AZ-VM-PUBIP-001"));
        assert_eq!(config.policy.overrides["AZ-NSG-OPEN-001"], Severity::Low);
        assert_eq!(config.scan.max_workers, 8);
        assert_eq!(config.scan.request_timeout_secs, 30);
    }

    #[test]
    fn zero_workers_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[scan]\nmax_workers = 0").unwrap();
        assert!(matches!(
            Config::load(file.path()),
            Err(PostureError::Config(_))
        ));
    }

    #[test]
    fn fewer_workers_than_services_is_rejected() {
        for workers in [1, 2] {
            let mut file = tempfile::NamedTempFile::new().unwrap();
            writeln!(file, "[scan]\nmax_workers = {workers}").unwrap();
            match Config::load(file.path()) {
                Err(PostureError::Config(msg)) => assert!(msg.contains("at least 3")),
                other => panic!("expected config error, got {other:?}"),
            }
        }
    }
}
