//! Configuration for audit behavior and risk thresholds

use crate::error::{AuditError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Main configuration for the audit process
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Months since last publish before a package is flagged stale
    pub stale_months: f64,
    /// Weekly downloads below which a package is flagged low-usage
    pub min_downloads: u64,
    /// Exclude development dependencies from the audit
    pub skip_dev: bool,
    /// Do not run `npm audit` for known vulnerabilities
    pub skip_vulnerability_check: bool,
    /// Dependencies to ignore in the audit
    pub ignored_dependencies: HashSet<String>,
    /// Network configuration
    pub network: NetworkConfig,
}

/// Network configuration for registry calls
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Maximum number of retries for failed requests
    pub max_retries: u32,
    /// Delay between requests to avoid rate limiting (milliseconds)
    pub request_delay_ms: u64,
    /// Base URL of the package metadata registry
    pub registry_url: String,
    /// Base URL of the download statistics API
    pub downloads_url: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            stale_months: 12.0,
            min_downloads: 1000,
            skip_dev: false,
            skip_vulnerability_check: false,
            ignored_dependencies: HashSet::new(),
            network: NetworkConfig::default(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_retries: 3,
            request_delay_ms: 100,
            registry_url: "https://registry.npmjs.org".to_string(),
            downloads_url: "https://api.npmjs.org/downloads".to_string(),
        }
    }
}

impl NetworkConfig {
    /// Get timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Get request delay as Duration
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }
}

impl AuditConfig {
    /// Create a new builder for AuditConfig
    pub fn builder() -> AuditConfigBuilder {
        AuditConfigBuilder::default()
    }

    /// Load configuration from a TOML file; missing keys take their defaults
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AuditConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject thresholds the risk engine cannot interpret
    pub fn validate(&self) -> Result<()> {
        if !self.stale_months.is_finite() || self.stale_months < 0.0 {
            return Err(AuditError::config(format!(
                "stale_months must be a non-negative number, got {}",
                self.stale_months
            )));
        }
        if self.network.registry_url.trim().is_empty() {
            return Err(AuditError::config("registry_url must not be empty"));
        }
        Ok(())
    }
}

/// Builder for AuditConfig
#[derive(Default)]
pub struct AuditConfigBuilder {
    stale_months: Option<f64>,
    min_downloads: Option<u64>,
    skip_dev: bool,
    skip_vulnerability_check: bool,
    network: Option<NetworkConfig>,
    ignored_dependencies: HashSet<String>,
}

impl AuditConfigBuilder {
    pub fn stale_months(mut self, months: f64) -> Self {
        self.stale_months = Some(months);
        self
    }

    pub fn min_downloads(mut self, downloads: u64) -> Self {
        self.min_downloads = Some(downloads);
        self
    }

    pub fn skip_dev(mut self, skip: bool) -> Self {
        self.skip_dev = skip;
        self
    }

    pub fn skip_vulnerability_check(mut self, skip: bool) -> Self {
        self.skip_vulnerability_check = skip;
        self
    }

    pub fn network(mut self, network: NetworkConfig) -> Self {
        self.network = Some(network);
        self
    }

    pub fn ignore_dependency(mut self, name: String) -> Self {
        self.ignored_dependencies.insert(name);
        self
    }

    pub fn build(self) -> AuditConfig {
        let defaults = AuditConfig::default();
        AuditConfig {
            stale_months: self.stale_months.unwrap_or(defaults.stale_months),
            min_downloads: self.min_downloads.unwrap_or(defaults.min_downloads),
            skip_dev: self.skip_dev,
            skip_vulnerability_check: self.skip_vulnerability_check,
            ignored_dependencies: self.ignored_dependencies,
            network: self.network.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AuditConfig::default();
        assert_eq!(config.stale_months, 12.0);
        assert_eq!(config.min_downloads, 1000);
        assert!(!config.skip_dev);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_overrides() {
        let config = AuditConfig::builder()
            .stale_months(6.0)
            .min_downloads(50)
            .skip_dev(true)
            .ignore_dependency("left-pad".to_string())
            .build();

        assert_eq!(config.stale_months, 6.0);
        assert_eq!(config.min_downloads, 50);
        assert!(config.skip_dev);
        assert!(config.ignored_dependencies.contains("left-pad"));
    }

    #[test]
    fn test_validate_rejects_negative_months() {
        let config = AuditConfig::builder().stale_months(-1.0).build();
        assert!(matches!(config.validate(), Err(AuditError::ConfigError(_))));

        let config = AuditConfig::builder().stale_months(f64::NAN).build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "stale_months = 24\nskip_dev = true\n\n[network]\nmax_retries = 0"
        )
        .unwrap();

        let config = AuditConfig::from_toml_file(file.path()).unwrap();
        assert_eq!(config.stale_months, 24.0);
        assert!(config.skip_dev);
        assert_eq!(config.min_downloads, 1000);
        assert_eq!(config.network.max_retries, 0);
        assert_eq!(config.network.timeout_secs, 30);
    }
}
