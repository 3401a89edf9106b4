//! Configuration file handling.
//!
//! This module handles loading, merging and validating configuration from
//! `.missingmetrics.toml` files and command-line overrides.

use crate::metrics::lines::DEFAULT_METRIC_PREFIX;
use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = ".missingmetrics.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Monitoring environment connection settings.
    #[serde(default)]
    pub environment: EnvironmentConfig,

    /// Host-unit aggregation settings.
    #[serde(default)]
    pub hostunits: HostUnitsConfig,
}

/// Connection settings for the monitoring environment.
#[derive(Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Base URL of the cluster or ActiveGate.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Environment (tenant) identifier.
    #[serde(default)]
    pub tenant: String,

    /// API token with inventory read and metric ingest scopes.
    #[serde(default)]
    pub api_token: String,

    /// Verify the server's TLS certificate.
    #[serde(default)]
    pub verify_tls: bool,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            tenant: String::new(),
            api_token: String::new(),
            verify_tls: false,
            timeout_seconds: default_timeout(),
        }
    }
}

// Hand-written so the token never ends up in logs.
impl fmt::Debug for EnvironmentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = if self.api_token.is_empty() { "" } else { "***" };
        f.debug_struct("EnvironmentConfig")
            .field("api_url", &self.api_url)
            .field("tenant", &self.tenant)
            .field("api_token", &token)
            .field("verify_tls", &self.verify_tls)
            .field("timeout_seconds", &self.timeout_seconds)
            .finish()
    }
}

fn default_api_url() -> String {
    "https://localhost:9999".to_string()
}

fn default_timeout() -> u64 {
    30
}

/// Host-unit aggregation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostUnitsConfig {
    /// Compute and ingest host-unit metrics.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Substring matched against tag keys to pick the split label.
    #[serde(default)]
    pub tag_key: String,

    /// Prefix of the emitted metric keys.
    #[serde(default = "default_metric_prefix")]
    pub metric_prefix: String,

    /// Query window start, in minutes before now.
    #[serde(default = "default_window_start")]
    pub window_start_minutes: u32,

    /// Query window end, in minutes before now.
    #[serde(default = "default_window_end")]
    pub window_end_minutes: u32,
}

impl Default for HostUnitsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tag_key: String::new(),
            metric_prefix: default_metric_prefix(),
            window_start_minutes: default_window_start(),
            window_end_minutes: default_window_end(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_metric_prefix() -> String {
    DEFAULT_METRIC_PREFIX.to_string()
}

fn default_window_start() -> u32 {
    10
}

fn default_window_end() -> u32 {
    5
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(DEFAULT_CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// Only values given on the command line (or via their env vars) override
    /// the file.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref api_url) = args.api_url {
            self.environment.api_url = api_url.clone();
        }
        if let Some(ref tenant) = args.tenant {
            self.environment.tenant = tenant.clone();
        }
        if let Some(ref token) = args.api_token {
            self.environment.api_token = token.clone();
        }
        if let Some(ref tag_key) = args.tag_key {
            self.hostunits.tag_key = tag_key.clone();
        }
        if let Some(timeout) = args.timeout {
            self.environment.timeout_seconds = timeout;
        }
    }

    /// Check the merged configuration before any request is made.
    pub fn validate(&self) -> Result<()> {
        let env = &self.environment;
        ensure!(
            env.api_url.starts_with("http://") || env.api_url.starts_with("https://"),
            "API URL must start with 'http://' or 'https://'"
        );
        ensure!(env.timeout_seconds > 0, "Timeout must be at least 1 second");

        let hu = &self.hostunits;
        ensure!(!hu.metric_prefix.trim().is_empty(), "Metric prefix must not be empty");
        ensure!(
            hu.window_start_minutes > hu.window_end_minutes,
            "Window start ({} min) must lie before window end ({} min)",
            hu.window_start_minutes,
            hu.window_end_minutes
        );

        if hu.enabled {
            ensure!(!env.tenant.trim().is_empty(), "Tenant must be set");
            ensure!(!env.api_token.trim().is_empty(), "API token must be set");
            ensure!(!hu.tag_key.is_empty(), "Tag key must be set");
        }

        Ok(())
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
