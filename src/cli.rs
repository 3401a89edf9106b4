//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use clap::Parser;
use std::path::PathBuf;

/// MissingMetrics - host-unit license consumption by tag
///
/// Reads the host inventory of a monitoring environment, sums consumed
/// host units and host counts per tag value, and ingests the totals back
/// as custom metrics. Runs one cycle per invocation; schedule it with
/// cron, a systemd timer or your agent's plugin host.
///
/// Examples:
///   missingmetrics --tenant abc12345 --tag-key env
///   missingmetrics --config /etc/missingmetrics.toml
///   missingmetrics --dry-run --verbose
///   missingmetrics --init-config
#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Path to configuration file
    ///
    /// If not specified, looks for .missingmetrics.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Base URL of the cluster or ActiveGate
    #[arg(long, value_name = "URL", env = "MISSINGMETRICS_API_URL")]
    pub api_url: Option<String>,

    /// Environment (tenant) identifier
    #[arg(short, long, value_name = "ID", env = "MISSINGMETRICS_TENANT")]
    pub tenant: Option<String>,

    /// API token (prefer the env var over the flag)
    #[arg(long, value_name = "TOKEN", env = "MISSINGMETRICS_API_TOKEN", hide_env_values = true)]
    pub api_token: Option<String>,

    /// Substring of the tag key to split host units by
    #[arg(long, value_name = "KEY", env = "MISSINGMETRICS_TAG_KEY")]
    pub tag_key: Option<String>,

    /// Request timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Fetch and aggregate, print metric lines, but do not ingest them
    #[arg(long)]
    pub dry_run: bool,

    /// Exit with code 2 when the inventory fetch or any ingestion fails
    #[arg(long)]
    pub strict: bool,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (errors only)
    #[arg(short, long)]
    pub quiet: bool,

    /// Generate a default .missingmetrics.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.init_config {
            return Ok(());
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(ref api_url) = self.api_url {
            if !api_url.starts_with("http://") && !api_url.starts_with("https://") {
                return Err("API URL must start with 'http://' or 'https://'".to_string());
            }
        }

        if let Some(timeout) = self.timeout {
            if timeout == 0 {
                return Err("Timeout must be at least 1 second".to_string());
            }
        }

        if let Some(ref config_path) = self.config {
            if !config_path.is_file() {
                return Err(format!(
                    "Config file does not exist: {}",
                    config_path.display()
                ));
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
