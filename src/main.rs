//! MissingMetrics - host-unit license consumption by tag
//!
//! Reads the host inventory of a monitoring environment, aggregates the
//! consumed host units per tag value and ingests the result back as
//! custom metrics. One invocation runs one cycle.
//!
//! Exit codes:
//!   0 - Cycle ran (failures are logged only)
//!   1 - Startup error (arguments, config, client construction)
//!   2 - Cycle had failures and --strict was set

mod analysis;
mod cli;
mod client;
mod config;
mod cycle;
mod metrics;
mod models;

use anyhow::{Context, Result};
use chrono::Utc;
use cli::Args;
use config::{Config, DEFAULT_CONFIG_FILE};
use cycle::{CycleOutcome, HostUnitCycle, IngestMode};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    init_logging(&args);

    info!("MissingMetrics v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: dry_run={} strict={}", args.dry_run, args.strict);

    match run(&args).await {
        Ok(exit_code) => std::process::exit(exit_code),
        Err(e) => {
            error!("Startup failed: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .missingmetrics.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(DEFAULT_CONFIG_FILE);

    if path.exists() {
        eprintln!("{} already exists. Remove it first or edit it manually.", DEFAULT_CONFIG_FILE);
        std::process::exit(1);
    }

    std::fs::write(path, Config::default_toml())
        .with_context(|| format!("Failed to write {}", DEFAULT_CONFIG_FILE))?;

    println!("Created {} with default settings.", DEFAULT_CONFIG_FILE);
    println!("Set tenant, api_token and tag_key before the first run.");
    Ok(())
}

/// Initialize logging. RUST_LOG wins over the verbosity flags when set.
fn init_logging(args: &Args) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level().as_str()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Load config, run one cycle, and map the outcome to an exit code.
async fn run(args: &Args) -> Result<i32> {
    let mut config = load_config(args)?;
    config.merge_with_args(args);
    config.validate().context("Invalid configuration")?;
    info!("Config: {:?}", config);

    let cycle = HostUnitCycle::new(&config)?;
    let mode = if args.dry_run {
        IngestMode::DryRun
    } else {
        IngestMode::Send
    };

    let outcome = cycle.run(Utc::now(), mode).await;

    if let CycleOutcome::Completed(ref report) = outcome {
        if args.dry_run {
            for line in &report.lines {
                println!("{}", line);
            }
        }
    }

    if args.strict && outcome.has_failures() {
        warn!("Cycle had failures (strict mode)");
        return Ok(2);
    }

    Ok(0)
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    match Config::load_default()? {
        Some(config) => {
            info!("Loaded default config from {}", DEFAULT_CONFIG_FILE);
            Ok(config)
        }
        None => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
    }
}
