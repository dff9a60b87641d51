//! Tributary main entry point
//!
//! Command-line interface for running the pipeline stages against a TOML
//! source configuration.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tributary::config::load_config_with_hash;
use tributary::pipeline::{outcome, Stage};
use tributary::state::{FileStateStore, SqliteStateStore, StateStore};
use tributary::storage::{StagingDb, StagingSink};

/// Tributary: a configuration-driven data-ingestion pipeline
///
/// Crawls configured HTTP APIs, stages raw responses, normalizes them into
/// typed tables, and incrementally syncs the result to destinations.
#[derive(Parser, Debug)]
#[command(name = "tributary")]
#[command(version = "1.0.0")]
#[command(about = "A configuration-driven data-ingestion pipeline", long_about = None)]
struct Cli {
    /// Path to the TOML source configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate the configuration and show what would be crawled
    DryRun,

    /// Run the extraction stage into a staging database
    Extract {
        /// Path to the staging database
        #[arg(long)]
        staging: PathBuf,

        /// Directory for cursor state files; defaults to sqlite-backed
        /// state inside the staging database
        #[arg(long)]
        state_dir: Option<PathBuf>,

        /// Truncate unbounded crawls after a few pages
        #[arg(long)]
        debug: bool,
    },

    /// Run the normalization stage over a staging database
    Transform {
        /// Path to the staging database
        #[arg(long)]
        staging: PathBuf,
    },

    /// Run the transfer stage from staging to a destination
    Transfer {
        /// Staging database URI holding normalized tables
        #[arg(long)]
        staging: String,

        /// Destination URI; the scheme selects the backend
        #[arg(long)]
        dest: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (mut config, config_hash) = match load_config_with_hash(&cli.config) {
        Ok((config, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            (config, hash)
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    match cli.command {
        Command::DryRun => handle_dry_run(&config, &config_hash),

        Command::Extract {
            staging,
            state_dir,
            debug,
        } => {
            if debug {
                config.debug = true;
            }
            let result = handle_extract(&config, &staging, state_dir.as_deref()).await;
            finish(outcome(Stage::Extract, &result))
        }

        Command::Transform { staging } => {
            let result = handle_transform(&config, &staging);
            finish(outcome(Stage::Transform, &result))
        }

        Command::Transfer { staging, dest } => {
            let result = tributary::run_transfer(&staging, &dest);
            finish(outcome(Stage::Transfer, &result))
        }
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("tributary=info,warn"),
            1 => EnvFilter::new("tributary=debug,info"),
            2 => EnvFilter::new("tributary=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn finish(outcome: tributary::pipeline::StageOutcome) -> anyhow::Result<()> {
    match outcome.error {
        None => Ok(()),
        Some(error) => anyhow::bail!(
            "{} stage failed ({}): {}",
            outcome.stage.as_str(),
            error.error_type,
            error.message
        ),
    }
}

/// Handles the dry-run mode: validates config and shows the crawl plan
fn handle_dry_run(config: &tributary::SourceConfig, config_hash: &str) -> anyhow::Result<()> {
    println!("=== Tributary Dry Run ===\n");

    println!("Source: {} (config hash {})", config.id, config_hash);
    println!("Host: {}", config.host);
    println!("Rate limit: {} requests/second", config.rate_limit);
    if let Some(dir) = &config.cache_dir {
        println!("Response cache: {}", dir);
    }

    println!("\nEntities ({}):", config.entities.len());
    for entity in &config.entities {
        println!(
            "  - {} [{:?}] {} {}",
            entity.name,
            entity.strategy,
            entity.request.method.to_uppercase(),
            entity.request.url
        );
        if !entity.dedup_keys.is_empty() {
            println!("    dedup keys: {}", entity.dedup_keys.join(", "));
        }
        for dep in &entity.dependencies {
            println!(
                "    depends on {}.{} bound as {{{}}}",
                dep.entity, dep.field, dep.param
            );
        }
    }

    println!("\n✓ Configuration is valid");
    Ok(())
}

/// Handles the extract stage
async fn handle_extract(
    config: &tributary::SourceConfig,
    staging_path: &std::path::Path,
    state_dir: Option<&std::path::Path>,
) -> tributary::Result<()> {
    let mut staging = StagingDb::open(staging_path)?;

    let mut state: Box<dyn StateStore> = match state_dir {
        Some(dir) => Box::new(FileStateStore::new(dir)?),
        None => Box::new(SqliteStateStore::open(staging_path)?),
    };

    let mut sink = StagingSink::new(&mut staging, config);
    tributary::run_extraction(config, state.as_mut(), &mut sink).await
}

/// Handles the transform stage
fn handle_transform(
    config: &tributary::SourceConfig,
    staging_path: &std::path::Path,
) -> tributary::Result<()> {
    let mut staging = StagingDb::open(staging_path)?;
    tributary::run_normalization(&mut staging, config)
}
