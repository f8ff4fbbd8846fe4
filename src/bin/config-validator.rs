//! # Issuer Configuration Validator
//!
//! Command-line tool for validating issuer configuration files across environments
//! before starting the process worker.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use issuer_core::config::{ConfigManager, IssuerConfig};
use issuer_core::state_machine::RetriggerTable;
use std::path::PathBuf;
use std::process;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "config-validator")]
#[command(about = "Validate issuer process engine configuration files")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Environment to validate (development, test, production)
    #[arg(short, long, default_value = "development")]
    environment: String,

    /// Configuration directory path (default: config)
    #[arg(short, long)]
    config_dir: Option<PathBuf>,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate the configuration and the retrigger table
    All,

    /// Print the merged configuration with secrets masked
    Show,
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let _subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .try_init();

    let result = match &cli.command {
        Some(Commands::Show) => show_config(&cli),
        Some(Commands::All) | None => validate_all(&cli),
    };

    match result {
        Ok(()) => {
            info!("Configuration validation completed successfully");
            process::exit(0);
        }
        Err(e) => {
            error!("Configuration validation failed: {:#}", e);
            eprintln!("Configuration validation failed: {e:#}");
            process::exit(1);
        }
    }
}

fn load(cli: &Cli) -> Result<std::sync::Arc<ConfigManager>> {
    ConfigManager::load_from_directory_with_env(cli.config_dir.clone(), &cli.environment)
        .with_context(|| format!("Failed to load configuration for '{}'", cli.environment))
}

fn validate_all(cli: &Cli) -> Result<()> {
    println!("Validating issuer configuration");
    println!("Environment: {}", cli.environment);
    if let Some(config_dir) = &cli.config_dir {
        println!("Config Directory: {}", config_dir.display());
    }
    println!();

    let manager = load(cli)?;
    println!("Configuration loaded and validated");

    report(manager.config());

    let table = RetriggerTable::global().context("Retrigger table is inconsistent")?;
    println!(
        "Retrigger table consistent ({} retrigger step types)",
        table.len()
    );

    println!("\nAll configuration validation checks passed");
    Ok(())
}

fn report(config: &IssuerConfig) {
    println!(
        "  database: pool size {}, acquire timeout {}s",
        config.database.max_connections, config.database.acquire_timeout_seconds
    );
    println!(
        "  worker: poll every {}ms, batch {}, {} concurrent, lock {}s",
        config.worker.poll_interval_ms,
        config.worker.batch_size,
        config.worker.max_concurrent_processes,
        config.worker.lock_duration_seconds
    );
    println!(
        "  credential: issuer {}, revoke reissued via decline process: {}",
        config.credential.issuer_bpn, config.credential.revoke_reissued_via_decline_process
    );
    println!(
        "  expiry: delete inactive after {} weeks, expired after {} months",
        config.expiry.inactive_vcs_to_delete_in_weeks, config.expiry.expired_vcs_to_delete_in_months
    );
    println!(
        "  reissuance: reissue {} day(s) before expiry",
        config.reissuance.expired_vcs_to_reissue_in_days
    );
}

fn show_config(cli: &Cli) -> Result<()> {
    let manager = load(cli)?;
    println!("{}", serde_json::to_string_pretty(&manager.debug_config())?);
    Ok(())
}
