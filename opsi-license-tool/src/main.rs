//! opsi license inspection tool
//!
//! Loads the configured license sources and prints a JSON report:
//! 1. All licenses with their state
//! 2. Module availability against the given client counts
//! 3. Relevant dates, the license checksum or the legacy modules view
//!
//! Usage:
//!   opsi-license --config /etc/opsi/licensing.toml modules
//!   opsi-license --license-path /etc/opsi/licenses --clients 120 --date 2024-01-01 modules

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use opsi_license::{PoolProvider, TrustAnchors};
use opsi_license_tool::{Command, Overrides, ToolConfig, render};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{Level, debug, info};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "opsi-license")]
#[command(about = "Inspect opsi licenses and module availability")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,

    /// Evaluate at this date (YYYY-MM-DD) instead of today
    #[arg(short, long)]
    date: Option<NaiveDate>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let config = ToolConfig::load(args.config.as_deref())?.with_overrides(&args.overrides);
    debug!(?config, "Effective configuration");

    let anchors = TrustAnchors::embedded().context("Failed to decode embedded trust anchors")?;
    let provider = PoolProvider::new(
        config.licensing,
        anchors,
        Arc::new(config.clients.numbers()),
    );
    let pool = provider.pool().context("Failed to load licenses")?;
    info!(count = pool.len(), "Licenses loaded");

    let report = render(args.command, &pool, args.date)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
