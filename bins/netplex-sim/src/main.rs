//! Netplex Simulator
//!
//! Runs one hub and a set of clients over an in-memory star network and
//! reports how many raw messages made it across.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

mod config;
mod sim;

use config::SimConfig;

/// Netplex star network simulator
#[derive(Parser)]
#[command(name = "netplex-sim")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "netplex-sim.toml")]
    config: PathBuf,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Number of clients (overrides config)
    #[arg(long)]
    clients: Option<usize>,

    /// Number of ticks to run (overrides config)
    #[arg(long)]
    ticks: Option<u32>,

    /// Disable hub relaying
    #[arg(long)]
    no_relay: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    let mut config = SimConfig::load_or_default(&cli.config).await?;
    if let Some(clients) = cli.clients {
        config.clients = clients;
    }
    if let Some(ticks) = cli.ticks {
        config.ticks = ticks;
    }
    if cli.no_relay {
        config.server_relay = false;
    }
    config.validate()?;

    info!(
        "Simulating {} clients for {} ticks (relay {})",
        config.clients,
        config.ticks,
        if config.server_relay { "on" } else { "off" }
    );

    let report = sim::run(&config).await?;

    println!("Netplex Simulation");
    println!("==================");
    println!("Ticks: {}", report.ticks);
    println!("Messages: {} sent, {} delivered", report.sent, report.delivered);
    println!("Relayed by hub: {}", report.relayed);
    println!("Dropped: {}", report.dropped);

    if report.delivered != report.sent || report.misattributed > 0 {
        anyhow::bail!(
            "{} of {} messages delivered, {} misattributed",
            report.delivered,
            report.sent,
            report.misattributed
        );
    }
    Ok(())
}
