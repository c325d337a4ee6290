//! Datawatch CLI
//!
//! Command-line client for the dataset availability monitor.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use datawatch::renderer::{format_history, format_snapshot};
use datawatch::{load_config, ChangeBus, Config, Dashboard};
use tokio_util::sync::CancellationToken;
use tracing::Level;

#[derive(Parser)]
#[command(name = "datawatch")]
#[command(about = "Dataset availability dashboard client")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Back-end base URL (overrides config file)
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Log level
    #[arg(short, long, default_value = "info", global = true)]
    log_level: Level,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Follow status and notifications live until ctrl-c
    Watch {
        /// Auto-refresh interval in seconds, 0 for push updates only
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Print the current status of every dataset
    Status,
    /// Print the check log of one dataset
    History {
        id: String,
        #[arg(long)]
        hours: Option<u32>,
    },
    /// Print dataset counts per category
    Categories,
    /// Ask the server to check every dataset now
    Check,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .init();

    tracing::debug!(
        "Parsed command line arguments: config={:?}, base_url={:?}, log_level={:?}",
        args.config,
        args.base_url,
        args.log_level
    );

    let mut config = if let Some(config_path) = &args.config {
        tracing::debug!("Loading configuration from {:?}", config_path);
        load_config(config_path)?
    } else {
        tracing::debug!("Using default configuration");
        Config::default()
    };

    if let Some(base_url) = args.base_url {
        config.api.base_url = base_url;
    }

    match args.command.unwrap_or(Command::Watch { interval: None }) {
        Command::Watch { interval } => {
            if let Some(interval) = interval {
                config.polling.interval_seconds = interval;
            }

            let cancel = CancellationToken::new();
            let cancel_for_signal = cancel.clone();
            tokio::spawn(async move {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!("Failed to listen for ctrl-c: {}", e);
                }
                tracing::info!("Shutdown signal received");
                cancel_for_signal.cancel();
            });

            datawatch::run(config, cancel).await?;
        }
        Command::Status => {
            let dashboard = Dashboard::from_config(config, ChangeBus::default())?;
            dashboard.refresh().await?;
            println!("{}", format_snapshot(&*dashboard.snapshot().await));
        }
        Command::History { id, hours } => {
            let dashboard = Dashboard::from_config(config, ChangeBus::default())?;
            let history = dashboard.history(&id, hours).await?;
            println!("{}", format_history(&history));
        }
        Command::Categories => {
            let dashboard = Dashboard::from_config(config, ChangeBus::default())?;
            for category in dashboard.categories().await? {
                println!("{:<24} {}", category.name, category.count);
            }
        }
        Command::Check => {
            let dashboard = Dashboard::from_config(config, ChangeBus::default())?;
            let ack = dashboard.force_check().await?;
            println!("{}", ack.message);
        }
    }

    Ok(())
}
