//! notice-relay CLI
//!
//! Runs the relay once, keeps it running on an interval, or inspects the configuration.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use clap::{Parser, Subcommand};
use notice_relay::{
    error::Result,
    models::Config,
    pipeline::{Relay, RunMode},
    services::Repository,
    storage::LocalStorage,
};
use tokio::sync::Notify;

/// notice-relay - University notice change relay
#[derive(Parser, Debug)]
#[command(
    name = "relay",
    version,
    about = "Relays new and edited notices to Discord and Telegram"
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process every source once
    Run {
        /// Only process this source key
        #[arg(long)]
        source: Option<String>,

        /// Store current posts without notifying (first run on a new source)
        #[arg(long)]
        seed: bool,
    },

    /// Run repeatedly until interrupted
    Watch {
        /// Seconds between runs (default: pipeline.scrape_interval_secs)
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Validate the configuration file
    Validate,

    /// Show configured sources, platforms and stored post counts
    Info,
}

/// Initialize logging. `RUST_LOG` wins over the configured level.
fn init_logging(level: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = Config::load(&cli.config);
    let level = match (&loaded, cli.verbose) {
        (_, true) => "debug",
        (Ok(config), false) => config.logging.level.as_str(),
        (Err(_), false) => "info",
    };
    init_logging(level);

    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            log::error!("Failed to load {}: {}", cli.config.display(), e);
            return Err(e);
        }
    };
    log::info!("Loaded configuration from {}", cli.config.display());

    match cli.command {
        Command::Run { source, seed } => {
            config.validate()?;
            let relay = Relay::from_config(config)?;
            let mode = if seed { RunMode::Seed } else { RunMode::Normal };
            let summary = relay.run(source.as_deref(), mode).await?;
            if !summary.failures.is_empty() {
                log::warn!("{} item(s) failed this run", summary.failures.len());
            }
        }

        Command::Watch { interval } => {
            config.validate()?;
            let interval =
                Duration::from_secs(interval.unwrap_or(config.pipeline.scrape_interval_secs));
            let relay = Relay::from_config(config)?;
            watch(&relay, interval).await?;
        }

        Command::Validate => {
            log::info!("Validating configuration...");
            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            log::info!("✓ Config OK ({} sources)", config.sources.len());
        }

        Command::Info => info(&config).await?,
    }

    log::info!("Done!");
    Ok(())
}

/// Run until Ctrl-C. A run in progress stops between posts.
async fn watch(relay: &Relay, interval: Duration) -> Result<()> {
    let shutdown = relay.shutdown_handle();
    let wake = Arc::new(Notify::new());

    {
        let shutdown = shutdown.clone();
        let wake = wake.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("Interrupt received, finishing the current post...");
                shutdown.store(true, Ordering::SeqCst);
                wake.notify_one();
            }
        });
    }

    log::info!("Watching every {}s", interval.as_secs());
    loop {
        relay.run(None, RunMode::Normal).await?;
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = wake.notified() => break,
        }
    }
    Ok(())
}

async fn info(config: &Config) -> Result<()> {
    let storage = LocalStorage::new(&config.storage.root_dir);
    log::info!("Storage directory: {}", storage.root_dir().display());

    for source in &config.sources {
        let stored = storage
            .recent_fingerprints(&source.key, usize::MAX)
            .await?
            .len();
        log::info!(
            "Source {} ({}): {} stored posts, feed {}",
            source.key,
            config.display_name(&source.key),
            stored,
            source.feed
        );
    }

    let enabled = |on: bool| if on { "enabled" } else { "not configured" };
    log::info!("Discord: {}", enabled(config.discord.is_some()));
    log::info!("Telegram: {}", enabled(config.telegram.is_some()));
    log::info!("AI service: {}", enabled(config.ai.is_some()));
    Ok(())
}
