//! Defsync - keep a local copy of the definitions database current.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use defsync_core::SyncConfig;
use std::path::PathBuf;
use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;

const API_KEY_ENV: &str = "DEFSYNC_API_KEY";

#[derive(Parser, Debug)]
#[command(name = "defsync")]
#[command(about = "Download and cache versioned definitions datasets")]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Location of the cache database
    #[arg(long, global = true)]
    cache_path: Option<PathBuf>,

    /// Content host
    #[arg(long, global = true)]
    host: Option<String>,

    /// API key (falls back to DEFSYNC_API_KEY)
    #[arg(long, global = true)]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sync definitions for a language
    Sync {
        #[arg(short, long, default_value = "en")]
        language: String,

        /// Table to include; repeat for several. All tables when omitted.
        #[arg(short, long = "table")]
        tables: Vec<String>,

        /// Attempts before giving up on transient failures
        #[arg(long, default_value = "3")]
        retries: u32,

        /// Write the synced dataset as JSON to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show what the cache holds
    Status,
    /// Delete everything in the cache
    Clear,
}

impl Args {
    fn sync_config(&self) -> SyncConfig {
        let api_key = self
            .api_key
            .clone()
            .or_else(|| std::env::var(API_KEY_ENV).ok());

        let mut config = SyncConfig::new().with_api_key(api_key);
        if let Some(host) = &self.host {
            config = config.with_host(host.clone());
        }
        if let Some(path) = &self.cache_path {
            config = config.with_cache_path(path.clone());
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let config = args.sync_config();
    debug!("Using cache at {}", config.cache_path.display());

    match args.command {
        Command::Sync {
            language,
            tables,
            retries,
            output,
        } => {
            let tables = (!tables.is_empty()).then_some(tables);
            commands::sync(&config, language, tables, retries, output.as_deref()).await
        }
        Command::Status => commands::status(&config).await,
        Command::Clear => commands::clear(&config).await,
    }
}
