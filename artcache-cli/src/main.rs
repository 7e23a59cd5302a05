//! artcache CLI
//!
//! Inspects and maintains an artcache directory: per-category disk usage,
//! expiration and budget sweeps, clearing, and the config file.

mod commands;
mod error;

use std::path::PathBuf;

use artcache::config::config_file_path;
use artcache::logging::{default_log_dir, init_logging, DEFAULT_LOG_FILE};
use clap::{Parser, Subcommand};

use commands::cache::CacheAction;
use commands::config::ConfigCommands;
use error::CliError;

#[derive(Debug, Parser)]
#[command(name = "artcache")]
#[command(version = artcache::VERSION)]
#[command(about = "Inspect and maintain a tiered artifact cache", long_about = None)]
struct Cli {
    /// Config file to use instead of ~/.artcache/config.ini
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log to ~/.artcache/logs/artcache.log and stdout
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Disk cache maintenance
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Configuration file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let _logging_guard = if cli.verbose {
        match init_logging(&default_log_dir(), DEFAULT_LOG_FILE) {
            Ok(guard) => Some(guard),
            Err(e) => CliError::LoggingInit(e.to_string()).exit(),
        }
    } else {
        None
    };

    let config_path = cli.config.unwrap_or_else(config_file_path);
    let result = match cli.command {
        Commands::Cache { action } => commands::cache::run(action, &config_path).await,
        Commands::Config { command } => commands::config::run(command, &config_path),
    };

    if let Err(e) = result {
        e.exit();
    }
}
