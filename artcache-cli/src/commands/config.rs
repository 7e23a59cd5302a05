//! Configuration CLI commands.

use std::path::Path;

use artcache::config::ConfigFile;
use clap::Subcommand;

use super::common::load_config;
use crate::error::CliError;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Show the configuration file path
    Path,

    /// Show the effective configuration (file values over defaults)
    Show,

    /// Write a config file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Run a config subcommand.
pub fn run(command: ConfigCommands, config_path: &Path) -> Result<(), CliError> {
    match command {
        ConfigCommands::Path => {
            println!("{}", config_path.display());
            Ok(())
        }
        ConfigCommands::Show => run_show(config_path),
        ConfigCommands::Init { force } => run_init(config_path, force),
    }
}

fn run_show(config_path: &Path) -> Result<(), CliError> {
    let config = load_config(config_path)?;
    if config_path.exists() {
        println!("; Loaded from {}", config_path.display());
    } else {
        println!("; {} not found, showing defaults", config_path.display());
    }
    println!();
    print!("{}", config.to_ini_string());
    Ok(())
}

fn run_init(config_path: &Path, force: bool) -> Result<(), CliError> {
    if config_path.exists() && !force {
        println!(
            "Config file already exists: {} (use --force to overwrite)",
            config_path.display()
        );
        return Ok(());
    }

    ConfigFile::default().save_to(config_path)?;
    println!("Wrote default configuration to {}", config_path.display());
    Ok(())
}
