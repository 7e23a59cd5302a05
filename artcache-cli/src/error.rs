//! CLI error handling with user-friendly messages.
//!
//! Centralizes error formatting and exit codes for every subcommand.

use std::fmt;
use std::io;
use std::process;

use artcache::cache::CacheError;
use artcache::config::ConfigFileError;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Config file could not be read, parsed or written
    Config(ConfigFileError),
    /// Category name is not usable as a directory
    InvalidCategory(String),
    /// Failed to open a category
    CacheOpen(CacheError),
    /// Failed to read disk usage
    CacheStats(io::Error),
    /// Failed to delete cache files
    CacheClear(io::Error),
}

impl CliError {
    /// Exit the process with an error message and a non-zero code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        match self {
            CliError::Config(ConfigFileError::InvalidValue { .. }) => {
                eprintln!();
                eprintln!("Check the value in your config file, or print the defaults with:");
                eprintln!("  artcache config show");
            }
            CliError::InvalidCategory(_) => {
                eprintln!();
                eprintln!("Categories are single directory names (e.g., images, responses).");
                eprintln!("List existing categories with: artcache cache stats");
            }
            _ => {}
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Config(e) => write!(f, "Configuration error: {}", e),
            CliError::InvalidCategory(name) => write!(f, "Invalid category '{}'", name),
            CliError::CacheOpen(e) => write!(f, "Failed to open cache: {}", e),
            CliError::CacheStats(e) => write!(f, "Failed to read cache statistics: {}", e),
            CliError::CacheClear(e) => write!(f, "Failed to clear cache: {}", e),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Config(e) => Some(e),
            CliError::CacheOpen(e) => Some(e),
            CliError::CacheStats(e) => Some(e),
            CliError::CacheClear(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::Config(e)
    }
}

impl From<CacheError> for CliError {
    fn from(e: CacheError) -> Self {
        CliError::CacheOpen(e)
    }
}
