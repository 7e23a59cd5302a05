//! Configuration file handling for ~/.artcache/config.ini.
//!
//! Settings structs live in [`super::settings`], parsing in
//! [`super::parser`], and serialization in [`super::writer`].

use ini::Ini;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use super::settings::ConfigFile;
use crate::cache::{CacheConfig, RetryPolicy};

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] ini::Error),

    /// Failed to write config file
    #[error("Failed to write config file: {0}")]
    WriteError(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },

    /// Failed to create config directory
    #[error("Failed to create config directory: {0}")]
    DirectoryError(std::io::Error),
}

impl ConfigFile {
    /// Load configuration from the default path (~/.artcache/config.ini).
    pub fn load() -> Result<Self, ConfigFileError> {
        Self::load_from(&config_file_path())
    }

    /// Load configuration from a specific path.
    ///
    /// If the file doesn't exist, returns defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigFileError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let ini = Ini::load_from_file(path)?;
        super::parser::parse_ini(&ini)
    }

    /// Save configuration to the default path.
    pub fn save(&self) -> Result<(), ConfigFileError> {
        self.save_to(&config_file_path())
    }

    /// Save configuration to a specific path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigFileError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigFileError::DirectoryError)?;
        }

        let content = self.to_ini_string();
        std::fs::write(path, content).map_err(|e| ConfigFileError::WriteError(e.to_string()))
    }

    /// Render the configuration as commented INI text.
    pub fn to_ini_string(&self) -> String {
        super::writer::to_config_string(self)
    }

    /// Categories with their own `[category.<name>]` section.
    pub fn category_names(&self) -> impl Iterator<Item = &str> {
        self.categories.keys().map(String::as_str)
    }

    /// Build the cache configuration for a category.
    ///
    /// `[category.<name>]` values override `[cache]` values; anything unset
    /// in both keeps the built-in default.
    pub fn cache_config(&self, category: &str) -> CacheConfig {
        let overrides = self.categories.get(category).cloned().unwrap_or_default();

        CacheConfig::new(category)
            .with_cache_dir(self.cache.directory.clone())
            .with_memory_budget(overrides.memory_size.unwrap_or(self.cache.memory_size))
            .with_max_entries(overrides.memory_entries.unwrap_or(self.cache.memory_entries))
            .with_disk_budget(overrides.disk_size.unwrap_or(self.cache.disk_size))
            .with_sweep_interval(Duration::from_secs(self.cache.sweep_interval_secs))
            .with_prefetch_concurrency(self.cache.prefetch_concurrency)
            .with_retry(RetryPolicy::new(self.retry.max_retries, self.retry.delay()))
    }
}

/// Get the path to the config directory (~/.artcache).
pub fn config_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".artcache")
}

/// Get the path to the config file (~/.artcache/config.ini).
pub fn config_file_path() -> PathBuf {
    config_directory().join("config.ini")
}
