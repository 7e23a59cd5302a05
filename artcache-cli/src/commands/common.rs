//! Helpers shared by subcommands.

use std::path::Path;

use artcache::cache::{list_categories, CacheConfig};
use artcache::config::ConfigFile;

use crate::error::CliError;

/// Load the config file, falling back to defaults when it does not exist.
pub fn load_config(path: &Path) -> Result<ConfigFile, CliError> {
    Ok(ConfigFile::load_from(path)?)
}

/// Cache configuration for a category named on the command line.
pub fn category_config(config: &ConfigFile, category: &str) -> Result<CacheConfig, CliError> {
    let cache_config = config.cache_config(category);
    cache_config
        .validate()
        .map_err(|_| CliError::InvalidCategory(category.to_string()))?;
    Ok(cache_config)
}

/// The requested category, or every category found on disk plus those
/// named in the config file.
pub fn target_categories(
    config: &ConfigFile,
    category: Option<&str>,
) -> Result<Vec<String>, CliError> {
    if let Some(category) = category {
        return Ok(vec![category.to_string()]);
    }

    let mut categories =
        list_categories(&config.cache.directory).map_err(CliError::CacheStats)?;
    for name in config.category_names() {
        if !categories.iter().any(|c| c == name) {
            categories.push(name.to_string());
        }
    }
    categories.sort();
    Ok(categories)
}

/// Format a byte count for display (e.g., "1.5 MB").
pub fn display_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
