//! INI parsing: `Ini` to `ConfigFile`.
//!
//! The single place where INI key names are mapped to struct fields.

use ini::{Ini, Properties};
use std::path::PathBuf;
use std::str::FromStr;

use super::file::ConfigFileError;
use super::settings::{CategorySettings, ConfigFile};
use super::size::parse_size;

/// Prefix of per-category section names, e.g. `[category.images]`.
pub(super) const CATEGORY_PREFIX: &str = "category.";

const SIZE_REASON: &str = "expected format like '2GB', '500MB', or '1024KB'";

/// Parse an `Ini` object into a `ConfigFile`.
///
/// Starts from `ConfigFile::default()` and overlays any values found.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    // [cache] section
    if let Some(section) = ini.section(Some("cache")) {
        if let Some(v) = section.get("directory") {
            let v = v.trim();
            if !v.is_empty() {
                config.cache.directory = expand_tilde(v);
            }
        }
        if let Some(v) = get_size(section, "cache", "memory_size")? {
            config.cache.memory_size = to_usize(v, "cache", "memory_size")?;
        }
        if let Some(v) = get_number(section, "cache", "memory_entries")? {
            config.cache.memory_entries = v;
        }
        if let Some(v) = get_size(section, "cache", "disk_size")? {
            config.cache.disk_size = v;
        }
        if let Some(v) = get_number::<u64>(section, "cache", "sweep_interval_secs")? {
            if v == 0 {
                return Err(invalid("cache", "sweep_interval_secs", "0", "must be at least 1"));
            }
            config.cache.sweep_interval_secs = v;
        }
        if let Some(v) = get_number::<usize>(section, "cache", "prefetch_concurrency")? {
            if v == 0 {
                return Err(invalid("cache", "prefetch_concurrency", "0", "must be at least 1"));
            }
            config.cache.prefetch_concurrency = v;
        }
    }

    // [retry] section
    if let Some(section) = ini.section(Some("retry")) {
        if let Some(v) = get_number(section, "retry", "max_retries")? {
            config.retry.max_retries = v;
        }
        if let Some(v) = get_number(section, "retry", "delay_ms")? {
            config.retry.delay_ms = v;
        }
    }

    // [category.<name>] sections
    for (name, section) in ini.iter() {
        let Some(category) = name.and_then(|n| n.strip_prefix(CATEGORY_PREFIX)) else {
            continue;
        };
        let section_name = format!("{}{}", CATEGORY_PREFIX, category);
        if category.is_empty()
            || category == "."
            || category == ".."
            || category.contains(['/', '\\'])
        {
            return Err(invalid(
                &section_name,
                "",
                category,
                "category must be a single directory name",
            ));
        }

        let mut settings = CategorySettings::default();
        if let Some(v) = get_size(section, &section_name, "memory_size")? {
            settings.memory_size = Some(to_usize(v, &section_name, "memory_size")?);
        }
        if let Some(v) = get_number(section, &section_name, "memory_entries")? {
            settings.memory_entries = Some(v);
        }
        if let Some(v) = get_size(section, &section_name, "disk_size")? {
            settings.disk_size = Some(v);
        }
        config.categories.insert(category.to_string(), settings);
    }

    Ok(config)
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn get_size(section: &Properties, name: &str, key: &str) -> Result<Option<u64>, ConfigFileError> {
    section
        .get(key)
        .map(|v| parse_size(v).map_err(|_| invalid(name, key, v, SIZE_REASON)))
        .transpose()
}

fn get_number<T: FromStr>(
    section: &Properties,
    name: &str,
    key: &str,
) -> Result<Option<T>, ConfigFileError> {
    section
        .get(key)
        .map(|v| {
            v.trim()
                .parse()
                .map_err(|_| invalid(name, key, v, "must be a non-negative integer"))
        })
        .transpose()
}

fn to_usize(bytes: u64, section: &str, key: &str) -> Result<usize, ConfigFileError> {
    usize::try_from(bytes)
        .map_err(|_| invalid(section, key, &bytes.to_string(), "too large for this platform"))
}

/// Expand a leading `~/` to the home directory.
pub(super) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}
