//! INI serialization: `ConfigFile` to the commented text written to disk.

use std::fmt::Write as _;

use super::parser::CATEGORY_PREFIX;
use super::settings::ConfigFile;
use super::size::format_size;

/// Convert a `ConfigFile` to a commented INI string for saving.
pub(super) fn to_config_string(config: &ConfigFile) -> String {
    let mut out = format!(
        r#"[cache]
; Root directory; each category gets its own subdirectory
directory = {}
; Memory tier budget (e.g., 256MB, 1GB)
memory_size = {}
; Maximum number of entries held in memory
memory_entries = {}
; Disk budget per category (e.g., 1GB, 500MB)
disk_size = {}
; Seconds between expiration sweeps
sweep_interval_secs = {}
; Concurrent fetches when prefetching
prefetch_concurrency = {}

[retry]
; Retries after the first failed fetch
max_retries = {}
; Delay between attempts in milliseconds
delay_ms = {}
"#,
        config.cache.directory.display(),
        format_size(config.cache.memory_size as u64),
        config.cache.memory_entries,
        format_size(config.cache.disk_size),
        config.cache.sweep_interval_secs,
        config.cache.prefetch_concurrency,
        config.retry.max_retries,
        config.retry.delay_ms,
    );

    for (name, category) in &config.categories {
        let _ = write!(out, "\n[{}{}]\n", CATEGORY_PREFIX, name);
        if let Some(size) = category.memory_size {
            let _ = writeln!(out, "memory_size = {}", format_size(size as u64));
        }
        if let Some(entries) = category.memory_entries {
            let _ = writeln!(out, "memory_entries = {}", entries);
        }
        if let Some(size) = category.disk_size {
            let _ = writeln!(out, "disk_size = {}", format_size(size));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::CategorySettings;

    #[test]
    fn test_writes_all_sections() {
        let mut config = ConfigFile::default();
        config.categories.insert(
            "images".to_string(),
            CategorySettings {
                disk_size: Some(200 * 1024),
                ..Default::default()
            },
        );

        let text = to_config_string(&config);
        assert!(text.contains("[cache]"));
        assert!(text.contains("memory_size = 256MB"));
        assert!(text.contains("disk_size = 1GB"));
        assert!(text.contains("[retry]"));
        assert!(text.contains("max_retries = 2"));
        assert!(text.contains("delay_ms = 1000"));
        assert!(text.contains("[category.images]\ndisk_size = 200KB"));
    }
}
