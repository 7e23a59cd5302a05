//! Cache management CLI commands.

use std::path::Path;

use artcache::cache::{
    clear_disk_cache, disk_cache_stats, CacheSystem, DiskCache, EvictionResult,
};
use artcache::config::ConfigFile;
use clap::Subcommand;
use tracing::debug;

use super::common::{category_config, display_size, load_config, target_categories};
use crate::error::CliError;

/// Cache action subcommands.
#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Show disk usage per category
    Stats {
        /// Only show this category
        #[arg(long)]
        category: Option<String>,
    },
    /// Delete expired entries, then evict the oldest entries over budget
    Prune {
        /// Only prune this category
        #[arg(long)]
        category: Option<String>,
    },
    /// Delete all cached entries
    Clear {
        /// Only clear this category
        #[arg(long)]
        category: Option<String>,
    },
}

/// Run a cache subcommand.
pub async fn run(action: CacheAction, config_path: &Path) -> Result<(), CliError> {
    let config = load_config(config_path)?;

    match action {
        CacheAction::Stats { category } => run_stats(&config, category.as_deref()),
        CacheAction::Prune { category } => run_prune(&config, category.as_deref()).await,
        CacheAction::Clear { category } => run_clear(&config, category.as_deref()).await,
    }
}

fn run_stats(config: &ConfigFile, category: Option<&str>) -> Result<(), CliError> {
    let root = &config.cache.directory;
    if let Some(category) = category {
        category_config(config, category)?;
    }

    let usage: Vec<_> = disk_cache_stats(root)
        .map_err(CliError::CacheStats)?
        .into_iter()
        .filter(|c| category.map_or(true, |name| c.category == name))
        .collect();

    println!("Disk cache: {}", root.display());
    if usage.is_empty() {
        println!("  (no cached entries)");
        return Ok(());
    }

    println!();
    println!(
        "  {:<20} {:>10} {:>10} {:>12} {:>12}",
        "CATEGORY", "ENTRIES", "FILES", "SIZE", "BUDGET"
    );
    let mut total_entries = 0;
    let mut total_files = 0;
    let mut total_bytes = 0;
    for c in &usage {
        let budget = config.cache_config(&c.category).disk.max_size_bytes;
        println!(
            "  {:<20} {:>10} {:>10} {:>12} {:>12}",
            c.category,
            c.usage.entries,
            c.usage.files,
            display_size(c.usage.bytes),
            display_size(budget)
        );
        total_entries += c.usage.entries;
        total_files += c.usage.files;
        total_bytes += c.usage.bytes;
    }

    if usage.len() > 1 {
        println!(
            "  {:<20} {:>10} {:>10} {:>12}",
            "TOTAL",
            total_entries,
            total_files,
            display_size(total_bytes)
        );
    }
    Ok(())
}

async fn run_prune(config: &ConfigFile, category: Option<&str>) -> Result<(), CliError> {
    let categories = target_categories(config, category)?;
    if categories.is_empty() {
        println!("Nothing to prune in {}", config.cache.directory.display());
        return Ok(());
    }

    for name in categories {
        debug!(category = %name, "Running disk cache maintenance");
        let system = CacheSystem::open(category_config(config, &name)?).await?;
        let report = system.run_maintenance().await;
        println!(
            "{}: {} expired, {} evicted, freed {}, now {} (budget {})",
            name,
            report.expired.entries_deleted,
            report.budget.entries_deleted,
            display_size(report.expired.bytes_freed + report.budget.bytes_freed),
            display_size(report.budget.size_after),
            display_size(system.disk().max_size_bytes()),
        );
    }
    Ok(())
}

async fn run_clear(config: &ConfigFile, category: Option<&str>) -> Result<(), CliError> {
    let root = config.cache.directory.clone();

    let result: EvictionResult = match category {
        Some(name) => {
            let cache_config = category_config(config, name)?;
            println!("Clearing category '{}' in: {}", name, root.display());
            DiskCache::new(&root, name, cache_config.disk.max_size_bytes)
                .clear()
                .await
                .map_err(CliError::CacheClear)?
        }
        None => {
            println!("Clearing disk cache at: {}", root.display());
            tokio::task::spawn_blocking(move || clear_disk_cache(&root))
                .await
                .map_err(|e| CliError::CacheClear(std::io::Error::other(e)))?
                .map_err(CliError::CacheClear)?
        }
    };

    println!(
        "Deleted {} entries ({} files), freed {}",
        result.entries_deleted,
        result.files_deleted,
        display_size(result.bytes_freed)
    );
    Ok(())
}
