//! artcache - tiered artifact cache
//!
//! Caches fetched artifacts (API responses, images, metadata) in a bounded
//! in-memory LRU tier backed by a persistent per-category disk tier.
//! Concurrent misses for the same key share one upstream fetch, failed
//! fetches are retried a bounded number of times, and a background daemon
//! prunes expired entries and keeps each category under its disk budget.
//!
//! # Quick start
//!
//! ```no_run
//! use std::time::Duration;
//! use artcache::cache::{CacheConfig, CacheSystem, TierSet};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cache = CacheSystem::start(CacheConfig::new("responses")).await?;
//!
//! let body = cache
//!     .get_or_fetch(
//!         "https://api.example.com/movie/42",
//!         Duration::from_secs(24 * 3600),
//!         TierSet::ALL,
//!         || async { Ok::<_, std::io::Error>(b"{\"id\":42}".to_vec()) },
//!     )
//!     .await?;
//! assert_eq!(&body[..], b"{\"id\":42}");
//!
//! cache.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod logging;
pub mod time;

/// Library version, from Cargo.toml.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
