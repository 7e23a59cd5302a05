//! CLI command implementations.
//!
//! - [`cache`] - Disk cache maintenance (stats, prune, clear)
//! - [`config`] - Configuration file (path, show, init)

pub mod cache;
pub mod common;
pub mod config;
