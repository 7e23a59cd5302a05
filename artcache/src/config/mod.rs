//! User configuration file.
//!
//! Values are read from an INI file (by default `~/.artcache/config.ini`)
//! and turned into a [`CacheConfig`](crate::cache::CacheConfig) per
//! category:
//!
//! ```
//! use artcache::config::ConfigFile;
//!
//! let config = ConfigFile::default();
//! let images = config.cache_config("images");
//! assert_eq!(images.category, "images");
//! ```

mod file;
mod parser;
mod settings;
mod size;
mod writer;

pub use file::{config_directory, config_file_path, ConfigFileError};
pub use settings::{CacheSettings, CategorySettings, ConfigFile, RetrySettings};
pub use size::{format_size, parse_size, SizeParseError};
