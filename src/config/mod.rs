//! Configuration module for modelsync
//!
//! Loads config from `$XDG_CONFIG_HOME/modelsync/config.toml` or `~/.config/modelsync/config.toml`.
//! Falls back to embedded defaults if file doesn't exist.
//! Partial configs are merged with defaults using serde's default attributes.
//!
//! # Example
//!
//! ```no_run
//! use modelsync::config::Config;
//!
//! let config = Config::load().expect("Failed to load config");
//! println!("Source registry: {}", config.registries.source);
//! println!("Archive store: {}", config.paths.archive_dir.display());
//! ```

pub mod schema;

pub use schema::{Config, MirrorConfig, PathConfig, RegistryConfig, TransferConfig};
