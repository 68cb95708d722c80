//! Configuration module
//!
//! Handles application settings loaded from TOML

mod settings;

pub use settings::{AppConfig, ConfigError, DiscoveryConfig, LoggingConfig, NetworkConfig, ScanConfig};

use directories::ProjectDirs;
use std::path::PathBuf;

/// Get the application configuration directory
pub fn config_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "tsprobe", "tsprobe").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Path of the config file used when none is given
pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}
