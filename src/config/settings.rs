//! Application settings

use crate::core::orchestrator::{DuplicatePolicy, OrchestratorConfig};
use crate::core::protocol::{DEFAULT_PORT, FIRST_DEVICE_REQUEST, REPLY_BIT, REQUEST_ID_END};
use crate::core::workflow::ScanOptions;
use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No platform config directory
    #[error("Could not determine config directory")]
    NoConfigDir,

    /// File could not be read
    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        /// Config file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// File could not be written
    #[error("Failed to write {}: {source}", .path.display())]
    Write {
        /// Config file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// File is not valid TOML for [`AppConfig`]
    #[error("Invalid config {}: {source}", .path.display())]
    Parse {
        /// Config file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: toml::de::Error,
    },

    /// Serialization failed
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value is out of range
    #[error("Invalid setting {field}: {reason}")]
    Invalid {
        /// Setting name
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },

    /// Target host did not resolve to an IPv4 address
    #[error("Cannot resolve {host}: {reason}")]
    Resolve {
        /// Host as given
        host: String,
        /// Resolver message
        reason: String,
    },
}

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Socket settings
    pub network: NetworkConfig,
    /// Scan settings
    pub scan: ScanConfig,
    /// Discovery settings
    pub discovery: DiscoveryConfig,
    /// Logging settings
    pub logging: LoggingConfig,
}

/// Socket settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Local bind address
    pub bind: SocketAddr,
    /// Device port
    pub port: u16,
    /// Default discovery target host
    pub broadcast: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 0)),
            port: DEFAULT_PORT,
            broadcast: "255.255.255.255".to_string(),
        }
    }
}

/// Scan and run timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Governing deadline for a run, in seconds
    pub wait_secs: u64,
    /// Per-probe budget in scan mode, in milliseconds
    pub probe_timeout_ms: u64,
    /// First request id probed
    pub first_id: u8,
    /// Request id the scan stops before
    pub last_id: u8,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            wait_secs: 5,
            probe_timeout_ms: 100,
            first_id: FIRST_DEVICE_REQUEST,
            last_id: REQUEST_ID_END,
        }
    }
}

/// Discovery settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Handling of repeated replies from one device
    pub duplicates: DuplicatePolicy,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is unset
    pub level: String,
    /// Also log to this file
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl AppConfig {
    /// Load `path`, or the default config file if present
    ///
    /// An explicit path must exist; a missing default file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::load_from(path)?,
            None => match super::default_config_path() {
                Some(path) if path.exists() => Self::load_from(&path)?,
                _ => Self::default(),
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Load config from `path`
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = super::default_config_path().ok_or(ConfigError::NoConfigDir)?;
        self.save_to(&path)?;
        Ok(path)
    }

    /// Save config to `path`, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        std::fs::write(path, content).map_err(write_err)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        let scan = &self.scan;
        if scan.probe_timeout_ms == 0 {
            return Err(invalid("scan.probe_timeout_ms", "must be positive"));
        }
        if scan.first_id == 0 || scan.first_id >= scan.last_id {
            return Err(invalid(
                "scan.first_id",
                format!("range 0x{:02x}..0x{:02x} is empty", scan.first_id, scan.last_id),
            ));
        }
        if scan.last_id > REPLY_BIT {
            return Err(invalid("scan.last_id", "request ids stop at 0x7f"));
        }
        if self.network.port == 0 {
            return Err(invalid("network.port", "must be nonzero"));
        }
        if !LOG_LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            return Err(invalid(
                "logging.level",
                format!("unknown level {:?}", self.logging.level),
            ));
        }
        Ok(())
    }

    /// Resolve `host` (or the configured broadcast host) to a device address
    ///
    /// `host` may carry its own port; otherwise `network.port` is used.
    pub fn resolve_target(&self, host: Option<&str>) -> Result<SocketAddr, ConfigError> {
        let host = host.unwrap_or(&self.network.broadcast);
        if let Ok(addr) = host.parse::<SocketAddr>() {
            return Ok(addr);
        }

        let resolve_err = |reason: String| ConfigError::Resolve {
            host: host.to_string(),
            reason,
        };
        (host, self.network.port)
            .to_socket_addrs()
            .map_err(|e| resolve_err(e.to_string()))?
            .find(SocketAddr::is_ipv4)
            .ok_or_else(|| resolve_err("no IPv4 address".to_string()))
    }

    /// Governing deadline
    pub fn wait(&self) -> Duration {
        Duration::from_secs(self.scan.wait_secs)
    }

    /// Scan parameters
    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            range: self.scan.first_id..self.scan.last_id,
            probe_timeout: Duration::from_millis(self.scan.probe_timeout_ms),
        }
    }

    /// Orchestrator parameters for a run against `target`
    pub fn orchestrator(&self, target: SocketAddr) -> OrchestratorConfig {
        OrchestratorConfig {
            target,
            wait: self.wait(),
            duplicates: self.discovery.duplicates,
        }
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}
