//! TOML configuration file for the broker.
//!
//! The file is optional.  Every field has a serde default, so a missing file,
//! an empty file, and a file with only `[network]` all produce a working
//! broker.  Command-line flags are applied on top in `main.rs`.
//!
//! ```toml
//! [network]
//! host = "0.0.0.0"
//! port = 5000
//!
//! [broker]
//! response_timeout_secs = 10
//! queue_timeout_secs = 10
//! max_line_bytes = 65536
//! log_level = "info"
//! ```

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use homelink_core::DEFAULT_MAX_LINE_BYTES;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::settings::BrokerSettings;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error other than "not found".
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// `network.host` is not an IP address.
    #[error("invalid listen host '{0}': expected an IP address")]
    InvalidHost(String),

    /// A numeric field is outside its allowed range.
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level broker configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BrokerFileConfig {
    #[serde(default)]
    pub network: NetworkSection,
    #[serde(default)]
    pub broker: BrokerSection,
}

/// Where the listener binds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkSection {
    /// IP address to bind.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Correlation protocol tunables and logging.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    #[serde(default = "default_timeout_secs")]
    pub response_timeout_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub queue_timeout_secs: u64,
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
    /// `tracing` level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    5000
}
fn default_timeout_secs() -> u64 {
    10
}
fn default_max_line_bytes() -> usize {
    DEFAULT_MAX_LINE_BYTES
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            response_timeout_secs: default_timeout_secs(),
            queue_timeout_secs: default_timeout_secs(),
            max_line_bytes: default_max_line_bytes(),
            log_level: default_log_level(),
        }
    }
}

impl BrokerFileConfig {
    /// Parses TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the TOML is malformed or a field has
    /// the wrong type.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Validates the file values and converts them into runtime settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidHost`] or [`ConfigError::InvalidValue`].
    pub fn into_settings(self) -> Result<BrokerSettings, ConfigError> {
        let ip: IpAddr = self
            .network
            .host
            .parse()
            .map_err(|_| ConfigError::InvalidHost(self.network.host.clone()))?;

        let nonzero = |field: &'static str, secs: u64| {
            if secs == 0 {
                Err(ConfigError::InvalidValue {
                    field,
                    reason: "must be at least 1 second".into(),
                })
            } else {
                Ok(Duration::from_secs(secs))
            }
        };
        let response_timeout = nonzero("broker.response_timeout_secs", self.broker.response_timeout_secs)?;
        let queue_timeout = nonzero("broker.queue_timeout_secs", self.broker.queue_timeout_secs)?;

        if self.broker.max_line_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "broker.max_line_bytes",
                reason: "must be greater than zero".into(),
            });
        }

        Ok(BrokerSettings {
            bind_addr: SocketAddr::new(ip, self.network.port),
            response_timeout,
            queue_timeout,
            max_line_bytes: self.broker.max_line_bytes,
        })
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Loads the config at `path`, returning defaults if the file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<BrokerFileConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => BrokerFileConfig::parse(&content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BrokerFileConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
