//! Configuration loading for ddnet-relay.
//!
//! Configuration is loaded from a TOML file (default: `relay.toml`).

use serde::Deserialize;
use std::path::PathBuf;

/// Root configuration for the relay.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Authentication configuration.
    #[serde(default)]
    pub auth: AuthConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the relay socket (default: 0.0.0.0:4433).
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

/// Authentication configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Seconds a new connection gets to answer the challenge (default: 10).
    /// Connections that don't authenticate within this time are dropped.
    #[serde(default = "default_challenge_timeout_secs")]
    pub challenge_timeout_secs: u64,
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0:4433".to_string()
}

fn default_challenge_timeout_secs() -> u64 {
    10
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            challenge_timeout_secs: default_challenge_timeout_secs(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {}: {source}", path.display())]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {}: {source}", path.display())]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying parse error.
        source: toml::de::Error,
    },
}
