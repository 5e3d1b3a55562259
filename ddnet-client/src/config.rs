//! Client configuration.
//!
//! Loaded from TOML; every field has a default so a partial (or empty) file
//! is valid.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Relay endpoint settings.
    #[serde(default)]
    pub relay: RelaySettings,
    /// Operation timeouts.
    #[serde(default)]
    pub timeouts: TimeoutSettings,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay: RelaySettings::default(),
            timeouts: TimeoutSettings::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::ParseError {
            path: path.display().to_string(),
            source,
        })
    }
}

/// Relay endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySettings {
    /// Address of the signaling relay.
    #[serde(default = "default_relay_address")]
    pub address: String,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            address: default_relay_address(),
        }
    }
}

fn default_relay_address() -> String {
    "127.0.0.1:4433".to_string()
}

/// Operation timeouts, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutSettings {
    /// How long to wait for the relay's side of the handshake.
    #[serde(default = "default_auth_secs")]
    pub auth_secs: u64,
    /// How long a peer link may spend negotiating before it is torn down.
    #[serde(default = "default_peer_connect_secs")]
    pub peer_connect_secs: u64,
    /// How long to wait for someone to answer a document request.
    #[serde(default = "default_request_secs")]
    pub request_secs: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            auth_secs: default_auth_secs(),
            peer_connect_secs: default_peer_connect_secs(),
            request_secs: default_request_secs(),
        }
    }
}

fn default_auth_secs() -> u64 {
    5
}

fn default_peer_connect_secs() -> u64 {
    10
}

fn default_request_secs() -> u64 {
    5
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path that was attempted.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The file is not valid TOML for this schema.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path that was attempted.
        path: String,
        /// Underlying TOML error.
        source: toml::de::Error,
    },
}
