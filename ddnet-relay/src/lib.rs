//! Untrusted signaling relay.
//!
//! The relay is deliberately blind: it authenticates clients by
//! challenge-response, then forwards signed envelopes by their addressing
//! without ever reading payloads. End-to-end confidentiality is the clients'
//! job; the relay only keeps unauthenticated or forged traffic out.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod auth;
mod config;
mod error;
mod server;

pub use auth::authenticate;
pub use config::{AuthConfig, ConfigError, RelayConfig, ServerConfig};
pub use error::{ProtocolError, RelayError};
pub use server::{RelayMetrics, SignalingServer};
