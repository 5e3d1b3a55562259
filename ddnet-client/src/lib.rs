//! Document sharing client.
//!
//! Everything above the wire: the authenticated relay link, peer link
//! negotiation and framing, per-document CRDT sync, persistence, and
//! presence, assembled behind [`DocumentSharingClient`].

#![warn(missing_docs)]
#![warn(clippy::all)]

mod auth;
mod config;
mod error;
mod peers;
mod presence;
mod sharing;
mod signaling;

pub use auth::authenticate;
pub use config::{ClientConfig, ConfigError, RelaySettings, TimeoutSettings};
pub use error::ClientError;
pub use peers::{PeerEvent, PeerManager};
pub use presence::{PresenceEvent, PresenceService, PRESENCE_THROTTLE};
pub use sharing::{DocumentSharingClient, PRESENCE_CHANNEL, SYNC_CHANNEL};
pub use signaling::{SignalingClient, SignalingEvent};
