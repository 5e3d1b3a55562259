//! Transport abstractions for ddnet.
//!
//! This crate defines the pluggable byte-stream seams the rest of the system
//! is written against:
//!
//! - [`Connection`] - an established, ordered, reliable duplex byte stream
//!   (a relay socket on either end).
//! - [`Dialer`] / [`Listener`] - how clients reach a relay and how the relay
//!   accepts identity-asserting connections.
//! - [`PeerLink`] / [`PeerFactory`] - offer/answer-negotiated direct peer
//!   channels (WebRTC-style), driven by signaling payloads relayed out of
//!   band.
//!
//! The [`memory`] module provides in-process implementations of all of the
//! above for tests: a [`memory::MemoryHub`] standing in for the relay socket
//! layer and a [`memory::MemoryPeerFactory`] standing in for the peer
//! transport.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod connection;
pub mod memory;
mod peer;

pub use connection::{Connection, Dialer, Incoming, Listener, NetError};
pub use peer::{PeerFactory, PeerLink, PeerLinkEvent};
