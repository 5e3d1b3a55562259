//! Direct peer link abstraction.
//!
//! A [`PeerLink`] models a WebRTC-style data channel: constructed with an
//! initiator flag, negotiated by exchanging opaque signaling payloads through
//! the relay, and usable for framed binary data once open.

use async_trait::async_trait;

use crate::connection::NetError;

/// Events surfaced by a peer link during and after negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerLinkEvent {
    /// An outbound signaling payload that must be relayed to the
    /// counterparty and fed into its link via [`PeerLink::signal`].
    Signal(Vec<u8>),
    /// The data channel is open; [`PeerLink::send`] may now be used.
    Open,
    /// A frame arrived from the counterparty.
    Data(Vec<u8>),
    /// The link closed (remote close, negotiation failure, or local close).
    Closed,
}

/// One end of a direct peer connection.
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Feed a signaling payload received from the counterparty.
    async fn signal(&self, payload: &[u8]) -> Result<(), NetError>;

    /// Send one frame over the open data channel.
    async fn send(&self, frame: &[u8]) -> Result<(), NetError>;

    /// Wait for the next link event.
    ///
    /// Returns `None` after [`PeerLinkEvent::Closed`] has been delivered.
    async fn next_event(&self) -> Option<PeerLinkEvent>;

    /// Whether the data channel is open.
    fn is_open(&self) -> bool;

    /// Tear the link down. Idempotent.
    async fn close(&self) -> Result<(), NetError>;
}

/// Factory for peer links, supplied by the environment.
pub trait PeerFactory: Send + Sync {
    /// Construct one end of a peer connection.
    ///
    /// An initiating link emits an offer [`PeerLinkEvent::Signal`] shortly
    /// after construction; a passive link waits for that offer to arrive via
    /// [`PeerLink::signal`].
    fn create(&self, initiator: bool) -> Box<dyn PeerLink>;
}
