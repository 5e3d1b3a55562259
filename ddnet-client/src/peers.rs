//! Peer link lifecycle and multiplexed peer channels.
//!
//! Peer links are negotiated out-of-band: each transport signal is wrapped in
//! an encrypted [`ControlMessage::Signal`] envelope and relayed to the
//! counterparty session. Once a link opens, application payloads travel as
//! chunked frames with a channel-id prefix, reassembled here and fanned out
//! as [`PeerEvent::Data`].

use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use ddnet_core::{encode_frames, Assembler};
use ddnet_net::{PeerFactory, PeerLink, PeerLinkEvent};
use ddnet_types::{ClientIdentity, ControlMessage, DocumentId, Envelope, PeerId};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::ClientError;
use crate::signaling::SignalingClient;

const EVENT_CAPACITY: usize = 256;

/// Events emitted for peer links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// A peer link finished negotiating and is ready for data.
    Joined {
        /// The document the link belongs to.
        document: DocumentId,
        /// The peer that joined.
        peer: PeerId,
    },
    /// A peer link closed.
    Left {
        /// The document the link belonged to.
        document: DocumentId,
        /// The peer that left.
        peer: PeerId,
    },
    /// A complete reassembled payload arrived on a channel.
    Data {
        /// The document the link belongs to.
        document: DocumentId,
        /// The sending peer.
        peer: PeerId,
        /// The channel the payload was sent on.
        channel: u32,
        /// The reassembled payload.
        payload: Vec<u8>,
    },
}

struct PeerEntry {
    link: Arc<dyn PeerLink>,
    document: DocumentId,
    counterparty: ClientIdentity,
    // Initiator-side negotiation timer, cancelled once the link opens.
    watchdog: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl PeerEntry {
    fn cancel_watchdog(&self) {
        if let Some(handle) = self.watchdog.lock().expect("lock poisoned").take() {
            handle.abort();
        }
    }
}

/// Tracks every peer link, keyed by deterministic peer id.
///
/// Both sides derive the same [`PeerId`] from the document address and the
/// counterparty's identity, so signal envelopes always find their link and
/// duplicate connection attempts collapse into one.
pub struct PeerManager {
    signaling: Arc<SignalingClient>,
    factory: Arc<dyn PeerFactory>,
    connect_timeout: Duration,
    peers: DashMap<PeerId, Arc<PeerEntry>>,
    events: broadcast::Sender<PeerEvent>,
}

impl std::fmt::Debug for PeerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerManager")
            .field("peers", &self.peers.len())
            .finish()
    }
}

impl PeerManager {
    /// Create a manager with no peers.
    pub fn new(
        signaling: Arc<SignalingClient>,
        factory: Arc<dyn PeerFactory>,
        connect_timeout: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            signaling,
            factory,
            connect_timeout,
            peers: DashMap::new(),
            events,
        }
    }

    /// Subscribe to peer events.
    pub fn subscribe(&self) -> broadcast::Receiver<PeerEvent> {
        self.events.subscribe()
    }

    /// Start (or join) a peer link with `counterparty` for `document`.
    ///
    /// Idempotent: a link that already exists for the derived peer id is
    /// left untouched. Initiated links that fail to open within the connect
    /// timeout are torn down.
    pub fn create_peer(
        self: &Arc<Self>,
        document: DocumentId,
        counterparty: ClientIdentity,
        initiator: bool,
    ) -> PeerId {
        let (peer, _) = self.ensure_peer(document, counterparty, initiator);
        peer
    }

    /// Route one inbound transport signal to its link, creating the passive
    /// side of the link on first contact.
    pub async fn on_signal(
        self: &Arc<Self>,
        document: DocumentId,
        from: ClientIdentity,
        payload: &[u8],
    ) {
        let (peer, entry) = self.ensure_peer(document, from, false);
        if let Err(e) = entry.link.signal(payload).await {
            warn!(%peer, error = %e, "peer link rejected signal");
        }
    }

    /// Send `payload` to one peer on `channel`, chunked as needed.
    pub async fn send(
        &self,
        peer: &PeerId,
        channel: u32,
        payload: &[u8],
    ) -> Result<(), ClientError> {
        let entry = self
            .peers
            .get(peer)
            .map(|e| Arc::clone(&e))
            .ok_or(ClientError::UnknownPeer { peer: *peer })?;
        for frame in encode_frames(channel, payload) {
            entry.link.send(&frame).await?;
        }
        Ok(())
    }

    /// Send `payload` to every open peer of `document` on `channel`.
    pub async fn broadcast(&self, document: &DocumentId, channel: u32, payload: &[u8]) {
        for entry in self.open_peers(|e| e.document == *document) {
            self.send_frames(&entry, channel, payload).await;
        }
    }

    /// Send `payload` to every open peer on `channel`, regardless of
    /// document.
    pub async fn broadcast_all(&self, channel: u32, payload: &[u8]) {
        for entry in self.open_peers(|_| true) {
            self.send_frames(&entry, channel, payload).await;
        }
    }

    /// Peer ids currently tracked for `document`.
    pub fn peers_for(&self, document: &DocumentId) -> Vec<PeerId> {
        self.peers
            .iter()
            .filter(|entry| entry.value().document == *document)
            .map(|entry| *entry.key())
            .collect()
    }

    /// Total number of tracked peer links.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Close every peer link.
    pub async fn close_all(&self) {
        let entries: Vec<Arc<PeerEntry>> =
            self.peers.iter().map(|e| Arc::clone(e.value())).collect();
        for entry in entries {
            let _ = entry.link.close().await;
        }
    }

    fn ensure_peer(
        self: &Arc<Self>,
        document: DocumentId,
        counterparty: ClientIdentity,
        initiator: bool,
    ) -> (PeerId, Arc<PeerEntry>) {
        let peer = PeerId::derive(&document, &counterparty.public_key, &counterparty.client_id);

        let entry = match self.peers.entry(peer) {
            dashmap::mapref::entry::Entry::Occupied(occupied) => {
                return (peer, Arc::clone(occupied.get()))
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let link: Arc<dyn PeerLink> = Arc::from(self.factory.create(initiator));
                let entry = Arc::new(PeerEntry {
                    link,
                    document,
                    counterparty,
                    watchdog: Mutex::new(None),
                });
                vacant.insert(Arc::clone(&entry));
                entry
            }
        };
        debug!(%peer, initiator, "peer link created");

        let manager = Arc::clone(self);
        let pump_entry = Arc::clone(&entry);
        tokio::spawn(async move {
            manager.pump(peer, pump_entry).await;
        });

        if initiator {
            let watchdog_entry = Arc::clone(&entry);
            let timeout = self.connect_timeout;
            let handle = tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                if !watchdog_entry.link.is_open() {
                    debug!(%peer, "peer link negotiation timed out");
                    let _ = watchdog_entry.link.close().await;
                }
            });
            *entry.watchdog.lock().expect("lock poisoned") = Some(handle);
        }

        (peer, entry)
    }

    /// Drain a link's events until it closes: outbound signals get wrapped
    /// and relayed, inbound frames get reassembled.
    async fn pump(self: Arc<Self>, peer: PeerId, entry: Arc<PeerEntry>) {
        let mut assembler = Assembler::new();
        let mut opened = false;

        while let Some(event) = entry.link.next_event().await {
            match event {
                PeerLinkEvent::Signal(payload) => {
                    self.relay_signal(&entry, payload).await;
                }
                PeerLinkEvent::Open => {
                    opened = true;
                    entry.cancel_watchdog();
                    let _ = self.events.send(PeerEvent::Joined {
                        document: entry.document,
                        peer,
                    });
                }
                PeerLinkEvent::Data(frame) => match assembler.push(&frame) {
                    Ok(Some((channel, payload))) => {
                        let _ = self.events.send(PeerEvent::Data {
                            document: entry.document,
                            peer,
                            channel,
                            payload,
                        });
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(%peer, error = %e, "dropping malformed frame sequence");
                        assembler = Assembler::new();
                    }
                },
                PeerLinkEvent::Closed => break,
            }
        }

        entry.cancel_watchdog();
        self.peers.remove(&peer);
        if opened {
            let _ = self.events.send(PeerEvent::Left {
                document: entry.document,
                peer,
            });
        }
        debug!(%peer, "peer link closed");
    }

    async fn relay_signal(&self, entry: &PeerEntry, payload: Vec<u8>) {
        let message = ControlMessage::Signal {
            document_id: entry.document,
            payload,
        };
        let data = match message.to_bytes() {
            Ok(data) => data,
            Err(e) => {
                warn!(error = %e, "failed to encode signal message");
                return;
            }
        };
        let envelope = Envelope::to_session(self.signaling.identity(), entry.counterparty, data);
        if let Err(e) = self.signaling.send(&envelope).await {
            warn!(error = %e, "failed to relay signal");
        }
    }

    fn open_peers(&self, filter: impl Fn(&PeerEntry) -> bool) -> Vec<Arc<PeerEntry>> {
        self.peers
            .iter()
            .filter(|entry| entry.value().link.is_open() && filter(entry.value()))
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    async fn send_frames(&self, entry: &PeerEntry, channel: u32, payload: &[u8]) {
        for frame in encode_frames(channel, payload) {
            if let Err(e) = entry.link.send(&frame).await {
                debug!(error = %e, "frame delivery failed");
                return;
            }
        }
    }
}
