//! Per-document, per-peer CRDT sync orchestration.

use std::collections::HashMap;
use std::sync::Arc;

use ddnet_types::PeerId;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, trace};

use crate::crdt::CrdtEngine;
use crate::document::Document;
use crate::error::DocumentError;

/// Drives `generate_sync_message` / `receive_sync_message` cycles for one
/// document against every connected peer.
///
/// Outbound sync messages are handed to the injected channel as
/// `(peer, bytes)`; the caller delivers them over the peer's sync channel
/// and feeds inbound bytes back through
/// [`on_peer_data`](Self::on_peer_data).
pub struct DocumentSynchronizer<E: CrdtEngine> {
    engine: Arc<E>,
    document: Arc<Mutex<Document<E>>>,
    peers: Mutex<HashMap<PeerId, E::SyncState>>,
    outbound: mpsc::UnboundedSender<(PeerId, Vec<u8>)>,
}

impl<E: CrdtEngine> DocumentSynchronizer<E> {
    /// Create a synchronizer with no tracked peers.
    pub fn new(
        engine: Arc<E>,
        document: Arc<Mutex<Document<E>>>,
        outbound: mpsc::UnboundedSender<(PeerId, Vec<u8>)>,
    ) -> Self {
        Self {
            engine,
            document,
            peers: Mutex::new(HashMap::new()),
            outbound,
        }
    }

    /// Start syncing with a peer. Idempotent: a tracked peer keeps its
    /// existing sync state.
    ///
    /// Immediately attempts an opening sync message; nothing is sent when
    /// there is nothing to exchange yet.
    pub async fn add_peer(&self, peer: PeerId) {
        let mut peers = self.peers.lock().await;
        if peers.contains_key(&peer) {
            return;
        }
        let mut state = self.engine.init_sync_state();

        let doc = self.document.lock().await;
        if let Some(message) = self.engine.generate_sync_message(doc.value(), &mut state) {
            trace!(%peer, bytes = message.len(), "sending opening sync message");
            let _ = self.outbound.send((peer, message));
        }
        drop(doc);

        peers.insert(peer, state);
        debug!(%peer, "peer added to synchronizer");
    }

    /// Stop syncing with a peer and drop its sync state.
    pub async fn remove_peer(&self, peer: &PeerId) {
        if self.peers.lock().await.remove(peer).is_some() {
            debug!(%peer, "peer removed from synchronizer");
        }
    }

    /// Push the document's current state toward every tracked peer.
    ///
    /// Called after every local change; peers that are already up to date
    /// get nothing.
    pub async fn on_local_change(&self) {
        let mut peers = self.peers.lock().await;
        let doc = self.document.lock().await;
        for (peer, state) in peers.iter_mut() {
            if let Some(message) = self.engine.generate_sync_message(doc.value(), state) {
                trace!(%peer, bytes = message.len(), "sending sync message");
                let _ = self.outbound.send((*peer, message));
            }
        }
    }

    /// Merge an inbound sync message and answer with a follow-up if the
    /// exchange has not converged yet.
    ///
    /// Messages from untracked peers are ignored.
    pub async fn on_peer_data(&self, peer: PeerId, message: &[u8]) -> Result<(), DocumentError> {
        let mut peers = self.peers.lock().await;
        let Some(state) = peers.get_mut(&peer) else {
            debug!(%peer, "dropping sync message from untracked peer");
            return Ok(());
        };

        let mut doc = self.document.lock().await;
        doc.apply(|engine, value| {
            engine
                .receive_sync_message(value, state, message)
                .map_err(|e| DocumentError::Validation(e.to_string()))
        })?;

        if let Some(reply) = self.engine.generate_sync_message(doc.value(), state) {
            trace!(%peer, bytes = reply.len(), "sending follow-up sync message");
            let _ = self.outbound.send((peer, reply));
        }
        Ok(())
    }

    /// Whether `peer` is tracked.
    pub async fn has_peer(&self, peer: &PeerId) -> bool {
        self.peers.lock().await.contains_key(peer)
    }

    /// Number of tracked peers.
    pub async fn peer_count(&self) -> usize {
        self.peers.lock().await.len()
    }
}

impl<E: CrdtEngine> std::fmt::Debug for DocumentSynchronizer<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentSynchronizer").finish()
    }
}
