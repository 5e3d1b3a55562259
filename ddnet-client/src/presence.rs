//! Presence coalescing and fan-out.
//!
//! Local presence updates are throttled on the trailing edge: the first
//! update arms a short timer, further updates within the window replace the
//! pending payload, and when the timer fires only the latest payload goes
//! out. Remote presence is plain bookkeeping over [`PresenceTracker`].

use std::sync::{Arc, Mutex};
use std::time::Duration;

use ddnet_core::PresenceTracker;
use ddnet_types::PeerId;
use tokio::sync::{broadcast, mpsc};
use tracing::trace;

const EVENT_CAPACITY: usize = 256;

/// Coalescing window for local presence updates.
pub const PRESENCE_THROTTLE: Duration = Duration::from_millis(33);

/// Remote presence changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    /// A peer reported new presence.
    Updated {
        /// The reporting peer.
        peer: PeerId,
        /// Its latest payload.
        state: Vec<u8>,
    },
    /// A peer left; its presence is gone.
    Removed {
        /// The departed peer.
        peer: PeerId,
    },
}

struct Throttle {
    pending: Option<Vec<u8>>,
    armed: bool,
}

/// Local presence throttling plus remote presence tracking.
///
/// Throttled local payloads are handed to the injected `outbound` channel;
/// the owner broadcasts them to peers.
pub struct PresenceService {
    tracker: Mutex<PresenceTracker>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    throttle: Mutex<Throttle>,
    window: Duration,
    events: broadcast::Sender<PresenceEvent>,
}

impl std::fmt::Debug for PresenceService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresenceService")
            .field("peers", &self.tracker.lock().expect("lock poisoned").len())
            .finish()
    }
}

impl PresenceService {
    /// Create a service with the default coalescing window.
    pub fn new(outbound: mpsc::UnboundedSender<Vec<u8>>) -> Self {
        Self::with_window(outbound, PRESENCE_THROTTLE)
    }

    /// Create a service with a custom coalescing window.
    pub fn with_window(outbound: mpsc::UnboundedSender<Vec<u8>>, window: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            tracker: Mutex::new(PresenceTracker::new()),
            outbound,
            throttle: Mutex::new(Throttle {
                pending: None,
                armed: false,
            }),
            window,
            events,
        }
    }

    /// Subscribe to remote presence changes.
    pub fn subscribe(&self) -> broadcast::Receiver<PresenceEvent> {
        self.events.subscribe()
    }

    /// Queue a local presence payload for broadcast.
    ///
    /// Rapid successive calls collapse: only the latest payload per window
    /// reaches the outbound channel.
    pub fn set_local(self: &Arc<Self>, payload: Vec<u8>) {
        let mut throttle = self.throttle.lock().expect("lock poisoned");
        throttle.pending = Some(payload);
        if throttle.armed {
            return;
        }
        throttle.armed = true;
        drop(throttle);

        let service = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(service.window).await;
            service.flush();
        });
    }

    /// Record a peer's presence payload.
    pub fn on_peer_state(&self, peer: PeerId, payload: Vec<u8>) {
        trace!(%peer, bytes = payload.len(), "presence update");
        self.tracker
            .lock()
            .expect("lock poisoned")
            .update(peer, payload.clone());
        let _ = self.events.send(PresenceEvent::Updated {
            peer,
            state: payload,
        });
    }

    /// Drop a departed peer's presence.
    pub fn on_peer_left(&self, peer: &PeerId) {
        if self
            .tracker
            .lock()
            .expect("lock poisoned")
            .remove(peer)
            .is_some()
        {
            let _ = self.events.send(PresenceEvent::Removed { peer: *peer });
        }
    }

    /// All known remote presence, as of now.
    pub fn snapshot(&self) -> Vec<(PeerId, Vec<u8>)> {
        self.tracker.lock().expect("lock poisoned").snapshot()
    }

    fn flush(&self) {
        let mut throttle = self.throttle.lock().expect("lock poisoned");
        throttle.armed = false;
        if let Some(payload) = throttle.pending.take() {
            let _ = self.outbound.send(payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ddnet_types::{ClientId, DocumentId, PublicKeyBytes};

    fn peer(tag: u8) -> PeerId {
        let doc = DocumentId::derive(&PublicKeyBytes::new([tag; 33]), &[tag; 16]);
        let client = ClientId::from_bytes(&[tag; 16]).unwrap();
        PeerId::derive(&doc, &PublicKeyBytes::new([tag; 33]), &client)
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_updates_coalesce_to_the_latest() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let service = Arc::new(PresenceService::new(tx));

        service.set_local(b"one".to_vec());
        service.set_local(b"two".to_vec());
        service.set_local(b"three".to_vec());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(rx.recv().await.unwrap(), b"three");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn separate_windows_each_flush() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let service = Arc::new(PresenceService::new(tx));

        service.set_local(b"first".to_vec());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(rx.recv().await.unwrap(), b"first");

        service.set_local(b"second".to_vec());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(rx.recv().await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn peer_state_is_tracked_and_evented() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let service = Arc::new(PresenceService::new(tx));
        let mut events = service.subscribe();

        let p = peer(1);
        service.on_peer_state(p, b"typing".to_vec());

        assert_eq!(
            events.recv().await.unwrap(),
            PresenceEvent::Updated {
                peer: p,
                state: b"typing".to_vec()
            }
        );
        assert_eq!(service.snapshot(), vec![(p, b"typing".to_vec())]);
    }

    #[tokio::test]
    async fn departed_peer_is_removed_once() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let service = Arc::new(PresenceService::new(tx));
        let mut events = service.subscribe();

        let p = peer(2);
        service.on_peer_state(p, b"here".to_vec());
        let _ = events.recv().await.unwrap();

        service.on_peer_left(&p);
        assert_eq!(
            events.recv().await.unwrap(),
            PresenceEvent::Removed { peer: p }
        );
        assert!(service.snapshot().is_empty());

        // A second leave is a no-op
        service.on_peer_left(&p);
        assert!(events.try_recv().is_err());
    }
}
