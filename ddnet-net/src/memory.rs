//! In-process transport implementations for tests.
//!
//! [`MemoryHub`] stands in for the relay socket layer: dialing hands one end
//! of a paired connection to the hub's accept queue. [`MemoryPeerFactory`]
//! stands in for the peer transport, completing offer/answer negotiation
//! through the same signaling payloads real links would relay.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ddnet_types::ClientIdentity;
use tokio::sync::mpsc;

use crate::connection::{Connection, Dialer, Incoming, Listener, NetError};
use crate::peer::{PeerFactory, PeerLink, PeerLinkEvent};

// ===========================================
// MemoryConnection
// ===========================================

/// One end of an in-process duplex connection.
pub struct MemoryConnection {
    tx: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    open: AtomicBool,
}

impl MemoryConnection {
    /// Create two connected ends.
    pub fn pair() -> (MemoryConnection, MemoryConnection) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        let a = MemoryConnection {
            tx: Mutex::new(Some(a_tx)),
            rx: tokio::sync::Mutex::new(a_rx),
            open: AtomicBool::new(true),
        };
        let b = MemoryConnection {
            tx: Mutex::new(Some(b_tx)),
            rx: tokio::sync::Mutex::new(b_rx),
            open: AtomicBool::new(true),
        };
        (a, b)
    }
}

impl std::fmt::Debug for MemoryConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryConnection")
            .field("open", &self.is_open())
            .finish()
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn send(&self, data: &[u8]) -> Result<(), NetError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(NetError::NotConnected);
        }
        let tx = self.tx.lock().expect("lock poisoned");
        match tx.as_ref() {
            Some(tx) => tx
                .send(data.to_vec())
                .map_err(|_| NetError::ConnectionClosed),
            None => Err(NetError::NotConnected),
        }
    }

    async fn recv(&self) -> Result<Vec<u8>, NetError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(NetError::NotConnected);
        }
        let mut rx = self.rx.lock().await;
        rx.recv().await.ok_or(NetError::ConnectionClosed)
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), NetError> {
        self.open.store(false, Ordering::SeqCst);
        // Dropping the sender wakes the remote recv with ConnectionClosed
        self.tx.lock().expect("lock poisoned").take();
        Ok(())
    }
}

// ===========================================
// MemoryHub
// ===========================================

struct HubInner {
    accept_tx: mpsc::UnboundedSender<Incoming>,
    accept_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Incoming>>,
}

/// An in-process relay rendezvous: every dial hands the server end of a fresh
/// connection pair to the hub's accept queue.
#[derive(Clone)]
pub struct MemoryHub {
    inner: Arc<HubInner>,
}

impl MemoryHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(HubInner {
                accept_tx,
                accept_rx: tokio::sync::Mutex::new(accept_rx),
            }),
        }
    }
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryHub").finish()
    }
}

#[async_trait]
impl Dialer for MemoryHub {
    async fn dial(&self, identity: &ClientIdentity) -> Result<Box<dyn Connection>, NetError> {
        let (client_end, server_end) = MemoryConnection::pair();
        self.inner
            .accept_tx
            .send(Incoming {
                identity: identity.clone(),
                connection: Box::new(server_end),
            })
            .map_err(|_| NetError::ConnectionFailed("hub shut down".into()))?;
        Ok(Box::new(client_end))
    }
}

#[async_trait]
impl Listener for MemoryHub {
    async fn accept(&self) -> Result<Incoming, NetError> {
        let mut rx = self.inner.accept_rx.lock().await;
        rx.recv().await.ok_or(NetError::ConnectionClosed)
    }
}

// ===========================================
// MemoryPeerFactory
// ===========================================

const SIGNAL_OFFER: u8 = 0;
const SIGNAL_ANSWER: u8 = 1;

struct LinkShared {
    events_tx: mpsc::UnboundedSender<PeerLinkEvent>,
    remote: Mutex<Option<mpsc::UnboundedSender<PeerLinkEvent>>>,
    open: AtomicBool,
    closed: AtomicBool,
}

struct PeerFactoryInner {
    next_id: AtomicU64,
    registry: Mutex<HashMap<u64, Arc<LinkShared>>>,
    drop_signals: AtomicBool,
}

/// In-process peer factory.
///
/// Links created by the same factory can negotiate with each other: the
/// initiator's offer payload names its link, the passive side answers and
/// both ends open. Payloads are opaque to callers, exactly as real signaling
/// payloads would be.
#[derive(Clone)]
pub struct MemoryPeerFactory {
    inner: Arc<PeerFactoryInner>,
}

impl MemoryPeerFactory {
    /// Create a factory with no links.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(PeerFactoryInner {
                next_id: AtomicU64::new(1),
                registry: Mutex::new(HashMap::new()),
                drop_signals: AtomicBool::new(false),
            }),
        }
    }

    /// When set, links ignore inbound signals so negotiation never
    /// completes. Used to exercise connect-timeout paths.
    pub fn set_drop_signals(&self, drop: bool) {
        self.inner.drop_signals.store(drop, Ordering::SeqCst);
    }
}

impl Default for MemoryPeerFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryPeerFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPeerFactory").finish()
    }
}

impl PeerFactory for MemoryPeerFactory {
    fn create(&self, initiator: bool) -> Box<dyn PeerLink> {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(LinkShared {
            events_tx: events_tx.clone(),
            remote: Mutex::new(None),
            open: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });
        self.inner
            .registry
            .lock()
            .expect("lock poisoned")
            .insert(id, Arc::clone(&shared));

        if initiator {
            let mut offer = vec![SIGNAL_OFFER];
            offer.extend_from_slice(&id.to_be_bytes());
            // Queue delivery is fine: the manager reads events after create
            let _ = events_tx.send(PeerLinkEvent::Signal(offer));
        }

        Box::new(MemoryPeerLink {
            id,
            factory: Arc::clone(&self.inner),
            shared,
            events_rx: tokio::sync::Mutex::new(events_rx),
        })
    }
}

/// One end of an in-process peer connection.
pub struct MemoryPeerLink {
    id: u64,
    factory: Arc<PeerFactoryInner>,
    shared: Arc<LinkShared>,
    events_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<PeerLinkEvent>>,
}

impl MemoryPeerLink {
    fn wire_to(&self, remote_id: u64) -> Result<Arc<LinkShared>, NetError> {
        let registry = self.factory.registry.lock().expect("lock poisoned");
        let remote = registry
            .get(&remote_id)
            .ok_or(NetError::ConnectionFailed("unknown link in signal".into()))?;
        *self.shared.remote.lock().expect("lock poisoned") = Some(remote.events_tx.clone());
        Ok(Arc::clone(remote))
    }
}

impl std::fmt::Debug for MemoryPeerLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPeerLink")
            .field("id", &self.id)
            .field("open", &self.is_open())
            .finish()
    }
}

#[async_trait]
impl PeerLink for MemoryPeerLink {
    async fn signal(&self, payload: &[u8]) -> Result<(), NetError> {
        if self.factory.drop_signals.load(Ordering::SeqCst) {
            return Ok(());
        }
        if payload.len() != 9 {
            return Err(NetError::ReceiveFailed("malformed signal payload".into()));
        }
        let remote_id = u64::from_be_bytes(payload[1..9].try_into().expect("8 bytes"));

        match payload[0] {
            SIGNAL_OFFER => {
                // Passive side: wire up, answer, open
                self.wire_to(remote_id)?;
                self.shared.open.store(true, Ordering::SeqCst);
                let mut answer = vec![SIGNAL_ANSWER];
                answer.extend_from_slice(&self.id.to_be_bytes());
                let _ = self.shared.events_tx.send(PeerLinkEvent::Signal(answer));
                let _ = self.shared.events_tx.send(PeerLinkEvent::Open);
                Ok(())
            }
            SIGNAL_ANSWER => {
                // Initiator: wire up and open
                self.wire_to(remote_id)?;
                self.shared.open.store(true, Ordering::SeqCst);
                let _ = self.shared.events_tx.send(PeerLinkEvent::Open);
                Ok(())
            }
            other => Err(NetError::ReceiveFailed(format!(
                "unknown signal kind {other}"
            ))),
        }
    }

    async fn send(&self, frame: &[u8]) -> Result<(), NetError> {
        if !self.is_open() {
            return Err(NetError::NotConnected);
        }
        let remote = self.shared.remote.lock().expect("lock poisoned");
        match remote.as_ref() {
            Some(remote) => remote
                .send(PeerLinkEvent::Data(frame.to_vec()))
                .map_err(|_| NetError::ConnectionClosed),
            None => Err(NetError::NotConnected),
        }
    }

    async fn next_event(&self) -> Option<PeerLinkEvent> {
        let mut rx = self.events_rx.lock().await;
        if self.shared.closed.load(Ordering::SeqCst) {
            return rx.try_recv().ok();
        }
        rx.recv().await
    }

    fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst) && !self.shared.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), NetError> {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.shared.open.store(false, Ordering::SeqCst);
        self.factory
            .registry
            .lock()
            .expect("lock poisoned")
            .remove(&self.id);
        if let Some(remote) = self
            .shared
            .remote
            .lock()
            .expect("lock poisoned")
            .take()
        {
            let _ = remote.send(PeerLinkEvent::Closed);
        }
        let _ = self.shared.events_tx.send(PeerLinkEvent::Closed);
        Ok(())
    }
}
