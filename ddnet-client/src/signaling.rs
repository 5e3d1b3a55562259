//! Relay link management.
//!
//! [`SignalingClient`] owns the connection to the relay and drives the pure
//! [`LinkState`] machine: every lifecycle event goes through the machine, and
//! the returned actions (dial, authenticate, arm the reconnect timer) are
//! executed here. Inbound envelopes are decoded, decrypted when addressed to
//! us, and fanned out to subscribers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use ddnet_core::{LinkAction, LinkEvent, LinkNotice, LinkState};
use ddnet_crypto::KeyPair;
use ddnet_net::{Connection, Dialer};
use ddnet_types::{ClientId, ClientIdentity, Envelope};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::auth;
use crate::error::ClientError;

const EVENT_CAPACITY: usize = 256;

/// Events emitted by the relay link.
#[derive(Debug, Clone)]
pub enum SignalingEvent {
    /// Connected and authenticated.
    Connected,
    /// A verified (and, when addressed to us, decrypted) inbound envelope.
    Envelope(Envelope),
    /// The link dropped or failed to come up.
    Disconnected {
        /// What went wrong.
        reason: String,
    },
    /// One reconnect attempt failed; more will follow.
    ReconnectFailed {
        /// Which attempt this was.
        attempt: u32,
        /// What went wrong.
        reason: String,
    },
    /// The backoff schedule ran out; the link stays down.
    ReconnectsExhausted,
}

/// An authenticated client link to the signaling relay.
pub struct SignalingClient {
    dialer: Arc<dyn Dialer>,
    keypair: Arc<KeyPair>,
    identity: ClientIdentity,
    auth_timeout: Duration,
    state: Mutex<LinkState>,
    connection: RwLock<Option<Arc<dyn Connection>>>,
    events: broadcast::Sender<SignalingEvent>,
    closing: AtomicBool,
}

impl std::fmt::Debug for SignalingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingClient")
            .field("identity", &self.identity)
            .field("state", &self.state())
            .finish()
    }
}

impl SignalingClient {
    /// Create a disconnected client with a fresh session id.
    pub fn new(dialer: Arc<dyn Dialer>, keypair: Arc<KeyPair>, auth_timeout: Duration) -> Self {
        let identity = ClientIdentity {
            public_key: keypair.public_key(),
            client_id: ClientId::random(),
        };
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            dialer,
            keypair,
            identity,
            auth_timeout,
            state: Mutex::new(LinkState::new()),
            connection: RwLock::new(None),
            events,
            closing: AtomicBool::new(false),
        }
    }

    /// Our identity: public key plus per-process session id.
    pub fn identity(&self) -> ClientIdentity {
        self.identity
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LinkState {
        self.state.lock().expect("lock poisoned").clone()
    }

    /// Whether the link is up and authenticated.
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Subscribe to link events.
    pub fn subscribe(&self) -> broadcast::Receiver<SignalingEvent> {
        self.events.subscribe()
    }

    /// Connect and authenticate, retrying with backoff on failure.
    ///
    /// Resolves once the link is up, or errs once the backoff schedule is
    /// exhausted.
    pub async fn connect(self: &Arc<Self>) -> Result<(), ClientError> {
        if self.is_connected() {
            return Ok(());
        }

        let mut events = self.events.subscribe();
        let actions = self.apply(LinkEvent::ConnectRequested);
        if !actions.is_empty() {
            self.closing.store(false, Ordering::SeqCst);
            let client = Arc::clone(self);
            tokio::spawn(async move {
                client.supervise(actions.into()).await;
            });
        }

        loop {
            match events.recv().await {
                Ok(SignalingEvent::Connected) => return Ok(()),
                Ok(SignalingEvent::ReconnectsExhausted) => {
                    return Err(ClientError::ConnectionFailed {
                        reason: "reconnect attempts exhausted".into(),
                    })
                }
                // A transient failure keeps the backoff loop going, but a
                // close() while we wait rejects the in-flight connect.
                Ok(SignalingEvent::Disconnected { reason }) => {
                    if self.closing.load(Ordering::SeqCst) {
                        return Err(ClientError::ConnectionFailed { reason });
                    }
                    continue;
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return Err(ClientError::NotConnected),
            }
        }
    }

    /// Sign, seal and send an envelope over the link.
    pub async fn send(&self, envelope: &Envelope) -> Result<(), ClientError> {
        let connection = self.current_connection().ok_or(ClientError::NotConnected)?;
        let bytes = ddnet_crypto::encode(envelope, &self.keypair)?;
        connection.send(&bytes).await?;
        Ok(())
    }

    /// Tear the link down and stop reconnecting.
    pub async fn close(&self) {
        self.closing.store(true, Ordering::SeqCst);
        let actions = self.apply(LinkEvent::DisconnectRequested);
        for action in actions {
            match action {
                LinkAction::Disconnect => {
                    if let Some(connection) = self.take_connection() {
                        let _ = connection.close().await;
                    }
                }
                LinkAction::Notify(notice) => self.emit(notice),
                _ => {}
            }
        }
    }

    /// Feed one event through the state machine, returning the actions to
    /// execute.
    fn apply(&self, event: LinkEvent) -> Vec<LinkAction> {
        let mut state = self.state.lock().expect("lock poisoned");
        let (next, actions) = state.clone().on_event(event);
        *state = next;
        actions
    }

    fn current_connection(&self) -> Option<Arc<dyn Connection>> {
        self.connection.read().expect("lock poisoned").clone()
    }

    fn take_connection(&self) -> Option<Arc<dyn Connection>> {
        self.connection.write().expect("lock poisoned").take()
    }

    /// Sequentially execute state-machine actions, reading from the socket
    /// whenever the link is up and no actions are pending.
    async fn supervise(self: Arc<Self>, mut pending: VecDeque<LinkAction>) {
        loop {
            let Some(action) = pending.pop_front() else {
                if !self.is_connected() {
                    break;
                }
                let Some(connection) = self.current_connection() else {
                    break;
                };
                match connection.recv().await {
                    Ok(bytes) => self.dispatch(&bytes),
                    Err(e) => {
                        if self.closing.load(Ordering::SeqCst) {
                            break;
                        }
                        pending.extend(self.apply(LinkEvent::Disconnected {
                            reason: e.to_string(),
                        }));
                    }
                }
                continue;
            };

            match action {
                LinkAction::Connect => match self.dialer.dial(&self.identity).await {
                    Ok(connection) => {
                        if self.closing.load(Ordering::SeqCst) {
                            // Closed while the dial was in flight.
                            let _ = connection.close().await;
                            break;
                        }
                        *self.connection.write().expect("lock poisoned") =
                            Some(Arc::from(connection));
                        pending.extend(self.apply(LinkEvent::ConnectSucceeded));
                    }
                    Err(e) => {
                        pending.extend(self.apply(LinkEvent::ConnectFailed {
                            error: e.to_string(),
                        }));
                    }
                },
                LinkAction::StartAuth => {
                    let Some(connection) = self.current_connection() else {
                        pending.extend(self.apply(LinkEvent::AuthFailed {
                            error: "connection vanished before authentication".into(),
                        }));
                        continue;
                    };
                    match auth::authenticate(connection.as_ref(), &self.keypair, self.auth_timeout)
                        .await
                    {
                        Ok(()) => {
                            info!(identity = %self.identity.public_key, "relay link established");
                            pending.extend(self.apply(LinkEvent::AuthSucceeded));
                        }
                        Err(e) => {
                            let _ = connection.close().await;
                            pending.extend(self.apply(LinkEvent::AuthFailed {
                                error: e.to_string(),
                            }));
                        }
                    }
                }
                LinkAction::Disconnect => {
                    if let Some(connection) = self.take_connection() {
                        let _ = connection.close().await;
                    }
                }
                LinkAction::StartReconnectTimer { delay } => {
                    debug!(?delay, "reconnect timer armed");
                    tokio::time::sleep(delay).await;
                    if self.closing.load(Ordering::SeqCst) {
                        break;
                    }
                    pending.extend(self.apply(LinkEvent::ReconnectTimer));
                }
                LinkAction::CancelReconnect => {}
                LinkAction::Notify(notice) => self.emit(notice),
            }
        }
    }

    fn dispatch(&self, bytes: &[u8]) {
        match ddnet_crypto::decode(bytes, &self.keypair) {
            Ok(envelope) => {
                let _ = self.events.send(SignalingEvent::Envelope(envelope));
            }
            Err(e) => warn!(error = %e, "discarding undecodable envelope"),
        }
    }

    fn emit(&self, notice: LinkNotice) {
        let event = match notice {
            LinkNotice::Connected => SignalingEvent::Connected,
            LinkNotice::ConnectionFailed { error } => {
                SignalingEvent::Disconnected { reason: error }
            }
            LinkNotice::Disconnected { reason } => SignalingEvent::Disconnected { reason },
            LinkNotice::ReconnectFailed { attempt, error } => SignalingEvent::ReconnectFailed {
                attempt,
                reason: error,
            },
            LinkNotice::ReconnectsExhausted => SignalingEvent::ReconnectsExhausted,
        };
        let _ = self.events.send(event);
    }
}
