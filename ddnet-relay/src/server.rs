//! Envelope-routing signaling server.
//!
//! The server never looks inside envelope payloads. It authenticates each
//! connection, registers the session under the identity the client proved,
//! and forwards verified envelopes by their addressing: broadcast, every
//! session of a public key, or one exact session. Anything malformed or
//! unroutable is logged and dropped; a bad client can never take the relay
//! down.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use ddnet_net::{Connection, Listener};
use ddnet_types::ClientIdentity;
use tracing::{debug, info, warn};

use crate::auth::authenticate;
use crate::config::RelayConfig;
use crate::error::RelayError;

/// Counters exposed by the relay.
#[derive(Debug, Default)]
pub struct RelayMetrics {
    connections_total: AtomicU64,
    auth_failures: AtomicU64,
    envelopes_routed: AtomicU64,
    envelopes_dropped: AtomicU64,
    broadcasts_total: AtomicU64,
}

impl RelayMetrics {
    /// Connections accepted since startup, authenticated or not.
    pub fn connections_total(&self) -> u64 {
        self.connections_total.load(Ordering::Relaxed)
    }

    /// Connections dropped during the handshake.
    pub fn auth_failures(&self) -> u64 {
        self.auth_failures.load(Ordering::Relaxed)
    }

    /// Envelopes forwarded to at least one session.
    pub fn envelopes_routed(&self) -> u64 {
        self.envelopes_routed.load(Ordering::Relaxed)
    }

    /// Envelopes discarded: bad signature, malformed, or no live recipient.
    pub fn envelopes_dropped(&self) -> u64 {
        self.envelopes_dropped.load(Ordering::Relaxed)
    }

    /// Envelopes that fanned out to every other session.
    pub fn broadcasts_total(&self) -> u64 {
        self.broadcasts_total.load(Ordering::Relaxed)
    }
}

/// The relay service: session registry plus routing loop.
pub struct SignalingServer {
    config: RelayConfig,
    metrics: RelayMetrics,
    sessions: DashMap<ClientIdentity, Arc<dyn Connection>>,
}

impl std::fmt::Debug for SignalingServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingServer")
            .field("sessions", &self.sessions.len())
            .field("metrics", &self.metrics)
            .finish()
    }
}

impl SignalingServer {
    /// Create a server with no sessions.
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            metrics: RelayMetrics::default(),
            sessions: DashMap::new(),
        }
    }

    /// Runtime counters.
    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    /// Number of authenticated sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Accept connections until the listener closes, spawning a task per
    /// connection.
    pub async fn run<L>(self: Arc<Self>, listener: L) -> Result<(), RelayError>
    where
        L: Listener + 'static,
    {
        info!(bind_address = %self.config.server.bind_address, "relay started");
        loop {
            let incoming = listener
                .accept()
                .await
                .map_err(|_| RelayError::ListenerClosed)?;
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                server
                    .handle_connection(incoming.identity, incoming.connection)
                    .await;
            });
        }
    }

    /// Close every session. The registry is left empty.
    pub async fn shutdown(&self) {
        for entry in self.sessions.iter() {
            let _ = entry.value().close().await;
        }
        self.sessions.clear();
        info!("relay shut down");
    }

    async fn handle_connection(&self, identity: ClientIdentity, connection: Box<dyn Connection>) {
        self.metrics
            .connections_total
            .fetch_add(1, Ordering::Relaxed);

        let connection: Arc<dyn Connection> = Arc::from(connection);
        let timeout = Duration::from_secs(self.config.auth.challenge_timeout_secs);
        if let Err(e) = authenticate(connection.as_ref(), &identity, timeout).await {
            warn!(client = %identity.public_key, error = %e, "handshake failed");
            self.metrics.auth_failures.fetch_add(1, Ordering::Relaxed);
            let _ = connection.close().await;
            return;
        }

        // A reconnect under the same identity replaces the stale session
        if let Some(previous) = self.sessions.insert(identity, Arc::clone(&connection)) {
            let _ = previous.close().await;
        }
        info!(
            client = %identity.public_key,
            sessions = self.sessions.len(),
            "session registered"
        );

        loop {
            match connection.recv().await {
                Ok(bytes) => self.route(&bytes, &identity).await,
                Err(_) => break,
            }
        }

        // Only deregister if the slot still holds this connection
        self.sessions
            .remove_if(&identity, |_, held| Arc::ptr_eq(held, &connection));
        info!(
            client = %identity.public_key,
            sessions = self.sessions.len(),
            "session closed"
        );
    }

    /// Forward one envelope. `bytes` is relayed unchanged; the relay only
    /// reads the signature and the addressing fields.
    async fn route(&self, bytes: &[u8], sender: &ClientIdentity) {
        let envelope = match ddnet_crypto::decode_verified(bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(client = %sender.public_key, error = %e, "dropping unverifiable envelope");
                self.metrics
                    .envelopes_dropped
                    .fetch_add(1, Ordering::Relaxed);
                return;
            }
        };
        if envelope.from != *sender {
            warn!(client = %sender.public_key, "dropping envelope with forged sender");
            self.metrics
                .envelopes_dropped
                .fetch_add(1, Ordering::Relaxed);
            return;
        }

        let targets: Vec<Arc<dyn Connection>> = match &envelope.to {
            None => {
                self.metrics.broadcasts_total.fetch_add(1, Ordering::Relaxed);
                self.sessions
                    .iter()
                    .filter(|entry| entry.key() != sender)
                    .map(|entry| Arc::clone(entry.value()))
                    .collect()
            }
            Some(recipient) => self
                .sessions
                .iter()
                .filter(|entry| {
                    let key = entry.key();
                    key.public_key == recipient.public_key
                        && recipient
                            .client_id
                            .map_or(key != sender, |client_id| key.client_id == client_id)
                })
                .map(|entry| Arc::clone(entry.value()))
                .collect(),
        };

        if targets.is_empty() {
            debug!(client = %sender.public_key, "no live recipient for envelope");
            self.metrics
                .envelopes_dropped
                .fetch_add(1, Ordering::Relaxed);
            return;
        }

        for target in targets {
            if let Err(e) = target.send(bytes).await {
                debug!(error = %e, "delivery to session failed");
            }
        }
        self.metrics.envelopes_routed.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ddnet_crypto::KeyPair;
    use ddnet_net::memory::MemoryHub;
    use ddnet_net::Dialer;
    use ddnet_types::{AuthMessage, ClientId, Envelope};

    fn start_server(config: RelayConfig) -> (Arc<SignalingServer>, MemoryHub) {
        let server = Arc::new(SignalingServer::new(config));
        let hub = MemoryHub::new();
        tokio::spawn(Arc::clone(&server).run(hub.clone()));
        (server, hub)
    }

    struct TestClient {
        identity: ClientIdentity,
        keypair: KeyPair,
        connection: Box<dyn Connection>,
    }

    impl TestClient {
        async fn connect(hub: &MemoryHub) -> Self {
            let keypair = KeyPair::generate();
            let identity = ClientIdentity {
                public_key: keypair.public_key(),
                client_id: ClientId::random(),
            };
            let connection = hub.dial(&identity).await.unwrap();

            let challenge =
                match AuthMessage::from_bytes(&connection.recv().await.unwrap()).unwrap() {
                    AuthMessage::Challenge { challenge } => challenge,
                    other => panic!("expected challenge, got {other:?}"),
                };
            let signature = *keypair.sign(&challenge).as_bytes();
            connection
                .send(
                    &AuthMessage::ChallengeResponse { signature }
                        .to_bytes()
                        .unwrap(),
                )
                .await
                .unwrap();
            match AuthMessage::from_bytes(&connection.recv().await.unwrap()).unwrap() {
                AuthMessage::Authenticated => {}
                other => panic!("expected authenticated, got {other:?}"),
            }

            Self {
                identity,
                keypair,
                connection,
            }
        }

        async fn send_envelope(&self, envelope: &Envelope) {
            let bytes = ddnet_crypto::encode(envelope, &self.keypair).unwrap();
            self.connection.send(&bytes).await.unwrap();
        }

        async fn recv_envelope(&self) -> Envelope {
            let bytes = self.connection.recv().await.unwrap();
            ddnet_crypto::decode_verified(&bytes).unwrap()
        }
    }

    #[tokio::test]
    async fn handshake_registers_session() {
        let (server, hub) = start_server(RelayConfig::default());

        let _client = TestClient::connect(&hub).await;
        assert_eq!(server.session_count(), 1);
        assert_eq!(server.metrics().connections_total(), 1);
        assert_eq!(server.metrics().auth_failures(), 0);
    }

    #[tokio::test]
    async fn forged_signature_is_rejected() {
        let (server, hub) = start_server(RelayConfig::default());

        let keypair = KeyPair::generate();
        let identity = ClientIdentity {
            public_key: keypair.public_key(),
            client_id: ClientId::random(),
        };
        let connection = hub.dial(&identity).await.unwrap();

        let _ = connection.recv().await.unwrap();
        let impostor = KeyPair::generate();
        let signature = *impostor.sign(b"not even the challenge").as_bytes();
        connection
            .send(
                &AuthMessage::ChallengeResponse { signature }
                    .to_bytes()
                    .unwrap(),
            )
            .await
            .unwrap();

        // Server closes the connection instead of authenticating
        assert!(connection.recv().await.is_err());
        assert_eq!(server.session_count(), 0);
        assert_eq!(server.metrics().auth_failures(), 1);
    }

    #[tokio::test]
    async fn silent_client_is_timed_out() {
        let mut config = RelayConfig::default();
        config.auth.challenge_timeout_secs = 0;
        let (server, hub) = start_server(config);

        let connection = hub
            .dial(&ClientIdentity {
                public_key: KeyPair::generate().public_key(),
                client_id: ClientId::random(),
            })
            .await
            .unwrap();

        // Never answer; the server must hang up on its own
        loop {
            if connection.recv().await.is_err() {
                break;
            }
        }
        assert_eq!(server.metrics().auth_failures(), 1);
        assert_eq!(server.session_count(), 0);
    }

    #[tokio::test]
    async fn broadcast_reaches_everyone_but_the_sender() {
        let (_server, hub) = start_server(RelayConfig::default());
        let alice = TestClient::connect(&hub).await;
        let bob = TestClient::connect(&hub).await;
        let carol = TestClient::connect(&hub).await;

        alice
            .send_envelope(&Envelope::broadcast(alice.identity, b"hello all".to_vec()))
            .await;

        assert_eq!(bob.recv_envelope().await.data, b"hello all");
        assert_eq!(carol.recv_envelope().await.data, b"hello all");

        // Nothing came back to alice; a follow-up unicast arrives first
        bob.send_envelope(&Envelope::to_session(
            bob.identity,
            alice.identity,
            b"direct".to_vec(),
        ))
        .await;
        let envelope = alice.recv_envelope().await;
        assert_eq!(envelope.from, bob.identity);
    }

    #[tokio::test]
    async fn key_addressing_reaches_all_sessions_of_that_key() {
        let (_server, hub) = start_server(RelayConfig::default());
        let alice = TestClient::connect(&hub).await;
        let bob = TestClient::connect(&hub).await;
        let carol = TestClient::connect(&hub).await;

        alice
            .send_envelope(&Envelope::to_key(
                alice.identity,
                bob.identity.public_key,
                b"for bob".to_vec(),
            ))
            .await;

        let envelope = bob.recv_envelope().await;
        assert_eq!(envelope.from, alice.identity);

        // Carol must not see it; a broadcast arrives first in her queue
        alice
            .send_envelope(&Envelope::broadcast(alice.identity, b"flush".to_vec()))
            .await;
        assert_eq!(carol.recv_envelope().await.data, b"flush");
    }

    #[tokio::test]
    async fn unroutable_envelope_is_dropped() {
        let (server, hub) = start_server(RelayConfig::default());
        let alice = TestClient::connect(&hub).await;

        let stranger = ClientIdentity {
            public_key: KeyPair::generate().public_key(),
            client_id: ClientId::random(),
        };
        alice
            .send_envelope(&Envelope::to_session(
                alice.identity,
                stranger,
                b"into the void".to_vec(),
            ))
            .await;

        // Service continues after the drop
        let bob = TestClient::connect(&hub).await;
        alice
            .send_envelope(&Envelope::broadcast(alice.identity, b"still here".to_vec()))
            .await;
        assert_eq!(bob.recv_envelope().await.data, b"still here");
        assert_eq!(server.metrics().envelopes_dropped(), 1);
    }

    #[tokio::test]
    async fn malformed_bytes_do_not_kill_the_session() {
        let (server, hub) = start_server(RelayConfig::default());
        let alice = TestClient::connect(&hub).await;
        let bob = TestClient::connect(&hub).await;

        alice.connection.send(&[0xba, 0xad]).await.unwrap();
        alice
            .send_envelope(&Envelope::broadcast(alice.identity, b"recovered".to_vec()))
            .await;

        assert_eq!(bob.recv_envelope().await.data, b"recovered");
        assert_eq!(server.metrics().envelopes_dropped(), 1);
    }

    #[tokio::test]
    async fn spoofed_sender_is_dropped() {
        let (server, hub) = start_server(RelayConfig::default());
        let alice = TestClient::connect(&hub).await;
        let bob = TestClient::connect(&hub).await;

        // Validly signed by alice, but naming a session she does not hold
        let other_session = ClientIdentity {
            public_key: alice.identity.public_key,
            client_id: ClientId::random(),
        };
        let forged = Envelope::broadcast(other_session, b"wrong session".to_vec());
        let bytes = ddnet_crypto::encode(&forged, &alice.keypair).unwrap();
        alice.connection.send(&bytes).await.unwrap();

        alice
            .send_envelope(&Envelope::broadcast(alice.identity, b"real".to_vec()))
            .await;
        assert_eq!(bob.recv_envelope().await.data, b"real");
        assert_eq!(server.metrics().envelopes_dropped(), 1);
    }

    #[tokio::test]
    async fn shutdown_closes_all_sessions() {
        let (server, hub) = start_server(RelayConfig::default());
        let alice = TestClient::connect(&hub).await;
        let _bob = TestClient::connect(&hub).await;

        server.shutdown().await;
        assert_eq!(server.session_count(), 0);
        assert!(alice.connection.recv().await.is_err());
    }
}
