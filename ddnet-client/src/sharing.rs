//! The document sharing client.
//!
//! [`DocumentSharingClient`] wires every layer together: the relay link, the
//! peer manager, per-document synchronizers, persistence, and presence.
//! Documents are fetched by address: a broadcast request goes out, any holder
//! that lists the requester answers with an encrypted signed export and
//! initiates a peer link, and from then on changes flow peer-to-peer as CRDT
//! sync messages.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use ddnet_crypto::KeyPair;
use ddnet_doc::{
    CrdtEngine, Document, DocumentRegistry, DocumentStorage, DocumentSynchronizer, KeyValueStore,
    RegistryEvent,
};
use ddnet_net::{Dialer, PeerFactory};
use ddnet_types::{ClientIdentity, ControlMessage, DocumentId, Envelope, PeerId, PublicKeyBytes};
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::peers::{PeerEvent, PeerManager};
use crate::presence::{PresenceEvent, PresenceService};
use crate::signaling::{SignalingClient, SignalingEvent};

/// Peer channel carrying CRDT sync messages.
pub const SYNC_CHANNEL: u32 = 0;
/// Peer channel carrying presence payloads.
pub const PRESENCE_CHANNEL: u32 = 1;

struct Pumps {
    sync_rx: mpsc::UnboundedReceiver<(PeerId, Vec<u8>)>,
    presence_rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

/// End-to-end document sharing over an untrusted relay.
pub struct DocumentSharingClient<E: CrdtEngine, S: KeyValueStore + 'static> {
    engine: Arc<E>,
    keypair: Arc<KeyPair>,
    signaling: Arc<SignalingClient>,
    peers: Arc<PeerManager>,
    presence: Arc<PresenceService>,
    registry: Arc<DocumentRegistry<E>>,
    storage: Arc<DocumentStorage<E, S>>,
    synchronizers: DashMap<DocumentId, Arc<DocumentSynchronizer<E>>>,
    sync_outbound: mpsc::UnboundedSender<(PeerId, Vec<u8>)>,
    pumps: std::sync::Mutex<Option<Pumps>>,
    request_timeout: Duration,
}

impl<E: CrdtEngine, S: KeyValueStore + 'static> std::fmt::Debug for DocumentSharingClient<E, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentSharingClient")
            .field("identity", &self.signaling.identity())
            .field("documents", &self.registry.len())
            .finish()
    }
}

impl<E: CrdtEngine, S: KeyValueStore + 'static> DocumentSharingClient<E, S> {
    /// Assemble a client from its collaborators.
    ///
    /// Documents persist under a namespace derived from the keypair, so two
    /// identities sharing one store never see each other's blobs.
    pub fn new(
        config: &ClientConfig,
        keypair: KeyPair,
        engine: Arc<E>,
        store: Arc<S>,
        dialer: Arc<dyn Dialer>,
        factory: Arc<dyn PeerFactory>,
    ) -> Arc<Self> {
        let keypair = Arc::new(keypair);
        let signaling = Arc::new(SignalingClient::new(
            dialer,
            Arc::clone(&keypair),
            Duration::from_secs(config.timeouts.auth_secs),
        ));
        let peers = Arc::new(PeerManager::new(
            Arc::clone(&signaling),
            factory,
            Duration::from_secs(config.timeouts.peer_connect_secs),
        ));
        let storage = Arc::new(DocumentStorage::for_identity(
            Arc::clone(&engine),
            store,
            &keypair.public_key(),
        ));
        let registry = Arc::new(DocumentRegistry::new(Arc::clone(&engine)));

        let (sync_tx, sync_rx) = mpsc::unbounded_channel();
        let (presence_tx, presence_rx) = mpsc::unbounded_channel();
        let presence = Arc::new(PresenceService::new(presence_tx));

        Arc::new(Self {
            engine,
            keypair,
            signaling,
            peers,
            presence,
            registry,
            storage,
            synchronizers: DashMap::new(),
            sync_outbound: sync_tx,
            pumps: std::sync::Mutex::new(Some(Pumps {
                sync_rx,
                presence_rx,
            })),
            request_timeout: Duration::from_secs(config.timeouts.request_secs),
        })
    }

    /// Our identity on the relay.
    pub fn identity(&self) -> ClientIdentity {
        self.signaling.identity()
    }

    /// Connect to the relay and start serving documents.
    pub async fn connect(self: &Arc<Self>) -> Result<(), ClientError> {
        self.signaling.connect().await?;

        let pumps = self.pumps.lock().expect("lock poisoned").take();
        if let Some(pumps) = pumps {
            let client = Arc::clone(self);
            tokio::spawn(async move { client.dispatch_envelopes().await });

            let client = Arc::clone(self);
            tokio::spawn(async move { client.dispatch_peer_events().await });

            let client = Arc::clone(self);
            let mut sync_rx = pumps.sync_rx;
            tokio::spawn(async move {
                while let Some((peer, bytes)) = sync_rx.recv().await {
                    if let Err(e) = client.peers.send(&peer, SYNC_CHANNEL, &bytes).await {
                        debug!(%peer, error = %e, "sync message delivery failed");
                    }
                }
            });

            let client = Arc::clone(self);
            let mut presence_rx = pumps.presence_rx;
            tokio::spawn(async move {
                while let Some(payload) = presence_rx.recv().await {
                    client.peers.broadcast_all(PRESENCE_CHANNEL, &payload).await;
                }
            });
        }
        Ok(())
    }

    /// Create a new owned document and persist it.
    pub async fn create_document(
        self: &Arc<Self>,
        allowed_clients: Vec<PublicKeyBytes>,
    ) -> Result<DocumentId, ClientError> {
        let mut document = Document::create(Arc::clone(&self.engine), &self.keypair, allowed_clients)?;
        self.storage.save(&mut document).await?;
        let address = document.address();
        self.registry.insert(document);
        self.ensure_synchronizer(&address);
        info!(document = %address, "document created");
        Ok(address)
    }

    /// Fetch a document by address.
    ///
    /// Resolution order: already open, persisted locally, then the network.
    /// The network path broadcasts a request and waits for any holder to
    /// answer; nobody answering within the request timeout is an error.
    pub async fn request_document(
        self: &Arc<Self>,
        address: &DocumentId,
    ) -> Result<Arc<Mutex<Document<E>>>, ClientError> {
        if let Some(handle) = self.registry.get(address) {
            return Ok(handle);
        }
        if let Some(handle) = self.load_from_storage(address).await {
            return Ok(handle);
        }

        // Subscribe before broadcasting so the response cannot slip past
        let mut registry_events = self.registry.subscribe();
        let message = ControlMessage::RequestDocument {
            document_id: *address,
        }
        .to_bytes()?;
        self.signaling
            .send(&Envelope::broadcast(self.identity(), message))
            .await?;

        let wait = async {
            loop {
                match registry_events.recv().await {
                    Ok(RegistryEvent::DocumentAdded(admitted))
                    | Ok(RegistryEvent::DocumentUpdated(admitted))
                        if admitted == *address =>
                    {
                        break
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        if self.registry.contains(address) {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };
        tokio::time::timeout(self.request_timeout, wait)
            .await
            .map_err(|_| ClientError::RequestTimeout {
                document: *address,
                seconds: self.request_timeout.as_secs(),
            })?;

        self.registry
            .get(address)
            .ok_or(ClientError::RequestTimeout {
                document: *address,
                seconds: self.request_timeout.as_secs(),
            })
    }

    /// Apply a local edit, persist it, and push it toward every peer.
    pub async fn change(
        &self,
        address: &DocumentId,
        edit: &mut dyn FnMut(&mut E::Doc),
    ) -> Result<(), ClientError> {
        let handle = self
            .registry
            .get(address)
            .ok_or(ClientError::UnknownDocument { document: *address })?;
        {
            let mut document = handle.lock().await;
            document.change(edit);
            self.storage.save(&mut document).await?;
        }
        if let Some(sync) = self.synchronizer(address) {
            sync.on_local_change().await;
        }
        Ok(())
    }

    /// Replace a document's access list (owner only).
    pub async fn set_allowed_clients(
        &self,
        address: &DocumentId,
        allowed_clients: Vec<PublicKeyBytes>,
    ) -> Result<(), ClientError> {
        let handle = self
            .registry
            .get(address)
            .ok_or(ClientError::UnknownDocument { document: *address })?;
        let mut document = handle.lock().await;
        document.set_allowed_clients(allowed_clients, &self.keypair)?;
        self.storage.save(&mut document).await?;
        Ok(())
    }

    /// Queue a local presence payload for broadcast to all peers.
    pub fn set_presence(&self, payload: Vec<u8>) {
        self.presence.set_local(payload);
    }

    /// Subscribe to remote presence changes.
    pub fn subscribe_presence(&self) -> broadcast::Receiver<PresenceEvent> {
        self.presence.subscribe()
    }

    /// All known remote presence.
    pub fn presence_snapshot(&self) -> Vec<(PeerId, Vec<u8>)> {
        self.presence.snapshot()
    }

    /// Subscribe to peer lifecycle and data events.
    pub fn subscribe_peers(&self) -> broadcast::Receiver<PeerEvent> {
        self.peers.subscribe()
    }

    /// Handle to an open document, if any.
    pub fn document(&self, address: &DocumentId) -> Option<Arc<Mutex<Document<E>>>> {
        self.registry.get(address)
    }

    /// Addresses of every open document.
    pub fn documents(&self) -> Vec<DocumentId> {
        self.registry.addresses()
    }

    /// Tear down peers and the relay link.
    pub async fn close(&self) {
        self.peers.close_all().await;
        self.signaling.close().await;
    }

    fn synchronizer(&self, address: &DocumentId) -> Option<Arc<DocumentSynchronizer<E>>> {
        self.synchronizers
            .get(address)
            .map(|entry| Arc::clone(&entry))
    }

    fn ensure_synchronizer(&self, address: &DocumentId) {
        if self.synchronizers.contains_key(address) {
            return;
        }
        let Some(handle) = self.registry.get(address) else {
            return;
        };
        let sync = Arc::new(DocumentSynchronizer::new(
            Arc::clone(&self.engine),
            handle,
            self.sync_outbound.clone(),
        ));
        self.synchronizers.insert(*address, sync);
    }

    async fn load_from_storage(&self, address: &DocumentId) -> Option<Arc<Mutex<Document<E>>>> {
        match self.storage.load(address).await {
            Ok(Some((header, value))) => {
                let document = Document::from_parts(Arc::clone(&self.engine), header, value);
                let handle = self.registry.insert(document);
                self.ensure_synchronizer(address);
                debug!(document = %address, "document loaded from storage");
                Some(handle)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(document = %address, error = %e, "persisted document unusable");
                None
            }
        }
    }

    async fn dispatch_envelopes(self: Arc<Self>) {
        let mut events = self.signaling.subscribe();
        loop {
            match events.recv().await {
                Ok(SignalingEvent::Envelope(envelope)) => self.on_envelope(envelope).await,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "envelope dispatcher lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    async fn on_envelope(self: &Arc<Self>, envelope: Envelope) {
        if envelope.from == self.identity() {
            return;
        }
        let message = match ControlMessage::from_bytes(&envelope.data) {
            Ok(message) => message,
            Err(e) => {
                debug!(error = %e, "ignoring non-control envelope");
                return;
            }
        };
        match message {
            ControlMessage::RequestDocument { document_id } => {
                self.answer_request(envelope.from, document_id).await;
            }
            ControlMessage::DocumentResponse {
                document_id,
                export,
            } => {
                self.accept_response(document_id, &export).await;
            }
            ControlMessage::Signal {
                document_id,
                payload,
            } => {
                self.peers.on_signal(document_id, envelope.from, &payload).await;
            }
        }
    }

    /// Serve a document request, if we hold the document and the requester
    /// is on its access list. Anything else is silently ignored: a request
    /// broadcast reaches every session, most of which have nothing to say.
    async fn answer_request(self: &Arc<Self>, requester: ClientIdentity, address: DocumentId) {
        let handle = match self.registry.get(&address) {
            Some(handle) => handle,
            None => match self.load_from_storage(&address).await {
                Some(handle) => handle,
                None => return,
            },
        };

        let export = {
            let document = handle.lock().await;
            if !document.header().has_allowed_user(&requester.public_key) {
                debug!(
                    document = %address,
                    requester = %requester.public_key,
                    "ignoring request from unauthorized client"
                );
                return;
            }
            match document.export(&self.keypair) {
                Ok(export) => export,
                Err(e) => {
                    warn!(document = %address, error = %e, "export failed");
                    return;
                }
            }
        };

        let message = match (ControlMessage::DocumentResponse {
            document_id: address,
            export,
        })
        .to_bytes()
        {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "failed to encode document response");
                return;
            }
        };
        let envelope = Envelope::to_session(self.identity(), requester, message);
        if let Err(e) = self.signaling.send(&envelope).await {
            warn!(error = %e, "failed to send document response");
            return;
        }
        info!(document = %address, requester = %requester.public_key, "document served");

        // Open the peer link from our side; the requester answers signals
        self.peers.create_peer(address, requester, true);
    }

    /// Admit a signed export. Validation lives in the registry: a bad
    /// header or content signature rejects the document wholesale.
    async fn accept_response(self: &Arc<Self>, claimed: DocumentId, export: &[u8]) {
        match self.registry.admit_export(export).await {
            Ok((address, added)) => {
                if address != claimed {
                    warn!(
                        claimed = %claimed,
                        actual = %address,
                        "document response address mismatch"
                    );
                }
                self.ensure_synchronizer(&address);
                self.persist(&address).await;
                info!(document = %address, added, "document admitted");
            }
            Err(e) => debug!(error = %e, "rejecting document response"),
        }
    }

    async fn dispatch_peer_events(self: Arc<Self>) {
        let mut events = self.peers.subscribe();
        loop {
            match events.recv().await {
                Ok(PeerEvent::Joined { document, peer }) => {
                    if let Some(sync) = self.synchronizer(&document) {
                        sync.add_peer(peer).await;
                    }
                }
                Ok(PeerEvent::Left { peer, document }) => {
                    if let Some(sync) = self.synchronizer(&document) {
                        sync.remove_peer(&peer).await;
                    }
                    self.presence.on_peer_left(&peer);
                }
                Ok(PeerEvent::Data {
                    document,
                    peer,
                    channel,
                    payload,
                }) => match channel {
                    SYNC_CHANNEL => {
                        let Some(sync) = self.synchronizer(&document) else {
                            continue;
                        };
                        match sync.on_peer_data(peer, &payload).await {
                            Ok(()) => self.persist(&document).await,
                            Err(e) => debug!(%peer, error = %e, "bad sync message"),
                        }
                    }
                    PRESENCE_CHANNEL => self.presence.on_peer_state(peer, payload),
                    other => debug!(%peer, channel = other, "data on unknown channel"),
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "peer event dispatcher lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    async fn persist(&self, address: &DocumentId) {
        let Some(handle) = self.registry.get(address) else {
            return;
        };
        let mut document = handle.lock().await;
        if let Err(e) = self.storage.save(&mut document).await {
            warn!(document = %address, error = %e, "persist failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ddnet_doc::{MemoryCrdt, MemoryStore};
    use ddnet_net::memory::{MemoryHub, MemoryPeerFactory};
    use ddnet_relay::{RelayConfig, SignalingServer};

    type TestClient = Arc<DocumentSharingClient<MemoryCrdt, MemoryStore>>;

    fn start_relay() -> (Arc<SignalingServer>, MemoryHub) {
        let server = Arc::new(SignalingServer::new(RelayConfig::default()));
        let hub = MemoryHub::new();
        tokio::spawn(Arc::clone(&server).run(hub.clone()));
        (server, hub)
    }

    fn make_client(
        hub: &MemoryHub,
        factory: &MemoryPeerFactory,
        keypair: KeyPair,
        store: Arc<MemoryStore>,
    ) -> TestClient {
        DocumentSharingClient::new(
            &ClientConfig::default(),
            keypair,
            Arc::new(MemoryCrdt::new()),
            store,
            Arc::new(hub.clone()),
            Arc::new(factory.clone()),
        )
    }

    async fn await_entry(handle: &Arc<Mutex<Document<MemoryCrdt>>>, entry: &[u8]) {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                if handle.lock().await.value().contains(entry) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("entry never replicated"));
    }

    #[tokio::test(start_paused = true)]
    async fn documents_replicate_between_allowed_clients() {
        let (_server, hub) = start_relay();
        let factory = MemoryPeerFactory::new();

        let alice_keys = KeyPair::generate();
        let bob_keys = KeyPair::generate();
        let bob_public = bob_keys.public_key();

        let alice = make_client(&hub, &factory, alice_keys, Arc::new(MemoryStore::new()));
        let bob = make_client(&hub, &factory, bob_keys, Arc::new(MemoryStore::new()));
        alice.connect().await.unwrap();
        bob.connect().await.unwrap();

        let address = alice.create_document(vec![bob_public]).await.unwrap();
        let bob_handle = bob.request_document(&address).await.unwrap();
        assert_eq!(bob_handle.lock().await.address(), address);

        // An edit on alice's side shows up at bob's
        alice
            .change(&address, &mut |doc| doc.insert(b"shared entry".to_vec()))
            .await
            .unwrap();
        await_entry(&bob_handle, b"shared entry").await;

        // And the other direction
        bob.change(&address, &mut |doc| doc.insert(b"reply".to_vec()))
            .await
            .unwrap();
        let alice_handle = alice.document(&address).unwrap();
        await_entry(&alice_handle, b"reply").await;
    }

    #[tokio::test(start_paused = true)]
    async fn request_for_unknown_document_times_out() {
        let (_server, hub) = start_relay();
        let factory = MemoryPeerFactory::new();
        let bob = make_client(
            &hub,
            &factory,
            KeyPair::generate(),
            Arc::new(MemoryStore::new()),
        );
        bob.connect().await.unwrap();

        let nowhere = DocumentId::random();
        let result = bob.request_document(&nowhere).await;
        assert!(matches!(
            result,
            Err(ClientError::RequestTimeout { document, .. }) if document == nowhere
        ));
        assert!(bob.document(&nowhere).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn unauthorized_requests_are_silently_ignored() {
        let (_server, hub) = start_relay();
        let factory = MemoryPeerFactory::new();

        let alice = make_client(
            &hub,
            &factory,
            KeyPair::generate(),
            Arc::new(MemoryStore::new()),
        );
        let eve = make_client(
            &hub,
            &factory,
            KeyPair::generate(),
            Arc::new(MemoryStore::new()),
        );
        alice.connect().await.unwrap();
        eve.connect().await.unwrap();

        // Eve is not on the access list
        let address = alice.create_document(vec![]).await.unwrap();
        let result = eve.request_document(&address).await;
        assert!(matches!(result, Err(ClientError::RequestTimeout { .. })));
        assert!(eve.document(&address).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn presence_reaches_the_other_side() {
        let (_server, hub) = start_relay();
        let factory = MemoryPeerFactory::new();

        let alice_keys = KeyPair::generate();
        let bob_keys = KeyPair::generate();
        let bob_public = bob_keys.public_key();

        let alice = make_client(&hub, &factory, alice_keys, Arc::new(MemoryStore::new()));
        let bob = make_client(&hub, &factory, bob_keys, Arc::new(MemoryStore::new()));
        alice.connect().await.unwrap();
        bob.connect().await.unwrap();

        let address = alice.create_document(vec![bob_public]).await.unwrap();
        let bob_handle = bob.request_document(&address).await.unwrap();

        // Wait for the peer link by syncing one entry through it
        alice
            .change(&address, &mut |doc| doc.insert(b"warmup".to_vec()))
            .await
            .unwrap();
        await_entry(&bob_handle, b"warmup").await;

        let mut alice_presence = alice.subscribe_presence();
        bob.set_presence(b"cursor:3:14".to_vec());

        let event = tokio::time::timeout(Duration::from_secs(5), alice_presence.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            PresenceEvent::Updated { state, .. } => assert_eq!(state, b"cursor:3:14"),
            other => panic!("expected presence update, got {other:?}"),
        }
        assert_eq!(alice.presence_snapshot().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn persisted_documents_reopen_without_the_network() {
        let (_server, hub) = start_relay();
        let factory = MemoryPeerFactory::new();

        let keys = KeyPair::generate();
        let secret = keys.secret_bytes();
        let store = Arc::new(MemoryStore::new());

        let address = {
            let alice = make_client(&hub, &factory, keys, Arc::clone(&store));
            alice.connect().await.unwrap();
            let address = alice.create_document(vec![]).await.unwrap();
            alice
                .change(&address, &mut |doc| doc.insert(b"durable".to_vec()))
                .await
                .unwrap();
            alice.close().await;
            address
        };

        // Same identity, same store, fresh process: no relay round trip
        let revived = make_client(
            &hub,
            &factory,
            KeyPair::from_secret_bytes(secret.as_slice()).unwrap(),
            store,
        );
        let handle = revived.request_document(&address).await.unwrap();
        assert!(handle.lock().await.value().contains(b"durable"));
    }

    #[tokio::test(start_paused = true)]
    async fn updated_access_list_admits_a_new_client() {
        let (_server, hub) = start_relay();
        let factory = MemoryPeerFactory::new();

        let alice = make_client(
            &hub,
            &factory,
            KeyPair::generate(),
            Arc::new(MemoryStore::new()),
        );
        let bob_keys = KeyPair::generate();
        let bob_public = bob_keys.public_key();
        let bob = make_client(&hub, &factory, bob_keys, Arc::new(MemoryStore::new()));
        alice.connect().await.unwrap();
        bob.connect().await.unwrap();

        let address = alice.create_document(vec![]).await.unwrap();
        assert!(bob.request_document(&address).await.is_err());

        alice
            .set_allowed_clients(&address, vec![bob_public])
            .await
            .unwrap();
        let handle = bob.request_document(&address).await.unwrap();
        assert_eq!(handle.lock().await.address(), address);
    }
}
