//! In-memory authoritative document set.

use std::sync::Arc;

use dashmap::DashMap;
use ddnet_types::DocumentId;
use tokio::sync::{broadcast, Mutex};
use tracing::debug;

use crate::crdt::CrdtEngine;
use crate::document::Document;
use crate::error::DocumentError;

const EVENT_CAPACITY: usize = 64;

/// Registry membership events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// A document was admitted for the first time.
    DocumentAdded(DocumentId),
    /// An already-known document absorbed new state.
    DocumentUpdated(DocumentId),
    /// A document was removed.
    DocumentRemoved(DocumentId),
}

/// The authoritative in-memory set of documents, keyed by address.
pub struct DocumentRegistry<E: CrdtEngine> {
    engine: Arc<E>,
    documents: DashMap<DocumentId, Arc<Mutex<Document<E>>>>,
    events: broadcast::Sender<RegistryEvent>,
}

impl<E: CrdtEngine> DocumentRegistry<E> {
    /// Create an empty registry.
    pub fn new(engine: Arc<E>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            engine,
            documents: DashMap::new(),
            events,
        }
    }

    /// Add a locally constructed document.
    ///
    /// Returns the shared handle; emits [`RegistryEvent::DocumentAdded`].
    pub fn insert(&self, document: Document<E>) -> Arc<Mutex<Document<E>>> {
        let address = document.address();
        let handle = Arc::new(Mutex::new(document));
        self.documents.insert(address, Arc::clone(&handle));
        debug!(document = %address, "document added to registry");
        let _ = self.events.send(RegistryEvent::DocumentAdded(address));
        handle
    }

    /// Verify and admit an exported document received from the network.
    ///
    /// A new address is inserted as-is; a known address has the export's
    /// content merged into the existing document. Returns the address and
    /// whether it was newly added.
    pub async fn admit_export(&self, bytes: &[u8]) -> Result<(DocumentId, bool), DocumentError> {
        let imported = Document::import(Arc::clone(&self.engine), bytes)?;
        let address = imported.address();

        if let Some(existing) = self.get(&address) {
            let mut doc = existing.lock().await;
            doc.load_incremental(&imported.save())?;
            debug!(document = %address, "document updated from export");
            let _ = self.events.send(RegistryEvent::DocumentUpdated(address));
            Ok((address, false))
        } else {
            self.insert(imported);
            Ok((address, true))
        }
    }

    /// Look up a document by address.
    pub fn get(&self, address: &DocumentId) -> Option<Arc<Mutex<Document<E>>>> {
        self.documents.get(address).map(|entry| Arc::clone(&entry))
    }

    /// Whether `address` is registered.
    pub fn contains(&self, address: &DocumentId) -> bool {
        self.documents.contains_key(address)
    }

    /// Remove a document. Emits [`RegistryEvent::DocumentRemoved`] if it was
    /// present.
    pub fn remove(&self, address: &DocumentId) -> Option<Arc<Mutex<Document<E>>>> {
        let removed = self.documents.remove(address).map(|(_, handle)| handle);
        if removed.is_some() {
            debug!(document = %address, "document removed from registry");
            let _ = self.events.send(RegistryEvent::DocumentRemoved(*address));
        }
        removed
    }

    /// Addresses of all registered documents.
    pub fn addresses(&self) -> Vec<DocumentId> {
        self.documents.iter().map(|entry| *entry.key()).collect()
    }

    /// Number of registered documents.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Subscribe to membership events.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// The engine shared by all documents in this registry.
    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }
}

impl<E: CrdtEngine> std::fmt::Debug for DocumentRegistry<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentRegistry")
            .field("documents", &self.documents.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::MemoryCrdt;
    use ddnet_crypto::KeyPair;

    fn registry() -> DocumentRegistry<MemoryCrdt> {
        DocumentRegistry::new(Arc::new(MemoryCrdt::new()))
    }

    #[tokio::test]
    async fn insert_emits_added() {
        let registry = registry();
        let mut events = registry.subscribe();
        let owner = KeyPair::generate();

        let doc = Document::create(Arc::clone(registry.engine()), &owner, vec![]).unwrap();
        let address = doc.address();
        registry.insert(doc);

        assert!(registry.contains(&address));
        assert_eq!(
            events.try_recv().unwrap(),
            RegistryEvent::DocumentAdded(address)
        );
    }

    #[tokio::test]
    async fn admit_export_adds_unknown_document() {
        let registry = registry();
        let owner = KeyPair::generate();
        let mut doc = Document::create(Arc::clone(registry.engine()), &owner, vec![]).unwrap();
        doc.change(&mut |d| d.insert(b"data".to_vec()));
        let bytes = doc.export(&owner).unwrap();

        let (address, added) = registry.admit_export(&bytes).await.unwrap();
        assert!(added);
        assert_eq!(address, doc.address());

        let handle = registry.get(&address).unwrap();
        assert!(handle.lock().await.value().contains(b"data"));
    }

    #[tokio::test]
    async fn admit_export_merges_into_known_document() {
        let registry = registry();
        let owner = KeyPair::generate();

        let mut local = Document::create(Arc::clone(registry.engine()), &owner, vec![]).unwrap();
        local.change(&mut |d| d.insert(b"local".to_vec()));
        let export_base = local.export(&owner).unwrap();
        let address = local.address();
        registry.insert(local);

        // A remote replica of the same document with extra state
        let mut remote = Document::import(Arc::clone(registry.engine()), &export_base).unwrap();
        remote.change(&mut |d| d.insert(b"remote".to_vec()));
        let bytes = remote.export(&owner).unwrap();

        let mut events = registry.subscribe();
        let (admitted, added) = registry.admit_export(&bytes).await.unwrap();
        assert_eq!(admitted, address);
        assert!(!added);
        assert_eq!(
            events.try_recv().unwrap(),
            RegistryEvent::DocumentUpdated(address)
        );

        let handle = registry.get(&address).unwrap();
        let doc = handle.lock().await;
        assert!(doc.value().contains(b"local"));
        assert!(doc.value().contains(b"remote"));
    }

    #[tokio::test]
    async fn admit_export_rejects_invalid_bytes() {
        let registry = registry();
        assert!(registry.admit_export(&[0xde, 0xad]).await.is_err());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn remove_emits_removed() {
        let registry = registry();
        let owner = KeyPair::generate();
        let doc = Document::create(Arc::clone(registry.engine()), &owner, vec![]).unwrap();
        let address = doc.address();
        registry.insert(doc);

        let mut events = registry.subscribe();
        assert!(registry.remove(&address).is_some());
        assert!(!registry.contains(&address));
        assert_eq!(
            events.try_recv().unwrap(),
            RegistryEvent::DocumentRemoved(address)
        );

        // Removing again is a no-op with no event
        assert!(registry.remove(&address).is_none());
        assert!(events.try_recv().is_err());
    }
}
