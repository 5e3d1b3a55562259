//! Durable document persistence.
//!
//! Each document is stored as a header blob, an optional full snapshot and
//! an ordered sequence of incremental chunks. Every 50 incremental saves the
//! content is compacted into a fresh snapshot and the chunks are cleared.
//! Loading self-heals: if the persisted sequence fails to load, trailing
//! chunks are discarded one by one until a valid prefix is found, and that
//! prefix is immediately compacted back to disk.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use ddnet_types::{DocumentId, PublicKeyBytes};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::crdt::CrdtEngine;
use crate::document::Document;
use crate::error::StorageError;
use crate::header::DocumentHeader;

/// Incremental saves accumulated before the next save compacts to a
/// snapshot.
pub const SNAPSHOT_THRESHOLD: u32 = 50;

/// Zero-padded width of chunk indices in keys, so lexicographic key order is
/// numeric order.
const CHUNK_INDEX_WIDTH: usize = 10;

/// A persistent key-value store supplied by the environment.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read one value.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Write one value.
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Delete one value. Absent keys are not an error.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// All keys starting with `prefix`, in lexicographic order.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// In-memory key-value store for tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, Vec<u8>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a raw value, bypassing the storage layer. Used by tests to
    /// simulate on-disk corruption.
    pub fn corrupt(&self, key: &str, value: Vec<u8>) {
        self.entries.insert(key.to_string(), value);
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.entries.get(key).map(|entry| entry.clone()))
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|key| key.starts_with(prefix))
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[derive(Debug, Clone, Copy)]
struct DocState {
    change_counter: u32,
    next_chunk_index: u64,
}

/// Snapshot/incremental persistence for documents.
///
/// One instance per process: the internal permit serializes load/recovery so
/// concurrent loads cannot race duplicate corruption-recovery writes.
pub struct DocumentStorage<E: CrdtEngine, S: KeyValueStore> {
    engine: Arc<E>,
    store: Arc<S>,
    namespace: String,
    state: DashMap<DocumentId, DocState>,
    load_permit: Semaphore,
}

impl<E: CrdtEngine, S: KeyValueStore> DocumentStorage<E, S> {
    /// Create storage under the shared `"ddnet"` namespace.
    pub fn new(engine: Arc<E>, store: Arc<S>) -> Self {
        Self::with_namespace(engine, store, "ddnet".to_string())
    }

    /// Create storage namespaced to one local identity, so multiple
    /// identities on the same store do not collide.
    pub fn for_identity(engine: Arc<E>, store: Arc<S>, identity: &PublicKeyBytes) -> Self {
        Self::with_namespace(engine, store, format!("ddnet:{identity}"))
    }

    fn with_namespace(engine: Arc<E>, store: Arc<S>, namespace: String) -> Self {
        Self {
            engine,
            store,
            namespace,
            state: DashMap::new(),
            load_permit: Semaphore::new(1),
        }
    }

    fn header_key(&self, address: &DocumentId) -> String {
        format!("{}:{}:header", self.namespace, address)
    }

    fn snapshot_key(&self, address: &DocumentId) -> String {
        format!("{}:{}:snapshot", self.namespace, address)
    }

    fn chunk_prefix(&self, address: &DocumentId) -> String {
        format!("{}:{}:chunk:", self.namespace, address)
    }

    fn chunk_key(&self, address: &DocumentId, index: u64) -> String {
        format!(
            "{}{:0width$}",
            self.chunk_prefix(address),
            index,
            width = CHUNK_INDEX_WIDTH
        )
    }

    /// Recover the per-document counters from the store on first touch.
    async fn state_for(&self, address: &DocumentId) -> Result<DocState, StorageError> {
        if let Some(state) = self.state.get(address) {
            return Ok(*state);
        }
        let chunk_keys = self
            .store
            .keys_with_prefix(&self.chunk_prefix(address))
            .await?;
        let state = DocState {
            change_counter: chunk_keys.len() as u32,
            next_chunk_index: chunk_keys.len() as u64,
        };
        self.state.insert(*address, state);
        Ok(state)
    }

    async fn clear_chunks(&self, address: &DocumentId) -> Result<(), StorageError> {
        for key in self
            .store
            .keys_with_prefix(&self.chunk_prefix(address))
            .await?
        {
            self.store.delete(&key).await?;
        }
        Ok(())
    }

    /// Persist the document's header and content.
    ///
    /// Appends one incremental chunk, unless [`SNAPSHOT_THRESHOLD`]
    /// incremental saves have accumulated, in which case the full state is
    /// compacted into a snapshot and all chunks are cleared.
    pub async fn save(&self, document: &mut Document<E>) -> Result<(), StorageError> {
        let address = document.address();
        self.store
            .put(&self.header_key(&address), &document.header().export()?)
            .await?;

        let state = self.state_for(&address).await?;
        if state.change_counter >= SNAPSHOT_THRESHOLD {
            let snapshot = document.save();
            // Advance the incremental watermark past the snapshot
            let _ = document.save_incremental();
            self.store.put(&self.snapshot_key(&address), &snapshot).await?;
            self.clear_chunks(&address).await?;
            self.state.insert(
                address,
                DocState {
                    change_counter: 0,
                    next_chunk_index: 0,
                },
            );
            debug!(document = %address, "compacted document to snapshot");
        } else {
            let chunk = document.save_incremental();
            self.store
                .put(&self.chunk_key(&address, state.next_chunk_index), &chunk)
                .await?;
            self.state.insert(
                address,
                DocState {
                    change_counter: state.change_counter + 1,
                    next_chunk_index: state.next_chunk_index + 1,
                },
            );
        }
        Ok(())
    }

    /// Load a document's persisted state, recovering from trailing
    /// corruption if necessary.
    ///
    /// At most one load runs at a time, so recovery writes never race.
    /// Returns `None` for documents that were never saved.
    pub async fn load(
        &self,
        address: &DocumentId,
    ) -> Result<Option<(DocumentHeader, E::Doc)>, StorageError> {
        let _permit = self
            .load_permit
            .acquire()
            .await
            .map_err(|e| StorageError::Store(e.to_string()))?;

        let header_bytes = match self.store.get(&self.header_key(address)).await? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        let header = DocumentHeader::import(&header_bytes)?;

        let snapshot = self.store.get(&self.snapshot_key(address)).await?;
        let chunk_keys = self
            .store
            .keys_with_prefix(&self.chunk_prefix(address))
            .await?;
        let mut chunks = Vec::with_capacity(chunk_keys.len());
        for key in &chunk_keys {
            match self.store.get(key).await? {
                Some(chunk) => chunks.push(chunk),
                None => {
                    return Err(StorageError::Store(format!("chunk {key} vanished mid-load")))
                }
            }
        }

        // Try the full sequence, then shrink from the end until a prefix
        // loads
        for prefix_len in (0..=chunks.len()).rev() {
            let Some(doc) = self.try_load_prefix(snapshot.as_deref(), &chunks[..prefix_len])
            else {
                continue;
            };

            if prefix_len < chunks.len() {
                warn!(
                    document = %address,
                    dropped = chunks.len() - prefix_len,
                    "recovered document from corrupt chunk sequence"
                );
                let compacted = self.engine.save(&doc);
                self.store.put(&self.snapshot_key(address), &compacted).await?;
                self.clear_chunks(address).await?;
                self.state.insert(
                    *address,
                    DocState {
                        change_counter: 0,
                        next_chunk_index: 0,
                    },
                );
            }
            return Ok(Some((header, doc)));
        }

        Err(StorageError::Unrecoverable(*address))
    }

    fn try_load_prefix(&self, snapshot: Option<&[u8]>, chunks: &[Vec<u8>]) -> Option<E::Doc> {
        let mut doc = match snapshot {
            Some(bytes) => self.engine.load(bytes).ok()?,
            None => self.engine.init(),
        };
        for chunk in chunks {
            self.engine.load_incremental(&mut doc, chunk).ok()?;
        }
        Some(doc)
    }

    /// Remove every persisted blob for a document.
    pub async fn delete(&self, address: &DocumentId) -> Result<(), StorageError> {
        self.store.delete(&self.header_key(address)).await?;
        self.store.delete(&self.snapshot_key(address)).await?;
        self.clear_chunks(address).await?;
        self.state.remove(address);
        Ok(())
    }

    /// The incremental-save counter for a document (0 right after a
    /// snapshot).
    pub async fn change_counter(&self, address: &DocumentId) -> Result<u32, StorageError> {
        Ok(self.state_for(address).await?.change_counter)
    }

    /// The key namespace in use.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

impl<E: CrdtEngine, S: KeyValueStore> std::fmt::Debug for DocumentStorage<E, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStorage")
            .field("namespace", &self.namespace)
            .finish()
    }
}
