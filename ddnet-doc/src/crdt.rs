//! CRDT engine capability trait.
//!
//! The merge algorithm itself is an external collaborator. The core only
//! needs the narrow surface below, so it can be driven by any engine with
//! deterministic, commutative merge - including the in-memory fake used by
//! the test suite.

use std::collections::BTreeSet;

use ddnet_types::DecodeError;
use sha2::{Digest, Sha256};

/// A CRDT merge engine.
///
/// `Doc` is an opaque replicated value; `SyncState` is the opaque per-peer
/// token threaded through [`generate_sync_message`](Self::generate_sync_message)
/// / [`receive_sync_message`](Self::receive_sync_message) cycles.
pub trait CrdtEngine: Send + Sync + 'static {
    /// The replicated document value.
    type Doc: Clone + Send + Sync + 'static;
    /// Per-peer sync token.
    type SyncState: Send + Sync + 'static;
    /// Engine-specific failure (corrupt bytes, bad heads).
    type Error: std::error::Error + Send + Sync + 'static;

    /// A fresh, empty document value.
    fn init(&self) -> Self::Doc;

    /// Apply a local edit.
    fn change(&self, doc: &mut Self::Doc, edit: &mut dyn FnMut(&mut Self::Doc));

    /// Apply a local edit against a historical merge frontier.
    fn change_at(
        &self,
        doc: &mut Self::Doc,
        heads: &[Vec<u8>],
        edit: &mut dyn FnMut(&mut Self::Doc),
    ) -> Result<(), Self::Error>;

    /// Serialize the full document state.
    fn save(&self, doc: &Self::Doc) -> Vec<u8>;

    /// Deserialize a full document state.
    fn load(&self, bytes: &[u8]) -> Result<Self::Doc, Self::Error>;

    /// Serialize the changes made since the last `save`/`save_incremental`
    /// call on this value, advancing the persistence watermark.
    fn save_incremental(&self, doc: &mut Self::Doc) -> Vec<u8>;

    /// Merge previously serialized state (full or incremental) into `doc`.
    fn load_incremental(&self, doc: &mut Self::Doc, bytes: &[u8]) -> Result<(), Self::Error>;

    /// The current merge frontier. Two values with equal heads hold equal
    /// state.
    fn heads(&self, doc: &Self::Doc) -> Vec<Vec<u8>>;

    /// A sync token for a peer we have never exchanged state with.
    fn init_sync_state(&self) -> Self::SyncState;

    /// Produce the next sync message for a peer, or `None` once both
    /// replicas have converged from this side's perspective.
    fn generate_sync_message(
        &self,
        doc: &Self::Doc,
        state: &mut Self::SyncState,
    ) -> Option<Vec<u8>>;

    /// Merge an inbound sync message into the document and sync token.
    fn receive_sync_message(
        &self,
        doc: &mut Self::Doc,
        state: &mut Self::SyncState,
        message: &[u8],
    ) -> Result<(), Self::Error>;
}

// ===========================================
// In-memory fake engine
// ===========================================

/// In-memory CRDT fake: a grow-only set of opaque byte entries.
///
/// Merge is set union, which is deterministic and commutative, so two
/// replicas that have exchanged all entries are byte-for-byte convergent.
/// Serialized form (full and incremental alike) is a CBOR array of entries,
/// so a full save can be merged incrementally into an existing value.
#[derive(Debug, Default, Clone)]
pub struct MemoryCrdt;

impl MemoryCrdt {
    /// Create the fake engine.
    pub fn new() -> Self {
        Self
    }
}

/// Document value of [`MemoryCrdt`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MemoryDoc {
    entries: BTreeSet<Vec<u8>>,
    // Entries already covered by a save/save_incremental call
    persisted: BTreeSet<Vec<u8>>,
}

impl MemoryDoc {
    /// Add one opaque entry. The edit primitive used inside `change`
    /// closures.
    pub fn insert(&mut self, entry: impl Into<Vec<u8>>) {
        self.entries.insert(entry.into());
    }

    /// All entries in deterministic order.
    pub fn entries(&self) -> impl Iterator<Item = &[u8]> {
        self.entries.iter().map(Vec::as_slice)
    }

    /// Whether `entry` is present.
    pub fn contains(&self, entry: &[u8]) -> bool {
        self.entries.contains(entry)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the document holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Sync token of [`MemoryCrdt`]: the set of entries the counterparty is
/// known (or assumed, once sent) to hold.
#[derive(Debug, Default, Clone)]
pub struct MemorySyncState {
    known_remote: BTreeSet<Vec<u8>>,
}

fn encode_entries<'a>(entries: impl Iterator<Item = &'a Vec<u8>>) -> Vec<u8> {
    let list: Vec<&Vec<u8>> = entries.collect();
    let mut out = Vec::new();
    // Writing a Vec<Vec<u8>> to an in-memory buffer does not fail
    ciborium::into_writer(&list, &mut out).expect("CBOR encoding to Vec cannot fail");
    out
}

fn decode_entries(bytes: &[u8]) -> Result<BTreeSet<Vec<u8>>, DecodeError> {
    let list: Vec<Vec<u8>> =
        ciborium::from_reader(bytes).map_err(DecodeError::Deserialization)?;
    Ok(list.into_iter().collect())
}

impl CrdtEngine for MemoryCrdt {
    type Doc = MemoryDoc;
    type SyncState = MemorySyncState;
    type Error = DecodeError;

    fn init(&self) -> MemoryDoc {
        MemoryDoc::default()
    }

    fn change(&self, doc: &mut MemoryDoc, edit: &mut dyn FnMut(&mut MemoryDoc)) {
        edit(doc);
    }

    fn change_at(
        &self,
        doc: &mut MemoryDoc,
        _heads: &[Vec<u8>],
        edit: &mut dyn FnMut(&mut MemoryDoc),
    ) -> Result<(), DecodeError> {
        // The grow-only set has commutative merge, so an edit applied at a
        // historical frontier lands on the same converged state
        edit(doc);
        Ok(())
    }

    fn save(&self, doc: &MemoryDoc) -> Vec<u8> {
        encode_entries(doc.entries.iter())
    }

    fn load(&self, bytes: &[u8]) -> Result<MemoryDoc, DecodeError> {
        let entries = decode_entries(bytes)?;
        Ok(MemoryDoc {
            persisted: entries.clone(),
            entries,
        })
    }

    fn save_incremental(&self, doc: &mut MemoryDoc) -> Vec<u8> {
        let delta = encode_entries(doc.entries.difference(&doc.persisted));
        doc.persisted = doc.entries.clone();
        delta
    }

    fn load_incremental(&self, doc: &mut MemoryDoc, bytes: &[u8]) -> Result<(), DecodeError> {
        let entries = decode_entries(bytes)?;
        doc.persisted.extend(entries.iter().cloned());
        doc.entries.extend(entries);
        Ok(())
    }

    fn heads(&self, doc: &MemoryDoc) -> Vec<Vec<u8>> {
        let mut hasher = Sha256::new();
        for entry in &doc.entries {
            hasher.update((entry.len() as u64).to_be_bytes());
            hasher.update(entry);
        }
        vec![hasher.finalize().to_vec()]
    }

    fn init_sync_state(&self) -> MemorySyncState {
        MemorySyncState::default()
    }

    fn generate_sync_message(
        &self,
        doc: &MemoryDoc,
        state: &mut MemorySyncState,
    ) -> Option<Vec<u8>> {
        let delta: Vec<&Vec<u8>> = doc.entries.difference(&state.known_remote).collect();
        if delta.is_empty() {
            return None;
        }
        let message = encode_entries(delta.into_iter());
        state.known_remote.extend(doc.entries.iter().cloned());
        Some(message)
    }

    fn receive_sync_message(
        &self,
        doc: &mut MemoryDoc,
        state: &mut MemorySyncState,
        message: &[u8],
    ) -> Result<(), DecodeError> {
        let entries = decode_entries(message)?;
        state.known_remote.extend(entries.iter().cloned());
        // Received entries are unsaved local state until the next save
        doc.entries.extend(entries);
        Ok(())
    }
}
