//! Documents: a signed header plus an opaque CRDT value.

use std::sync::Arc;

use ddnet_crypto::{verify, KeyPair};
use ddnet_types::{DocumentId, SignatureBytes};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::codec::{from_cbor, to_cbor};
use crate::crdt::CrdtEngine;
use crate::error::DocumentError;
use crate::header::DocumentHeader;

const EVENT_CAPACITY: usize = 64;

/// Events emitted as a document's CRDT value evolves.
#[derive(Debug, Clone)]
pub enum DocumentEvent {
    /// The merge frontier changed: the document holds new state.
    Changed,
    /// One CRDT operation ran, whether or not it changed the frontier.
    Patch {
        /// Frontier before the operation.
        before: Vec<Vec<u8>>,
        /// Frontier after the operation.
        after: Vec<Vec<u8>>,
    },
}

/// Wire form of a full document export:
/// `CBOR({header: bytes, content: bytes, signature: 64B})`.
#[derive(Serialize, Deserialize)]
struct DocumentExport {
    header: Vec<u8>,
    content: Vec<u8>,
    signature: SignatureBytes,
}

/// One replicated document: signed header plus CRDT value.
///
/// Mutations go through [`change`](Self::change) and friends, which compare
/// the merge frontier before and after and emit [`DocumentEvent::Changed`]
/// only when it moved.
pub struct Document<E: CrdtEngine> {
    engine: Arc<E>,
    header: DocumentHeader,
    value: E::Doc,
    events: broadcast::Sender<DocumentEvent>,
}

impl<E: CrdtEngine> Document<E> {
    /// Create a fresh owner-signed document with empty CRDT state.
    pub fn create(
        engine: Arc<E>,
        keypair: &KeyPair,
        allowed_clients: Vec<ddnet_types::PublicKeyBytes>,
    ) -> Result<Self, DocumentError> {
        let header = DocumentHeader::create(keypair, allowed_clients)?;
        let value = engine.init();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            engine,
            header,
            value,
            events,
        })
    }

    /// Rebuild a document from an already-verified header and value, as
    /// produced by storage.
    pub fn from_parts(engine: Arc<E>, header: DocumentHeader, value: E::Doc) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            engine,
            header,
            value,
            events,
        }
    }

    /// Parse, verify and admit an exported document.
    ///
    /// The header must carry a valid self-signature, and `content` must be
    /// signed by the owner or one of the allowed clients. Only then is the
    /// CRDT state loaded.
    pub fn import(engine: Arc<E>, bytes: &[u8]) -> Result<Self, DocumentError> {
        let export: DocumentExport = from_cbor(bytes)?;
        let header = DocumentHeader::import(&export.header)?;

        let signers = std::iter::once(header.owner()).chain(header.allowed_clients().iter());
        let content_ok = signers
            .into_iter()
            .any(|key| verify(key, &export.content, &export.signature).is_ok());
        if !content_ok {
            return Err(DocumentError::Validation(
                "content signature matches neither owner nor any allowed client".into(),
            ));
        }

        let value = engine
            .load(&export.content)
            .map_err(|e| DocumentError::Validation(e.to_string()))?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            engine,
            header,
            value,
            events,
        })
    }

    /// Export the full document, signed by `keypair`.
    ///
    /// Rejected with [`DocumentError::Unauthorized`] unless the key is the
    /// owner or an allowed client.
    pub fn export(&self, keypair: &KeyPair) -> Result<Vec<u8>, DocumentError> {
        if !self.header.has_allowed_user(&keypair.public_key()) {
            return Err(DocumentError::Unauthorized);
        }
        let content = self.engine.save(&self.value);
        let signature = keypair.sign(&content);
        to_cbor(&DocumentExport {
            header: self.header.export()?,
            content,
            signature,
        })
        .map_err(Into::into)
    }

    /// Run one CRDT operation with frontier comparison and eventing.
    ///
    /// Emits a [`DocumentEvent::Patch`] for the operation and a
    /// [`DocumentEvent::Changed`] iff the frontier moved.
    pub fn apply<R>(&mut self, op: impl FnOnce(&E, &mut E::Doc) -> R) -> R {
        let before = self.engine.heads(&self.value);
        let result = op(&self.engine, &mut self.value);
        let after = self.engine.heads(&self.value);

        let changed = before != after;
        let _ = self.events.send(DocumentEvent::Patch { before, after });
        if changed {
            let _ = self.events.send(DocumentEvent::Changed);
        }
        result
    }

    /// Apply a local edit.
    pub fn change(&mut self, edit: &mut dyn FnMut(&mut E::Doc)) {
        self.apply(|engine, value| engine.change(value, edit));
    }

    /// Apply a local edit against a historical merge frontier.
    pub fn change_at(
        &mut self,
        heads: &[Vec<u8>],
        edit: &mut dyn FnMut(&mut E::Doc),
    ) -> Result<(), DocumentError> {
        self.apply(|engine, value| {
            engine
                .change_at(value, heads, edit)
                .map_err(|e| DocumentError::Validation(e.to_string()))
        })
    }

    /// Merge previously serialized state (full or incremental) into this
    /// document.
    pub fn load_incremental(&mut self, bytes: &[u8]) -> Result<(), DocumentError> {
        self.apply(|engine, value| {
            engine
                .load_incremental(value, bytes)
                .map_err(|e| DocumentError::Validation(e.to_string()))
        })
    }

    /// Serialize the full CRDT state.
    pub fn save(&self) -> Vec<u8> {
        self.engine.save(&self.value)
    }

    /// Serialize the changes since the last save, advancing the watermark.
    pub fn save_incremental(&mut self) -> Vec<u8> {
        self.engine.save_incremental(&mut self.value)
    }

    /// The current merge frontier.
    pub fn heads(&self) -> Vec<Vec<u8>> {
        self.engine.heads(&self.value)
    }

    /// Replace the header's access list (owner-only).
    pub fn set_allowed_clients(
        &mut self,
        allowed_clients: Vec<ddnet_types::PublicKeyBytes>,
        keypair: &KeyPair,
    ) -> Result<(), DocumentError> {
        self.header.set_allowed_clients(allowed_clients, keypair)
    }

    /// Subscribe to change/patch events.
    pub fn subscribe(&self) -> broadcast::Receiver<DocumentEvent> {
        self.events.subscribe()
    }

    /// The signed header.
    pub fn header(&self) -> &DocumentHeader {
        &self.header
    }

    /// The document's address.
    pub fn address(&self) -> DocumentId {
        self.header.address()
    }

    /// The CRDT value.
    pub fn value(&self) -> &E::Doc {
        &self.value
    }

    /// The engine driving this document.
    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }
}

impl<E: CrdtEngine> std::fmt::Debug for Document<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("address", &self.address())
            .field("version", &self.header.version())
            .finish()
    }
}
