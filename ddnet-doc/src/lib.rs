//! Documents, headers, CRDT sync orchestration and storage for ddnet.
//!
//! This crate owns everything about a document's life, short of the network:
//!
//! - [`DocumentHeader`] - owner-signed metadata with an access list and a
//!   strictly increasing version.
//! - [`Document`] - a header plus an opaque CRDT value, with frontier-diffed
//!   change events.
//! - [`DocumentRegistry`] - the in-memory authoritative set, with
//!   added/updated/removed events.
//! - [`DocumentSynchronizer`] - per-peer sync-message cycles for one
//!   document.
//! - [`DocumentStorage`] - snapshot/incremental persistence over a pluggable
//!   [`KeyValueStore`], with compaction and corruption recovery.
//!
//! The merge algorithm is injected through the [`CrdtEngine`] trait;
//! [`MemoryCrdt`] is the in-memory fake the test suite runs against.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod codec;
pub mod crdt;
pub mod document;
pub mod error;
pub mod header;
pub mod registry;
pub mod storage;
pub mod sync;

pub use crdt::{CrdtEngine, MemoryCrdt, MemoryDoc, MemorySyncState};
pub use document::{Document, DocumentEvent};
pub use error::{DocumentError, StorageError};
pub use header::DocumentHeader;
pub use registry::{DocumentRegistry, RegistryEvent};
pub use storage::{DocumentStorage, KeyValueStore, MemoryStore, SNAPSHOT_THRESHOLD};
pub use sync::DocumentSynchronizer;
