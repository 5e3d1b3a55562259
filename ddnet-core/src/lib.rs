//! # ddnet-core
//!
//! Pure logic for ddnet (no I/O, instant tests).
//!
//! This crate implements the state machines and codecs for sync without any
//! network or disk I/O, enabling fast unit tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce
//! output without side effects. The actual I/O (network, disk, timers) is
//! performed by `ddnet-client` and `ddnet-relay`, which interpret the states
//! and actions produced here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backoff;
pub mod chunk;
pub mod presence;
pub mod state;

pub use backoff::{reconnect_delay, MAX_RECONNECT_ATTEMPTS, RECONNECT_BASE_DELAY};
pub use chunk::{encode_frames, Assembler, FrameError, CHANNEL_PREFIX_LEN, CHUNK_SIZE, FRAME_HEADER_LEN};
pub use presence::PresenceTracker;
pub use state::{LinkAction, LinkEvent, LinkNotice, LinkState};
