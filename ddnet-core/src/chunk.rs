//! Chunked frame codec for peer data channels.
//!
//! Logical channels are multiplexed over one byte-stream by prefixing each
//! message with a 4-byte big-endian channel id. The prefixed buffer is split
//! into fixed-size chunks; each chunk travels as
//! `header(8B: u32 totalChunks, u32 chunkIndex) ‖ chunkBytes`.
//!
//! The [`Assembler`] buffers chunks by index until all have arrived, then
//! emits `(channel, payload)` exactly once and resets. Back-to-back messages
//! are supported; interleaving two in-flight multi-chunk messages on the same
//! stream is not.

use std::collections::HashMap;

use thiserror::Error;

/// Maximum chunk payload size (16 KiB).
pub const CHUNK_SIZE: usize = 16 * 1024;

/// Per-chunk header length: `u32 totalChunks ‖ u32 chunkIndex`, big-endian.
pub const FRAME_HEADER_LEN: usize = 8;

/// Length of the channel-id prefix on the reassembled payload.
pub const CHANNEL_PREFIX_LEN: usize = 4;

/// Errors raised while de-framing inbound chunks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Frame shorter than its fixed header.
    #[error("frame truncated: need at least {FRAME_HEADER_LEN} bytes, got {actual}")]
    TruncatedFrame {
        /// Bytes actually present.
        actual: usize,
    },

    /// A frame declared zero total chunks.
    #[error("frame declares zero total chunks")]
    ZeroChunks,

    /// Chunk index is not below the declared total.
    #[error("chunk index {index} out of range (total {total})")]
    IndexOutOfRange {
        /// The offending index.
        index: u32,
        /// Declared chunk count.
        total: u32,
    },

    /// A frame's total disagreed with the in-flight message.
    #[error("chunk total mismatch: expected {expected}, got {actual}")]
    TotalMismatch {
        /// Total declared by the first chunk of the message.
        expected: u32,
        /// Total declared by the offending chunk.
        actual: u32,
    },

    /// The reassembled payload is too short to carry a channel id.
    #[error("reassembled payload too short for channel prefix: {actual} bytes")]
    MissingChannelPrefix {
        /// Reassembled length.
        actual: usize,
    },
}

/// Split a `(channel, payload)` message into wire frames.
///
/// The payload is prefixed with the 4-byte channel id, then cut into
/// [`CHUNK_SIZE`] chunks. Always produces at least one frame.
pub fn encode_frames(channel: u32, payload: &[u8]) -> Vec<Vec<u8>> {
    let mut buffer = Vec::with_capacity(CHANNEL_PREFIX_LEN + payload.len());
    buffer.extend_from_slice(&channel.to_be_bytes());
    buffer.extend_from_slice(payload);

    let total = buffer.len().div_ceil(CHUNK_SIZE).max(1) as u32;

    buffer
        .chunks(CHUNK_SIZE)
        .enumerate()
        .map(|(index, chunk)| {
            let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + chunk.len());
            frame.extend_from_slice(&total.to_be_bytes());
            frame.extend_from_slice(&(index as u32).to_be_bytes());
            frame.extend_from_slice(chunk);
            frame
        })
        .collect()
}

/// Reassembles chunked frames into `(channel, payload)` messages.
///
/// Chunks may arrive in any order and may be duplicated; the message is
/// emitted exactly once, when every index has been seen.
#[derive(Debug, Default)]
pub struct Assembler {
    expected_total: Option<u32>,
    chunks: HashMap<u32, Vec<u8>>,
}

impl Assembler {
    /// Create an empty assembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct chunks buffered for the in-flight message.
    pub fn buffered(&self) -> usize {
        self.chunks.len()
    }

    /// Feed one wire frame.
    ///
    /// Returns `Ok(Some((channel, payload)))` when this frame completes a
    /// message, `Ok(None)` while more chunks are pending. Malformed frames
    /// reset the in-flight state and return an error.
    pub fn push(&mut self, frame: &[u8]) -> Result<Option<(u32, Vec<u8>)>, FrameError> {
        if frame.len() < FRAME_HEADER_LEN {
            return Err(FrameError::TruncatedFrame {
                actual: frame.len(),
            });
        }

        let total = u32::from_be_bytes(frame[0..4].try_into().expect("4 bytes"));
        let index = u32::from_be_bytes(frame[4..8].try_into().expect("4 bytes"));

        if total == 0 {
            self.reset();
            return Err(FrameError::ZeroChunks);
        }
        if index >= total {
            self.reset();
            return Err(FrameError::IndexOutOfRange { index, total });
        }

        match self.expected_total {
            Some(expected) if expected != total => {
                self.reset();
                return Err(FrameError::TotalMismatch {
                    expected,
                    actual: total,
                });
            }
            None => self.expected_total = Some(total),
            _ => {}
        }

        // Duplicate delivery overwrites the identical chunk
        self.chunks.insert(index, frame[FRAME_HEADER_LEN..].to_vec());

        if self.chunks.len() < total as usize {
            return Ok(None);
        }

        let mut assembled = Vec::new();
        for i in 0..total {
            assembled.extend_from_slice(&self.chunks[&i]);
        }
        self.reset();

        if assembled.len() < CHANNEL_PREFIX_LEN {
            return Err(FrameError::MissingChannelPrefix {
                actual: assembled.len(),
            });
        }

        let channel = u32::from_be_bytes(assembled[0..4].try_into().expect("4 bytes"));
        Ok(Some((channel, assembled[CHANNEL_PREFIX_LEN..].to_vec())))
    }

    fn reset(&mut self) {
        self.expected_total = None;
        self.chunks.clear();
    }
}
