//! Reassembly of oversized reliable messages.
//!
//! A reliable message wider than one packet's payload capacity is cut into
//! chunk messages, each prefixed with its index and the chunk total. Chunks
//! ride the reliable-ordered channel, so they arrive complete and in order;
//! the assembler only has to validate the prefix and glue consecutive
//! slices back together.

use netbolt_core::{
    error::{DecodingErrorKind, ErrorKind, Result},
    shared::SharedBytes,
};

/// Bytes of prefix (`index`, `total`) in front of every chunk payload.
pub const CHUNK_PREFIX_BYTES: usize = 2;

/// Incremental assembler for one in-flight chunked message per channel.
#[derive(Debug, Default)]
pub struct ChunkAssembler {
    slices: Vec<SharedBytes>,
    expected_total: u8,
    bytes_buffered: usize,
}

impl ChunkAssembler {
    /// Creates an empty assembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk payload (`[index, total, data...]`).
    ///
    /// Returns the reassembled message once the final chunk arrives. A
    /// prefix that contradicts the chunks seen so far resets the assembler
    /// and surfaces a decoding error; on a reliable-ordered channel that can
    /// only mean a misbehaving sender.
    pub fn push(&mut self, payload: &SharedBytes) -> Result<Option<SharedBytes>> {
        if payload.len() < 2 {
            self.reset();
            return Err(ErrorKind::DecodingError(DecodingErrorKind::MessageLength));
        }
        let index = payload[0];
        let total = payload[1];
        let data = payload.slice(2, payload.len() - 2);

        let expected_index = self.slices.len() as u8;
        let consistent_total = self.slices.is_empty() || total == self.expected_total;
        if total == 0 || index != expected_index || index >= total || !consistent_total {
            self.reset();
            return Err(ErrorKind::DecodingError(DecodingErrorKind::MessageLength));
        }

        self.expected_total = total;
        self.bytes_buffered += data.len();
        self.slices.push(data);

        if self.slices.len() < total as usize {
            return Ok(None);
        }

        let mut whole = Vec::with_capacity(self.bytes_buffered);
        for slice in self.slices.drain(..) {
            whole.extend_from_slice(slice.as_slice());
        }
        self.reset();
        Ok(Some(SharedBytes::from_vec(whole)))
    }

    /// Returns true while a chunked message is partially buffered.
    pub fn in_progress(&self) -> bool {
        !self.slices.is_empty()
    }

    fn reset(&mut self) {
        self.slices.clear();
        self.expected_total = 0;
        self.bytes_buffered = 0;
    }
}

/// Number of chunks an oversized payload splits into for the given slice
/// size. Returns `None` when the chunk count would not fit the 8-bit total.
pub fn chunk_count(payload_len: usize, chunk_size: usize) -> Option<u8> {
    if chunk_size == 0 {
        return None;
    }
    let count = payload_len.div_ceil(chunk_size);
    u8::try_from(count).ok()
}
