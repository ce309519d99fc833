//! The on-wire message model.
//!
//! A message is the smallest reliability-bearing unit: a type tag, the
//! channel it travels on, a per-channel sequence number, and an opaque
//! payload. Applications only ever produce and consume [`MessageType::ByteArray`];
//! [`MessageType::Chunk`] is internal and carries one slice of an oversized
//! reliable message.

use std::convert::TryFrom;

use netbolt_core::{
    error::{DecodingErrorKind, ErrorKind},
    shared::SharedBytes,
};

use crate::sequence::SequenceNumber;

/// Bits occupied by a message header on the wire
/// (type + channel + sequence + length).
pub const MESSAGE_HEADER_BITS: usize = 8 + 8 + 16 + 16;

/// Closed set of message types understood by this engine. The wire field is
/// 8 bits wide; unknown values are rejected on decode.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MessageType {
    /// Opaque application bytes.
    ByteArray = 0,
    /// One slice of an oversized reliable message (internal).
    Chunk = 1,
}

impl MessageType {
    /// Returns the wire value of this message type.
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for MessageType {
    type Error = ErrorKind;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageType::ByteArray),
            1 => Ok(MessageType::Chunk),
            _ => Err(ErrorKind::DecodingError(DecodingErrorKind::MessageType)),
        }
    }
}

/// A single message as carried inside a packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// Type tag deciding how the payload is interpreted.
    pub message_type: MessageType,
    /// Channel this message belongs to.
    pub channel_id: u8,
    /// Per-channel sequence number.
    pub sequence: SequenceNumber,
    /// Opaque payload bytes.
    pub payload: SharedBytes,
}

impl Message {
    /// Creates an application byte-array message.
    pub fn byte_array(channel_id: u8, sequence: SequenceNumber, payload: SharedBytes) -> Self {
        Self { message_type: MessageType::ByteArray, channel_id, sequence, payload }
    }

    /// Creates a chunk message carrying slice `index` of `total` of an
    /// oversized reliable message.
    pub fn chunk(
        channel_id: u8,
        sequence: SequenceNumber,
        index: u8,
        total: u8,
        slice: &SharedBytes,
    ) -> Self {
        let mut payload = Vec::with_capacity(2 + slice.len());
        payload.push(index);
        payload.push(total);
        payload.extend_from_slice(slice.as_slice());
        Self {
            message_type: MessageType::Chunk,
            channel_id,
            sequence,
            payload: SharedBytes::from_vec(payload),
        }
    }

    /// Bits this message occupies on the wire, header included.
    pub fn wire_bits(&self) -> usize {
        MESSAGE_HEADER_BITS + self.payload.len() * 8
    }
}
