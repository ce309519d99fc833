#![warn(missing_docs)]

//! netbolt-protocol: wire codec, packet framing, and channel policies.

/// Bit-granular reader/writer over byte buffers.
pub mod bitstream;
/// Channel policies: unreliable-ordered and reliable-ordered.
pub mod channel;
/// Reassembly of oversized reliable messages from chunk messages.
pub mod chunk;
/// Message types and the on-wire message model.
pub mod message;
/// Packet framing: header, bit-packed message body, optional checksum.
pub mod packet;
/// Protocol identity derived from an application-chosen name.
pub mod protocol_id;
/// Wrap-safe sequence arithmetic and sequence-indexed ring buffers.
pub mod sequence;

pub use channel::{Channel, ChannelKind};
pub use message::{Message, MessageType};
pub use packet::{PacketHeader, PacketReader, PacketWriter};
pub use protocol_id::ProtocolId;
pub use sequence::{sequence_greater_than, sequence_less_than, SequenceBuffer, SequenceNumber};
