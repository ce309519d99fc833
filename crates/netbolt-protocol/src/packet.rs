//! Packet framing.
//!
//! A packet is one datagram: a fixed-width big-endian header for cheap
//! dispatch, followed by a bit-packed body of messages, optionally sealed
//! with a CRC32 trailer.
//!
//! Wire layout (bits):
//!
//! ```text
//! offset  size   field
//! 0       32     protocol_id
//! 32      16     sequence
//! 48      16     ack (latest packet sequence received from the peer)
//! 64      32     ack_bits (receipt bitmap for the 32 packets before ack)
//! 96      1      is_keepalive
//! 97      8      message_count        (absent when keepalive)
//! ...            messages             (type, channel, sequence, length, bytes)
//! ...     0..7   padding to byte boundary
//! [ 32           crc32 trailer        (only when checksums are enabled) ]
//! ```

use std::convert::TryFrom;

use byteorder::{BigEndian, ByteOrder};

use netbolt_core::{
    constants::{MAX_MESSAGES_PER_PACKET, PACKET_CHECKSUM_SIZE, PACKET_HEADER_SIZE},
    error::{DecodingErrorKind, ErrorKind, Result},
    shared::SharedBytes,
};

use crate::{
    bitstream::{BitReader, BitWriter},
    message::{Message, MessageType, MESSAGE_HEADER_BITS},
    protocol_id::ProtocolId,
    sequence::SequenceNumber,
};

/// Bits of body prefix in a data packet: keepalive flag + message count.
const BODY_PREFIX_BITS: usize = 1 + 8;

/// Fixed-width packet header, byte-aligned for fast dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Protocol identity; foreign ids are dropped before any state update.
    pub protocol_id: u32,
    /// Per-connection monotonic packet sequence (mod 2^16).
    pub sequence: SequenceNumber,
    /// Latest packet sequence received from the peer.
    pub ack: SequenceNumber,
    /// Receipt bitmap covering the 32 packets preceding `ack`.
    pub ack_bits: u32,
}

impl PacketHeader {
    fn write(&self, out: &mut Vec<u8>) {
        let mut header = [0u8; PACKET_HEADER_SIZE];
        BigEndian::write_u32(&mut header[0..4], self.protocol_id);
        BigEndian::write_u16(&mut header[4..6], self.sequence);
        BigEndian::write_u16(&mut header[6..8], self.ack);
        BigEndian::write_u32(&mut header[8..12], self.ack_bits);
        out.extend_from_slice(&header);
    }

    fn read(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < PACKET_HEADER_SIZE {
            return Err(ErrorKind::MalformedPacket);
        }
        Ok(Self {
            protocol_id: BigEndian::read_u32(&bytes[0..4]),
            sequence: BigEndian::read_u16(&bytes[4..6]),
            ack: BigEndian::read_u16(&bytes[6..8]),
            ack_bits: BigEndian::read_u32(&bytes[8..12]),
        })
    }
}

/// Returns the byte capacity left for the bit-packed body of a packet.
pub fn body_capacity(max_packet_size: usize, use_checksums: bool) -> usize {
    let overhead = PACKET_HEADER_SIZE + if use_checksums { PACKET_CHECKSUM_SIZE } else { 0 };
    max_packet_size.saturating_sub(overhead)
}

/// Largest message payload that still fits a packet on its own. Reliable
/// messages beyond this limit are cut into chunks; unreliable ones are
/// rejected.
pub fn max_single_message_payload(max_packet_size: usize, use_checksums: bool) -> usize {
    let body_bits = body_capacity(max_packet_size, use_checksums) * 8;
    body_bits.saturating_sub(BODY_PREFIX_BITS + MESSAGE_HEADER_BITS) / 8
}

/// Write-mode packet: starts empty, accepts messages until full, then seals.
#[derive(Debug)]
pub struct PacketWriter {
    header: PacketHeader,
    body: BitWriter,
    message_count: u8,
    is_keepalive: bool,
    use_checksums: bool,
}

impl PacketWriter {
    /// Starts a data packet. The message count is patched in at seal time.
    pub fn new_data(
        header: PacketHeader,
        max_packet_size: usize,
        use_checksums: bool,
    ) -> Result<Self> {
        let mut body = BitWriter::with_capacity(body_capacity(max_packet_size, use_checksums));
        body.write_bits(0, 1)?; // is_keepalive
        body.write_bits(0, 8)?; // message count placeholder
        Ok(Self { header, body, message_count: 0, is_keepalive: false, use_checksums })
    }

    /// Starts a keepalive packet: header and flag only, no messages. Sent on
    /// idle connections purely to carry acks and reset the peer's timeout.
    pub fn new_keepalive(
        header: PacketHeader,
        max_packet_size: usize,
        use_checksums: bool,
    ) -> Result<Self> {
        let mut body = BitWriter::with_capacity(body_capacity(max_packet_size, use_checksums));
        body.write_bits(1, 1)?;
        Ok(Self { header, body, message_count: 0, is_keepalive: true, use_checksums })
    }

    /// Appends a message. Returns false when the message does not fit (the
    /// caller leaves it for the next packet) or the packet already carries
    /// the maximum count; the packet is unchanged in that case.
    pub fn write_message(&mut self, message: &Message) -> bool {
        if self.is_keepalive
            || self.message_count == MAX_MESSAGES_PER_PACKET
            || message.wire_bits() > self.body.remaining_bits()
        {
            return false;
        }
        if self.try_write(message).is_err() {
            // Unreachable given the size check above; refuse rather than
            // emit a torn packet.
            return false;
        }
        self.message_count += 1;
        true
    }

    fn try_write(&mut self, message: &Message) -> Result<()> {
        self.body.write_bits(message.message_type.to_u8() as u32, 8)?;
        self.body.write_bits(message.channel_id as u32, 8)?;
        self.body.write_bits(message.sequence as u32, 16)?;
        self.body.write_bits(message.payload.len() as u32, 16)?;
        self.body.write_bytes(message.payload.as_slice())
    }

    /// Returns how many messages have been written so far.
    pub fn message_count(&self) -> u8 {
        self.message_count
    }

    /// Returns true if no message has been written yet.
    pub fn is_empty(&self) -> bool {
        self.message_count == 0
    }

    /// Finalizes the packet into `out`: header, body with the count patched
    /// in, byte padding, and the optional checksum trailer.
    pub fn seal(self, out: &mut Vec<u8>) -> Result<()> {
        let use_checksums = self.use_checksums;
        let is_keepalive = self.is_keepalive;
        let count = self.message_count;

        out.clear();
        self.header.write(out);

        let body_start = out.len();
        let body = self.body.finish()?;
        out.extend_from_slice(&body);

        if !is_keepalive {
            // The count field sits at body bits 1..9 (LSB-first packing):
            // low seven bits in byte 0, the top bit in byte 1.
            out[body_start] = (out[body_start] & 0x01) | (count << 1);
            out[body_start + 1] = (out[body_start + 1] & 0xFE) | (count >> 7);
        }

        if use_checksums {
            let mut hasher = crc32fast::Hasher::new();
            hasher.update(out);
            let checksum = hasher.finalize();
            out.extend_from_slice(&checksum.to_be_bytes());
        }
        Ok(())
    }
}

/// Read-mode packet: header parsed eagerly, messages pulled lazily.
#[derive(Debug)]
pub struct PacketReader<'a> {
    header: PacketHeader,
    body: BitReader<'a>,
    message_count: u8,
    messages_read: u8,
    is_keepalive: bool,
}

impl<'a> PacketReader<'a> {
    /// Peeks the protocol id without any other parsing, so foreign packets
    /// are cheap to reject before touching connection state.
    pub fn read_protocol_id(bytes: &[u8]) -> Option<u32> {
        if bytes.len() < 4 {
            return None;
        }
        Some(BigEndian::read_u32(&bytes[0..4]))
    }

    /// Parses the header and body prefix of a received datagram.
    pub fn init_read(
        bytes: &'a [u8],
        expected: ProtocolId,
        use_checksums: bool,
    ) -> Result<Self> {
        let bytes = if use_checksums {
            Self::validate_and_strip_checksum(bytes)?
        } else {
            bytes
        };

        let header = PacketHeader::read(bytes)?;
        if header.protocol_id != expected.value() {
            return Err(ErrorKind::ProtocolMismatch {
                expected: expected.value(),
                got: header.protocol_id,
            });
        }

        let mut body = BitReader::new(&bytes[PACKET_HEADER_SIZE..]);
        let is_keepalive = body.read_bits(1).map_err(|_| ErrorKind::MalformedPacket)? == 1;
        let message_count = if is_keepalive {
            0
        } else {
            body.read_bits(8).map_err(|_| ErrorKind::MalformedPacket)? as u8
        };

        Ok(Self { header, body, message_count, messages_read: 0, is_keepalive })
    }

    fn validate_and_strip_checksum(bytes: &[u8]) -> Result<&[u8]> {
        if bytes.len() < PACKET_CHECKSUM_SIZE {
            return Err(ErrorKind::MalformedPacket);
        }
        let (payload, trailer) = bytes.split_at(bytes.len() - PACKET_CHECKSUM_SIZE);
        let received = BigEndian::read_u32(trailer);
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(payload);
        if hasher.finalize() != received {
            return Err(ErrorKind::DecodingError(DecodingErrorKind::Checksum));
        }
        Ok(payload)
    }

    /// Returns the parsed header.
    pub fn header(&self) -> &PacketHeader {
        &self.header
    }

    /// Returns true if this is an empty keepalive packet.
    pub fn is_keepalive(&self) -> bool {
        self.is_keepalive
    }

    /// Returns how many messages the packet declares.
    pub fn message_count(&self) -> u8 {
        self.message_count
    }

    /// Pulls the next message, or `None` when all declared messages have
    /// been read. A payload that ends mid-message is `TruncatedPacket`.
    pub fn next_message(&mut self) -> Result<Option<Message>> {
        if self.messages_read == self.message_count {
            return Ok(None);
        }

        let message_type = MessageType::try_from(self.body.read_bits(8)? as u8)?;
        let channel_id = self.body.read_bits(8)? as u8;
        let sequence = self.body.read_bits(16)? as SequenceNumber;
        let length = self.body.read_bits(16)? as usize;

        if length * 8 > self.body.remaining_bits() {
            return Err(ErrorKind::TruncatedPacket);
        }
        let mut payload = vec![0u8; length];
        self.body.read_bytes(&mut payload)?;

        self.messages_read += 1;
        Ok(Some(Message {
            message_type,
            channel_id,
            sequence,
            payload: SharedBytes::from_vec(payload),
        }))
    }
}
