//! Packet-level acknowledgment tracking.
//!
//! Each connection numbers its outgoing packets and remembers, per packet,
//! which reliable messages it carried. The receive side mirrors the peer's
//! sequence space in a small history window from which the next outgoing
//! header's `(ack, ack_bits)` pair is generated. Incoming ack headers are
//! resolved back through the send history into message-level acks.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use netbolt_protocol::sequence::{sequence_greater_than, SequenceBuffer, SequenceNumber};

/// Number of packets covered by the ack bitfield, besides `ack` itself.
pub const ACK_BITFIELD_SIZE: u16 = 32;

/// Slots kept in the receive history; must exceed the bitfield span.
const RECV_HISTORY_SIZE: u16 = 64;

/// Send records older than this many packets behind the current sequence
/// are unackable in practice and get pruned.
const SENT_RECORD_HORIZON: u16 = 1024;

/// RTT assumed before the first sample arrives.
const INITIAL_RTT: Duration = Duration::from_millis(100);

#[derive(Debug)]
struct SentPacketRecord {
    send_time: Instant,
    carried: Vec<(u8, SequenceNumber)>,
}

/// Tracks both directions of the packet-level ack protocol for one
/// connection.
#[derive(Debug)]
pub struct AcknowledgmentHandler {
    local_sequence: SequenceNumber,
    sent_records: HashMap<SequenceNumber, SentPacketRecord>,
    latest_remote: Option<SequenceNumber>,
    received: SequenceBuffer<()>,
    rtt: Option<Duration>,
    rtt_alpha: f32,
}

impl AcknowledgmentHandler {
    /// Creates a handler with the given RTT smoothing factor.
    pub fn new(rtt_alpha: f32) -> Self {
        Self {
            local_sequence: 0,
            sent_records: HashMap::with_capacity(SENT_RECORD_HORIZON as usize / 4),
            latest_remote: None,
            received: SequenceBuffer::with_capacity(RECV_HISTORY_SIZE),
            rtt: None,
            rtt_alpha,
        }
    }

    /// Takes the sequence number for the next outgoing packet.
    pub fn next_sequence(&mut self) -> SequenceNumber {
        let sequence = self.local_sequence;
        self.local_sequence = self.local_sequence.wrapping_add(1);
        sequence
    }

    /// Records an outgoing packet and the reliable messages it carried, so a
    /// later packet-level ack can be fanned out to those messages.
    pub fn record_sent(
        &mut self,
        sequence: SequenceNumber,
        carried: Vec<(u8, SequenceNumber)>,
        now: Instant,
    ) {
        self.sent_records.insert(sequence, SentPacketRecord { send_time: now, carried });
        self.prune_stale_records();
    }

    /// Returns true when this packet sequence was already processed; the
    /// caller re-acks it but must ignore its payload.
    pub fn is_duplicate(&self, sequence: SequenceNumber) -> bool {
        self.received.exists(sequence)
    }

    /// Records receipt of a peer packet in the history window.
    pub fn record_received(&mut self, sequence: SequenceNumber) {
        self.received.insert(sequence, ());
        match self.latest_remote {
            Some(latest) if !sequence_greater_than(sequence, latest) => {}
            _ => self.latest_remote = Some(sequence),
        }
    }

    /// Produces the `(ack, ack_bits)` pair for the next outgoing header:
    /// the latest peer sequence seen, and a bitmap where bit `i - 1` states
    /// receipt of `ack - i`.
    pub fn ack_header(&self) -> (SequenceNumber, u32) {
        // Before anything was received this acks "one before zero", which
        // the peer cannot have sent for another 2^16 packets.
        let ack = match self.latest_remote {
            Some(latest) => latest,
            None => return (0u16.wrapping_sub(1), 0),
        };
        let mut ack_bits: u32 = 0;
        let mut mask: u32 = 1;
        for i in 1..=ACK_BITFIELD_SIZE {
            if self.received.exists(ack.wrapping_sub(i)) {
                ack_bits |= mask;
            }
            mask <<= 1;
        }
        (ack, ack_bits)
    }

    /// Applies an incoming `(ack, ack_bits)` header. Every newly confirmed
    /// packet contributes an RTT sample and yields the (channel, message
    /// sequence) pairs it carried. Applying the same header twice is a
    /// no-op.
    pub fn process_ack(
        &mut self,
        ack: SequenceNumber,
        mut ack_bits: u32,
        now: Instant,
    ) -> Vec<(u8, SequenceNumber)> {
        let mut acked_messages = Vec::new();

        if let Some(record) = self.sent_records.remove(&ack) {
            self.sample_rtt(now.saturating_duration_since(record.send_time));
            acked_messages.extend(record.carried);
        }
        for i in 1..=ACK_BITFIELD_SIZE {
            if ack_bits & 1 == 1 {
                if let Some(record) = self.sent_records.remove(&ack.wrapping_sub(i)) {
                    self.sample_rtt(now.saturating_duration_since(record.send_time));
                    acked_messages.extend(record.carried);
                }
            }
            ack_bits >>= 1;
        }
        acked_messages
    }

    /// Returns the number of sent packets not yet acknowledged.
    pub fn packets_in_flight(&self) -> usize {
        self.sent_records.len()
    }

    /// Returns the smoothed round-trip time estimate.
    pub fn rtt(&self) -> Duration {
        self.rtt.unwrap_or(INITIAL_RTT)
    }

    fn sample_rtt(&mut self, sample: Duration) {
        self.rtt = Some(match self.rtt {
            None => sample,
            Some(current) => {
                let alpha = self.rtt_alpha as f64;
                let smoothed =
                    current.as_secs_f64() * (1.0 - alpha) + sample.as_secs_f64() * alpha;
                Duration::from_secs_f64(smoothed)
            }
        });
    }

    /// Drops send records the bitfield can no longer reach. Their messages
    /// stay pending in their channels and simply go out again in a fresh
    /// packet.
    fn prune_stale_records(&mut self) {
        let local = self.local_sequence;
        self.sent_records
            .retain(|sequence, _| local.wrapping_sub(*sequence) <= SENT_RECORD_HORIZON);
    }
}
