//! Channel policies.
//!
//! A channel is a logical substream over one connection with a single
//! delivery policy. Two policies exist as a closed set:
//!
//! - **Unreliable-ordered**: fire-and-forget with newest-wins delivery;
//!   duplicates and stragglers are dropped, nothing is ever retransmitted.
//! - **Reliable-ordered**: windowed retransmission with gapless in-order
//!   delivery to the application.

use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use tracing::warn;

use netbolt_core::{
    error::{ErrorKind, Result},
    shared::SharedBytes,
};

use crate::{
    chunk::{chunk_count, ChunkAssembler},
    message::{Message, MessageType},
    sequence::{sequence_less_than, SequenceBuffer, SequenceNumber},
};

/// Delivery policy of a channel.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ChannelKind {
    /// Messages may be lost; delivery is newest-wins, never reordered.
    UnreliableOrdered,
    /// Messages are retransmitted until acked and delivered in send order
    /// with no gaps.
    ReliableOrdered,
}

/// Fire-and-forget channel with monotonic delivery.
#[derive(Debug)]
pub struct UnreliableChannel {
    id: u8,
    next_sequence: SequenceNumber,
    outbox: VecDeque<Message>,
    last_delivered: Option<SequenceNumber>,
    outbox_dropped: u64,
    stale_dropped: u64,
}

impl UnreliableChannel {
    /// Creates the channel with the given id.
    pub fn new(id: u8) -> Self {
        Self {
            id,
            next_sequence: 0,
            outbox: VecDeque::new(),
            last_delivered: None,
            outbox_dropped: 0,
            stale_dropped: 0,
        }
    }

    /// Queues a message for the next flush.
    pub fn send(&mut self, payload: SharedBytes) -> Result<()> {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        self.outbox.push_back(Message::byte_array(self.id, sequence, payload));
        Ok(())
    }

    /// Drains the outbox into `out`, newest last. When the backlog exceeds
    /// `budget` the oldest messages are dropped with a counter bump.
    pub fn take_outgoing(&mut self, budget: usize, out: &mut Vec<Message>) {
        while self.outbox.len() > budget {
            self.outbox.pop_front();
            self.outbox_dropped += 1;
        }
        out.extend(self.outbox.drain(..));
    }

    /// Accepts a received message if its sequence is newer than the last
    /// delivered one; duplicates and out-of-order stragglers are dropped.
    pub fn receive(&mut self, message: Message) -> Option<SharedBytes> {
        if message.message_type != MessageType::ByteArray {
            warn!("dropping non-byte-array message on unreliable channel {}", self.id);
            return None;
        }
        if let Some(last) = self.last_delivered {
            if !crate::sequence::sequence_greater_than(message.sequence, last) {
                self.stale_dropped += 1;
                return None;
            }
        }
        self.last_delivered = Some(message.sequence);
        Some(message.payload)
    }

    /// Messages dropped because the outbox exceeded its per-flush budget.
    pub fn outbox_dropped(&self) -> u64 {
        self.outbox_dropped
    }

    /// Received messages dropped as duplicates or stragglers.
    pub fn stale_dropped(&self) -> u64 {
        self.stale_dropped
    }
}

#[derive(Debug)]
struct SendEntry {
    message: Message,
    last_sent: Option<Instant>,
    send_count: u32,
}

/// Windowed retransmitting channel with gapless in-order delivery.
#[derive(Debug)]
pub struct ReliableChannel {
    id: u8,
    window: u16,
    next_sequence: SequenceNumber,
    oldest_unacked: SequenceNumber,
    send_window: SequenceBuffer<SendEntry>,
    recv_window: SequenceBuffer<Message>,
    next_expected: SequenceNumber,
    assembler: ChunkAssembler,
    retransmissions: u64,
    duplicates_dropped: u64,
}

impl ReliableChannel {
    /// Creates the channel with the given id and window size.
    pub fn new(id: u8, window: u16) -> Self {
        Self {
            id,
            window,
            next_sequence: 0,
            oldest_unacked: 0,
            send_window: SequenceBuffer::with_capacity(window),
            recv_window: SequenceBuffer::with_capacity(window),
            next_expected: 0,
            assembler: ChunkAssembler::new(),
            retransmissions: 0,
            duplicates_dropped: 0,
        }
    }

    /// Queues a message, splitting it into chunk messages when it exceeds
    /// `max_chunk` bytes. Fails with `SendWindowFull` before committing
    /// anything if the window lacks room for every piece.
    pub fn send(&mut self, payload: SharedBytes, max_chunk: usize) -> Result<()> {
        let needed = if payload.len() <= max_chunk {
            1
        } else {
            chunk_count(payload.len(), max_chunk).ok_or(ErrorKind::MessageTooLarge {
                size: payload.len(),
                max: max_chunk * u8::MAX as usize,
            })? as usize
        };

        if self.free_slots() < needed {
            return Err(ErrorKind::SendWindowFull { channel: self.id });
        }

        if needed == 1 {
            self.enqueue(Message::byte_array(self.id, self.next_sequence, payload));
        } else {
            let total = needed as u8;
            // Cheap Arc views, not copies.
            let slices: Vec<SharedBytes> = payload.chunks(max_chunk).collect();
            for (index, slice) in slices.into_iter().enumerate() {
                let message =
                    Message::chunk(self.id, self.next_sequence, index as u8, total, &slice);
                self.enqueue(message);
            }
        }
        Ok(())
    }

    fn enqueue(&mut self, message: Message) {
        debug_assert_eq!(message.sequence, self.next_sequence, "window entries are assigned in order");
        self.send_window.insert(
            self.next_sequence,
            SendEntry { message, last_sent: None, send_count: 0 },
        );
        self.next_sequence = self.next_sequence.wrapping_add(1);
    }

    /// Number of window slots that can take a new message right now.
    pub fn free_slots(&self) -> usize {
        let in_window = self.next_sequence.wrapping_sub(self.oldest_unacked);
        self.window as usize - in_window as usize
    }

    /// Collects messages due for (re)transmission: everything never sent,
    /// plus everything whose last send is older than `resend_delay`.
    pub fn take_outgoing(
        &mut self,
        now: Instant,
        resend_delay: Duration,
        out: &mut Vec<Message>,
    ) {
        let mut sequence = self.oldest_unacked;
        while sequence != self.next_sequence {
            if let Some(entry) = self.send_window.get(sequence) {
                let due = match entry.last_sent {
                    None => true,
                    Some(at) => now.duration_since(at) >= resend_delay,
                };
                if due {
                    out.push(entry.message.clone());
                }
            }
            sequence = sequence.wrapping_add(1);
        }
    }

    /// Records that a copy of `sequence` was just packed into a packet.
    pub fn mark_sent(&mut self, sequence: SequenceNumber, now: Instant) {
        if let Some(entry) = self.send_window.get_mut(sequence) {
            entry.last_sent = Some(now);
            entry.send_count += 1;
            if entry.send_count > 1 {
                self.retransmissions += 1;
            }
        }
    }

    /// Releases `sequence` from the send window: some packet carrying a copy
    /// of it was acked. Idempotent.
    pub fn mark_acked(&mut self, sequence: SequenceNumber) {
        self.send_window.remove(sequence);
        // Slide the window edge over the acked prefix.
        while self.oldest_unacked != self.next_sequence
            && !self.send_window.exists(self.oldest_unacked)
        {
            self.oldest_unacked = self.oldest_unacked.wrapping_add(1);
        }
    }

    /// Accepts a received message, advancing the delivery cursor over every
    /// consecutive buffered sequence. Returns payloads ready for the
    /// application, oldest first.
    pub fn receive(&mut self, message: Message) -> Vec<SharedBytes> {
        let sequence = message.sequence;

        if sequence_less_than(sequence, self.next_expected) {
            // Already delivered; the packet-level ack will repeat anyway.
            self.duplicates_dropped += 1;
            return Vec::new();
        }
        let distance = sequence.wrapping_sub(self.next_expected);
        if distance >= self.window {
            // Sender window would never let this happen; protect the ring.
            warn!(
                "dropping message {} ahead of delivery cursor {} on channel {}",
                sequence, self.next_expected, self.id
            );
            return Vec::new();
        }
        if self.recv_window.exists(sequence) {
            self.duplicates_dropped += 1;
            return Vec::new();
        }
        self.recv_window.insert(sequence, message);

        let mut delivered = Vec::new();
        while let Some(next) = self.recv_window.remove(self.next_expected) {
            self.next_expected = self.next_expected.wrapping_add(1);
            match next.message_type {
                MessageType::ByteArray => delivered.push(next.payload),
                MessageType::Chunk => match self.assembler.push(&next.payload) {
                    Ok(Some(whole)) => delivered.push(whole),
                    Ok(None) => {}
                    Err(err) => {
                        warn!("dropping malformed chunk on channel {}: {}", self.id, err);
                    }
                },
            }
        }
        delivered
    }

    /// Messages that went out more than once.
    pub fn retransmissions(&self) -> u64 {
        self.retransmissions
    }

    /// Received messages dropped as duplicates.
    pub fn duplicates_dropped(&self) -> u64 {
        self.duplicates_dropped
    }
}

/// A channel together with its policy, as a closed set.
#[derive(Debug)]
pub enum Channel {
    /// Unreliable-ordered policy.
    Unreliable(UnreliableChannel),
    /// Reliable-ordered policy.
    Reliable(ReliableChannel),
}

impl Channel {
    /// Creates an unreliable-ordered channel.
    pub fn unreliable(id: u8) -> Self {
        Channel::Unreliable(UnreliableChannel::new(id))
    }

    /// Creates a reliable-ordered channel.
    pub fn reliable(id: u8, window: u16) -> Self {
        Channel::Reliable(ReliableChannel::new(id, window))
    }

    /// Returns the channel id.
    pub fn id(&self) -> u8 {
        match self {
            Channel::Unreliable(c) => c.id,
            Channel::Reliable(c) => c.id,
        }
    }

    /// Returns the delivery policy.
    pub fn kind(&self) -> ChannelKind {
        match self {
            Channel::Unreliable(_) => ChannelKind::UnreliableOrdered,
            Channel::Reliable(_) => ChannelKind::ReliableOrdered,
        }
    }

    /// Queues a message for sending. `max_chunk` bounds the per-message
    /// bytes a packet can carry and is only consulted by reliable channels.
    pub fn send(&mut self, payload: SharedBytes, max_chunk: usize) -> Result<()> {
        match self {
            Channel::Unreliable(c) => c.send(payload),
            Channel::Reliable(c) => c.send(payload, max_chunk),
        }
    }

    /// Collects messages ready to go out this flush.
    pub fn take_outgoing(
        &mut self,
        now: Instant,
        resend_delay: Duration,
        budget: usize,
        out: &mut Vec<Message>,
    ) {
        match self {
            Channel::Unreliable(c) => c.take_outgoing(budget, out),
            Channel::Reliable(c) => c.take_outgoing(now, resend_delay, out),
        }
    }

    /// Records an actual packed send of `sequence` (reliable only).
    pub fn mark_sent(&mut self, sequence: SequenceNumber, now: Instant) {
        if let Channel::Reliable(c) = self {
            c.mark_sent(sequence, now);
        }
    }

    /// Applies a message-level ack (reliable only).
    pub fn mark_acked(&mut self, sequence: SequenceNumber) {
        if let Channel::Reliable(c) = self {
            c.mark_acked(sequence);
        }
    }

    /// Feeds a received message through the policy; returns deliverable
    /// application payloads in order.
    pub fn receive(&mut self, message: Message) -> Vec<SharedBytes> {
        match self {
            Channel::Unreliable(c) => c.receive(message).into_iter().collect(),
            Channel::Reliable(c) => c.receive(message),
        }
    }

    /// True when a reliable message is currently retained for delivery
    /// guarantees (used to decide whether a flush is needed).
    pub fn has_pending(&self) -> bool {
        match self {
            Channel::Unreliable(c) => !c.outbox.is_empty(),
            Channel::Reliable(c) => c.oldest_unacked != c.next_sequence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(bytes: &[u8]) -> SharedBytes {
        SharedBytes::from_vec(bytes.to_vec())
    }

    fn now() -> Instant {
        Instant::now()
    }

    #[test]
    fn test_unreliable_newest_wins() {
        let mut channel = UnreliableChannel::new(0);
        assert!(channel.receive(Message::byte_array(0, 0, payload(b"a"))).is_some());
        assert!(channel.receive(Message::byte_array(0, 2, payload(b"c"))).is_some());
        // Straggler and duplicate both dropped.
        assert!(channel.receive(Message::byte_array(0, 1, payload(b"b"))).is_none());
        assert!(channel.receive(Message::byte_array(0, 2, payload(b"c"))).is_none());
        assert_eq!(channel.stale_dropped(), 2);
    }

    #[test]
    fn test_unreliable_outbox_budget() {
        let mut channel = UnreliableChannel::new(0);
        for i in 0..10u8 {
            channel.send(payload(&[i])).unwrap();
        }
        let mut out = Vec::new();
        channel.take_outgoing(4, &mut out);
        assert_eq!(out.len(), 4);
        assert_eq!(channel.outbox_dropped(), 6);
        // The newest four survive.
        assert_eq!(out[0].payload.as_slice(), &[6]);
        assert_eq!(out[3].payload.as_slice(), &[9]);
    }

    #[test]
    fn test_reliable_in_order_delivery_with_gap() {
        let mut channel = ReliableChannel::new(1, 8);
        let m0 = Message::byte_array(1, 0, payload(b"zero"));
        let m1 = Message::byte_array(1, 1, payload(b"one"));
        let m2 = Message::byte_array(1, 2, payload(b"two"));

        // 2 arrives early: buffered, nothing deliverable.
        assert!(channel.receive(m2.clone()).is_empty());
        // 0 arrives: only 0 deliverable.
        let delivered = channel.receive(m0);
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].as_slice(), b"zero");
        // 1 arrives: cursor sweeps 1 and the buffered 2.
        let delivered = channel.receive(m1);
        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[0].as_slice(), b"one");
        assert_eq!(delivered[1].as_slice(), b"two");
        // Late duplicate of 2 is dropped.
        assert!(channel.receive(m2).is_empty());
        assert_eq!(channel.duplicates_dropped(), 1);
    }

    #[test]
    fn test_reliable_resend_due_only_after_delay() {
        let mut channel = ReliableChannel::new(1, 8);
        channel.send(payload(b"data"), 1000).unwrap();

        let t0 = now();
        let mut out = Vec::new();
        channel.take_outgoing(t0, Duration::from_millis(100), &mut out);
        assert_eq!(out.len(), 1, "never-sent message goes out immediately");
        channel.mark_sent(0, t0);

        out.clear();
        channel.take_outgoing(t0 + Duration::from_millis(50), Duration::from_millis(100), &mut out);
        assert!(out.is_empty(), "not due yet");

        out.clear();
        channel.take_outgoing(t0 + Duration::from_millis(150), Duration::from_millis(100), &mut out);
        assert_eq!(out.len(), 1, "resent after the delay");
        channel.mark_sent(0, t0 + Duration::from_millis(150));
        assert_eq!(channel.retransmissions(), 1);
    }

    #[test]
    fn test_reliable_ack_releases_window() {
        let mut channel = ReliableChannel::new(1, 4);
        for _ in 0..4 {
            channel.send(payload(b"x"), 1000).unwrap();
        }
        assert!(matches!(
            channel.send(payload(b"overflow"), 1000),
            Err(ErrorKind::SendWindowFull { channel: 1 })
        ));

        // Ack the middle: window edge cannot advance past the unacked head.
        channel.mark_acked(1);
        assert!(matches!(
            channel.send(payload(b"still full"), 1000),
            Err(ErrorKind::SendWindowFull { .. })
        ));

        channel.mark_acked(0);
        // Edge slides over 0 and the already-acked 1.
        assert_eq!(channel.free_slots(), 2);
        channel.send(payload(b"fits"), 1000).unwrap();
    }

    #[test]
    fn test_reliable_ack_idempotent() {
        let mut channel = ReliableChannel::new(1, 4);
        channel.send(payload(b"x"), 1000).unwrap();
        channel.mark_acked(0);
        let free = channel.free_slots();
        channel.mark_acked(0);
        assert_eq!(channel.free_slots(), free);
    }

    #[test]
    fn test_reliable_chunked_round_trip() {
        let mut sender = ReliableChannel::new(1, 16);
        let mut receiver = ReliableChannel::new(1, 16);

        let big: Vec<u8> = (0..2500u32).map(|i| i as u8).collect();
        sender.send(payload(&big), 1000).unwrap();

        let mut out = Vec::new();
        sender.take_outgoing(now(), Duration::from_millis(100), &mut out);
        assert_eq!(out.len(), 3, "2500 bytes in 1000-byte chunks");

        let mut delivered = Vec::new();
        for message in out {
            delivered.extend(receiver.receive(message));
        }
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].as_slice(), &big[..]);
    }

    #[test]
    fn test_reliable_chunk_needs_room_for_all_pieces() {
        let mut channel = ReliableChannel::new(1, 4);
        channel.send(payload(b"xx"), 1000).unwrap();
        channel.send(payload(b"xx"), 1000).unwrap();
        // 3 chunks needed, 2 slots free: refused atomically.
        let big = vec![0u8; 2500];
        assert!(matches!(
            channel.send(payload(&big), 1000),
            Err(ErrorKind::SendWindowFull { .. })
        ));
        assert_eq!(channel.free_slots(), 2);
    }

    #[test]
    fn test_reliable_sequences_survive_wrap() {
        let mut sender = ReliableChannel::new(1, 8);
        let mut receiver = ReliableChannel::new(1, 8);
        // Walk both sides to just before the wrap point.
        sender.next_sequence = 65534;
        sender.oldest_unacked = 65534;
        receiver.next_expected = 65534;

        for i in 0..4u8 {
            sender.send(payload(&[i]), 1000).unwrap();
        }
        let mut out = Vec::new();
        sender.take_outgoing(now(), Duration::from_millis(100), &mut out);
        assert_eq!(out[0].sequence, 65534);
        assert_eq!(out[2].sequence, 0, "sequence wrapped");

        let mut delivered = Vec::new();
        for message in out {
            delivered.extend(receiver.receive(message));
        }
        assert_eq!(delivered.len(), 4);
        for (i, bytes) in delivered.iter().enumerate() {
            assert_eq!(bytes.as_slice(), &[i as u8]);
        }

        for seq in [65534u16, 65535, 0, 1] {
            sender.mark_acked(seq);
        }
        assert_eq!(sender.free_slots(), 8);
    }

    #[test]
    fn test_channel_enum_dispatch() {
        let mut channel = Channel::reliable(1, 8);
        assert_eq!(channel.kind(), ChannelKind::ReliableOrdered);
        assert_eq!(channel.id(), 1);
        channel.send(payload(b"hello"), 1000).unwrap();
        assert!(channel.has_pending());
        channel.mark_acked(0);
        assert!(!channel.has_pending());

        let channel = Channel::unreliable(0);
        assert_eq!(channel.kind(), ChannelKind::UnreliableOrdered);
    }
}
