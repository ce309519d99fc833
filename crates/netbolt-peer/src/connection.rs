//! The per-peer connection engine.
//!
//! A connection owns one channel per policy, numbers outgoing packets,
//! packs pending messages into MTU-bounded packets, resolves incoming ack
//! headers into message-level acks, and runs keepalive and timeout.

use std::{
    net::SocketAddr,
    time::{Duration, Instant},
};

use tracing::warn;

use netbolt_core::{
    buffer_pool::PacketBufferPool,
    config::Config,
    error::{ErrorKind, Result},
    shared::SharedBytes,
};
use netbolt_protocol::{
    channel::{Channel, ChannelKind},
    chunk::CHUNK_PREFIX_BYTES,
    packet::{max_single_message_payload, PacketHeader, PacketReader, PacketWriter},
    protocol_id::ProtocolId,
};

use crate::{
    acknowledgment::AcknowledgmentHandler,
    state::{ConnectionState, DisconnectReason},
    statistics::ConnectionStatistics,
};

/// Channel id of the unreliable-ordered channel every connection owns.
pub const UNRELIABLE_CHANNEL_ID: u8 = 0;
/// Channel id of the reliable-ordered channel every connection owns.
pub const RELIABLE_CHANNEL_ID: u8 = 1;

/// Extra resend margin on top of twice the RTT estimate.
const RESEND_DELAY_MARGIN: Duration = Duration::from_millis(10);

/// What processing one packet produced.
#[derive(Debug, Default)]
pub struct ProcessOutcome {
    /// True when this packet established the connection (client side: first
    /// valid packet from the server).
    pub became_established: bool,
    /// Application payloads released by the channels, in delivery order.
    pub delivered: Vec<SharedBytes>,
}

/// State for a single remote peer.
#[derive(Debug)]
pub struct Connection {
    /// The address of the remote endpoint.
    pub remote_address: SocketAddr,

    state: ConnectionState,
    /// The initiating side keepalives while connecting; the accepting side
    /// stays silent until the application admits the peer.
    is_initiator: bool,
    channels: Vec<Channel>,
    acks: AcknowledgmentHandler,
    last_heard: Instant,
    last_sent: Instant,
    /// Set when the peer sent us something that deserves a prompt ack.
    ack_pending: bool,
    /// Largest message payload one packet can carry.
    message_capacity: usize,
    config: Config,
    protocol_id: ProtocolId,
    statistics: ConnectionStatistics,
    round_robin: usize,
}

impl Connection {
    /// Creates the client side of a connection; it starts sending
    /// immediately to solicit the first server packet.
    pub fn connect(
        remote_address: SocketAddr,
        protocol_id: ProtocolId,
        config: &Config,
        now: Instant,
    ) -> Self {
        Self::new(remote_address, protocol_id, config, now, true)
    }

    /// Creates the server side of a connection for a newly seen address; it
    /// stays silent until [`Connection::mark_connected`].
    pub fn accept_from(
        remote_address: SocketAddr,
        protocol_id: ProtocolId,
        config: &Config,
        now: Instant,
    ) -> Self {
        Self::new(remote_address, protocol_id, config, now, false)
    }

    fn new(
        remote_address: SocketAddr,
        protocol_id: ProtocolId,
        config: &Config,
        now: Instant,
        is_initiator: bool,
    ) -> Self {
        let channels = vec![
            Channel::unreliable(UNRELIABLE_CHANNEL_ID),
            Channel::reliable(RELIABLE_CHANNEL_ID, config.channel_window.max(1)),
        ];
        Self {
            remote_address,
            state: ConnectionState::Connecting,
            is_initiator,
            channels,
            acks: AcknowledgmentHandler::new(config.rtt_smoothing_factor),
            last_heard: now,
            last_sent: now,
            ack_pending: false,
            message_capacity: max_single_message_payload(
                config.max_packet_size,
                config.use_checksums,
            ),
            config: config.clone(),
            protocol_id,
            statistics: ConnectionStatistics::default(),
            round_robin: 0,
        }
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Returns true once the connection is established.
    pub fn is_established(&self) -> bool {
        self.state.is_established()
    }

    /// Admits an accepting-side connection (the application accepted the
    /// peer). The next flush answers with a packet so the peer learns it
    /// got through.
    pub fn mark_connected(&mut self) {
        if self.state == ConnectionState::Connecting {
            self.state = ConnectionState::Connected;
            self.ack_pending = true;
        }
    }

    /// Closes the connection locally. In-flight data is abandoned.
    pub fn close(&mut self) {
        self.state = ConnectionState::Closed;
    }

    /// Returns the smoothed round-trip time estimate.
    pub fn rtt(&self) -> Duration {
        self.acks.rtt()
    }

    /// Returns a snapshot of the connection counters, channel counters
    /// folded in.
    pub fn statistics(&self) -> ConnectionStatistics {
        let mut stats = self.statistics;
        for channel in &self.channels {
            match channel {
                Channel::Reliable(c) => {
                    stats.retransmissions += c.retransmissions();
                    stats.duplicate_messages_dropped += c.duplicates_dropped();
                }
                Channel::Unreliable(c) => {
                    stats.outbox_dropped += c.outbox_dropped();
                    stats.duplicate_messages_dropped += c.stale_dropped();
                }
            }
        }
        stats
    }

    /// Returns how long ago the peer was last heard from.
    pub fn last_heard(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_heard)
    }

    /// Returns true while any channel retains undelivered outgoing data.
    pub fn has_pending_sends(&self) -> bool {
        self.channels.iter().any(|channel| channel.has_pending())
    }

    /// Queues a message on the unreliable-ordered channel. The message must
    /// fit a single packet; unreliable data is never chunked.
    pub fn send_unreliable(&mut self, payload: SharedBytes) -> Result<()> {
        self.ensure_open()?;
        let max = self.config.max_message_size.min(self.message_capacity);
        if payload.len() > max {
            return Err(ErrorKind::MessageTooLarge { size: payload.len(), max });
        }
        self.channels[UNRELIABLE_CHANNEL_ID as usize].send(payload, self.message_capacity)?;
        self.statistics.messages_sent += 1;
        Ok(())
    }

    /// Queues a message on the reliable-ordered channel, splitting it into
    /// chunks when it exceeds one packet's payload capacity.
    pub fn send_reliable(&mut self, payload: SharedBytes) -> Result<()> {
        self.ensure_open()?;
        if payload.len() > self.config.max_message_size {
            return Err(ErrorKind::MessageTooLarge {
                size: payload.len(),
                max: self.config.max_message_size,
            });
        }
        let chunk_size = self.message_capacity.saturating_sub(CHUNK_PREFIX_BYTES).max(1);
        self.channels[RELIABLE_CHANNEL_ID as usize].send(payload, chunk_size)?;
        self.statistics.messages_sent += 1;
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state.is_closed() {
            return Err(ErrorKind::NotConnected);
        }
        Ok(())
    }

    /// Delay before an unacked reliable message is resent.
    fn resend_delay(&self) -> Duration {
        self.config.resend_delay.unwrap_or_else(|| 2 * self.acks.rtt() + RESEND_DELAY_MARGIN)
    }

    fn next_header(&mut self) -> PacketHeader {
        let (ack, ack_bits) = self.acks.ack_header();
        PacketHeader {
            protocol_id: self.protocol_id.value(),
            sequence: self.acks.next_sequence(),
            ack,
            ack_bits,
        }
    }

    /// Processes one received datagram: acks first, then message dispatch
    /// through the channels. Duplicate packets refresh acks but their
    /// payload is ignored.
    pub fn process_packet(&mut self, bytes: &[u8], now: Instant) -> Result<ProcessOutcome> {
        if self.state.is_closed() {
            return Ok(ProcessOutcome::default());
        }

        let mut reader =
            PacketReader::init_read(bytes, self.protocol_id, self.config.use_checksums)?;
        let header = *reader.header();

        self.last_heard = now;
        self.statistics.packets_received += 1;

        let became_established = if self.is_initiator && self.state == ConnectionState::Connecting
        {
            // First valid packet from the server proves the path.
            self.state = ConnectionState::Connected;
            true
        } else {
            false
        };

        // Idempotent, so duplicates may replay them harmlessly.
        for (channel_id, message_sequence) in
            self.acks.process_ack(header.ack, header.ack_bits, now)
        {
            if let Some(channel) = self.channels.get_mut(channel_id as usize) {
                channel.mark_acked(message_sequence);
            }
        }

        if self.acks.is_duplicate(header.sequence) {
            self.statistics.duplicate_packets_ignored += 1;
            if !reader.is_keepalive() {
                // Re-ack it; the payload was already consumed once.
                self.ack_pending = true;
            }
            return Ok(ProcessOutcome { became_established, delivered: Vec::new() });
        }
        self.acks.record_received(header.sequence);

        let mut delivered = Vec::new();
        while let Some(message) = reader.next_message()? {
            if message.payload.len() > self.config.max_message_size {
                warn!(
                    "dropping {}-byte message above the configured maximum from {}",
                    message.payload.len(),
                    self.remote_address
                );
                continue;
            }
            match self.channels.get_mut(message.channel_id as usize) {
                Some(channel) => delivered.extend(channel.receive(message)),
                None => warn!(
                    "dropping message for unknown channel {} from {}",
                    message.channel_id, self.remote_address
                ),
            }
        }
        if reader.message_count() > 0 {
            self.ack_pending = true;
        }

        self.statistics.messages_received += delivered.len() as u64;
        Ok(ProcessOutcome { became_established, delivered })
    }

    /// Packs everything due for transmission into sealed packets, appending
    /// them to `out`. When nothing is due, an empty keepalive still goes out
    /// if acks are owed, the connection is soliciting (client side of the
    /// handshake), or the link has idled past the keepalive interval.
    pub fn assemble_packets(
        &mut self,
        now: Instant,
        pool: &mut PacketBufferPool,
        out: &mut Vec<Vec<u8>>,
    ) -> Result<()> {
        if self.state.is_closed() {
            return Ok(());
        }
        if !self.is_initiator && self.state == ConnectionState::Connecting {
            // Not admitted yet: answering now would bypass accept().
            return Ok(());
        }

        let mut outgoing = Vec::new();
        let channel_count = self.channels.len();
        let resend_delay = self.resend_delay();
        for offset in 0..channel_count {
            let index = (self.round_robin + offset) % channel_count;
            self.channels[index].take_outgoing(
                now,
                resend_delay,
                self.config.unreliable_outbox_budget,
                &mut outgoing,
            );
        }
        self.round_robin = (self.round_robin + 1) % channel_count;

        if outgoing.is_empty() {
            let soliciting = self.state == ConnectionState::Connecting && self.is_initiator;
            let idle = now.saturating_duration_since(self.last_sent)
                >= self.config.keepalive_interval;
            if self.ack_pending || soliciting || idle {
                let header = self.next_header();
                let sequence = header.sequence;
                let writer = PacketWriter::new_keepalive(
                    header,
                    self.config.max_packet_size,
                    self.config.use_checksums,
                )?;
                let mut buffer = pool.acquire();
                writer.seal(&mut buffer)?;
                self.acks.record_sent(sequence, Vec::new(), now);
                self.statistics.packets_sent += 1;
                self.statistics.keepalives_sent += 1;
                self.last_sent = now;
                self.ack_pending = false;
                out.push(buffer);
            }
            return Ok(());
        }

        let mut pending = outgoing.into_iter().peekable();
        while pending.peek().is_some() {
            let header = self.next_header();
            let sequence = header.sequence;
            let mut writer = PacketWriter::new_data(
                header,
                self.config.max_packet_size,
                self.config.use_checksums,
            )?;
            let mut carried = Vec::new();
            let mut wrote_any = false;

            while let Some(message) = pending.peek() {
                if writer.write_message(message) {
                    let channel_index = message.channel_id as usize;
                    if self.channels[channel_index].kind() == ChannelKind::ReliableOrdered {
                        carried.push((message.channel_id, message.sequence));
                        self.channels[channel_index].mark_sent(message.sequence, now);
                    }
                    wrote_any = true;
                    pending.next();
                } else if !wrote_any {
                    // Does not fit even an empty packet; the send-side size
                    // checks make this unreachable for well-formed input.
                    warn!(
                        "dropping unpackable {}-byte message on channel {}",
                        message.payload.len(),
                        message.channel_id
                    );
                    pending.next();
                } else {
                    break;
                }
            }

            if wrote_any {
                let mut buffer = pool.acquire();
                writer.seal(&mut buffer)?;
                self.acks.record_sent(sequence, carried, now);
                self.statistics.packets_sent += 1;
                self.last_sent = now;
                self.ack_pending = false;
                out.push(buffer);
            }
        }
        Ok(())
    }

    /// Runs the timeout check. Returns the disconnect reason when the
    /// connection just transitioned to `Closed`.
    pub fn update(&mut self, now: Instant) -> Option<DisconnectReason> {
        if self.state.is_closed() {
            return None;
        }
        let timeout = self.config.connection_timeout?;
        if now.saturating_duration_since(self.last_heard) >= timeout {
            let reason = if self.state.is_established() {
                DisconnectReason::Timeout
            } else {
                DisconnectReason::ConnectionFailed
            };
            self.state = ConnectionState::Closed;
            return Some(reason);
        }
        None
    }
}
