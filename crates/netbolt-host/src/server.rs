//! The server endpoint.

use std::{io, net::SocketAddr, sync::Arc, time::Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, error, warn};

use netbolt_core::{
    buffer_pool::PacketBufferPool,
    config::Config,
    error::{ErrorKind, Result},
    interceptor::{Interceptor, NoOpInterceptor},
    shared::SharedBytes,
    transport::DatagramSocket,
};
use netbolt_peer::{Connection, DisconnectReason};
use netbolt_protocol::{packet::PacketReader, protocol_id::ProtocolId};

use crate::{
    event::{EndpointStatistics, ServerEvent},
    peer_table::PeerTable,
    simulator::LinkConditioner,
    time::{Clock, SystemClock},
    udp::UdpDatagramSocket,
};

/// One table entry: the connection plus messages delivered before the
/// application accepted the peer (they surface right after the accept).
#[derive(Debug)]
struct ServerSlot {
    connection: Connection,
    held_messages: Vec<SharedBytes>,
}

/// A server endpoint: a bounded table of connections keyed by address.
///
/// New addresses surface as [`ServerEvent::ConnectionRequest`]; the
/// application admits them with [`Server::accept_incoming`] or drops them
/// with [`Server::reject_incoming`]. When the table is full, packets from
/// unknown addresses are dropped silently.
pub struct Server {
    socket: Box<dyn DatagramSocket>,
    connections: PeerTable<SocketAddr, ServerSlot>,
    protocol_id: ProtocolId,
    config: Config,
    interceptor: Box<dyn Interceptor>,
    event_sender: Sender<ServerEvent>,
    event_receiver: Receiver<ServerEvent>,
    receive_buffer: Vec<u8>,
    pool: PacketBufferPool,
    statistics: EndpointStatistics,
    clock: Arc<dyn Clock>,
    time: Instant,
    /// The connection request most recently handed out by `poll`.
    current_incoming: Option<SocketAddr>,
    /// The peer behind the most recent `ClientDisconnected` event.
    last_disconnected: Option<SocketAddr>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server").field("connections", &self.connections.len()).finish()
    }
}

impl Server {
    /// Starts a server listening on `port` on all interfaces.
    pub fn start(protocol_name: &str, port: u16, config: Config) -> Result<Self> {
        let socket = UdpDatagramSocket::bind(("0.0.0.0", port), &config)?;
        Ok(Self::with_socket(Box::new(socket), protocol_name, config, Instant::now()))
    }

    /// Builds a server over an arbitrary transport; the packet simulator is
    /// wrapped around it when configured.
    pub fn with_socket(
        socket: Box<dyn DatagramSocket>,
        protocol_name: &str,
        config: Config,
        now: Instant,
    ) -> Self {
        let socket: Box<dyn DatagramSocket> = match config.simulator.clone() {
            Some(simulator) => Box::new(LinkConditioner::new(socket, simulator, now)),
            None => socket,
        };
        let (event_sender, event_receiver) = unbounded();
        Self {
            connections: PeerTable::with_capacity(config.max_peers.max(4) * 2),
            receive_buffer: vec![0; config.max_packet_size],
            pool: PacketBufferPool::new(config.max_packet_size, 64),
            protocol_id: ProtocolId::from_name(protocol_name),
            socket,
            config,
            interceptor: Box::new(NoOpInterceptor),
            event_sender,
            event_receiver,
            statistics: EndpointStatistics::default(),
            clock: Arc::new(SystemClock),
            time: now,
            current_incoming: None,
            last_disconnected: None,
        }
    }

    /// Installs a packet interceptor (encryption hook, inspection).
    pub fn set_interceptor(&mut self, interceptor: Box<dyn Interceptor>) {
        self.interceptor = interceptor;
    }

    /// Replaces the clock behind [`Server::update`].
    pub fn set_clock(&mut self, clock: Arc<dyn Clock>) {
        self.clock = clock;
    }

    /// Convenience wrapper: [`Server::add_time`] with the endpoint's clock.
    /// Hosts that manage time themselves call `add_time` directly.
    pub fn update(&mut self) {
        let now = self.clock.now();
        self.add_time(now);
    }

    /// Advances engine time: drains the socket, dispatches packets to their
    /// connections, admits first packets from unknown addresses, and runs
    /// timeouts. Call once per game tick.
    pub fn add_time(&mut self, now: Instant) {
        self.time = now;
        self.socket.tick(now);

        loop {
            match self.socket.receive_packet(self.receive_buffer.as_mut()) {
                Ok((payload, address)) => {
                    let length = payload.len();
                    if length == 0 {
                        debug!("{}", ErrorKind::ReceivedDataTooShort);
                        self.statistics.malformed_packets += 1;
                        continue;
                    }
                    let datagram = &mut self.receive_buffer[..length];
                    if !self.interceptor.on_receive(&address, datagram) {
                        self.statistics.intercepted_drops += 1;
                        continue;
                    }
                    if PacketReader::read_protocol_id(datagram)
                        != Some(self.protocol_id.value())
                    {
                        self.statistics.protocol_mismatches += 1;
                        continue;
                    }

                    let datagram = &self.receive_buffer[..length];
                    if let Some(slot) = self.connections.get_mut(&address) {
                        match slot.connection.process_packet(datagram, now) {
                            Ok(outcome) => {
                                let established = slot.connection.is_established();
                                for payload in outcome.delivered {
                                    if established {
                                        let _ = self.event_sender.send(
                                            ServerEvent::MessageReceived(address, payload),
                                        );
                                    } else {
                                        slot.held_messages.push(payload);
                                    }
                                }
                            }
                            Err(err) => {
                                self.statistics.record_drop(&err);
                                debug!("dropped datagram from {}: {}", address, err);
                            }
                        }
                    } else if self.connections.len() >= self.config.max_peers {
                        // Table full: drop silently, no RST equivalent.
                        self.statistics.peer_table_rejections += 1;
                    } else {
                        let mut connection =
                            Connection::accept_from(address, self.protocol_id, &self.config, now);
                        match connection.process_packet(datagram, now) {
                            Ok(outcome) => {
                                self.connections.insert(
                                    address,
                                    ServerSlot {
                                        connection,
                                        held_messages: outcome.delivered,
                                    },
                                );
                                let _ = self
                                    .event_sender
                                    .send(ServerEvent::ConnectionRequest(address));
                            }
                            Err(err) => {
                                // Not a valid first packet; no connection
                                // comes into being.
                                self.statistics.record_drop(&err);
                                debug!("rejected first packet from {}: {}", address, err);
                            }
                        }
                    }
                }
                Err(err) => {
                    if err.kind() != io::ErrorKind::WouldBlock {
                        error!("error receiving data: {:?}", err);
                    }
                    break;
                }
            }
            if self.socket.is_blocking_mode() {
                break;
            }
        }

        // Timeouts; only peers the application ever saw as connected raise
        // a disconnect event.
        let mut disconnected = Vec::new();
        self.connections.retain(|address, slot| {
            if let Some(reason) = slot.connection.update(now) {
                if reason == DisconnectReason::Timeout {
                    disconnected.push((*address, reason));
                }
                return false;
            }
            !slot.connection.state().is_closed()
        });
        for (address, reason) in disconnected {
            self.last_disconnected = Some(address);
            let _ = self.event_sender.send(ServerEvent::ClientDisconnected(address, reason));
        }
    }

    /// Returns the next pending event, or `None` when there is none.
    pub fn poll(&mut self) -> Option<ServerEvent> {
        let event = self.event_receiver.try_recv().ok()?;
        if let ServerEvent::ConnectionRequest(address) = &event {
            self.current_incoming = Some(*address);
        }
        Some(event)
    }

    /// Admits the connection behind the most recent
    /// [`ServerEvent::ConnectionRequest`]. Messages the peer sent while
    /// pending surface as events immediately.
    pub fn accept_incoming(&mut self) -> Result<SocketAddr> {
        let address = self.current_incoming.take().ok_or(ErrorKind::NotConnected)?;
        let slot = self.connections.get_mut(&address).ok_or(ErrorKind::NotConnected)?;
        slot.connection.mark_connected();
        for payload in slot.held_messages.drain(..) {
            let _ = self.event_sender.send(ServerEvent::MessageReceived(address, payload));
        }
        Ok(address)
    }

    /// Drops the connection behind the most recent
    /// [`ServerEvent::ConnectionRequest`] without ever answering it.
    pub fn reject_incoming(&mut self) -> Result<()> {
        let address = self.current_incoming.take().ok_or(ErrorKind::NotConnected)?;
        self.connections.remove(&address);
        Ok(())
    }

    /// Queues a message for one peer on the unreliable channel.
    pub fn send_unreliable_to(
        &mut self,
        address: SocketAddr,
        payload: impl Into<SharedBytes>,
    ) -> Result<()> {
        self.established_mut(&address)?.send_unreliable(payload.into())
    }

    /// Queues a message for one peer on the reliable channel.
    pub fn send_reliable_to(
        &mut self,
        address: SocketAddr,
        payload: impl Into<SharedBytes>,
    ) -> Result<()> {
        self.established_mut(&address)?.send_reliable(payload.into())
    }

    /// Broadcasts on the unreliable channel. Returns how many peers the
    /// message was queued for.
    pub fn broadcast_unreliable(&mut self, payload: impl Into<SharedBytes>) -> usize {
        let shared = payload.into();
        self.broadcast_with(shared, |connection, bytes| connection.send_unreliable(bytes))
    }

    /// Broadcasts on the reliable channel. Returns how many peers the
    /// message was queued for; peers with a full send window are skipped.
    pub fn broadcast_reliable(&mut self, payload: impl Into<SharedBytes>) -> usize {
        let shared = payload.into();
        self.broadcast_with(shared, |connection, bytes| connection.send_reliable(bytes))
    }

    fn broadcast_with(
        &mut self,
        payload: SharedBytes,
        mut send: impl FnMut(&mut Connection, SharedBytes) -> Result<()>,
    ) -> usize {
        let mut count = 0;
        for (address, slot) in self.connections.iter_mut() {
            if !slot.connection.is_established() {
                continue;
            }
            // One refcounted payload shared across all peers.
            match send(&mut slot.connection, payload.clone()) {
                Ok(()) => count += 1,
                Err(err) => warn!("broadcast skipped {}: {}", address, err),
            }
        }
        count
    }

    fn established_mut(&mut self, address: &SocketAddr) -> Result<&mut Connection> {
        let slot = self.connections.get_mut(address).ok_or(ErrorKind::NotConnected)?;
        if !slot.connection.is_established() {
            return Err(ErrorKind::NotConnected);
        }
        Ok(&mut slot.connection)
    }

    /// Emits every pending packet for every connection this tick.
    pub fn flush(&mut self) -> Result<()> {
        let mut packets = Vec::new();
        for (address, slot) in self.connections.iter_mut() {
            packets.clear();
            slot.connection.assemble_packets(self.time, &mut self.pool, &mut packets)?;
            for mut packet in packets.drain(..) {
                if !self.interceptor.on_send(address, &mut packet) {
                    self.statistics.intercepted_drops += 1;
                    self.pool.release(packet);
                    continue;
                }
                let sent = self.socket.send_packet(address, &packet);
                self.pool.release(packet);
                match sent {
                    Ok(_) => {}
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                        warn!("send buffer full; dropping packet to {}", address);
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        }
        Ok(())
    }

    /// Disconnects one peer locally and raises the matching event.
    pub fn disconnect_client(&mut self, address: SocketAddr) -> Result<()> {
        let slot = self.connections.get_mut(&address).ok_or(ErrorKind::NotConnected)?;
        let was_established = slot.connection.is_established();
        slot.connection.close();
        self.connections.remove(&address);
        if was_established {
            self.last_disconnected = Some(address);
            let _ = self
                .event_sender
                .send(ServerEvent::ClientDisconnected(address, DisconnectReason::Local));
        }
        Ok(())
    }

    /// Tears down all connections synchronously.
    pub fn stop(&mut self) {
        self.connections.retain(|_, _| false);
    }

    /// Returns the peer behind the most recent disconnect event.
    pub fn disconnected_client(&self) -> Option<SocketAddr> {
        self.last_disconnected
    }

    /// Returns the local socket address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Returns the configuration this server runs with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the number of tracked connections, pending ones included.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Returns the number of established connections.
    pub fn established_count(&self) -> usize {
        self.connections
            .iter()
            .filter(|(_, slot)| slot.connection.is_established())
            .count()
    }

    /// Returns the round-trip time estimate for one peer.
    pub fn rtt_of(&self, address: &SocketAddr) -> Option<std::time::Duration> {
        self.connections.get(address).map(|slot| slot.connection.rtt())
    }

    /// Returns the connection counters for one peer.
    pub fn connection_statistics(
        &self,
        address: &SocketAddr,
    ) -> Option<netbolt_peer::ConnectionStatistics> {
        self.connections.get(address).map(|slot| slot.connection.statistics())
    }

    /// Returns endpoint-boundary drop counters.
    pub fn statistics(&self) -> EndpointStatistics {
        self.statistics
    }
}
