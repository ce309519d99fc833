//! The client endpoint.

use std::{io, net::SocketAddr, sync::Arc, time::Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, error, warn};

use netbolt_core::{
    buffer_pool::PacketBufferPool,
    config::Config,
    error::Result,
    interceptor::{Interceptor, NoOpInterceptor},
    shared::SharedBytes,
    transport::DatagramSocket,
};
use netbolt_peer::Connection;
use netbolt_protocol::{packet::PacketReader, protocol_id::ProtocolId};

use crate::{
    event::{ClientEvent, EndpointStatistics},
    simulator::LinkConditioner,
    time::{Clock, SystemClock},
    udp::UdpDatagramSocket,
};

/// A client endpoint: one connection to one server, driven from the game
/// loop via [`Client::add_time`], [`Client::poll`], and [`Client::flush`].
pub struct Client {
    socket: Box<dyn DatagramSocket>,
    server_address: SocketAddr,
    connection: Connection,
    protocol_id: ProtocolId,
    config: Config,
    interceptor: Box<dyn Interceptor>,
    event_sender: Sender<ClientEvent>,
    event_receiver: Receiver<ClientEvent>,
    receive_buffer: Vec<u8>,
    pool: PacketBufferPool,
    statistics: EndpointStatistics,
    clock: Arc<dyn Clock>,
    time: Instant,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("server_address", &self.server_address)
            .field("state", &self.connection.state())
            .finish()
    }
}

impl Client {
    /// Starts a client against `host:port`, binding a UDP socket to an
    /// ephemeral port. The first flush begins soliciting the server.
    pub fn start(protocol_name: &str, host: &str, port: u16, config: Config) -> Result<Self> {
        let server_address = netbolt_utilities::resolve_host(host, port)?;
        let socket = UdpDatagramSocket::bind_any(&config)?;
        Ok(Self::with_socket(
            Box::new(socket),
            server_address,
            protocol_name,
            config,
            Instant::now(),
        ))
    }

    /// Builds a client over an arbitrary transport; the packet simulator is
    /// wrapped around it when configured. Used directly by tests and custom
    /// drivers.
    pub fn with_socket(
        socket: Box<dyn DatagramSocket>,
        server_address: SocketAddr,
        protocol_name: &str,
        config: Config,
        now: Instant,
    ) -> Self {
        let socket: Box<dyn DatagramSocket> = match config.simulator.clone() {
            Some(simulator) => Box::new(LinkConditioner::new(socket, simulator, now)),
            None => socket,
        };
        let protocol_id = ProtocolId::from_name(protocol_name);
        let (event_sender, event_receiver) = unbounded();
        Self {
            connection: Connection::connect(server_address, protocol_id, &config, now),
            receive_buffer: vec![0; config.max_packet_size],
            pool: PacketBufferPool::new(config.max_packet_size, 64),
            socket,
            server_address,
            protocol_id,
            config,
            interceptor: Box::new(NoOpInterceptor),
            event_sender,
            event_receiver,
            statistics: EndpointStatistics::default(),
            clock: Arc::new(SystemClock),
            time: now,
        }
    }

    /// Installs a packet interceptor (encryption hook, inspection).
    pub fn set_interceptor(&mut self, interceptor: Box<dyn Interceptor>) {
        self.interceptor = interceptor;
    }

    /// Replaces the clock behind [`Client::update`].
    pub fn set_clock(&mut self, clock: Arc<dyn Clock>) {
        self.clock = clock;
    }

    /// Convenience wrapper: [`Client::add_time`] with the endpoint's clock.
    /// Hosts that manage time themselves call `add_time` directly.
    pub fn update(&mut self) {
        let now = self.clock.now();
        self.add_time(now);
    }

    /// Advances engine time: drains the socket, dispatches packets to the
    /// connection, and runs the timeout check. Call once per game tick with
    /// host-provided monotonic time.
    pub fn add_time(&mut self, now: Instant) {
        self.time = now;
        self.socket.tick(now);

        loop {
            match self.socket.receive_packet(self.receive_buffer.as_mut()) {
                Ok((payload, address)) => {
                    let length = payload.len();
                    if address != self.server_address {
                        // Only the configured server may talk to us.
                        continue;
                    }
                    if length == 0 {
                        debug!("{}", netbolt_core::error::ErrorKind::ReceivedDataTooShort);
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
                    match self.connection.process_packet(datagram, now) {
                        Ok(outcome) => {
                            if outcome.became_established {
                                let _ = self.event_sender.send(ClientEvent::Connected);
                            }
                            for payload in outcome.delivered {
                                let _ =
                                    self.event_sender.send(ClientEvent::MessageReceived(payload));
                            }
                        }
                        Err(err) => {
                            self.statistics.record_drop(&err);
                            debug!("dropped datagram from {}: {}", address, err);
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

        if let Some(reason) = self.connection.update(now) {
            let _ = self.event_sender.send(ClientEvent::Disconnected(reason));
        }
    }

    /// Queues a message on the unreliable channel.
    pub fn send_unreliable(&mut self, payload: impl Into<SharedBytes>) -> Result<()> {
        self.connection.send_unreliable(payload.into())
    }

    /// Queues a message on the reliable channel. `SendWindowFull` signals
    /// backpressure: retry after acks drain the window.
    pub fn send_reliable(&mut self, payload: impl Into<SharedBytes>) -> Result<()> {
        self.connection.send_reliable(payload.into())
    }

    /// Emits every pending packet for this tick.
    pub fn flush(&mut self) -> Result<()> {
        let mut packets = Vec::new();
        self.connection.assemble_packets(self.time, &mut self.pool, &mut packets)?;
        for mut packet in packets {
            if !self.interceptor.on_send(&self.server_address, &mut packet) {
                self.statistics.intercepted_drops += 1;
                self.pool.release(packet);
                continue;
            }
            let sent = self.socket.send_packet(&self.server_address, &packet);
            self.pool.release(packet);
            match sent {
                Ok(_) => {}
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    warn!("send buffer full; dropping packet to {}", self.server_address);
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    /// Returns the next pending event, or `None` when there is none.
    pub fn poll(&mut self) -> Option<ClientEvent> {
        self.event_receiver.try_recv().ok()
    }

    /// Tears down the connection synchronously. In-flight datagrams are
    /// abandoned.
    pub fn stop(&mut self) {
        self.connection.close();
    }

    /// Returns the server address this client talks to.
    pub fn server_address(&self) -> SocketAddr {
        self.server_address
    }

    /// Returns the configuration this client runs with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the local socket address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Returns true once the server has answered.
    pub fn is_connected(&self) -> bool {
        self.connection.is_established()
    }

    /// Returns the smoothed round-trip time estimate.
    pub fn rtt(&self) -> std::time::Duration {
        self.connection.rtt()
    }

    /// Returns endpoint-boundary drop counters.
    pub fn statistics(&self) -> EndpointStatistics {
        self.statistics
    }

    /// Returns the connection's counters.
    pub fn connection_statistics(&self) -> netbolt_peer::ConnectionStatistics {
        self.connection.statistics()
    }
}
