//! The UDP driver.
//!
//! One non-blocking socket per endpoint. The engine never blocks on it:
//! `receive_packet` drains whatever the socket holds and reports
//! `WouldBlock` when empty.

use std::{
    io,
    net::{SocketAddr, ToSocketAddrs, UdpSocket},
};

use socket2::Socket as Socket2;

use netbolt_core::{config::Config, error::Result, transport::DatagramSocket};

/// Applies socket options from configuration to a UdpSocket.
fn apply_socket_options(socket: &UdpSocket, config: &Config) -> io::Result<()> {
    let socket2 = Socket2::from(socket.try_clone()?);

    if let Some(size) = config.socket_recv_buffer_size {
        socket2.set_recv_buffer_size(size)?;
    }
    if let Some(size) = config.socket_send_buffer_size {
        socket2.set_send_buffer_size(size)?;
    }
    if let Some(ttl) = config.socket_ttl {
        socket.set_ttl(ttl)?;
    }
    Ok(())
}

/// Non-blocking UDP datagram socket.
#[derive(Debug)]
pub struct UdpDatagramSocket {
    socket: UdpSocket,
    is_blocking_mode: bool,
}

impl UdpDatagramSocket {
    /// Binds to the given address and applies the configured socket options.
    pub fn bind<A: ToSocketAddrs>(addresses: A, config: &Config) -> Result<Self> {
        let socket = UdpSocket::bind(addresses)?;
        apply_socket_options(&socket, config)?;
        socket.set_nonblocking(!config.blocking_mode)?;
        Ok(Self { socket, is_blocking_mode: config.blocking_mode })
    }

    /// Binds to an ephemeral port on all interfaces; the usual client setup.
    pub fn bind_any(config: &Config) -> Result<Self> {
        Self::bind("0.0.0.0:0", config)
    }
}

impl DatagramSocket for UdpDatagramSocket {
    fn send_packet(&mut self, addr: &SocketAddr, payload: &[u8]) -> io::Result<usize> {
        self.socket.send_to(payload, addr)
    }

    fn receive_packet<'a>(&mut self, buffer: &'a mut [u8]) -> io::Result<(&'a [u8], SocketAddr)> {
        self.socket
            .recv_from(buffer)
            .map(move |(length, address)| (&buffer[..length], address))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    fn is_blocking_mode(&self) -> bool {
        self.is_blocking_mode
    }
}
