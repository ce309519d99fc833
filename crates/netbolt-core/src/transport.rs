//! Transport abstraction for pluggable datagram I/O.

use std::{io::Result, net::SocketAddr, time::Instant};

/// Low-level datagram socket abstraction.
///
/// The engine only ever sees opaque byte buffers and peer addresses, so any
/// transport that can ferry datagrams (UDP, an in-memory link for tests, a
/// lossy simulator wrapper) plugs in behind this trait.
pub trait DatagramSocket {
    /// Sends a single packet to the socket.
    fn send_packet(&mut self, addr: &SocketAddr, payload: &[u8]) -> Result<usize>;

    /// Receives a single packet from the socket.
    fn receive_packet<'a>(&mut self, buffer: &'a mut [u8]) -> Result<(&'a [u8], SocketAddr)>;

    /// Returns the socket address that this socket was created from.
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Returns whether the socket operates in blocking or non-blocking mode.
    fn is_blocking_mode(&self) -> bool;

    /// Advances transport-internal timers. Drivers that hold packets back
    /// (the packet simulator) release everything due by `now`; plain sockets
    /// have nothing to do.
    fn tick(&mut self, _now: Instant) {}
}

impl<S: DatagramSocket + ?Sized> DatagramSocket for Box<S> {
    fn send_packet(&mut self, addr: &SocketAddr, payload: &[u8]) -> Result<usize> {
        (**self).send_packet(addr, payload)
    }

    fn receive_packet<'a>(&mut self, buffer: &'a mut [u8]) -> Result<(&'a [u8], SocketAddr)> {
        (**self).receive_packet(buffer)
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        (**self).local_addr()
    }

    fn is_blocking_mode(&self) -> bool {
        (**self).is_blocking_mode()
    }

    fn tick(&mut self, now: Instant) {
        (**self).tick(now)
    }
}
