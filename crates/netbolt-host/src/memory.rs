//! In-memory datagram transport.
//!
//! A [`MemoryHub`] plays the role of the network: it owns one inbox per
//! address and hands out [`MemorySocket`]s that deliver into each other's
//! inboxes synchronously. Together with the packet simulator and an explicit
//! clock this makes end-to-end tests fully deterministic — no real sockets,
//! no real time.

use std::{
    cell::RefCell,
    collections::{HashMap, VecDeque},
    io,
    net::SocketAddr,
    rc::Rc,
};

use netbolt_core::transport::DatagramSocket;

type Inbox = VecDeque<(SocketAddr, Vec<u8>)>;

#[derive(Debug, Default)]
struct HubState {
    inboxes: HashMap<SocketAddr, Inbox>,
}

/// The shared "network" connecting memory sockets.
#[derive(Debug, Default, Clone)]
pub struct MemoryHub {
    state: Rc<RefCell<HubState>>,
}

impl MemoryHub {
    /// Creates an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `addr` on the hub and returns its socket.
    pub fn socket(&self, addr: SocketAddr) -> MemorySocket {
        self.state.borrow_mut().inboxes.entry(addr).or_default();
        MemorySocket { addr, state: self.state.clone() }
    }

    /// Returns how many datagrams sit undelivered in `addr`'s inbox.
    pub fn pending(&self, addr: SocketAddr) -> usize {
        self.state.borrow().inboxes.get(&addr).map_or(0, |inbox| inbox.len())
    }
}

/// One endpoint's view of the hub.
#[derive(Debug)]
pub struct MemorySocket {
    addr: SocketAddr,
    state: Rc<RefCell<HubState>>,
}

impl DatagramSocket for MemorySocket {
    fn send_packet(&mut self, addr: &SocketAddr, payload: &[u8]) -> io::Result<usize> {
        let mut state = self.state.borrow_mut();
        // Datagram semantics: an unknown destination silently eats the
        // packet instead of failing the send.
        if let Some(inbox) = state.inboxes.get_mut(addr) {
            inbox.push_back((self.addr, payload.to_vec()));
        }
        Ok(payload.len())
    }

    fn receive_packet<'a>(&mut self, buffer: &'a mut [u8]) -> io::Result<(&'a [u8], SocketAddr)> {
        let mut state = self.state.borrow_mut();
        let inbox = state
            .inboxes
            .get_mut(&self.addr)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;
        match inbox.pop_front() {
            Some((from, payload)) => {
                if payload.len() > buffer.len() {
                    // Oversized datagrams truncate, like a real socket.
                    buffer.copy_from_slice(&payload[..buffer.len()]);
                    Ok((&buffer[..], from))
                } else {
                    buffer[..payload.len()].copy_from_slice(&payload);
                    Ok((&buffer[..payload.len()], from))
                }
            }
            None => Err(io::Error::from(io::ErrorKind::WouldBlock)),
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.addr)
    }

    fn is_blocking_mode(&self) -> bool {
        false
    }
}
