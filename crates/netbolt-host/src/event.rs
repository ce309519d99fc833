//! Events and endpoint-level counters.
//!
//! Events flow from the engine to the application through the endpoint's
//! `poll`; "no event" is represented by `poll` returning `None`.

use std::net::SocketAddr;

use netbolt_core::shared::SharedBytes;
use netbolt_peer::DisconnectReason;

/// Events a client observes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// The first valid packet from the server arrived; the connection is up.
    Connected,
    /// The connection is gone: timed out, failed to establish, or locally
    /// closed.
    Disconnected(DisconnectReason),
    /// A message was delivered by one of the channels.
    MessageReceived(SharedBytes),
}

/// Events a server observes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// A previously unknown address sent a valid first packet. Answer with
    /// `accept_incoming` or `reject_incoming`.
    ConnectionRequest(SocketAddr),
    /// An established client went away.
    ClientDisconnected(SocketAddr, DisconnectReason),
    /// A message was delivered from the given client.
    MessageReceived(SocketAddr, SharedBytes),
}

/// Drop counters kept at the endpoint boundary, before any connection is
/// involved. Connection-level counters live in `ConnectionStatistics`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EndpointStatistics {
    /// Datagrams dropped for carrying a foreign protocol id.
    pub protocol_mismatches: u64,
    /// Datagrams dropped as undecodable (bad header or checksum).
    pub malformed_packets: u64,
    /// Datagrams dropped for ending mid-message.
    pub truncated_packets: u64,
    /// Datagrams from unknown addresses dropped because the connection
    /// table was full.
    pub peer_table_rejections: u64,
    /// Datagrams dropped by the interceptor.
    pub intercepted_drops: u64,
}

impl EndpointStatistics {
    /// Folds a failed packet-processing attempt into the counters.
    pub fn record_drop(&mut self, error: &netbolt_core::error::ErrorKind) {
        use netbolt_core::error::ErrorKind;
        match error {
            ErrorKind::ProtocolMismatch { .. } => self.protocol_mismatches += 1,
            ErrorKind::TruncatedPacket => self.truncated_packets += 1,
            _ => self.malformed_packets += 1,
        }
    }
}
