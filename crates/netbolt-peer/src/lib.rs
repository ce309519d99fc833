#![warn(missing_docs)]

//! netbolt-peer: the per-peer connection engine.
//!
//! A [`Connection`] aggregates the channels for a single remote peer, maps
//! packet-level acknowledgments to message-level acknowledgments, tracks
//! RTT, and drives keepalive and timeout behavior.

/// Packet-level acknowledgment tracking and RTT estimation.
pub mod acknowledgment;
/// The connection engine.
pub mod connection;
/// Connection lifecycle states.
pub mod state;
/// Per-connection counters.
pub mod statistics;

pub use acknowledgment::AcknowledgmentHandler;
pub use connection::{Connection, ProcessOutcome, RELIABLE_CHANNEL_ID, UNRELIABLE_CHANNEL_ID};
pub use state::{ConnectionState, DisconnectReason};
pub use statistics::ConnectionStatistics;
