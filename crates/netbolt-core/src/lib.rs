#![warn(missing_docs)]

//! netbolt-core: foundational types and utilities.
//!
//! This crate provides the minimal set of core utilities shared across all layers:
//! - Configuration types
//! - Error handling
//! - Protocol constants
//! - Shared byte buffers and buffer pooling
//! - The datagram transport abstraction
//! - The packet interceptor hook (symmetric encryption, inspection)
//!
//! Protocol-specific logic lives in the specialized crates:
//! - `netbolt-protocol`: bit stream codec, packet framing, channels
//! - `netbolt-peer`: per-peer connection engine and acknowledgments
//! - `netbolt-host`: client/server endpoints, drivers, packet simulator

/// Protocol constants shared across layers.
pub mod constants {
    /// Size in bytes of the fixed packet header
    /// (protocol id + sequence + ack + ack bitfield).
    pub const PACKET_HEADER_SIZE: usize = 12;
    /// Size in bytes of the optional CRC32 packet trailer.
    pub const PACKET_CHECKSUM_SIZE: usize = 4;
    /// Upper bound on messages carried by a single packet (8-bit count field).
    pub const MAX_MESSAGES_PER_PACKET: u8 = u8::MAX;
    /// Default maximum datagram size produced by the engine.
    pub const DEFAULT_MAX_PACKET_SIZE: usize = 1024;
    /// Default maximum application message size.
    pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4096;
    /// Default bound on the server connection table.
    pub const DEFAULT_MAX_PEERS: usize = 32;
    /// Default send/recv window size for reliable channels.
    pub const DEFAULT_CHANNEL_WINDOW: u16 = 512;
    /// Default cap on unreliable messages drained per flush.
    pub const DEFAULT_UNRELIABLE_OUTBOX_BUDGET: usize = 64;
}

/// Configuration options for the protocol and endpoints.
pub mod config;
/// Error types and results.
pub mod error;
/// Packet interception for custom processing (encryption, inspection).
pub mod interceptor;
/// Buffer pooling for the packet send path.
pub mod buffer_pool;
/// Shared, reference-counted byte slices with zero-copy slicing.
pub mod shared;
/// Transport abstraction for pluggable datagram I/O.
pub mod transport;
