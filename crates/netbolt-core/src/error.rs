//! Error types returned across the public API.
//!
//! The engine never aborts the process: every failure surfaces as a value.
//! Conditions caused by the remote side (foreign, malformed, or truncated
//! datagrams) are recovered locally by dropping the datagram and bumping a
//! counter; the kinds below cover the caller-facing failures.

use std::{fmt, io};

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, ErrorKind>;

/// Enum with all possible network errors that could occur.
#[derive(Debug)]
pub enum ErrorKind {
    /// The underlying driver could not complete a socket call.
    IoError(io::Error),
    /// A received packet carried a protocol id this endpoint does not speak.
    ProtocolMismatch {
        /// The protocol id this endpoint was started with.
        expected: u32,
        /// The protocol id found in the packet header.
        got: u32,
    },
    /// A received packet header could not be decoded.
    MalformedPacket,
    /// A received packet payload ended in the middle of a message.
    TruncatedPacket,
    /// A field inside a packet could not be decoded.
    DecodingError(DecodingErrorKind),
    /// The reliable send window has no free slot; the caller should back off
    /// and retry after acks drain the window.
    SendWindowFull {
        /// Channel whose window is exhausted.
        channel: u8,
    },
    /// The caller handed over a message larger than the configured maximum.
    MessageTooLarge {
        /// Size of the rejected message.
        size: usize,
        /// Largest size the configuration admits.
        max: usize,
    },
    /// The server connection table is at capacity.
    PeerTableFull,
    /// The operation needs an established connection to the given peer.
    NotConnected,
    /// Received data was too short to even carry a header.
    ReceivedDataTooShort,
}

/// Errors that could occur while decoding an individual packet field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodingErrorKind {
    /// The message type field held an unknown value.
    MessageType,
    /// A message length field contradicted the remaining payload.
    MessageLength,
    /// The packet checksum did not match its contents.
    Checksum,
}

impl fmt::Display for DecodingErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodingErrorKind::MessageType => write!(f, "message type"),
            DecodingErrorKind::MessageLength => write!(f, "message length"),
            DecodingErrorKind::Checksum => write!(f, "packet checksum"),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::IoError(e) => write!(f, "an IO error occurred: {}", e),
            ErrorKind::ProtocolMismatch { expected, got } => {
                write!(f, "protocol id mismatch: expected {:#010x}, got {:#010x}", expected, got)
            }
            ErrorKind::MalformedPacket => write!(f, "packet header could not be decoded"),
            ErrorKind::TruncatedPacket => write!(f, "packet payload ended mid-message"),
            ErrorKind::DecodingError(kind) => {
                write!(f, "could not decode packet field: {}", kind)
            }
            ErrorKind::SendWindowFull { channel } => {
                write!(f, "reliable send window is full on channel {}", channel)
            }
            ErrorKind::MessageTooLarge { size, max } => {
                write!(f, "message of {} bytes exceeds the configured maximum of {}", size, max)
            }
            ErrorKind::PeerTableFull => write!(f, "connection table is at capacity"),
            ErrorKind::NotConnected => write!(f, "no established connection to this peer"),
            ErrorKind::ReceivedDataTooShort => {
                write!(f, "received data too short to carry a packet header")
            }
        }
    }
}

impl std::error::Error for ErrorKind {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ErrorKind::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ErrorKind {
    fn from(inner: io::Error) -> Self {
        ErrorKind::IoError(inner)
    }
}
