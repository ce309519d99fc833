#![warn(missing_docs)]

//! Netbolt: a small public API facade for the workspace.
//!
//! This crate provides a clean, stable surface that re-exports the most
//! commonly used types for real-time game networking over UDP:
//!
//! - Endpoints and events (`Client`, `Server`, `ClientEvent`, `ServerEvent`)
//! - Configuration (`Config`, `SimulatorConfig`)
//! - Payloads and errors (`SharedBytes`, `ErrorKind`)
//! - Transports (`UdpDatagramSocket`, `LinkConditioner`, `MemoryHub`)
//!
//! Example
//! ```no_run
//! use std::time::Instant;
//! use netbolt::{Client, ClientEvent, Config};
//!
//! let mut client = Client::start("my game", "127.0.0.1", 7777, Config::default()).unwrap();
//! client.send_reliable(b"hello".to_vec()).unwrap();
//!
//! loop {
//!     client.add_time(Instant::now());
//!     while let Some(event) = client.poll() {
//!         match event {
//!             ClientEvent::Connected => println!("connected"),
//!             ClientEvent::MessageReceived(bytes) => println!("{} bytes", bytes.len()),
//!             ClientEvent::Disconnected(reason) => panic!("lost server: {:?}", reason),
//!         }
//!     }
//!     client.flush().unwrap();
//!     # break;
//! }
//! ```

// Core: configuration, payloads, errors, hooks
pub use netbolt_core::{
    config::{Config, SimulatorConfig},
    error::{ErrorKind, Result},
    interceptor::{Interceptor, NoOpInterceptor, XorStreamInterceptor},
    shared::SharedBytes,
    transport::DatagramSocket,
};
// Host: endpoints, events, drivers
pub use netbolt_host::{
    Client, ClientEvent, DisconnectReason, EndpointStatistics, LinkConditioner, MemoryHub,
    Server, ServerEvent, UdpDatagramSocket,
};
// Peer: per-connection counters
pub use netbolt_peer::ConnectionStatistics;
// Protocol: identity
pub use netbolt_protocol::ProtocolId;

/// Convenience prelude with the most commonly used items.
pub mod prelude {
    pub use crate::{
        Client, ClientEvent, Config, ConnectionStatistics, DisconnectReason, ErrorKind, Server,
        ServerEvent, SharedBytes, SimulatorConfig,
    };
}
