use std::{default::Default, time::Duration};

use crate::constants::{
    DEFAULT_CHANNEL_WINDOW, DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_MAX_PACKET_SIZE, DEFAULT_MAX_PEERS,
    DEFAULT_UNRELIABLE_OUTBOX_BUDGET,
};

/// Settings for the packet simulator wrapped around a driver.
///
/// All randomness is drawn from a generator seeded with `seed`, so a given
/// configuration replays the same loss/delay pattern on every run.
#[derive(Clone, Debug, PartialEq)]
pub struct SimulatorConfig {
    /// Probability in `[0, 1]` that an outgoing packet is discarded.
    pub loss_ratio: f32,
    /// Probability in `[0, 1]` that an outgoing packet is emitted twice.
    pub duplicate_ratio: f32,
    /// Base latency applied to every outgoing packet.
    pub min_latency: Duration,
    /// Additional uniform random latency in `[0, jitter)` per emission.
    pub jitter: Duration,
    /// Seed for the simulator's random number generator.
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            loss_ratio: 0.0,
            duplicate_ratio: 0.0,
            min_latency: Duration::ZERO,
            jitter: Duration::ZERO,
            seed: 0,
        }
    }
}

#[derive(Clone, Debug)]
/// Configuration options to tune protocol and endpoint behavior.
pub struct Config {
    /// Max size in bytes of a single datagram produced by the engine.
    pub max_packet_size: usize,
    /// Max size in bytes of a single application message.
    pub max_message_size: usize,
    /// Max number of simultaneous connections a server accepts.
    pub max_peers: usize,
    /// Send/recv window size (in messages) for reliable channels.
    pub channel_window: u16,
    /// Fixed delay before an unacked reliable message is resent.
    /// `None` derives the delay from the live RTT estimate (2 x RTT + 10 ms).
    pub resend_delay: Option<Duration>,
    /// Interval after which an empty keepalive packet is sent on an idle
    /// connection so acks keep flowing.
    pub keepalive_interval: Duration,
    /// Max idle time before a connection is considered dead. `None` disables
    /// timeout detection (useful under a debugger or in tests).
    pub connection_timeout: Option<Duration>,
    /// Smoothing factor (0..1) applied to each new RTT sample.
    pub rtt_smoothing_factor: f32,
    /// Max unreliable messages drained per flush; older ones beyond the
    /// budget are dropped with a counter bump.
    pub unreliable_outbox_budget: usize,
    /// Append and verify a CRC32 trailer on every packet (default: false).
    pub use_checksums: bool,
    /// Make the underlying socket block when true, otherwise non-blocking.
    pub blocking_mode: bool,
    /// Socket receive buffer size in bytes (None = system default).
    pub socket_recv_buffer_size: Option<usize>,
    /// Socket send buffer size in bytes (None = system default).
    pub socket_send_buffer_size: Option<usize>,
    /// Time-to-live for outgoing packets (None = system default).
    pub socket_ttl: Option<u32>,
    /// Wrap the driver in a packet simulator when set.
    pub simulator: Option<SimulatorConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_peers: DEFAULT_MAX_PEERS,
            channel_window: DEFAULT_CHANNEL_WINDOW,
            resend_delay: None, // derive from RTT
            keepalive_interval: Duration::from_secs(1),
            connection_timeout: Some(Duration::from_secs(5)),
            rtt_smoothing_factor: 0.05,
            unreliable_outbox_budget: DEFAULT_UNRELIABLE_OUTBOX_BUDGET,
            use_checksums: false,
            blocking_mode: false,
            socket_recv_buffer_size: None,
            socket_send_buffer_size: None,
            socket_ttl: None,
            simulator: None,
        }
    }
}
