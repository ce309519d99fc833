/// Counters describing the life of one connection.
///
/// All counters are cumulative since the connection was created. Snapshots
/// are cheap copies; the soak harness and tests read them to assert
/// retransmission and drop behavior.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStatistics {
    /// Packets handed to the driver.
    pub packets_sent: u64,
    /// Valid packets processed from the driver.
    pub packets_received: u64,
    /// Duplicate packets whose payload was ignored.
    pub duplicate_packets_ignored: u64,
    /// Keepalive packets emitted.
    pub keepalives_sent: u64,
    /// Application messages queued for sending.
    pub messages_sent: u64,
    /// Application messages delivered to the host.
    pub messages_received: u64,
    /// Reliable messages that went out more than once.
    pub retransmissions: u64,
    /// Received messages dropped as duplicates by channels.
    pub duplicate_messages_dropped: u64,
    /// Unreliable messages dropped by the outbox budget.
    pub outbox_dropped: u64,
}
