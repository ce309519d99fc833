//! Packet simulator.
//!
//! Wraps any [`DatagramSocket`] and injects loss, duplication, base latency,
//! and jitter into *outgoing* packets. All randomness comes from one seeded
//! generator, so a given `SimulatorConfig` replays the same fault pattern on
//! every run — which is what makes loss-tolerance tests deterministic.

use std::{
    cmp::Reverse,
    collections::BinaryHeap,
    io,
    net::SocketAddr,
    time::{Duration, Instant},
};

use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::error;

use netbolt_core::{config::SimulatorConfig, transport::DatagramSocket};

#[derive(Debug)]
struct DelayedPacket {
    due: Instant,
    /// Tie-breaker so equal due times keep their send order.
    order: u64,
    addr: SocketAddr,
    payload: Vec<u8>,
}

impl PartialEq for DelayedPacket {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.order == other.order
    }
}
impl Eq for DelayedPacket {}
impl PartialOrd for DelayedPacket {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for DelayedPacket {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.due, self.order).cmp(&(other.due, other.order))
    }
}

/// Lossy, delaying wrapper around a real driver.
#[derive(Debug)]
pub struct LinkConditioner<S: DatagramSocket> {
    inner: S,
    config: SimulatorConfig,
    rng: StdRng,
    queue: BinaryHeap<Reverse<DelayedPacket>>,
    now: Instant,
    next_order: u64,
}

impl<S: DatagramSocket> LinkConditioner<S> {
    /// Wraps `inner`, seeding the fault generator from the configuration.
    pub fn new(inner: S, config: SimulatorConfig, now: Instant) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self { inner, config, rng, queue: BinaryHeap::new(), now, next_order: 0 }
    }

    /// Returns packets currently held back by the conditioner.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    fn schedule(&mut self, addr: SocketAddr, payload: Vec<u8>) {
        let jitter = if self.config.jitter.is_zero() {
            Duration::ZERO
        } else {
            self.config.jitter.mul_f64(self.rng.random::<f64>())
        };
        let due = self.now + self.config.min_latency + jitter;
        let order = self.next_order;
        self.next_order += 1;
        self.queue.push(Reverse(DelayedPacket { due, order, addr, payload }));
    }
}

impl<S: DatagramSocket> DatagramSocket for LinkConditioner<S> {
    fn send_packet(&mut self, addr: &SocketAddr, payload: &[u8]) -> io::Result<usize> {
        let length = payload.len();
        if self.rng.random::<f32>() < self.config.loss_ratio {
            // Swallowed by the simulated link; the caller sees success.
            return Ok(length);
        }
        self.schedule(*addr, payload.to_vec());
        if self.rng.random::<f32>() < self.config.duplicate_ratio {
            // Second emission with its own jitter draw.
            self.schedule(*addr, payload.to_vec());
        }
        Ok(length)
    }

    fn receive_packet<'a>(&mut self, buffer: &'a mut [u8]) -> io::Result<(&'a [u8], SocketAddr)> {
        self.inner.receive_packet(buffer)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    fn is_blocking_mode(&self) -> bool {
        self.inner.is_blocking_mode()
    }

    fn tick(&mut self, now: Instant) {
        self.now = now;
        while let Some(Reverse(head)) = self.queue.peek() {
            if head.due > now {
                break;
            }
            let Some(Reverse(packet)) = self.queue.pop() else { break };
            if let Err(err) = self.inner.send_packet(&packet.addr, &packet.payload) {
                error!("conditioned send to {} failed: {}", packet.addr, err);
            }
        }
        self.inner.tick(now);
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;

    /// Records sends instead of performing them.
    struct RecordingSocket {
        sent: Rc<RefCell<Vec<Vec<u8>>>>,
    }

    impl DatagramSocket for RecordingSocket {
        fn send_packet(&mut self, _addr: &SocketAddr, payload: &[u8]) -> io::Result<usize> {
            self.sent.borrow_mut().push(payload.to_vec());
            Ok(payload.len())
        }
        fn receive_packet<'a>(
            &mut self,
            _buffer: &'a mut [u8],
        ) -> io::Result<(&'a [u8], SocketAddr)> {
            Err(io::Error::from(io::ErrorKind::WouldBlock))
        }
        fn local_addr(&self) -> io::Result<SocketAddr> {
            Ok("127.0.0.1:0".parse().unwrap())
        }
        fn is_blocking_mode(&self) -> bool {
            false
        }
    }

    fn recording() -> (RecordingSocket, Rc<RefCell<Vec<Vec<u8>>>>) {
        let sent = Rc::new(RefCell::new(Vec::new()));
        (RecordingSocket { sent: sent.clone() }, sent)
    }

    fn dest() -> SocketAddr {
        "127.0.0.1:9999".parse().unwrap()
    }

    #[test]
    fn test_zero_fault_config_passes_everything_through() {
        let (inner, sent) = recording();
        let now = Instant::now();
        let mut conditioner = LinkConditioner::new(inner, SimulatorConfig::default(), now);

        for i in 0..10u8 {
            conditioner.send_packet(&dest(), &[i]).unwrap();
        }
        conditioner.tick(now);
        let sent = sent.borrow();
        assert_eq!(sent.len(), 10);
        // Order preserved through the due-time heap.
        for (i, payload) in sent.iter().enumerate() {
            assert_eq!(payload, &vec![i as u8]);
        }
    }

    #[test]
    fn test_latency_holds_packets_until_due() {
        let (inner, sent) = recording();
        let now = Instant::now();
        let config = SimulatorConfig {
            min_latency: Duration::from_millis(50),
            ..SimulatorConfig::default()
        };
        let mut conditioner = LinkConditioner::new(inner, config, now);

        conditioner.send_packet(&dest(), b"wait").unwrap();
        conditioner.tick(now + Duration::from_millis(20));
        assert!(sent.borrow().is_empty());
        assert_eq!(conditioner.queued(), 1);

        conditioner.tick(now + Duration::from_millis(60));
        assert_eq!(sent.borrow().len(), 1);
        assert_eq!(conditioner.queued(), 0);
    }

    #[test]
    fn test_full_loss_drops_everything() {
        let (inner, sent) = recording();
        let now = Instant::now();
        let config = SimulatorConfig { loss_ratio: 1.0, ..SimulatorConfig::default() };
        let mut conditioner = LinkConditioner::new(inner, config, now);

        for _ in 0..20 {
            conditioner.send_packet(&dest(), b"gone").unwrap();
        }
        conditioner.tick(now);
        assert!(sent.borrow().is_empty());
    }

    #[test]
    fn test_duplication_emits_twice() {
        let (inner, sent) = recording();
        let now = Instant::now();
        let config = SimulatorConfig { duplicate_ratio: 1.0, ..SimulatorConfig::default() };
        let mut conditioner = LinkConditioner::new(inner, config, now);

        conditioner.send_packet(&dest(), b"twin").unwrap();
        conditioner.tick(now);
        assert_eq!(sent.borrow().len(), 2);
    }

    #[test]
    fn test_same_seed_same_fate() {
        let run = |seed: u64| {
            let (inner, sent) = recording();
            let now = Instant::now();
            let config = SimulatorConfig { loss_ratio: 0.5, seed, ..SimulatorConfig::default() };
            let mut conditioner = LinkConditioner::new(inner, config, now);
            for i in 0..100u8 {
                conditioner.send_packet(&dest(), &[i]).unwrap();
            }
            conditioner.tick(now);
            let survivors: Vec<Vec<u8>> = sent.borrow().clone();
            survivors
        };
        assert_eq!(run(1), run(1));
        assert_ne!(run(1), run(2), "different seeds draw different fates");
    }
}
