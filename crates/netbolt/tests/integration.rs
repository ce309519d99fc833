//! End-to-end scenarios over the in-memory transport.
//!
//! Everything here is deterministic: time is an explicit variable, the link
//! is the in-memory hub, and faults come from the seeded packet simulator.

use std::{
    net::SocketAddr,
    time::{Duration, Instant},
};

use netbolt::{
    Client, ClientEvent, Config, DisconnectReason, ErrorKind, MemoryHub, Server, ServerEvent,
    SharedBytes, SimulatorConfig, XorStreamInterceptor,
};

const STEP: Duration = Duration::from_millis(20);

fn server_addr() -> SocketAddr {
    "10.0.0.1:7777".parse().unwrap()
}

fn client_addr(n: u16) -> SocketAddr {
    SocketAddr::new("10.0.0.2".parse().unwrap(), 40000 + n)
}

fn make_server(hub: &MemoryHub, config: Config, now: Instant) -> Server {
    Server::with_socket(Box::new(hub.socket(server_addr())), "integration", config, now)
}

fn make_client(hub: &MemoryHub, n: u16, config: Config, now: Instant) -> Client {
    Client::with_socket(
        Box::new(hub.socket(client_addr(n))),
        server_addr(),
        "integration",
        config,
        now,
    )
}

/// One cooperative tick: client I/O, server I/O with auto-accept, then a
/// second client drain so server replies land the same tick. Collected
/// server-side payloads append to `received`.
fn tick(
    now: &mut Instant,
    client: &mut Client,
    server: &mut Server,
    received: &mut Vec<SharedBytes>,
    client_events: &mut Vec<ClientEvent>,
) {
    *now += STEP;
    client.add_time(*now);
    client.flush().unwrap();

    server.add_time(*now);
    while let Some(event) = server.poll() {
        match event {
            ServerEvent::ConnectionRequest(_) => {
                server.accept_incoming().unwrap();
            }
            ServerEvent::MessageReceived(_, payload) => received.push(payload),
            ServerEvent::ClientDisconnected(..) => {}
        }
    }
    server.flush().unwrap();

    client.add_time(*now);
    while let Some(event) = client.poll() {
        client_events.push(event);
    }
}

fn establish(now: &mut Instant, client: &mut Client, server: &mut Server) {
    let mut received = Vec::new();
    let mut events = Vec::new();
    for _ in 0..50 {
        tick(now, client, server, &mut received, &mut events);
        if client.is_connected() {
            return;
        }
    }
    panic!("connection never established");
}

// E1: clean link, reliable messages arrive exactly once, in order.
#[test]
fn reliable_messages_in_order_over_clean_link() {
    let hub = MemoryHub::new();
    let mut now = Instant::now();
    let mut server = make_server(&hub, Config::default(), now);
    let mut client = make_client(&hub, 0, Config::default(), now);

    for payload in [&b"a"[..], b"bb", b"ccc"] {
        client.send_reliable(payload.to_vec()).unwrap();
    }

    let mut received = Vec::new();
    let mut events = Vec::new();
    for _ in 0..100 {
        tick(&mut now, &mut client, &mut server, &mut received, &mut events);
        if received.len() == 3 {
            break;
        }
    }

    let got: Vec<Vec<u8>> = received.iter().map(|b| b.as_slice().to_vec()).collect();
    assert_eq!(got, vec![b"a".to_vec(), b"bb".to_vec(), b"ccc".to_vec()]);
    assert!(events.contains(&ClientEvent::Connected));
}

// E2: 50% loss, every reliable message still arrives, in order, with
// retransmissions doing the work.
#[test]
fn reliable_delivery_survives_heavy_loss() {
    const TOTAL: u32 = 1000;

    let hub = MemoryHub::new();
    let mut now = Instant::now();
    let mut client_config = Config::default();
    client_config.simulator =
        Some(SimulatorConfig { loss_ratio: 0.5, seed: 1, ..SimulatorConfig::default() });

    let mut server = make_server(&hub, Config::default(), now);
    let mut client = make_client(&hub, 0, client_config, now);

    let payload_of = |index: u32| {
        let mut bytes = vec![0u8; 64];
        bytes[..4].copy_from_slice(&index.to_be_bytes());
        bytes
    };

    let mut next_to_send: u32 = 0;
    let mut received = Vec::new();
    let mut events = Vec::new();

    for _ in 0..5000 {
        // Feed the window until backpressure pushes back.
        while next_to_send < TOTAL {
            match client.send_reliable(payload_of(next_to_send)) {
                Ok(()) => next_to_send += 1,
                Err(ErrorKind::SendWindowFull { .. }) => break,
                Err(err) => panic!("unexpected send error: {}", err),
            }
        }
        tick(&mut now, &mut client, &mut server, &mut received, &mut events);
        if received.len() as u32 == TOTAL {
            break;
        }
    }

    assert_eq!(received.len() as u32, TOTAL, "every reliable message must arrive");
    for (index, payload) in received.iter().enumerate() {
        let mut expected = [0u8; 4];
        expected.copy_from_slice(&payload.as_slice()[..4]);
        assert_eq!(u32::from_be_bytes(expected), index as u32, "in-order, no gaps");
    }
    assert!(
        client.connection_statistics().retransmissions > 0,
        "50% loss must force retransmissions"
    );
}

// E3: jittered link, unreliable delivery is monotonic in sequence.
#[test]
fn unreliable_delivery_is_monotonic_under_reordering() {
    let hub = MemoryHub::new();
    let mut now = Instant::now();
    let mut client_config = Config::default();
    client_config.simulator = Some(SimulatorConfig {
        jitter: Duration::from_millis(30),
        seed: 7,
        ..SimulatorConfig::default()
    });

    let mut server = make_server(&hub, Config::default(), now);
    let mut client = make_client(&hub, 0, client_config, now);
    establish(&mut now, &mut client, &mut server);

    let mut received = Vec::new();
    let mut events = Vec::new();
    let mut sent: u32 = 0;
    for _ in 0..20 {
        for _ in 0..5 {
            let mut bytes = vec![0u8; 32];
            bytes[..4].copy_from_slice(&sent.to_be_bytes());
            client.send_unreliable(bytes).unwrap();
            sent += 1;
        }
        tick(&mut now, &mut client, &mut server, &mut received, &mut events);
    }
    // Let the jittered stragglers drain.
    for _ in 0..20 {
        tick(&mut now, &mut client, &mut server, &mut received, &mut events);
    }

    assert!(received.len() <= 100);
    assert!(!received.is_empty());
    let indices: Vec<u32> = received
        .iter()
        .map(|payload| {
            let mut word = [0u8; 4];
            word.copy_from_slice(&payload.as_slice()[..4]);
            u32::from_be_bytes(word)
        })
        .collect();
    for pair in indices.windows(2) {
        assert!(pair[0] < pair[1], "delivered sequence must be strictly increasing");
    }
}

// E4: the peer table is bounded; the 33rd client is ignored silently.
#[test]
fn peer_table_bound_drops_extra_clients_silently() {
    let hub = MemoryHub::new();
    let mut now = Instant::now();
    let mut server = make_server(&hub, Config::default(), now);

    let mut clients: Vec<Client> =
        (0..33).map(|n| make_client(&hub, n, Config::default(), now)).collect();

    now += STEP;
    for client in clients.iter_mut() {
        client.add_time(now);
        client.flush().unwrap();
    }
    server.add_time(now);

    let mut requests = 0;
    while let Some(event) = server.poll() {
        if matches!(event, ServerEvent::ConnectionRequest(_)) {
            requests += 1;
            server.accept_incoming().unwrap();
        }
    }
    assert_eq!(requests, 32, "exactly max_peers connection requests");
    assert_eq!(server.connection_count(), 32);
    assert_eq!(server.statistics().peer_table_rejections, 1);
}

// E5: a server that never answers produces exactly one disconnect event.
#[test]
fn silent_server_times_out_exactly_once() {
    let hub = MemoryHub::new();
    let mut now = Instant::now();
    // No server socket on the hub: every client packet vanishes.
    let mut client = make_client(&hub, 0, Config::default(), now);

    let mut disconnects = Vec::new();
    for _ in 0..200 {
        now += Duration::from_millis(50);
        client.add_time(now);
        client.flush().unwrap();
        while let Some(event) = client.poll() {
            if let ClientEvent::Disconnected(reason) = event {
                disconnects.push(reason);
            }
        }
    }

    assert_eq!(
        disconnects,
        vec![DisconnectReason::ConnectionFailed],
        "one disconnect, never a second"
    );
    assert!(!client.is_connected());
}

// E6: an oversized message errors immediately and no packet goes out.
#[test]
fn oversized_message_is_rejected_without_emitting() {
    let hub = MemoryHub::new();
    let mut now = Instant::now();
    let config = Config::default();
    let mut server = make_server(&hub, config.clone(), now);
    let mut client = make_client(&hub, 0, config.clone(), now);
    establish(&mut now, &mut client, &mut server);

    // Settle the link so the inbox baseline is empty.
    now += STEP;
    client.add_time(now);
    server.add_time(now);
    assert_eq!(hub.pending(server_addr()), 0);

    let oversized = vec![0u8; config.max_message_size + 1];
    assert!(matches!(
        client.send_reliable(oversized),
        Err(ErrorKind::MessageTooLarge { .. })
    ));

    client.flush().unwrap();
    assert_eq!(hub.pending(server_addr()), 0, "no packet may be emitted");
}

#[test]
fn chunked_reliable_message_crosses_the_link() {
    let hub = MemoryHub::new();
    let mut now = Instant::now();
    let mut server = make_server(&hub, Config::default(), now);
    let mut client = make_client(&hub, 0, Config::default(), now);

    let big: Vec<u8> = (0..4096u32).map(|i| (i % 253) as u8).collect();
    client.send_reliable(big.clone()).unwrap();

    let mut received = Vec::new();
    let mut events = Vec::new();
    for _ in 0..100 {
        tick(&mut now, &mut client, &mut server, &mut received, &mut events);
        if !received.is_empty() {
            break;
        }
    }
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].as_slice(), &big[..]);
}

#[test]
fn server_broadcast_reaches_every_client() {
    let hub = MemoryHub::new();
    let mut now = Instant::now();
    let mut server = make_server(&hub, Config::default(), now);
    let mut clients: Vec<Client> =
        (0..3).map(|n| make_client(&hub, n, Config::default(), now)).collect();

    // Establish all three.
    for _ in 0..50 {
        now += STEP;
        for client in clients.iter_mut() {
            client.add_time(now);
            client.flush().unwrap();
        }
        server.add_time(now);
        while let Some(event) = server.poll() {
            if matches!(event, ServerEvent::ConnectionRequest(_)) {
                server.accept_incoming().unwrap();
            }
        }
        server.flush().unwrap();
        for client in clients.iter_mut() {
            client.add_time(now);
            while client.poll().is_some() {}
        }
        if clients.iter().all(|c| c.is_connected()) {
            break;
        }
    }
    assert_eq!(server.established_count(), 3);

    let queued = server.broadcast_reliable(b"state update".to_vec());
    assert_eq!(queued, 3);

    let mut got = vec![false; 3];
    for _ in 0..50 {
        now += STEP;
        server.add_time(now);
        server.flush().unwrap();
        for (index, client) in clients.iter_mut().enumerate() {
            client.add_time(now);
            client.flush().unwrap();
            while let Some(event) = client.poll() {
                if let ClientEvent::MessageReceived(bytes) = event {
                    assert_eq!(bytes.as_slice(), b"state update");
                    got[index] = true;
                }
            }
        }
        if got.iter().all(|g| *g) {
            break;
        }
    }
    assert!(got.iter().all(|g| *g), "broadcast must reach every client");
}

#[test]
fn xor_stream_interceptor_end_to_end() {
    let hub = MemoryHub::new();
    let mut now = Instant::now();
    let mut server = make_server(&hub, Config::default(), now);
    let mut client = make_client(&hub, 0, Config::default(), now);

    const KEY: u64 = 0x5EED_F00D_0000_1234;
    server.set_interceptor(Box::new(XorStreamInterceptor::new(KEY)));
    client.set_interceptor(Box::new(XorStreamInterceptor::new(KEY)));

    client.send_reliable(b"secret".to_vec()).unwrap();
    let mut received = Vec::new();
    let mut events = Vec::new();
    for _ in 0..100 {
        tick(&mut now, &mut client, &mut server, &mut received, &mut events);
        if !received.is_empty() {
            break;
        }
    }
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].as_slice(), b"secret");

    // A client with the wrong key never gets through: its datagrams
    // decrypt to garbage and fail the protocol-id check.
    let mut intruder = make_client(&hub, 1, Config::default(), now);
    intruder.send_reliable(b"mallory".to_vec()).unwrap();
    now += STEP;
    intruder.add_time(now);
    intruder.flush().unwrap();
    let mismatches_before = server.statistics().protocol_mismatches;
    server.add_time(now);
    assert!(server.statistics().protocol_mismatches > mismatches_before);
    assert_eq!(server.connection_count(), 1, "no connection for the intruder");
}

#[test]
fn checksummed_packets_round_trip() {
    let hub = MemoryHub::new();
    let mut now = Instant::now();
    let mut config = Config::default();
    config.use_checksums = true;
    let mut server = make_server(&hub, config.clone(), now);
    let mut client = make_client(&hub, 0, config, now);

    client.send_reliable(b"guarded".to_vec()).unwrap();
    let mut received = Vec::new();
    let mut events = Vec::new();
    for _ in 0..100 {
        tick(&mut now, &mut client, &mut server, &mut received, &mut events);
        if !received.is_empty() {
            break;
        }
    }
    assert_eq!(received[0].as_slice(), b"guarded");
}

#[test]
fn established_client_times_out_when_server_stops() {
    let hub = MemoryHub::new();
    let mut now = Instant::now();
    let mut server = make_server(&hub, Config::default(), now);
    let mut client = make_client(&hub, 0, Config::default(), now);
    establish(&mut now, &mut client, &mut server);

    // Server goes dark.
    server.stop();

    let mut disconnects = Vec::new();
    for _ in 0..150 {
        now += Duration::from_millis(50);
        client.add_time(now);
        client.flush().unwrap();
        while let Some(event) = client.poll() {
            if let ClientEvent::Disconnected(reason) = event {
                disconnects.push(reason);
            }
        }
    }
    assert_eq!(disconnects, vec![DisconnectReason::Timeout]);
}
