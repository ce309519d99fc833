//! Simple client that sends reliable messages to a netbolt server and
//! prints the echoed replies.
//!
//! Run the server first:
//! - cargo run -p netbolt --example server -- 7777
//!
//! Then run the client:
//! - cargo run -p netbolt --example client -- 127.0.0.1 7777
//! - cargo run -p netbolt --example client -- 127.0.0.1 7777 10 200
//!   (sends 10 messages, 200ms apart)

use std::{env, thread, time::Duration, time::Instant};

use netbolt::{Client, ClientEvent, Config};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Args: <host> <port> [count] [interval_ms]
    let mut args = env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "127.0.0.1".into());
    let port: u16 = args.next().unwrap_or_else(|| "7777".into()).parse()?;
    let count: usize = args.next().unwrap_or_else(|| "5".into()).parse().unwrap_or(5);
    let interval_ms: u64 = args.next().unwrap_or_else(|| "300".into()).parse().unwrap_or(300);

    let mut client = Client::start("netbolt example", &host, port, Config::default())?;
    println!(
        "netbolt client {} -> {} ({} messages, every {}ms)",
        client.local_addr()?,
        client.server_address(),
        count,
        interval_ms
    );

    for i in 0..count {
        let message = format!("hello {}", i);
        client.send_reliable(message.into_bytes())?;

        let start = Instant::now();
        let wait = Duration::from_millis(interval_ms);

        while start.elapsed() < wait {
            client.update();

            while let Some(event) = client.poll() {
                match event {
                    ClientEvent::Connected => println!("[connected] rtt={:?}", client.rtt()),
                    ClientEvent::MessageReceived(bytes) => {
                        println!("[reply] \"{}\"", String::from_utf8_lossy(&bytes));
                    }
                    ClientEvent::Disconnected(reason) => {
                        println!("[disconnected] {:?}", reason);
                        return Ok(());
                    }
                }
            }

            client.flush()?;
            thread::sleep(Duration::from_millis(10));
        }
    }

    let stats = client.connection_statistics();
    println!(
        "done: {} packets sent, {} retransmissions",
        stats.packets_sent, stats.retransmissions
    );
    client.stop();
    Ok(())
}
