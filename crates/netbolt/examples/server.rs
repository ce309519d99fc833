//! Echo server: accepts every client and echoes messages back reliably.
//!
//! Run the server first:
//! - cargo run -p netbolt --example server -- 7777
//!
//! Then run one or more clients:
//! - cargo run -p netbolt --example client -- 127.0.0.1 7777

use std::{env, thread, time::Duration};

use netbolt::{Config, Server, ServerEvent};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let port: u16 = env::args().nth(1).unwrap_or_else(|| "7777".into()).parse()?;

    let mut server = Server::start("netbolt example", port, Config::default())?;
    println!("netbolt server listening on {}", server.local_addr()?);

    loop {
        server.update();

        while let Some(event) = server.poll() {
            match event {
                ServerEvent::ConnectionRequest(addr) => {
                    println!("[request] {}", addr);
                    let accepted = server.accept_incoming()?;
                    println!("[accepted] {}", accepted);
                }
                ServerEvent::MessageReceived(addr, bytes) => {
                    println!(
                        "[message] from={} payload=\"{}\"",
                        addr,
                        String::from_utf8_lossy(&bytes)
                    );
                    server.send_reliable_to(addr, bytes.as_slice().to_vec())?;
                }
                ServerEvent::ClientDisconnected(addr, reason) => {
                    println!("[disconnect] {} ({:?})", addr, reason);
                }
            }
        }

        server.flush()?;
        thread::sleep(Duration::from_millis(10));
    }
}
