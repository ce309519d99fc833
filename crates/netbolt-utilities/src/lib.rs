#![warn(missing_docs)]

//! Utility functions for netbolt networking.
//!
//! Address helpers used by the endpoints and available to applications:
//! - DNS resolution (hostname to socket address)
//! - IP string parsing without DNS (dotted-quad and IPv6 literals)
//! - Address formatting
//!
//! They live in their own crate so the protocol stack stays free of
//! name-resolution concerns.

use std::{
    io,
    net::{IpAddr, SocketAddr, ToSocketAddrs},
};

/// Resolves a hostname to a socket address using DNS.
///
/// # Examples
/// ```no_run
/// use netbolt_utilities::resolve_host;
///
/// let addr = resolve_host("localhost", 8080).unwrap();
/// assert_eq!(addr.port(), 8080);
/// ```
pub fn resolve_host(hostname: &str, port: u16) -> io::Result<SocketAddr> {
    let addr_str = format!("{}:{}", hostname, port);
    addr_str
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "Could not resolve hostname"))
}

/// Parses an IP address string (without DNS resolution) to a socket address.
///
/// # Examples
/// ```
/// use netbolt_utilities::parse_ip;
///
/// let addr = parse_ip("127.0.0.1", 8080).unwrap();
/// assert_eq!(addr.port(), 8080);
/// ```
pub fn parse_ip(ip_str: &str, port: u16) -> io::Result<SocketAddr> {
    let ip: IpAddr = ip_str.parse().map_err(|e| {
        io::Error::new(io::ErrorKind::InvalidInput, format!("Invalid IP address: {}", e))
    })?;
    Ok(SocketAddr::new(ip, port))
}

/// Formats a socket address to an IP string.
///
/// # Examples
/// ```
/// use netbolt_utilities::format_ip;
/// use std::net::{IpAddr, Ipv4Addr, SocketAddr};
///
/// let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 8080);
/// assert_eq!(format_ip(&addr), "127.0.0.1");
/// ```
pub fn format_ip(addr: &SocketAddr) -> String {
    addr.ip().to_string()
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, Ipv6Addr};

    use super::*;

    #[test]
    fn test_parse_ipv4() {
        let addr = parse_ip("192.168.1.1", 8080).unwrap();
        assert_eq!(addr.ip(), IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)));
        assert_eq!(addr.port(), 8080);
    }

    #[test]
    fn test_parse_ipv6() {
        let addr = parse_ip("::1", 8080).unwrap();
        assert_eq!(addr.ip(), IpAddr::V6(Ipv6Addr::new(0, 0, 0, 0, 0, 0, 0, 1)));
    }

    #[test]
    fn test_parse_invalid_ip() {
        assert!(parse_ip("not-an-ip", 8080).is_err());
        assert!(parse_ip("300.0.0.1", 8080).is_err());
    }

    #[test]
    fn test_format_ip() {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 8080);
        assert_eq!(format_ip(&addr), "127.0.0.1");
    }

    #[test]
    fn test_resolve_with_ip_string() {
        let addr = resolve_host("127.0.0.1", 8080).unwrap();
        assert_eq!(addr.ip(), IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)));
        assert_eq!(addr.port(), 8080);
    }

    #[test]
    fn test_resolve_invalid_host() {
        assert!(resolve_host("this-hostname-should-not-exist-12345.invalid", 8080).is_err());
    }
}
