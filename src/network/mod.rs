//! Network module - Handles UDP communication
//!
//! Provides:
//! - A datagram transport abstraction over UDP sockets
//! - Server running the receive/dispatch/send loop
//! - Client issuing requests and matching replies by correlation id

mod server;
mod client;
mod transport;

pub use server::*;
pub use client::*;
pub use transport::*;

use std::net::{IpAddr, SocketAddr};

use crate::protocol::{DEFAULT_PORT, MAX_DATAGRAM_SIZE};

/// Configuration for network operations
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Port to listen on or send to
    pub port: u16,
    /// Interface to bind to
    pub bind_address: String,
    /// Maximum size of any datagram, in either direction
    pub max_datagram_size: usize,
    /// How long the client waits for a reply in milliseconds
    pub request_timeout_ms: u64,
    /// Peer servers. Accepted but not used for anything yet.
    pub peers: Vec<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind_address: "0.0.0.0".to_string(),
            max_datagram_size: MAX_DATAGRAM_SIZE,
            request_timeout_ms: 10_000,
            peers: Vec::new(),
        }
    }
}

impl NetworkConfig {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }

    pub fn with_bind_address(mut self, bind_address: impl Into<String>) -> Self {
        self.bind_address = bind_address.into();
        self
    }

    pub fn with_request_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.request_timeout_ms = timeout_ms;
        self
    }

    pub fn with_max_datagram_size(mut self, max_datagram_size: usize) -> Self {
        self.max_datagram_size = max_datagram_size;
        self
    }

    pub fn with_peers(mut self, peers: Vec<String>) -> Self {
        self.peers = peers;
        self
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

/// Resolve a hostname to a socket address.
///
/// `host` may be a name, a name with a port, or an IPv4/IPv6 literal with or
/// without a port. `port` is used when none is given.
pub async fn resolve_host(host: &str, port: u16) -> std::io::Result<SocketAddr> {
    use tokio::net::lookup_host;

    if let Ok(addr) = host.parse::<SocketAddr>() {
        return Ok(addr);
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    let addr_string = if host.contains(':') {
        host.to_string()
    } else {
        format!("{}:{}", host, port)
    };
    let mut addrs = lookup_host(&addr_string).await?;

    addrs.next().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Could not resolve host: {}", host),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_addr() {
        let config = NetworkConfig::new(4000).with_bind_address("127.0.0.1");
        assert_eq!(config.bind_addr(), "127.0.0.1:4000");
        assert_eq!(config.max_datagram_size, MAX_DATAGRAM_SIZE);
    }

    #[tokio::test]
    async fn test_resolve_host() {
        let addr = resolve_host("127.0.0.1", 12000).await.unwrap();
        assert_eq!(addr.port(), 12000);

        let addr = resolve_host("127.0.0.1:4000", 12000).await.unwrap();
        assert_eq!(addr.port(), 4000);
    }

    #[tokio::test]
    async fn test_resolve_ipv6_literal() {
        let addr = resolve_host("::1", 12000).await.unwrap();
        assert_eq!(addr, "[::1]:12000".parse::<SocketAddr>().unwrap());

        let addr = resolve_host("[::1]:4000", 12000).await.unwrap();
        assert!(addr.is_ipv6());
        assert_eq!(addr.port(), 4000);
    }

    #[test]
    fn test_builders() {
        let config = NetworkConfig::new(4000)
            .with_max_datagram_size(1024)
            .with_request_timeout_ms(50)
            .with_peers(vec!["10.0.0.2:12000".to_string()]);
        assert_eq!(config.max_datagram_size, 1024);
        assert_eq!(config.request_timeout_ms, 50);
        assert_eq!(config.peers.len(), 1);
    }
}
