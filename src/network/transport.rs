//! Datagram transport
//!
//! The server loop only needs to receive one datagram and send one back, so it
//! is written against this trait rather than a concrete socket.

use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use tokio::net::UdpSocket;

/// A connectionless, message-oriented transport
#[async_trait]
pub trait Transport: Send + Sync {
    /// Receive one datagram into `buf`, returning its length and origin
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;

    /// Send one datagram to `target`
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize>;

    /// Address this transport is bound to
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl Transport for UdpSocket {
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf).await
    }

    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, buf, target).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::local_addr(self)
    }
}
