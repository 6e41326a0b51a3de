//! Burrow Client
//!
//! Sends requests to a server over UDP and waits for the reply carrying the
//! same correlation id. Replies for other ids (late answers to requests that
//! already timed out) are discarded.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::NetworkConfig;
use crate::protocol::{
    decode_response, encode_request, CodecError, ErrorKind, Request, RequestBody, ResponseBody,
    Stat,
};

/// Client errors
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Request timed out")]
    Timeout,

    #[error("Server error: {0}")]
    Server(ErrorKind),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

pub type ClientResult<T> = Result<T, ClientError>;

impl ClientError {
    /// Error kind reported by the server, if this is a server-side failure
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ClientError::Server(kind) => Some(*kind),
            _ => None,
        }
    }
}

/// Burrow Client
pub struct Client {
    /// Client configuration
    config: NetworkConfig,
    /// Socket connected to the server
    socket: UdpSocket,
    server_addr: SocketAddr,
    /// Next correlation id
    next_id: AtomicU64,
    /// Serializes request/reply exchanges on the shared socket
    exchange: Mutex<()>,
}

impl Client {
    /// Bind an ephemeral socket and associate it with `server_addr`
    pub async fn connect(server_addr: SocketAddr, config: NetworkConfig) -> ClientResult<Self> {
        let local = if server_addr.is_ipv4() {
            "0.0.0.0:0"
        } else {
            "[::]:0"
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(server_addr).await?;

        tracing::debug!(
            "Client bound to {} for server {}",
            socket.local_addr()?,
            server_addr
        );

        Ok(Self {
            config,
            socket,
            server_addr,
            next_id: AtomicU64::new(0),
            exchange: Mutex::new(()),
        })
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    /// Send one request and wait for its reply.
    ///
    /// Error replies are returned as [`ClientError::Server`].
    pub async fn call(&self, path: &str, body: RequestBody) -> ClientResult<ResponseBody> {
        let _guard = self.exchange.lock().await;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = Request::new(id, path, body);
        let datagram = encode_request(&request, self.config.max_datagram_size)?;
        self.socket.send(&datagram).await?;

        let deadline = Instant::now() + Duration::from_millis(self.config.request_timeout_ms);
        let mut buf = vec![0u8; self.config.max_datagram_size];

        loop {
            let len = match tokio::time::timeout_at(deadline, self.socket.recv(&mut buf)).await {
                Ok(result) => result?,
                Err(_) => return Err(ClientError::Timeout),
            };

            let response = match decode_response(&buf[..len]) {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!("Ignoring undecodable reply: {}", e);
                    continue;
                }
            };

            if response.request_id != id {
                tracing::debug!(
                    "Ignoring reply for request {} while waiting for {}",
                    response.request_id,
                    id
                );
                continue;
            }

            return match response.body {
                ResponseBody::Error { kind, .. } => Err(ClientError::Server(kind)),
                body => Ok(body),
            };
        }
    }

    pub async fn ping(&self, data: &[u8]) -> ClientResult<Vec<u8>> {
        match self.call("", RequestBody::Ping { data: data.to_vec() }).await? {
            ResponseBody::Ping { data } => Ok(data),
            other => Err(unexpected(other)),
        }
    }

    pub async fn create(&self, path: &str, data: &[u8]) -> ClientResult<Stat> {
        match self.call(path, RequestBody::Create { data: data.to_vec() }).await? {
            ResponseBody::Create { stat } => Ok(stat),
            other => Err(unexpected(other)),
        }
    }

    pub async fn exists(&self, path: &str) -> ClientResult<bool> {
        match self.call(path, RequestBody::Exists).await? {
            ResponseBody::Exists { exists } => Ok(exists),
            other => Err(unexpected(other)),
        }
    }

    pub async fn get(&self, path: &str) -> ClientResult<(Vec<u8>, Stat)> {
        match self.call(path, RequestBody::GetData).await? {
            ResponseBody::GetData { stat, data } => Ok((data, stat)),
            other => Err(unexpected(other)),
        }
    }

    pub async fn set(&self, path: &str, data: &[u8]) -> ClientResult<Stat> {
        let body = RequestBody::SetData {
            version: -1,
            data: data.to_vec(),
        };
        match self.call(path, body).await? {
            ResponseBody::SetData { stat } => Ok(stat),
            other => Err(unexpected(other)),
        }
    }

    /// Create every missing node along `path`, like `mkdir -p`
    pub async fn ensure_path(&self, path: &str) -> ClientResult<()> {
        let mut prefix = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            prefix.push('/');
            prefix.push_str(segment);

            match self.create(&prefix, &[]).await {
                Ok(_) => {}
                Err(e) if e.kind() == Some(ErrorKind::NodeExists) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

fn unexpected(body: ResponseBody) -> ClientError {
    ClientError::UnexpectedResponse(format!("{:?}", body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Server;
    use crate::protocol::PING_PREFIX;
    use tokio_test::assert_ok;

    async fn start_server() -> (Server, SocketAddr) {
        let mut server = Server::new(NetworkConfig::new(0).with_bind_address("127.0.0.1"));
        let addr = server.start().await.unwrap();
        (server, addr)
    }

    async fn connect(addr: SocketAddr) -> Client {
        let config = NetworkConfig::default().with_request_timeout_ms(5_000);
        Client::connect(addr, config).await.unwrap()
    }

    #[tokio::test]
    async fn test_end_to_end_scenarios() {
        let (mut server, addr) = start_server().await;
        let client = connect(addr).await;

        let echoed = assert_ok!(client.ping(b"x").await);
        assert_eq!(echoed, [PING_PREFIX, &b"x"[..]].concat());

        assert_ok!(client.create("/foo", b"").await);
        assert!(assert_ok!(client.exists("/foo").await));

        let err = client.create("/foo", b"").await.unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::NodeExists));

        let err = client.create("/a/b", b"").await.unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::NoNode));

        let stat = assert_ok!(client.set("/foo", b"hi").await);
        assert_eq!(stat.version, 1);
        let (data, stat) = assert_ok!(client.get("/foo").await);
        assert_eq!(data, b"hi");
        assert_eq!(stat.version, 1);

        let err = client.get("/missing").await.unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::NoNode));

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_ensure_path() {
        let (mut server, addr) = start_server().await;
        let client = connect(addr).await;

        assert_ok!(client.ensure_path("/latency_test/node_0/").await);
        assert!(assert_ok!(client.exists("/latency_test").await));
        assert!(assert_ok!(client.exists("/latency_test/node_0").await));

        // Idempotent.
        assert_ok!(client.ensure_path("/latency_test/node_0").await);

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_not_implemented() {
        let (mut server, addr) = start_server().await;
        let client = connect(addr).await;

        let err = client.call("/", RequestBody::Sync).await.unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::NotImplemented));

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_timeout() {
        // Bound but never answers.
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let config = NetworkConfig::default().with_request_timeout_ms(100);
        let client = Client::connect(silent.local_addr().unwrap(), config)
            .await
            .unwrap();

        assert!(matches!(client.ping(b"x").await, Err(ClientError::Timeout)));
    }
}
