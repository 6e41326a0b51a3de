//! Burrow Server
//!
//! Runs the receive/dispatch/send loop: one datagram in, one datagram back to
//! the sender. The loop task owns the dispatcher (and with it the node store),
//! so requests are applied strictly one at a time.

use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

use super::{NetworkConfig, Transport};
use crate::dispatch::Dispatcher;
use crate::protocol::{ErrorKind, OpCode};

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Server already running")]
    AlreadyRunning,

    #[error("Server not running")]
    NotRunning,

    #[error("Bind failed: {0}")]
    BindFailed(String),
}

pub type ServerResult<T> = Result<T, ServerError>;

/// Events emitted by the server
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// Server started
    Started {
        bind_addr: SocketAddr,
    },
    /// A request was answered
    RequestHandled {
        addr: SocketAddr,
        request_id: u64,
        op: Option<OpCode>,
        error: Option<ErrorKind>,
    },
    /// A datagram could not be decoded and was not answered
    DatagramDropped {
        addr: SocketAddr,
        reason: String,
    },
    /// Server stopped
    Stopped,
    /// Error occurred
    Error {
        message: String,
    },
}

/// Burrow Server
pub struct Server {
    /// Server configuration
    config: NetworkConfig,
    /// Dispatcher, held here while the loop is not running
    dispatcher: Option<Dispatcher>,
    /// Event sender
    event_tx: mpsc::Sender<ServerEvent>,
    /// Event receiver (for consumers)
    event_rx: Option<mpsc::Receiver<ServerEvent>>,
    /// Shutdown signal
    shutdown_tx: Option<mpsc::Sender<()>>,
    /// Loop task, yields the dispatcher back when it exits
    task: Option<JoinHandle<Dispatcher>>,
    /// Address the transport is bound to
    local_addr: Option<SocketAddr>,
    /// Whether the server is running
    running: Arc<RwLock<bool>>,
}

impl Server {
    /// Create a new server with an empty namespace
    pub fn new(config: NetworkConfig) -> Self {
        let dispatcher = Dispatcher::new(config.max_datagram_size);
        Self::with_dispatcher(config, dispatcher)
    }

    pub fn with_dispatcher(config: NetworkConfig, dispatcher: Dispatcher) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);

        Self {
            config,
            dispatcher: Some(dispatcher),
            event_tx,
            event_rx: Some(event_rx),
            shutdown_tx: None,
            task: None,
            local_addr: None,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Take the event receiver (can only be called once)
    pub fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<ServerEvent>> {
        self.event_rx.take()
    }

    /// Bind a UDP socket and start serving
    pub async fn start(&mut self) -> ServerResult<SocketAddr> {
        if self.is_running().await {
            return Err(ServerError::AlreadyRunning);
        }

        let bind_addr = self.config.bind_addr();
        let socket = UdpSocket::bind(&bind_addr).await.map_err(|e| {
            ServerError::BindFailed(format!("Failed to bind to {}: {}", bind_addr, e))
        })?;

        self.start_with_transport(Arc::new(socket)).await
    }

    /// Start serving on an already bound transport
    pub async fn start_with_transport<T>(&mut self, transport: Arc<T>) -> ServerResult<SocketAddr>
    where
        T: Transport + 'static,
    {
        if self.is_running().await {
            return Err(ServerError::AlreadyRunning);
        }
        let dispatcher = self.dispatcher.take().ok_or(ServerError::AlreadyRunning)?;

        let local_addr = transport.local_addr()?;
        tracing::info!(
            "Receiving on {} with {} peers [{}]",
            local_addr,
            self.config.peers.len(),
            self.config.peers.join(",")
        );

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);
        self.local_addr = Some(local_addr);

        {
            let mut running = self.running.write().await;
            *running = true;
        }

        let _ = self.event_tx.try_send(ServerEvent::Started {
            bind_addr: local_addr,
        });

        let event_tx = self.event_tx.clone();
        let running = self.running.clone();

        self.task = Some(tokio::spawn(async move {
            let dispatcher = serve(transport, dispatcher, &event_tx, shutdown_rx).await;

            let mut running = running.write().await;
            *running = false;

            let _ = event_tx.try_send(ServerEvent::Stopped);
            dispatcher
        }));

        Ok(local_addr)
    }

    /// Stop the server and wait for the loop to exit
    pub async fn stop(&mut self) -> ServerResult<()> {
        if !self.is_running().await {
            return Err(ServerError::NotRunning);
        }

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }

        if let Some(task) = self.task.take() {
            match task.await {
                Ok(dispatcher) => self.dispatcher = Some(dispatcher),
                Err(e) => tracing::error!("Server task failed: {}", e),
            }
        }

        tracing::info!("Server stopped");
        Ok(())
    }

    /// Address the server is bound to, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// The dispatcher, available while the server is stopped
    pub fn dispatcher(&self) -> Option<&Dispatcher> {
        self.dispatcher.as_ref()
    }

    /// Check if the server is running
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}

/// Receive, dispatch and reply until a shutdown signal arrives.
///
/// Events are sent with `try_send` so a slow consumer never stalls the loop.
async fn serve<T>(
    transport: Arc<T>,
    mut dispatcher: Dispatcher,
    event_tx: &mpsc::Sender<ServerEvent>,
    mut shutdown_rx: mpsc::Receiver<()>,
) -> Dispatcher
where
    T: Transport + ?Sized,
{
    let max_size = dispatcher.max_datagram_size();
    // One spare byte to detect datagrams over the ceiling.
    let mut buf = vec![0u8; max_size + 1];

    loop {
        let received = tokio::select! {
            result = transport.recv_from(&mut buf) => result,
            _ = shutdown_rx.recv() => {
                tracing::info!("Server shutdown requested");
                break;
            }
        };

        let (len, addr) = match received {
            Ok(received) => received,
            Err(e) => {
                tracing::error!("Receive error: {}", e);
                let _ = event_tx.try_send(ServerEvent::Error {
                    message: e.to_string(),
                });
                continue;
            }
        };
        tracing::debug!("Received {} byte datagram from {}", len, addr);

        if len > max_size {
            let reason = format!("datagram exceeds {} bytes", max_size);
            tracing::warn!("Dropping datagram from {}: {}", addr, reason);
            let _ = event_tx.try_send(ServerEvent::DatagramDropped { addr, reason });
            continue;
        }

        let reply = match dispatcher.handle_datagram(&buf[..len]) {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!("Dropping datagram from {}: {}", addr, e);
                let _ = event_tx.try_send(ServerEvent::DatagramDropped {
                    addr,
                    reason: e.to_string(),
                });
                continue;
            }
        };

        tracing::debug!(
            "Responding to request id {} with {} bytes",
            reply.request_id,
            reply.datagram.len()
        );
        if let Err(e) = transport.send_to(&reply.datagram, addr).await {
            tracing::error!("Send to {} failed: {}", addr, e);
            let _ = event_tx.try_send(ServerEvent::Error {
                message: format!("Send to {} failed: {}", addr, e),
            });
            continue;
        }

        let _ = event_tx.try_send(ServerEvent::RequestHandled {
            addr,
            request_id: reply.request_id,
            op: reply.op,
            error: reply.error,
        });
    }

    dispatcher
}
