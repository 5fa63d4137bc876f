//! WebSocket peer server.
//!
//! Architecture:
//! ```text
//! Peer A ──┐                          ┌── board actor (h:1:b) ── subscribers
//!          ├── PeerSession ── engine ─┤
//! Peer B ──┘  (one per conn)          └── board actor (h:1:c) ── subscribers
//! ```
//!
//! Each accepted connection becomes a [`PeerSession`] attached to the engine.
//! One task per connection pumps inbound frames into the session's handlers
//! and drains the session's outgoing queue onto the socket.

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::engine::ReplicationEngine;
use crate::error::CollabError;
use crate::protocol::Frame;
use crate::session::PeerSession;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Outgoing frames buffered per connection
    pub session_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8111".to_string(),
            session_capacity: 256,
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub frames_in: u64,
    pub frames_out: u64,
    pub bytes_in: u64,
}

/// Connection counters, shared with connection tasks.
#[derive(Debug, Default)]
pub struct ConnectionCounters {
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    frames_in: AtomicU64,
    frames_out: AtomicU64,
    bytes_in: AtomicU64,
}

impl ConnectionCounters {
    pub fn snapshot(&self) -> ServerStats {
        ServerStats {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            frames_in: self.frames_in.load(Ordering::Relaxed),
            frames_out: self.frames_out.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
        }
    }
}

/// Accepts peer connections and serves them from a [`ReplicationEngine`].
pub struct PeerServer {
    listener: TcpListener,
    engine: ReplicationEngine,
    config: ServerConfig,
    counters: Arc<ConnectionCounters>,
}

impl PeerServer {
    /// Bind the listener. Port 0 picks a free port; see [`local_addr`](Self::local_addr).
    pub async fn bind(config: ServerConfig, engine: ReplicationEngine) -> Result<Self, CollabError> {
        let listener = TcpListener::bind(&config.bind_addr)
            .await
            .map_err(|e| CollabError::Transport(format!("bind {}: {e}", config.bind_addr)))?;
        Ok(Self {
            listener,
            engine,
            config,
            counters: Arc::new(ConnectionCounters::default()),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, CollabError> {
        self.listener
            .local_addr()
            .map_err(|e| CollabError::Transport(e.to_string()))
    }

    pub fn stats(&self) -> ServerStats {
        self.counters.snapshot()
    }

    /// Shared counters, readable after `run` has taken the server.
    pub fn counters(&self) -> Arc<ConnectionCounters> {
        self.counters.clone()
    }

    /// Accept connections until the listener fails.
    pub async fn run(self) -> Result<(), CollabError> {
        log::info!("Peer server listening on {}", self.local_addr()?);
        loop {
            let (stream, addr) = self
                .listener
                .accept()
                .await
                .map_err(|e| CollabError::Transport(format!("accept: {e}")))?;
            log::debug!("New TCP connection from {addr}");

            let engine = self.engine.clone();
            let counters = self.counters.clone();
            let capacity = self.config.session_capacity;
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, engine, capacity, counters).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        engine: ReplicationEngine,
        capacity: usize,
        counters: Arc<ConnectionCounters>,
    ) -> Result<(), CollabError> {
        let ws = tokio_tungstenite::accept_async(stream)
            .await
            .map_err(|e| CollabError::Transport(format!("handshake with {addr}: {e}")))?;
        log::info!("WebSocket connection established from {addr}");

        counters.total_connections.fetch_add(1, Ordering::Relaxed);
        counters.active_connections.fetch_add(1, Ordering::Relaxed);

        let (session, outgoing) = PeerSession::new(addr.to_string(), capacity);
        engine.attach(&session);
        drive_connection(ws, session, outgoing, Some(counters.clone())).await;

        counters.active_connections.fetch_sub(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Pump one WebSocket: inbound binary frames go to the session's handlers,
/// queued outgoing frames go to the socket. Returns when either side closes;
/// the session is closed before returning.
pub(crate) async fn drive_connection<S>(
    ws: WebSocketStream<S>,
    session: PeerSession,
    mut outgoing: mpsc::Receiver<Frame>,
    counters: Option<Arc<ConnectionCounters>>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut ws_sender, mut ws_receiver) = ws.split();
    let remote = session.remote().to_string();

    loop {
        tokio::select! {
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        let bytes: Vec<u8> = data.into();
                        if let Some(c) = &counters {
                            c.frames_in.fetch_add(1, Ordering::Relaxed);
                            c.bytes_in.fetch_add(bytes.len() as u64, Ordering::Relaxed);
                        }
                        match Frame::decode(&bytes) {
                            Ok(frame) => session.dispatch(frame).await,
                            Err(e) => log::warn!("Failed to decode frame from {remote}: {e}"),
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if ws_sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        log::info!("Connection closed from {remote}");
                        break;
                    }
                    Some(Err(e)) => {
                        log::error!("WebSocket error from {remote}: {e}");
                        break;
                    }
                    _ => {}
                }
            }

            frame = outgoing.recv() => {
                let Some(frame) = frame else {
                    // Closed locally.
                    let _ = ws_sender.send(Message::Close(None)).await;
                    break;
                };
                match frame.encode() {
                    Ok(encoded) => {
                        if let Err(e) = ws_sender.send(Message::Binary(encoded.into())).await {
                            log::warn!("Send to {remote} failed: {e}");
                            break;
                        }
                        if let Some(c) = &counters {
                            c.frames_out.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    Err(e) => log::error!("Dropping frame for {remote}: {e}"),
                }
            }
        }
    }

    session.close().await;
}
