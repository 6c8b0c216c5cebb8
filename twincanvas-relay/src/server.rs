//! WebSocket relay server.
//!
//! Architecture:
//! ```text
//! Client A ──┐                                   ┌──► outbox A ──► Client A
//!             ├── connection task ── RoomRegistry ┤
//! Client B ──┘   (decode, route)    (one lock)    └──► outbox B ──► Client B
//! ```
//!
//! Each connection task owns its socket. Inbound text frames are decoded
//! and routed through the registry while holding its write lock; outbound
//! frames arrive on the connection's bounded outbox and are written in FIFO
//! order. A peer that stops reading fills its outbox (further frames are
//! dropped) and, once a write stalls past the idle timeout, is closed.
//! Disconnects, transport errors and idle timeouts all end in the same
//! cleanup path, which removes the member from its room.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;

use crate::config::ServerConfig;
use crate::protocol::{ClientMessage, ConnectionId, ErrorCode, ProtocolError, ServerMessage};
use crate::registry::RoomRegistry;
use crate::room::{Frame, Outbox, RelayStats};

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub active_rooms: usize,
    pub relay: RelayStats,
}

/// The relay server.
pub struct RelayServer {
    config: ServerConfig,
    registry: Arc<RwLock<RoomRegistry>>,
    stats: Arc<RwLock<ServerStats>>,
}

/// Queue a reply for this connection. A full outbox drops the reply.
fn enqueue(outbox: &Outbox, msg: &ServerMessage) -> Result<(), ProtocolError> {
    let text = msg.encode()?;
    match outbox.try_send(Frame::from(text)) {
        Ok(()) => Ok(()),
        Err(TrySendError::Full(_)) => {
            log::warn!("Outbox full; dropping {msg:?}");
            Ok(())
        }
        Err(TrySendError::Closed(_)) => Err(ProtocolError::ConnectionClosed),
    }
}

impl RelayServer {
    pub fn new(config: ServerConfig) -> Self {
        let registry = RoomRegistry::from_config(&config);
        Self {
            config,
            registry: Arc::new(RwLock::new(registry)),
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("TwinCanvas relay listening on {}", self.config.bind_addr);
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        log::info!(
            "Serving on {} (max {} members/room, control policy {:?})",
            listener.local_addr()?,
            self.config.max_members_per_room,
            self.config.control_policy
        );

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let registry = self.registry.clone();
            let stats = self.stats.clone();
            let config = self.config.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, registry, stats, config).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle one WebSocket connection from handshake to cleanup.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        registry: Arc<RwLock<RoomRegistry>>,
        stats: Arc<RwLock<ServerStats>>,
        config: ServerConfig,
    ) -> Result<(), ProtocolError> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let connection_id = ConnectionId::generate();
        log::info!("WebSocket connection {connection_id} established from {addr}");

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let result =
            Self::pump(ws_stream, &connection_id, &registry, &stats, &config).await;

        // Cleanup runs for every exit path, including transport errors.
        let room_count = {
            let mut reg = registry.write().await;
            if let Some(departure) = reg.leave(&connection_id) {
                log::debug!(
                    "{} ({connection_id}) removed from room {} on disconnect",
                    departure.display_name,
                    departure.room
                );
            }
            reg.room_count()
        };
        {
            let mut s = stats.write().await;
            s.active_connections = s.active_connections.saturating_sub(1);
            s.active_rooms = room_count;
        }
        log::info!("Connection {connection_id} from {addr} closed");

        result
    }

    /// Shuttle frames between the socket, the registry and the outbox.
    async fn pump(
        ws_stream: tokio_tungstenite::WebSocketStream<TcpStream>,
        connection_id: &ConnectionId,
        registry: &Arc<RwLock<RoomRegistry>>,
        stats: &Arc<RwLock<ServerStats>>,
        config: &ServerConfig,
    ) -> Result<(), ProtocolError> {
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (outbox, mut outbox_rx) = mpsc::channel::<Frame>(config.outbox_capacity.max(1));

        enqueue(&outbox, &ServerMessage::Welcome { connection_id: connection_id.clone() })?;

        let mut heartbeat = (config.heartbeat_interval_secs > 0).then(|| {
            let period = Duration::from_secs(config.heartbeat_interval_secs);
            tokio::time::interval_at(tokio::time::Instant::now() + period, period)
        });
        let idle_timeout =
            (config.idle_timeout_secs > 0).then(|| Duration::from_secs(config.idle_timeout_secs));
        let mut last_seen = Instant::now();

        loop {
            tokio::select! {
                // Incoming WebSocket message
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            last_seen = Instant::now();
                            {
                                let mut s = stats.write().await;
                                s.total_messages += 1;
                                s.total_bytes += text.len() as u64;
                            }

                            match ClientMessage::decode(text.as_str()) {
                                Ok(client_msg) => {
                                    log::debug!("{connection_id} sent {}", client_msg.event_name());
                                    let (result, room_count) = {
                                        let mut reg = registry.write().await;
                                        let result = reg.handle_message(connection_id, &outbox, client_msg);
                                        (result, reg.room_count())
                                    };
                                    stats.write().await.active_rooms = room_count;
                                    if let Err(e) = result {
                                        log::warn!("Join refused for {connection_id}: {e}");
                                        enqueue(&outbox, &e.to_message())?;
                                    }
                                }
                                Err(e) => {
                                    log::warn!("Malformed message from {connection_id}: {e}");
                                    enqueue(&outbox, &ServerMessage::error(ErrorCode::BadMessage, e.to_string()))?;
                                }
                            }
                        }

                        Some(Ok(Message::Binary(_))) => {
                            last_seen = Instant::now();
                            log::warn!("Binary frame from {connection_id} ignored");
                            enqueue(
                                &outbox,
                                &ServerMessage::error(ErrorCode::BadMessage, "binary frames are not supported"),
                            )?;
                        }

                        Some(Ok(Message::Ping(data))) => {
                            last_seen = Instant::now();
                            ws_sender.send(Message::Pong(data)).await?;
                        }

                        Some(Ok(Message::Pong(_))) => {
                            last_seen = Instant::now();
                        }

                        Some(Ok(Message::Close(_))) | None => {
                            log::debug!("Connection {connection_id} closed by peer");
                            break;
                        }

                        Some(Ok(Message::Frame(_))) => {}

                        Some(Err(e)) => {
                            log::error!("WebSocket error on {connection_id}: {e}");
                            break;
                        }
                    }
                }

                // Outgoing frame queued by the registry
                Some(frame) = outbox_rx.recv() => {
                    let write = ws_sender.send(Message::Text(frame.to_string().into()));
                    match idle_timeout {
                        Some(limit) => match tokio::time::timeout(limit, write).await {
                            Ok(result) => result?,
                            Err(_) => {
                                log::info!("Connection {connection_id} stalled writing for {limit:?}; closing");
                                break;
                            }
                        },
                        None => write.await?,
                    }
                }

                // Heartbeat
                _ = async {
                    match heartbeat.as_mut() {
                        Some(ticker) => {
                            ticker.tick().await;
                        }
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    if let Some(limit) = idle_timeout {
                        if last_seen.elapsed() >= limit {
                            log::info!("Connection {connection_id} idle for {limit:?}; closing");
                            let _ = ws_sender.send(Message::Close(None)).await;
                            break;
                        }
                    }
                    ws_sender.send(Message::Ping(Vec::new().into())).await?;
                }
            }
        }

        Ok(())
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        let mut stats = self.stats.read().await.clone();
        let reg = self.registry.read().await;
        stats.active_rooms = reg.room_count();
        stats.relay = reg.stats();
        stats
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Shared handle to the room registry.
    pub fn registry(&self) -> &Arc<RwLock<RoomRegistry>> {
        &self.registry
    }
}
