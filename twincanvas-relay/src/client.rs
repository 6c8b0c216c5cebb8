//! WebSocket relay client.
//!
//! Provides:
//! - Connection lifecycle (connect, join, disconnect)
//! - Typed senders for canvas, playback, broadcaster and signaling events
//! - Inbound relay messages delivered as [`RelayEvent`]s
//! - Landing-page helpers: member badges and room codes
//!
//! One client holds exactly one connection and one room. The join is sent
//! as the first message after connecting.

use std::sync::Arc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;

use crate::protocol::{
    ClientMessage, ConnectionId, DrawStroke, IceCandidate, ProtocolError, RoomCode, RoomKind,
    ServerMessage, SessionDescription, UndoSnapshot,
};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the relay client.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    /// Connection established, join sent
    Connected,
    /// Connection lost or closed
    Disconnected,
    /// A message from the relay
    Message(ServerMessage),
}

/// Initial and color shown in the member bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberBadge {
    pub initial: char,
    /// HSL hue in `0..360`; saturation 70%, lightness 60%.
    pub hue: u16,
}

impl MemberBadge {
    pub fn for_name(name: &str) -> Self {
        let initial = name
            .chars()
            .next()
            .and_then(|c| c.to_uppercase().next())
            .unwrap_or('?');
        Self {
            initial,
            hue: name_hue(name),
        }
    }

    pub fn css_color(&self) -> String {
        format!("hsl({}, 70%, 60%)", self.hue)
    }
}

/// Stable hue for a display name, identical to the browser pages' string
/// hash so every client paints the same person the same color.
fn name_hue(name: &str) -> u16 {
    // The shift wraps to 32 bits but the subtraction does not, so the
    // accumulator needs more headroom than i32.
    let mut hash: i64 = 0;
    for unit in name.encode_utf16() {
        let shifted = (hash as i32).wrapping_shl(5) as i64;
        hash = unit as i64 + shifted - hash;
    }
    hash.rem_euclid(360) as u16
}

/// The relay client.
pub struct RelayClient {
    room: RoomCode,
    display_name: String,
    kind: RoomKind,

    /// Connection state
    state: Arc<RwLock<ConnectionState>>,

    /// Id assigned by the server in its `welcome` message
    connection_id: Arc<RwLock<Option<ConnectionId>>>,

    /// Channel to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<String>>,

    /// Event receiver for the application
    event_rx: Option<mpsc::Receiver<RelayEvent>>,

    /// Event sender (held by connection task)
    event_tx: mpsc::Sender<RelayEvent>,

    /// Server URL
    server_url: String,
}

impl RelayClient {
    pub fn new(
        server_url: impl Into<String>,
        room: RoomCode,
        display_name: impl Into<String>,
        kind: RoomKind,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            room,
            display_name: display_name.into(),
            kind,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            connection_id: Arc::new(RwLock::new(None)),
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
            server_url: server_url.into(),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<RelayEvent>> {
        self.event_rx.take()
    }

    /// Connect to the relay and join the room.
    ///
    /// Spawns background tasks for reading/writing WebSocket messages.
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;

        let ws_stream = match tokio_tungstenite::connect_async(&self.server_url).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(e.into());
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Writer task: forward outgoing channel to WebSocket, then close.
        let (out_tx, mut out_rx) = mpsc::channel::<String>(256);
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if ws_writer.send(Message::Text(text.into())).await.is_err() {
                    return;
                }
            }
            let _ = ws_writer.send(Message::Close(None)).await;
        });

        let join = ClientMessage::join(self.room.clone(), self.display_name.clone(), self.kind);
        out_tx
            .send(join.encode()?)
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)?;
        self.outgoing_tx = Some(out_tx);

        *self.state.write().await = ConnectionState::Connected;
        let _ = self.event_tx.send(RelayEvent::Connected).await;
        log::info!("Connected to {} as {} (room {})", self.server_url, self.display_name, self.room);

        // Reader task: decode relay messages into events.
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        let connection_id = self.connection_id.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => match ServerMessage::decode(text.as_str()) {
                        Ok(server_msg) => {
                            if let ServerMessage::Welcome { connection_id: id } = &server_msg {
                                *connection_id.write().await = Some(id.clone());
                            }
                            if event_tx.send(RelayEvent::Message(server_msg)).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => log::warn!("Undecodable relay message: {e}"),
                    },
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            *state.write().await = ConnectionState::Disconnected;
            let _ = event_tx.send(RelayEvent::Disconnected).await;
        });

        Ok(())
    }

    /// Send a raw client message.
    pub async fn send(&self, msg: ClientMessage) -> Result<(), ProtocolError> {
        if *self.state.read().await != ConnectionState::Connected {
            return Err(ProtocolError::NotConnected);
        }
        let Some(tx) = self.outgoing_tx.as_ref() else {
            return Err(ProtocolError::NotConnected);
        };
        let text = msg.encode()?;
        tx.send(text).await.map_err(|_| ProtocolError::ConnectionClosed)
    }

    pub async fn draw(&self, stroke: DrawStroke) -> Result<(), ProtocolError> {
        self.send(ClientMessage::Draw { room: self.room.clone(), stroke }).await
    }

    pub async fn clear(&self) -> Result<(), ProtocolError> {
        self.send(ClientMessage::Clear { room: self.room.clone() }).await
    }

    pub async fn undo(&self, snapshot: UndoSnapshot) -> Result<(), ProtocolError> {
        self.send(ClientMessage::Undo { room: self.room.clone(), snapshot }).await
    }

    pub async fn video_play(&self) -> Result<(), ProtocolError> {
        self.send(ClientMessage::VideoPlay { room: self.room.clone() }).await
    }

    pub async fn video_pause(&self) -> Result<(), ProtocolError> {
        self.send(ClientMessage::VideoPause { room: self.room.clone() }).await
    }

    pub async fn video_seek(&self, time: f64) -> Result<(), ProtocolError> {
        self.send(ClientMessage::VideoSeek { room: self.room.clone(), time }).await
    }

    pub async fn ready_for_voice(&self) -> Result<(), ProtocolError> {
        self.send(ClientMessage::ReadyForVoice { room: self.room.clone() }).await
    }

    pub async fn start_broadcast(&self) -> Result<(), ProtocolError> {
        self.send(ClientMessage::StartBroadcast { room: self.room.clone() }).await
    }

    pub async fn stop_broadcast(&self) -> Result<(), ProtocolError> {
        self.send(ClientMessage::StopBroadcast { room: self.room.clone() }).await
    }

    pub async fn send_offer(&self, to: ConnectionId, sdp: SessionDescription) -> Result<(), ProtocolError> {
        self.send(ClientMessage::SignalOffer { room: self.room.clone(), to, sdp }).await
    }

    pub async fn send_answer(&self, to: ConnectionId, sdp: SessionDescription) -> Result<(), ProtocolError> {
        self.send(ClientMessage::SignalAnswer { room: self.room.clone(), to, sdp }).await
    }

    pub async fn send_ice_candidate(
        &self,
        to: ConnectionId,
        candidate: IceCandidate,
    ) -> Result<(), ProtocolError> {
        self.send(ClientMessage::SignalIceCandidate { room: self.room.clone(), to, candidate })
            .await
    }

    /// Leave the room but keep the connection open.
    pub async fn leave(&self) -> Result<(), ProtocolError> {
        self.send(ClientMessage::Leave).await
    }

    /// Close the connection. The server treats this as leaving the room.
    pub async fn disconnect(&mut self) {
        self.outgoing_tx = None;
        *self.state.write().await = ConnectionState::Disconnected;
    }

    /// Get the current connection state.
    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// The id the server assigned, once its `welcome` has arrived.
    pub async fn connection_id(&self) -> Option<ConnectionId> {
        self.connection_id.read().await.clone()
    }

    pub fn room(&self) -> &RoomCode {
        &self.room
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn kind(&self) -> RoomKind {
        self.kind
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}
