//! JSON wire protocol for the room relay.
//!
//! Every WebSocket text frame carries one adjacently tagged event:
//! ```text
//! { "event": "draw", "data": { "room": "4821", "stroke": { ... } } }
//! { "event": "leave" }
//! ```
//!
//! Field names are camelCase. Unit events (`leave`, `clear`, `videoPlay`,
//! `videoPause` on the server side) carry no `data`.
//!
//! Routing fields (`room`, `to`) are typed. Stroke objects are carried as
//! raw JSON and re-emitted with their fields, values and key order intact.
//! Undo snapshots, SDP and ICE candidates keep their browser shapes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Identifier of one live connection, assigned by the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Fresh random id (UUID v4 text).
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ConnectionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ConnectionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Room code. Opaque to the registry; only the client helpers know that
/// codes are usually four digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomCode(String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomCodeError {
    #[error("room code must be exactly 4 digits, got {0:?}")]
    NotFourDigits(String),
}

impl RoomCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// Random four-digit code in `1000..=9999`, as handed out by the
    /// "create room" button.
    pub fn generate() -> Self {
        let n = Uuid::new_v4().as_u128() % 9000 + 1000;
        Self(n.to_string())
    }

    /// Validate a code typed into the "join room" box.
    pub fn parse_join_code(input: &str) -> Result<Self, RoomCodeError> {
        let trimmed = input.trim();
        if trimmed.len() == 4 && trimmed.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(RoomCodeError::NotFourDigits(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the code is empty or whitespace only.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl From<&str> for RoomCode {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which page a room serves. Fixed by the first join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RoomKind {
    #[default]
    Draw,
    Movie,
    Screen,
}

impl fmt::Display for RoomKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Draw => f.write_str("draw"),
            Self::Movie => f.write_str("movie"),
            Self::Screen => f.write_str("screen"),
        }
    }
}

/// One pointer stroke as sent by the canvas page.
///
/// The relay never interprets strokes: any JSON object is accepted and
/// re-emitted with the same fields and values. The accessors read the
/// fields the canvas pages use (`x`, `y`, `lastX`, `lastY`, `color`,
/// `width`, `tool`); each returns `None` when the field is absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DrawStroke(Map<String, Value>);

impl DrawStroke {
    /// A segment from `last` to `to`.
    pub fn new(last: (f64, f64), to: (f64, f64), color: impl Into<String>, width: f64) -> Self {
        Self::default()
            .with("x", to.0)
            .with("y", to.1)
            .with("lastX", last.0)
            .with("lastY", last.1)
            .with("color", color.into())
            .with("width", width)
    }

    /// Set one field, replacing any previous value.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn x(&self) -> Option<f64> {
        self.number("x")
    }

    pub fn y(&self) -> Option<f64> {
        self.number("y")
    }

    pub fn last_x(&self) -> Option<f64> {
        self.number("lastX")
    }

    pub fn last_y(&self) -> Option<f64> {
        self.number("lastY")
    }

    pub fn color(&self) -> Option<&str> {
        self.0.get("color").and_then(Value::as_str)
    }

    /// Line width. Range inputs report it as a string, so numeric strings
    /// are read too.
    pub fn width(&self) -> Option<f64> {
        match self.0.get("width")? {
            Value::String(s) => s.trim().parse().ok(),
            other => other.as_f64(),
        }
    }

    pub fn tool(&self) -> Option<&str> {
        self.0.get("tool").and_then(Value::as_str)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    fn number(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(Value::as_f64)
    }
}

impl From<Map<String, Value>> for DrawStroke {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Canvas state to restore on undo (a PNG data URL).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UndoSnapshot {
    pub state: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// `RTCSessionDescriptionInit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpType,
    pub sdp: String,
}

/// `RTCIceCandidateInit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

fn default_display_name() -> String {
    "Anonymous".to_string()
}

/// Messages a client sends to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ClientMessage {
    Join {
        #[serde(default)]
        room: Option<RoomCode>,
        #[serde(default = "default_display_name")]
        display_name: String,
        #[serde(default)]
        kind: RoomKind,
    },
    Leave,
    ReadyForVoice {
        room: RoomCode,
    },
    Draw {
        room: RoomCode,
        stroke: DrawStroke,
    },
    Clear {
        room: RoomCode,
    },
    Undo {
        room: RoomCode,
        snapshot: UndoSnapshot,
    },
    VideoPlay {
        room: RoomCode,
    },
    VideoPause {
        room: RoomCode,
    },
    VideoSeek {
        room: RoomCode,
        time: f64,
    },
    StartBroadcast {
        room: RoomCode,
    },
    StopBroadcast {
        room: RoomCode,
    },
    SignalOffer {
        room: RoomCode,
        to: ConnectionId,
        sdp: SessionDescription,
    },
    SignalAnswer {
        room: RoomCode,
        to: ConnectionId,
        sdp: SessionDescription,
    },
    SignalIceCandidate {
        room: RoomCode,
        to: ConnectionId,
        candidate: IceCandidate,
    },
}

impl ClientMessage {
    pub fn join(room: RoomCode, display_name: impl Into<String>, kind: RoomKind) -> Self {
        Self::Join {
            room: Some(room),
            display_name: display_name.into(),
            kind,
        }
    }

    /// Wire name of the event, for logging.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Join { .. } => "join",
            Self::Leave => "leave",
            Self::ReadyForVoice { .. } => "readyForVoice",
            Self::Draw { .. } => "draw",
            Self::Clear { .. } => "clear",
            Self::Undo { .. } => "undo",
            Self::VideoPlay { .. } => "videoPlay",
            Self::VideoPause { .. } => "videoPause",
            Self::VideoSeek { .. } => "videoSeek",
            Self::StartBroadcast { .. } => "startBroadcast",
            Self::StopBroadcast { .. } => "stopBroadcast",
            Self::SignalOffer { .. } => "signalOffer",
            Self::SignalAnswer { .. } => "signalAnswer",
            Self::SignalIceCandidate { .. } => "signalIceCandidate",
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Decode)
    }
}

/// Stable error codes sent in `error` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCode {
    MissingRoomCode,
    RoomFull,
    RoomKindMismatch,
    BadMessage,
}

/// Messages the relay sends to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    Welcome {
        connection_id: ConnectionId,
    },
    MemberList {
        names: Vec<String>,
    },
    MemberJoined {
        display_name: String,
        connection_id: ConnectionId,
    },
    MemberLeft {
        display_name: String,
        connection_id: ConnectionId,
    },
    PeerReady {
        connection_id: ConnectionId,
    },
    VoicePeers {
        connection_ids: Vec<ConnectionId>,
    },
    Draw {
        stroke: DrawStroke,
    },
    Clear,
    Undo {
        snapshot: UndoSnapshot,
    },
    VideoPlay,
    VideoPause,
    VideoSeek {
        time: f64,
    },
    BroadcasterChanged {
        connection_id: Option<ConnectionId>,
    },
    SignalOffer {
        from: ConnectionId,
        sdp: SessionDescription,
    },
    SignalAnswer {
        from: ConnectionId,
        sdp: SessionDescription,
    },
    SignalIceCandidate {
        from: ConnectionId,
        candidate: IceCandidate,
    },
    Error {
        code: ErrorCode,
        message: String,
    },
}

impl ServerMessage {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Decode)
    }
}

/// Protocol and transport errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode message: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("websocket error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("not connected")]
    NotConnected,
    #[error("connection closed")]
    ConnectionClosed,
}
