//! # twincanvas-relay: Room-scoped WebSocket relay for TwinCanvas
//!
//! Lets small groups share a drawing canvas, synchronize video playback and
//! bootstrap peer-to-peer voice/screen sessions. The relay keeps no canvas
//! or media state: it tracks who is in which room and forwards messages.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket      ┌──────────────┐
//! │ RelayClient │ ◄─────────────────► │ RelayServer  │
//! │ (per tab)   │   JSON text frames  │ (central)    │
//! └─────────────┘                     └──────┬───────┘
//!                                            │
//!                                    ┌───────┴───────┐
//!                                    │ RoomRegistry  │
//!                                    │ rooms/members │
//!                                    └───────┬───────┘
//!                                            │
//!                                    ┌───────┴───────┐
//!                                    │ Room          │
//!                                    │ (fan-out)     │
//!                                    └───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: JSON wire protocol (`{"event": ..., "data": ...}`)
//! - [`room`]: Room membership and per-member outboxes
//! - [`registry`]: Join/leave, relay routing, broadcaster tracking
//! - [`server`]: WebSocket relay server
//! - [`client`]: WebSocket relay client and member badges
//! - [`config`]: Environment-driven server configuration

pub mod protocol;
pub mod room;
pub mod registry;
pub mod server;
pub mod client;
pub mod config;

// Re-exports for convenience
pub use protocol::{
    ClientMessage, ConnectionId, DrawStroke, ErrorCode, IceCandidate, ProtocolError,
    RoomCode, RoomCodeError, RoomKind, SdpType, ServerMessage, SessionDescription,
    UndoSnapshot,
};
pub use room::{Delivery, Frame, Member, Outbox, RelayStats, Room};
pub use registry::{Departure, JoinError, RoomRegistry};
pub use server::{RelayServer, ServerStats};
pub use client::{ConnectionState, MemberBadge, RelayClient, RelayEvent};
pub use config::{ConfigError, ControlPolicy, ServerConfig};
