//! Room registry: the authoritative room code → members map.
//!
//! The registry is a plain synchronous struct. The server keeps it behind a
//! single lock and every handler runs to completion while holding it, so
//! membership changes and fan-out from one inbound message are never
//! interleaved with another message's. Outbound frames are enqueued on
//! bounded outboxes with `try_send` and never awaited.
//!
//! ```text
//! join ──► rooms[code].members.push(member) ──► memberList (caller)
//!                                            └─► memberJoined (others)
//! draw/clear/undo/video* ──► every member except the sender
//! signal* ──► exactly the `to` member, tagged with `from`
//! disconnect ──► memberLeft (others), room removed when empty
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{ControlPolicy, ServerConfig};
use crate::protocol::{
    ClientMessage, ConnectionId, ErrorCode, RoomCode, RoomKind, ServerMessage,
};
use crate::room::{AtomicRelayStats, Delivery, Frame, Member, Outbox, RelayStats, Room};

/// Reasons a join is refused. A refused join changes nothing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JoinError {
    #[error("join requires a room code")]
    MissingRoomCode,
    #[error("room {0} is full")]
    RoomFull(RoomCode),
    #[error("room {room} is a {existing} room, cannot join as {requested}")]
    KindMismatch {
        room: RoomCode,
        existing: RoomKind,
        requested: RoomKind,
    },
}

impl JoinError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::MissingRoomCode => ErrorCode::MissingRoomCode,
            Self::RoomFull(_) => ErrorCode::RoomFull,
            Self::KindMismatch { .. } => ErrorCode::RoomKindMismatch,
        }
    }

    /// The `error` event sent back to the caller.
    pub fn to_message(&self) -> ServerMessage {
        ServerMessage::error(self.code(), self.to_string())
    }
}

/// What happened when a connection left its room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub room: RoomCode,
    pub display_name: String,
    /// The room was empty afterwards and has been removed.
    pub room_closed: bool,
}

pub struct RoomRegistry {
    rooms: HashMap<RoomCode, Room>,
    /// Which room each connection is in.
    memberships: HashMap<ConnectionId, RoomCode>,
    max_members_per_room: usize,
    control_policy: ControlPolicy,
    stats: Arc<AtomicRelayStats>,
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::from_config(&ServerConfig::default())
    }
}

fn encode(msg: &ServerMessage) -> Option<Frame> {
    match msg.encode() {
        Ok(text) => Some(Arc::from(text)),
        Err(e) => {
            log::error!("Dropping unencodable message: {e}");
            None
        }
    }
}

impl RoomRegistry {
    pub fn new(max_members_per_room: usize, control_policy: ControlPolicy) -> Self {
        Self {
            rooms: HashMap::new(),
            memberships: HashMap::new(),
            max_members_per_room,
            control_policy,
            stats: Arc::new(AtomicRelayStats::default()),
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.max_members_per_room, config.control_policy)
    }

    fn record(&self, delivery: Delivery) {
        self.stats.record_relayed(delivery.delivered as u64);
        self.stats.record_dropped(delivery.dropped as u64);
    }

    /// The room named by `code`, if `caller` is one of its members.
    fn member_room<'a>(
        rooms: &'a HashMap<RoomCode, Room>,
        caller: &ConnectionId,
        code: &RoomCode,
    ) -> Option<&'a Room> {
        match rooms.get(code) {
            Some(room) if room.contains(caller) => Some(room),
            Some(_) => {
                log::debug!("Ignoring message from {caller} for room {code} it has not joined");
                None
            }
            None => {
                log::debug!("Ignoring message from {caller} for unknown room {code}");
                None
            }
        }
    }

    fn member_room_mut<'a>(
        rooms: &'a mut HashMap<RoomCode, Room>,
        caller: &ConnectionId,
        code: &RoomCode,
    ) -> Option<&'a mut Room> {
        match rooms.get_mut(code) {
            Some(room) if room.contains(caller) => Some(room),
            _ => {
                log::debug!("Ignoring message from {caller} for room {code}: not a member");
                None
            }
        }
    }

    /// Add `caller` to the room `room`, creating it if needed.
    ///
    /// The caller receives the full member list; everyone else receives
    /// `memberJoined`. A connection already in a room leaves it first.
    pub fn join(
        &mut self,
        caller: &ConnectionId,
        outbox: Outbox,
        room: Option<RoomCode>,
        display_name: String,
        kind: RoomKind,
    ) -> Result<(), JoinError> {
        let code = match room {
            Some(code) if !code.is_blank() => code,
            _ => return Err(JoinError::MissingRoomCode),
        };

        if let Some(existing) = self.rooms.get(&code) {
            // The caller's own membership is dropped by the implicit leave
            // below, so a room holding only the caller counts as absent.
            let others = existing
                .members()
                .iter()
                .filter(|m| &m.connection_id != caller)
                .count();
            if others > 0 && existing.kind() != kind {
                return Err(JoinError::KindMismatch {
                    room: code,
                    existing: existing.kind(),
                    requested: kind,
                });
            }
            if others >= self.max_members_per_room {
                return Err(JoinError::RoomFull(code));
            }
        } else if self.max_members_per_room == 0 {
            return Err(JoinError::RoomFull(code));
        }

        if self.memberships.contains_key(caller) {
            self.leave(caller);
        }

        let room = self.rooms.entry(code.clone()).or_insert_with(|| {
            log::info!("Room {code} created ({kind})");
            Room::new(code.clone(), kind)
        });
        room.add_member(Member::new(caller.clone(), display_name.clone(), outbox));
        self.memberships.insert(caller.clone(), code.clone());

        let mut delivery = Delivery::default();
        if let Some(frame) = encode(&ServerMessage::MemberList { names: room.names() }) {
            match room.send_to(caller, frame) {
                Some(true) => delivery.delivered += 1,
                _ => delivery.dropped += 1,
            }
        }
        let joined = ServerMessage::MemberJoined {
            display_name: display_name.clone(),
            connection_id: caller.clone(),
        };
        if let Some(frame) = encode(&joined) {
            let fanout = room.broadcast(&frame, Some(caller));
            delivery.delivered += fanout.delivered;
            delivery.dropped += fanout.dropped;
        }
        let members = room.len();
        self.record(delivery);

        log::info!("{display_name} ({caller}) joined room {code} [{members} member(s)]");
        Ok(())
    }

    /// Remove `caller` from whatever room it is in. Used for both explicit
    /// `leave` and disconnects; a connection that never joined is a no-op.
    pub fn leave(&mut self, caller: &ConnectionId) -> Option<Departure> {
        let code = self.memberships.remove(caller)?;
        let room = self.rooms.get_mut(&code)?;
        let was_broadcaster = room.broadcaster() == Some(caller);
        let member = room.remove_member(caller)?;

        if room.is_empty() {
            self.rooms.remove(&code);
            log::info!("{} ({caller}) left room {code}; room removed (empty)", member.display_name);
            return Some(Departure {
                room: code,
                display_name: member.display_name,
                room_closed: true,
            });
        }

        let mut delivery = Delivery::default();
        let left = ServerMessage::MemberLeft {
            display_name: member.display_name.clone(),
            connection_id: caller.clone(),
        };
        if let Some(frame) = encode(&left) {
            delivery = room.broadcast(&frame, None);
        }
        if was_broadcaster {
            if let Some(frame) = encode(&ServerMessage::BroadcasterChanged { connection_id: None }) {
                let fanout = room.broadcast(&frame, None);
                delivery.delivered += fanout.delivered;
                delivery.dropped += fanout.dropped;
            }
        }
        let remaining = room.len();
        self.record(delivery);

        log::info!(
            "{} ({caller}) left room {code} [{remaining} member(s) remain]",
            member.display_name
        );
        Some(Departure {
            room: code,
            display_name: member.display_name,
            room_closed: false,
        })
    }

    /// Mark `caller` ready to receive media offers.
    ///
    /// Others get `peerReady(caller)`; the caller gets the ids of members
    /// that were already voice-ready so it can offer to them.
    pub fn ready_for_voice(&mut self, caller: &ConnectionId, room: &RoomCode) -> bool {
        let Some(room) = Self::member_room_mut(&mut self.rooms, caller, room) else {
            return false;
        };
        if let Some(member) = room.member_mut(caller) {
            member.voice_ready = true;
        }

        let mut delivery = Delivery::default();
        if let Some(frame) = encode(&ServerMessage::PeerReady { connection_id: caller.clone() }) {
            delivery = room.broadcast(&frame, Some(caller));
        }
        let peers = ServerMessage::VoicePeers {
            connection_ids: room.voice_ready_peers(caller),
        };
        if let Some(frame) = encode(&peers) {
            match room.send_to(caller, frame) {
                Some(true) => delivery.delivered += 1,
                _ => delivery.dropped += 1,
            }
        }
        log::debug!("{caller} is voice-ready in room {}", room.code());
        self.record(delivery);
        true
    }

    /// Forward `msg` to every member of `room` except the sender.
    /// Returns the number of members it was delivered to.
    pub fn relay_to_room(&self, caller: &ConnectionId, room: &RoomCode, msg: &ServerMessage) -> usize {
        let Some(room) = Self::member_room(&self.rooms, caller, room) else {
            return 0;
        };
        let Some(frame) = encode(msg) else {
            return 0;
        };
        let delivery = room.broadcast(&frame, Some(caller));
        log::trace!(
            "Relayed from {caller} to {} member(s) of room {}",
            delivery.delivered,
            room.code()
        );
        self.record(delivery);
        delivery.delivered
    }

    /// Forward a playback control, subject to the control policy.
    pub fn relay_video_control(
        &self,
        caller: &ConnectionId,
        room: &RoomCode,
        msg: &ServerMessage,
    ) -> usize {
        let Some(r) = Self::member_room(&self.rooms, caller, room) else {
            return 0;
        };
        if self.control_policy == ControlPolicy::BroadcasterOnly
            && r.kind() != RoomKind::Draw
            && r.broadcaster() != Some(caller)
        {
            log::debug!("Refusing playback control from non-broadcaster {caller} in room {room}");
            self.stats.record_dropped(1);
            return 0;
        }
        self.relay_to_room(caller, room, msg)
    }

    /// Forward `msg` to exactly `target`. Stale targets are dropped silently.
    pub fn relay_to_peer(
        &self,
        caller: &ConnectionId,
        room: &RoomCode,
        target: &ConnectionId,
        msg: &ServerMessage,
    ) -> bool {
        let Some(room) = Self::member_room(&self.rooms, caller, room) else {
            return false;
        };
        let Some(frame) = encode(msg) else {
            return false;
        };
        match room.send_to(target, frame) {
            Some(true) => {
                log::trace!("Relayed signal {caller} -> {target} in room {}", room.code());
                self.stats.record_relayed(1);
                true
            }
            Some(false) => {
                log::debug!("Signal target {target} is closing; dropped");
                self.stats.record_dropped(1);
                false
            }
            None => {
                log::debug!("Signal target {target} not in room {}; dropped", room.code());
                self.stats.record_dropped(1);
                false
            }
        }
    }

    /// Make `caller` the room's broadcaster, replacing any previous one.
    /// Draw rooms have no broadcaster.
    pub fn start_broadcast(&mut self, caller: &ConnectionId, room: &RoomCode) -> bool {
        let Some(room) = Self::member_room_mut(&mut self.rooms, caller, room) else {
            return false;
        };
        if room.kind() == RoomKind::Draw {
            log::debug!("Ignoring startBroadcast from {caller} in draw room {}", room.code());
            return false;
        }
        room.set_broadcaster(Some(caller.clone()));
        let mut delivery = Delivery::default();
        let changed = ServerMessage::BroadcasterChanged {
            connection_id: Some(caller.clone()),
        };
        if let Some(frame) = encode(&changed) {
            delivery = room.broadcast(&frame, None);
        }
        log::info!("{caller} is now broadcasting in room {}", room.code());
        self.record(delivery);
        true
    }

    /// Clear the broadcaster if it is `caller`.
    pub fn stop_broadcast(&mut self, caller: &ConnectionId, room: &RoomCode) -> bool {
        let Some(room) = Self::member_room_mut(&mut self.rooms, caller, room) else {
            return false;
        };
        if room.broadcaster() != Some(caller) {
            return false;
        }
        room.set_broadcaster(None);
        let mut delivery = Delivery::default();
        if let Some(frame) = encode(&ServerMessage::BroadcasterChanged { connection_id: None }) {
            delivery = room.broadcast(&frame, None);
        }
        log::info!("{caller} stopped broadcasting in room {}", room.code());
        self.record(delivery);
        true
    }

    /// Route one decoded client message. Only `join` can fail; everything
    /// else is either forwarded or silently dropped.
    pub fn handle_message(
        &mut self,
        caller: &ConnectionId,
        outbox: &Outbox,
        msg: ClientMessage,
    ) -> Result<(), JoinError> {
        match msg {
            ClientMessage::Join { room, display_name, kind } => {
                return self.join(caller, outbox.clone(), room, display_name, kind);
            }
            ClientMessage::Leave => {
                self.leave(caller);
            }
            ClientMessage::ReadyForVoice { room } => {
                self.ready_for_voice(caller, &room);
            }
            ClientMessage::Draw { room, stroke } => {
                self.relay_to_room(caller, &room, &ServerMessage::Draw { stroke });
            }
            ClientMessage::Clear { room } => {
                self.relay_to_room(caller, &room, &ServerMessage::Clear);
            }
            ClientMessage::Undo { room, snapshot } => {
                self.relay_to_room(caller, &room, &ServerMessage::Undo { snapshot });
            }
            ClientMessage::VideoPlay { room } => {
                self.relay_video_control(caller, &room, &ServerMessage::VideoPlay);
            }
            ClientMessage::VideoPause { room } => {
                self.relay_video_control(caller, &room, &ServerMessage::VideoPause);
            }
            ClientMessage::VideoSeek { room, time } => {
                self.relay_video_control(caller, &room, &ServerMessage::VideoSeek { time });
            }
            ClientMessage::StartBroadcast { room } => {
                self.start_broadcast(caller, &room);
            }
            ClientMessage::StopBroadcast { room } => {
                self.stop_broadcast(caller, &room);
            }
            ClientMessage::SignalOffer { room, to, sdp } => {
                let msg = ServerMessage::SignalOffer { from: caller.clone(), sdp };
                self.relay_to_peer(caller, &room, &to, &msg);
            }
            ClientMessage::SignalAnswer { room, to, sdp } => {
                let msg = ServerMessage::SignalAnswer { from: caller.clone(), sdp };
                self.relay_to_peer(caller, &room, &to, &msg);
            }
            ClientMessage::SignalIceCandidate { room, to, candidate } => {
                let msg = ServerMessage::SignalIceCandidate { from: caller.clone(), candidate };
                self.relay_to_peer(caller, &room, &to, &msg);
            }
        }
        Ok(())
    }

    pub fn room(&self, code: &RoomCode) -> Option<&Room> {
        self.rooms.get(code)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// The room `connection` is currently in.
    pub fn room_of(&self, connection: &ConnectionId) -> Option<&RoomCode> {
        self.memberships.get(connection)
    }

    pub fn member_names(&self, code: &RoomCode) -> Option<Vec<String>> {
        self.rooms.get(code).map(Room::names)
    }

    pub fn active_rooms(&self) -> Vec<RoomCode> {
        self.rooms.keys().cloned().collect()
    }

    pub fn control_policy(&self) -> ControlPolicy {
        self.control_policy
    }

    pub fn stats(&self) -> RelayStats {
        self.stats.snapshot()
    }

    /// Shared counters, readable without the registry lock.
    pub fn stats_handle(&self) -> Arc<AtomicRelayStats> {
        Arc::clone(&self.stats)
    }
}
