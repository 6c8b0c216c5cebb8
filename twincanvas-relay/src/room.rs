//! Room membership and fan-out.
//!
//! Each member owns a bounded outbox drained by its connection task.
//! Enqueueing uses `try_send`, so it never awaits and never blocks the
//! registry; a frame for a member whose queue is full is dropped. Frames are
//! encoded once per relay and shared between outboxes as `Arc<str>`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::protocol::{ConnectionId, RoomCode, RoomKind};

/// Pre-encoded outbound frame.
pub type Frame = Arc<str>;

/// Sending half of a member's outbound queue.
pub type Outbox = mpsc::Sender<Frame>;

/// Snapshot of relay counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Frames handed to a live outbox.
    pub messages_relayed: u64,
    /// Frames not delivered: full or closed outbox, stale target, policy
    /// refusal.
    pub messages_dropped: u64,
}

/// Relay counters, updated with atomics so they can be read without taking
/// the registry lock.
#[derive(Debug, Default)]
pub struct AtomicRelayStats {
    messages_relayed: AtomicU64,
    messages_dropped: AtomicU64,
}

impl AtomicRelayStats {
    pub fn record_relayed(&self, n: u64) {
        self.messages_relayed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_dropped(&self, n: u64) {
        self.messages_dropped.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RelayStats {
        RelayStats {
            messages_relayed: self.messages_relayed.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
        }
    }
}

/// One connection's membership record.
#[derive(Debug)]
pub struct Member {
    pub connection_id: ConnectionId,
    pub display_name: String,
    pub voice_ready: bool,
    outbox: Outbox,
}

impl Member {
    pub fn new(connection_id: ConnectionId, display_name: impl Into<String>, outbox: Outbox) -> Self {
        Self {
            connection_id,
            display_name: display_name.into(),
            voice_ready: false,
            outbox,
        }
    }

    /// Enqueue a frame. Returns false if the connection has already gone
    /// or is not draining its queue.
    pub fn send(&self, frame: Frame) -> bool {
        match self.outbox.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::warn!("Outbox of {} is full; frame dropped", self.connection_id);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

/// Outcome of a fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub dropped: usize,
}

/// A code-addressed group of members, kept in join order.
#[derive(Debug)]
pub struct Room {
    code: RoomCode,
    kind: RoomKind,
    members: Vec<Member>,
    broadcaster: Option<ConnectionId>,
}

impl Room {
    pub fn new(code: RoomCode, kind: RoomKind) -> Self {
        Self {
            code,
            kind,
            members: Vec::new(),
            broadcaster: None,
        }
    }

    pub fn code(&self) -> &RoomCode {
        &self.code
    }

    pub fn kind(&self) -> RoomKind {
        self.kind
    }

    /// Append a member. Refuses a second entry with the same connection id.
    pub fn add_member(&mut self, member: Member) -> bool {
        if self.contains(&member.connection_id) {
            return false;
        }
        self.members.push(member);
        true
    }

    /// Remove a member, keeping the others in join order.
    pub fn remove_member(&mut self, connection_id: &ConnectionId) -> Option<Member> {
        let idx = self
            .members
            .iter()
            .position(|m| &m.connection_id == connection_id)?;
        if self.broadcaster.as_ref() == Some(connection_id) {
            self.broadcaster = None;
        }
        Some(self.members.remove(idx))
    }

    pub fn member(&self, connection_id: &ConnectionId) -> Option<&Member> {
        self.members.iter().find(|m| &m.connection_id == connection_id)
    }

    pub fn member_mut(&mut self, connection_id: &ConnectionId) -> Option<&mut Member> {
        self.members.iter_mut().find(|m| &m.connection_id == connection_id)
    }

    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.member(connection_id).is_some()
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Display names in join order.
    pub fn names(&self) -> Vec<String> {
        self.members.iter().map(|m| m.display_name.clone()).collect()
    }

    /// Voice-ready members other than `except`, in join order.
    pub fn voice_ready_peers(&self, except: &ConnectionId) -> Vec<ConnectionId> {
        self.members
            .iter()
            .filter(|m| m.voice_ready && &m.connection_id != except)
            .map(|m| m.connection_id.clone())
            .collect()
    }

    pub fn broadcaster(&self) -> Option<&ConnectionId> {
        self.broadcaster.as_ref()
    }

    pub fn set_broadcaster(&mut self, broadcaster: Option<ConnectionId>) {
        self.broadcaster = broadcaster;
    }

    /// Send a frame to every member except `except`.
    pub fn broadcast(&self, frame: &Frame, except: Option<&ConnectionId>) -> Delivery {
        let mut delivery = Delivery::default();
        for member in &self.members {
            if Some(&member.connection_id) == except {
                continue;
            }
            if member.send(frame.clone()) {
                delivery.delivered += 1;
            } else {
                delivery.dropped += 1;
            }
        }
        delivery
    }

    /// Send a frame to exactly one member. `None` if the target is not here.
    pub fn send_to(&self, target: &ConnectionId, frame: Frame) -> Option<bool> {
        self.member(target).map(|m| m.send(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::Receiver;

    fn member(id: &str, name: &str) -> (Member, Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(8);
        (Member::new(ConnectionId::from(id), name, tx), rx)
    }

    fn frame(text: &str) -> Frame {
        Arc::from(text)
    }

    #[test]
    fn test_room_add_remove() {
        let mut room = Room::new(RoomCode::from("4821"), RoomKind::Draw);
        let (alice, _rx) = member("a", "Alice");

        assert!(room.add_member(alice));
        assert_eq!(room.len(), 1);
        assert!(room.contains(&ConnectionId::from("a")));

        let removed = room.remove_member(&ConnectionId::from("a")).unwrap();
        assert_eq!(removed.display_name, "Alice");
        assert!(room.is_empty());
        assert!(room.remove_member(&ConnectionId::from("a")).is_none());
    }

    #[test]
    fn test_room_rejects_duplicate_connection() {
        let mut room = Room::new(RoomCode::from("4821"), RoomKind::Draw);
        let (first, _rx1) = member("a", "Alice");
        let (second, _rx2) = member("a", "Alice again");

        assert!(room.add_member(first));
        assert!(!room.add_member(second));
        assert_eq!(room.names(), vec!["Alice"]);
    }

    #[test]
    fn test_names_keep_join_order() {
        let mut room = Room::new(RoomCode::from("1"), RoomKind::Draw);
        let mut receivers = Vec::new();
        for (id, name) in [("c", "Carol"), ("a", "Alice"), ("b", "Bob")] {
            let (m, rx) = member(id, name);
            room.add_member(m);
            receivers.push(rx);
        }
        room.remove_member(&ConnectionId::from("a"));
        assert_eq!(room.names(), vec!["Carol", "Bob"]);
    }

    #[test]
    fn test_broadcast_excludes_sender() {
        let mut room = Room::new(RoomCode::from("1"), RoomKind::Draw);
        let (alice, mut rx_a) = member("a", "Alice");
        let (bob, mut rx_b) = member("b", "Bob");
        let (carol, mut rx_c) = member("c", "Carol");
        room.add_member(alice);
        room.add_member(bob);
        room.add_member(carol);

        let delivery = room.broadcast(&frame("hello"), Some(&ConnectionId::from("a")));
        assert_eq!(delivery, Delivery { delivered: 2, dropped: 0 });

        assert!(rx_a.try_recv().is_err());
        assert_eq!(&*rx_b.try_recv().unwrap(), "hello");
        assert_eq!(&*rx_c.try_recv().unwrap(), "hello");
    }

    #[test]
    fn test_broadcast_counts_closed_outboxes() {
        let mut room = Room::new(RoomCode::from("1"), RoomKind::Draw);
        let (alice, rx_a) = member("a", "Alice");
        let (bob, mut rx_b) = member("b", "Bob");
        room.add_member(alice);
        room.add_member(bob);
        drop(rx_a);

        let delivery = room.broadcast(&frame("x"), None);
        assert_eq!(delivery, Delivery { delivered: 1, dropped: 1 });
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn test_full_outbox_drops_instead_of_growing() {
        let mut room = Room::new(RoomCode::from("1"), RoomKind::Draw);
        let (tx, mut rx_slow) = mpsc::channel(2);
        room.add_member(Member::new(ConnectionId::from("slow"), "Slow", tx));
        let (fast, mut rx_fast) = member("fast", "Fast");
        room.add_member(fast);

        let mut total = Delivery::default();
        for _ in 0..5 {
            let d = room.broadcast(&frame("stroke"), None);
            total.delivered += d.delivered;
            total.dropped += d.dropped;
        }
        assert_eq!(total, Delivery { delivered: 7, dropped: 3 });

        let mut slow_frames = 0;
        while rx_slow.try_recv().is_ok() {
            slow_frames += 1;
        }
        assert_eq!(slow_frames, 2);
        let mut fast_frames = 0;
        while rx_fast.try_recv().is_ok() {
            fast_frames += 1;
        }
        assert_eq!(fast_frames, 5);
    }

    #[test]
    fn test_send_to_target_only() {
        let mut room = Room::new(RoomCode::from("1"), RoomKind::Screen);
        let (alice, mut rx_a) = member("a", "Alice");
        let (bob, mut rx_b) = member("b", "Bob");
        room.add_member(alice);
        room.add_member(bob);

        assert_eq!(room.send_to(&ConnectionId::from("b"), frame("offer")), Some(true));
        assert_eq!(room.send_to(&ConnectionId::from("gone"), frame("offer")), None);

        assert!(rx_a.try_recv().is_err());
        assert_eq!(&*rx_b.try_recv().unwrap(), "offer");
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn test_voice_ready_peers() {
        let mut room = Room::new(RoomCode::from("1"), RoomKind::Movie);
        let mut receivers = Vec::new();
        for (id, name) in [("a", "Alice"), ("b", "Bob"), ("c", "Carol")] {
            let (m, rx) = member(id, name);
            room.add_member(m);
            receivers.push(rx);
        }
        room.member_mut(&ConnectionId::from("a")).unwrap().voice_ready = true;
        room.member_mut(&ConnectionId::from("c")).unwrap().voice_ready = true;

        assert_eq!(
            room.voice_ready_peers(&ConnectionId::from("c")),
            vec![ConnectionId::from("a")]
        );
        assert_eq!(
            room.voice_ready_peers(&ConnectionId::from("b")),
            vec![ConnectionId::from("a"), ConnectionId::from("c")]
        );
    }

    #[test]
    fn test_removing_broadcaster_clears_it() {
        let mut room = Room::new(RoomCode::from("1"), RoomKind::Movie);
        let (alice, _rx) = member("a", "Alice");
        room.add_member(alice);
        room.set_broadcaster(Some(ConnectionId::from("a")));
        assert_eq!(room.broadcaster(), Some(&ConnectionId::from("a")));

        room.remove_member(&ConnectionId::from("a"));
        assert!(room.broadcaster().is_none());
    }

    #[test]
    fn test_atomic_stats_snapshot() {
        let stats = AtomicRelayStats::default();
        stats.record_relayed(3);
        stats.record_dropped(1);
        assert_eq!(
            stats.snapshot(),
            RelayStats { messages_relayed: 3, messages_dropped: 1 }
        );
    }
}
