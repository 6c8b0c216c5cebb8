use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use tokio::sync::mpsc;
use twincanvas_relay::client::MemberBadge;
use twincanvas_relay::config::ControlPolicy;
use twincanvas_relay::protocol::{
    ClientMessage, ConnectionId, DrawStroke, RoomCode, RoomKind, ServerMessage,
};
use twincanvas_relay::registry::RoomRegistry;
use twincanvas_relay::room::Frame;

/// Room enough for one iteration of the 1000-stroke run.
const OUTBOX_CAPACITY: usize = 1024;

fn draw_message() -> ClientMessage {
    ClientMessage::Draw {
        room: RoomCode::from("4821"),
        stroke: DrawStroke::new((120.0, 340.5), (123.5, 338.0), "#1e88e5", 5.0),
    }
}

fn bench_draw_encode(c: &mut Criterion) {
    let msg = draw_message();

    c.bench_function("draw_encode", |b| {
        b.iter(|| {
            black_box(black_box(&msg).encode().unwrap());
        })
    });
}

fn bench_draw_decode(c: &mut Criterion) {
    let encoded = draw_message().encode().unwrap();

    c.bench_function("draw_decode", |b| {
        b.iter(|| {
            black_box(ClientMessage::decode(black_box(&encoded)).unwrap());
        })
    });
}

fn bench_server_draw_encode(c: &mut Criterion) {
    let msg = ServerMessage::Draw {
        stroke: DrawStroke::new((0.0, 0.0), (10.0, 20.0), "#000", 2.0),
    };

    c.bench_function("server_draw_encode", |b| {
        b.iter(|| {
            black_box(black_box(&msg).encode().unwrap());
        })
    });
}

/// A room with `members` connections; returns the registry, the first
/// member's id and the receivers (kept alive so outboxes stay open).
fn populated_registry(
    members: usize,
) -> (RoomRegistry, ConnectionId, Vec<mpsc::Receiver<Frame>>) {
    let mut registry = RoomRegistry::new(members * 2, ControlPolicy::AnyMember);
    let mut receivers = Vec::with_capacity(members);
    let mut first = None;
    for i in 0..members {
        let id = ConnectionId::generate();
        let (tx, rx) = mpsc::channel(OUTBOX_CAPACITY);
        registry
            .join(&id, tx, Some(RoomCode::from("4821")), format!("Peer{i}"), RoomKind::Draw)
            .unwrap();
        receivers.push(rx);
        first.get_or_insert(id);
    }
    (registry, first.unwrap(), receivers)
}

fn drain(receivers: &mut [mpsc::Receiver<Frame>]) {
    for rx in receivers.iter_mut() {
        while rx.try_recv().is_ok() {}
    }
}

fn bench_relay_to_room_100_members(c: &mut Criterion) {
    let (registry, sender, mut receivers) = populated_registry(100);
    let room = RoomCode::from("4821");
    let msg = ServerMessage::Draw {
        stroke: DrawStroke::new((0.0, 0.0), (10.0, 20.0), "#000", 2.0),
    };
    drain(&mut receivers);

    c.bench_function("relay_to_room_100_members", |b| {
        b.iter(|| {
            let delivered = registry.relay_to_room(&sender, &room, black_box(&msg));
            drain(&mut receivers);
            black_box(delivered);
        })
    });
}

fn bench_relay_1000_strokes_100_members(c: &mut Criterion) {
    let (registry, sender, mut receivers) = populated_registry(100);
    let room = RoomCode::from("4821");
    drain(&mut receivers);

    c.bench_function("relay_1000_strokes_100_members", |b| {
        b.iter(|| {
            for i in 0..1000u32 {
                let stroke = DrawStroke::new((0.0, 0.0), (i as f64, i as f64), "#000", 2.0);
                registry.relay_to_room(&sender, &room, &ServerMessage::Draw { stroke });
            }
            drain(&mut receivers);
        })
    });
}

fn bench_join_leave_churn(c: &mut Criterion) {
    let (mut registry, _first, mut receivers) = populated_registry(50);
    let room = RoomCode::from("4821");
    drain(&mut receivers);

    c.bench_function("join_leave_50_member_room", |b| {
        b.iter(|| {
            let id = ConnectionId::generate();
            let (tx, _rx) = mpsc::channel(OUTBOX_CAPACITY);
            let _ = registry.join(&id, tx, Some(room.clone()), "Guest".to_string(), RoomKind::Draw);
            black_box(registry.leave(&id));
            drain(&mut receivers);
        })
    });
}

fn bench_minimal_stroke_decode(c: &mut Criterion) {
    let encoded = r##"{"event":"draw","data":{"room":"4821","stroke":{"x":10,"y":20,"color":"#000"}}}"##;

    c.bench_function("minimal_stroke_decode", |b| {
        b.iter(|| {
            black_box(ClientMessage::decode(black_box(encoded)).unwrap());
        })
    });
}

fn bench_member_badge(c: &mut Criterion) {
    c.bench_function("member_badge_for_name", |b| {
        b.iter(|| {
            black_box(MemberBadge::for_name(black_box("Christopher Columbus")));
        })
    });
}

criterion_group!(
    benches,
    bench_draw_encode,
    bench_draw_decode,
    bench_server_draw_encode,
    bench_minimal_stroke_decode,
    bench_relay_to_room_100_members,
    bench_relay_1000_strokes_100_members,
    bench_join_leave_churn,
    bench_member_badge,
);
criterion_main!(benches);
