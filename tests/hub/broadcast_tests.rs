//! Registry and fan-out tests driven directly through connection handles.

use axum::extract::ws::Utf8Bytes;
use tokio::sync::mpsc;

use crate::common::quiet_hub;
use chat_hub::domain::{Envelope, MessageKind};
use chat_hub::presentation::websocket::{ConnectionHandle, ConnectionId, Hub};

fn connect(hub: &Hub, user_id: &str, capacity: usize) -> (ConnectionId, mpsc::Receiver<Utf8Bytes>) {
    let (handle, rx) = ConnectionHandle::new(user_id, capacity);
    let id = handle.id;
    hub.register(handle);
    (id, rx)
}

#[tokio::test]
async fn test_register_unregister_sequences_never_double_count() {
    let hub = quiet_hub();
    let mut live = Vec::new();

    for round in 0..5 {
        for n in 0..4 {
            let (id, rx) = connect(&hub, &format!("user-{}", n), 4);
            live.push((id, rx));
        }
        // Drop every other connection, each one twice.
        let removed: Vec<ConnectionId> = live.iter().step_by(2).map(|(id, _)| *id).collect();
        for id in &removed {
            hub.unregister(*id);
            hub.unregister(*id);
        }
        live.retain(|(id, _)| !removed.contains(id));

        assert_eq!(hub.connection_count().await, live.len(), "round {}", round);
    }

    for (id, _) in &live {
        hub.unregister(*id);
    }
    for (id, _) in &live {
        hub.unregister(*id);
    }
    assert_eq!(hub.connection_count().await, 0);
}

#[tokio::test]
async fn test_joining_same_room_twice_counts_once() {
    let hub = quiet_hub();
    let (id, _rx) = connect(&hub, "alice", 4);

    hub.join_room(id, "r1");
    hub.join_room(id, "r1");

    assert_eq!(hub.connection_count().await, 1);
    assert_eq!(hub.room_connection_count("r1").await, 1);
}

#[tokio::test]
async fn test_broadcast_all_evicts_only_the_full_queue() {
    let hub = quiet_hub();
    let n = 10;

    let (stuck_id, mut stuck_rx) = connect(&hub, "stuck", 1);
    let mut healthy: Vec<_> = (0..n - 1)
        .map(|i| connect(&hub, &format!("user-{}", i), 4).1)
        .collect();

    // Fill the stuck connection's single slot, then drain everyone else.
    hub.broadcast_all("filler");
    assert_eq!(hub.connection_count().await, n);
    for rx in healthy.iter_mut() {
        assert_eq!(rx.recv().await.unwrap().as_str(), "filler");
    }

    hub.broadcast_all("payload");
    assert_eq!(hub.connection_count().await, n - 1);

    for rx in healthy.iter_mut() {
        assert_eq!(rx.recv().await.unwrap().as_str(), "payload");
        assert!(rx.try_recv().is_err());
    }

    assert_eq!(stuck_rx.recv().await.unwrap().as_str(), "filler");
    assert!(stuck_rx.recv().await.is_none(), "evicted queue must be closed");

    // Evicting again is a no-op.
    hub.unregister(stuck_id);
    assert_eq!(hub.connection_count().await, n - 1);
}

#[tokio::test]
async fn test_room_broadcast_to_two_hundred_members_evicts_one() {
    let hub = quiet_hub();
    let mut receivers = Vec::new();

    for i in 0..200 {
        let (id, rx) = connect(&hub, &format!("user-{}", i), 4);
        hub.join_room(id, "r1");
        receivers.push(rx);
    }
    assert_eq!(hub.room_connection_count("r1").await, 200);

    // One member's socket writer is gone.
    let dead = receivers.remove(57);
    drop(dead);

    let message = Envelope::typing("r1", "user-0", "true");
    hub.broadcast_to_room("r1", &message);

    assert_eq!(hub.connection_count().await, 199);
    assert_eq!(hub.room_connection_count("r1").await, 199);

    for rx in receivers.iter_mut() {
        let frame = rx.recv().await.unwrap();
        assert_eq!(Envelope::decode(frame.as_str()).unwrap(), message);
        assert!(rx.try_recv().is_err(), "exactly one copy per member");
    }
}

#[tokio::test]
async fn test_room_broadcast_evicts_member_with_full_queue() {
    let hub = quiet_hub();

    let (stuck_id, mut stuck_rx) = connect(&hub, "stuck", 1);
    hub.join_room(stuck_id, "r1");
    let mut healthy = Vec::new();
    for i in 0..20 {
        let (id, rx) = connect(&hub, &format!("user-{}", i), 4);
        hub.join_room(id, "r1");
        healthy.push(rx);
    }

    let first = Envelope::typing("r1", "user-0", "true");
    hub.broadcast_to_room("r1", &first);
    assert_eq!(hub.room_connection_count("r1").await, 21);
    for rx in healthy.iter_mut() {
        rx.recv().await.unwrap();
    }

    // The stuck member still holds the first frame.
    let second = Envelope::typing("r1", "user-0", "false");
    hub.broadcast_to_room("r1", &second);

    assert_eq!(hub.connection_count().await, 20);
    assert_eq!(hub.room_connection_count("r1").await, 20);
    for rx in healthy.iter_mut() {
        let frame = rx.recv().await.unwrap();
        assert_eq!(Envelope::decode(frame.as_str()).unwrap(), second);
        assert!(rx.try_recv().is_err());
    }

    let kept = stuck_rx.recv().await.unwrap();
    assert_eq!(Envelope::decode(kept.as_str()).unwrap(), first);
    assert!(stuck_rx.recv().await.is_none(), "evicted queue must be closed");
}

#[tokio::test]
async fn test_room_broadcast_skips_non_members() {
    let hub = quiet_hub();
    let (member, mut member_rx) = connect(&hub, "alice", 4);
    let (_outsider, mut outsider_rx) = connect(&hub, "bob", 4);
    hub.join_room(member, "r1");

    hub.broadcast_to_room("r1", &Envelope::typing("r1", "alice", "true"));
    hub.connection_count().await;

    let envelope = Envelope::decode(member_rx.recv().await.unwrap().as_str()).unwrap();
    assert_eq!(envelope.kind, MessageKind::Typing);
    assert!(outsider_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_user_status_is_platform_wide() {
    let hub = quiet_hub();
    let (in_room, mut in_room_rx) = connect(&hub, "alice", 4);
    let (_elsewhere, mut elsewhere_rx) = connect(&hub, "bob", 4);
    hub.join_room(in_room, "r1");

    hub.broadcast_user_status("alice", "away");
    hub.connection_count().await;

    for rx in [&mut in_room_rx, &mut elsewhere_rx] {
        let envelope = Envelope::decode(rx.recv().await.unwrap().as_str()).unwrap();
        assert_eq!(envelope.kind, MessageKind::UserStatus);
        assert_eq!(envelope.sender_id, "alice");
        assert_eq!(envelope.content, "away");
        assert!(envelope.room_id.is_empty());
    }
}
