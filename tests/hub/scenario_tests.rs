//! Room scenarios driven through served connections.

use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;

use crate::common::{quiet_hub, StubChatService, TestClient};
use chat_hub::domain::{Envelope, MessageKind};
use chat_hub::presentation::websocket::Hub;

async fn join(client: &mut TestClient, room_id: &str) {
    client.send(json!({ "type": "join_room", "roomId": room_id }));
    let notice = client.next_envelope().await;
    assert_eq!(notice.kind, MessageKind::UserJoined);
    assert_eq!(notice.room_id, room_id);
}

/// Wait until the hub has processed everything sent to it so far.
async fn settle(hub: &Hub) {
    tokio::time::sleep(Duration::from_millis(20)).await;
    hub.connection_count().await;
}

#[tokio::test]
async fn test_join_then_broadcast_is_delivered() {
    let hub = quiet_hub();
    let chat = StubChatService::new();
    let mut alice = TestClient::connect(&hub, chat.clone(), "alice").await;

    join(&mut alice, "r1").await;

    hub.broadcast_to_room("r1", &Envelope::typing("r1", "server", "true"));
    let envelope = alice.next_envelope().await;
    assert_eq!(envelope.kind, MessageKind::Typing);
    assert_eq!(envelope.sender_id, "server");

    alice.close().await;
}

#[tokio::test]
async fn test_leave_then_broadcast_is_not_delivered() {
    let hub = quiet_hub();
    let chat = StubChatService::new();
    let mut alice = TestClient::connect(&hub, chat.clone(), "alice").await;

    join(&mut alice, "r1").await;
    alice.send(json!({ "type": "leave_room", "roomId": "r1" }));
    settle(&hub).await;
    assert_eq!(hub.room_connection_count("r1").await, 0);

    hub.broadcast_to_room("r1", &Envelope::typing("r1", "server", "true"));
    settle(&hub).await;
    alice.assert_no_envelope();

    alice.close().await;
}

#[tokio::test]
async fn test_failed_persistence_is_never_observed() {
    let hub = quiet_hub();
    let chat = StubChatService::failing();
    let mut alice = TestClient::connect(&hub, chat.clone(), "alice").await;
    let mut bob = TestClient::connect(&hub, chat.clone(), "bob").await;

    join(&mut alice, "r1").await;
    join(&mut bob, "r1").await;
    // Bob's join notice also reaches alice.
    assert_eq!(alice.next_envelope().await.sender_id, "bob");

    alice.send(json!({ "type": "message", "roomId": "r1", "content": "lost" }));
    settle(&hub).await;

    assert_eq!(chat.send_calls(), 1);
    alice.assert_no_envelope();
    bob.assert_no_envelope();
    assert_eq!(hub.connection_count().await, 2, "failure must not close sockets");

    alice.close().await;
    bob.close().await;
}

#[tokio::test]
async fn test_chat_message_reaches_every_room_member() {
    let hub = quiet_hub();
    let chat = StubChatService::new();
    let mut alice = TestClient::connect(&hub, chat.clone(), "alice").await;
    let mut bob = TestClient::connect(&hub, chat.clone(), "bob").await;
    let mut carol = TestClient::connect(&hub, chat.clone(), "carol").await;

    join(&mut alice, "r1").await;
    join(&mut bob, "r1").await;
    assert_eq!(alice.next_envelope().await.sender_id, "bob");
    join(&mut carol, "r2").await;

    alice.send(json!({ "type": "message", "roomId": "r1", "content": "hello" }));

    for client in [&mut alice, &mut bob] {
        let envelope = client.next_envelope().await;
        assert_eq!(envelope.kind, MessageKind::Chat);
        assert_eq!(envelope.room_id, "r1");
        assert_eq!(envelope.sender_id, "alice");
        assert_eq!(envelope.content, "hello");
        assert!(envelope.created_at.is_some());
    }
    settle(&hub).await;
    carol.assert_no_envelope();
    assert_eq!(chat.send_calls(), 1);

    alice.close().await;
    bob.close().await;
    carol.close().await;
}

#[tokio::test]
async fn test_typing_reaches_room_without_persisting() {
    let hub = quiet_hub();
    let chat = StubChatService::new();
    let mut alice = TestClient::connect(&hub, chat.clone(), "alice").await;
    let mut bob = TestClient::connect(&hub, chat.clone(), "bob").await;

    join(&mut alice, "r1").await;
    join(&mut bob, "r1").await;
    assert_eq!(alice.next_envelope().await.sender_id, "bob");

    alice.send(json!({ "type": "typing", "roomId": "r1", "content": "true" }));

    let envelope = bob.next_envelope().await;
    assert_eq!(envelope.kind, MessageKind::Typing);
    assert_eq!(envelope.sender_id, "alice");
    assert_eq!(chat.send_calls(), 0);

    alice.close().await;
    bob.close().await;
}

#[tokio::test]
async fn test_closed_client_leaves_every_room() {
    let hub = quiet_hub();
    let chat = StubChatService::new();
    let mut alice = TestClient::connect(&hub, chat.clone(), "alice").await;
    let mut bob = TestClient::connect(&hub, chat.clone(), "bob").await;

    join(&mut alice, "r1").await;
    join(&mut bob, "r1").await;
    assert_eq!(hub.room_connection_count("r1").await, 2);

    alice.close().await;
    settle(&hub).await;

    assert_eq!(hub.connection_count().await, 1);
    assert_eq!(hub.room_connection_count("r1").await, 1);
    assert_eq!(hub.user_connection_count("alice").await, 0);

    bob.close().await;
}

#[tokio::test]
async fn test_same_user_on_two_devices_keeps_both_sessions() {
    let hub = quiet_hub();
    let chat = StubChatService::new();
    let phone = TestClient::connect(&hub, chat.clone(), "alice").await;
    let laptop = TestClient::connect(&hub, chat.clone(), "alice").await;

    assert_eq!(hub.user_connection_count("alice").await, 2);

    phone.close().await;
    settle(&hub).await;
    assert_eq!(hub.user_connection_count("alice").await, 1);

    laptop.close().await;
}
