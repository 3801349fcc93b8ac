//! Room Presence API Tests

use std::sync::Arc;

use axum::http::StatusCode;
use serde_json::json;

use crate::common::{json_body, TestApp, TestClient};
use chat_hub::domain::MessageKind;
use chat_hub::infrastructure::InMemoryChatService;

#[tokio::test]
async fn test_unknown_room_is_not_found() {
    let app = TestApp::new(InMemoryChatService::default().into()).await;

    let response = app.get("/rooms/missing/presence").await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = json_body(response).await;
    assert_eq!(json["code"], 10001);
}

#[tokio::test]
async fn test_presence_counts_joined_connections() {
    let chat = Arc::new(InMemoryChatService::default());
    chat.create_room("r1", "general", vec!["alice".into(), "bob".into()]);
    let app = TestApp::new(chat.clone()).await;

    let mut alice = TestClient::connect(&app.state.hub, chat.clone(), "alice").await;
    alice.send(json!({ "type": "join_room", "roomId": "r1" }));
    assert_eq!(alice.next_envelope().await.kind, MessageKind::UserJoined);

    let response = app.get("/rooms/r1/presence").await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["roomId"], "r1");
    assert_eq!(json["name"], "general");
    assert_eq!(json["members"], 2);
    assert_eq!(json["connections"], 1);

    alice.close().await;
}
