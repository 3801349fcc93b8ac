//! Wire message envelope.
//!
//! Every frame exchanged over a hub socket is one JSON object:
//!
//! ```json
//! {"type": "message", "roomId": "r1", "senderId": "u1", "content": "hi",
//!  "data": null, "createdAt": "2024-01-01T00:00:00Z"}
//! ```
//!
//! Fields that do not apply to a kind are omitted on output and default to
//! empty on input.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed set of message kinds carried in the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// A chat message. Clients may send either `message` or `chat_message`.
    #[serde(rename = "message", alias = "chat_message")]
    Chat,
    Typing,
    JoinRoom,
    LeaveRoom,
    UserStatus,
    /// Server-originated notice that a user joined a room
    UserJoined,
    /// Server-originated notice that a user left a room
    UserLeft,
    /// Any `type` the server does not understand
    #[serde(other)]
    Unknown,
}

impl MessageKind {
    /// Wire representation of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "message",
            Self::Typing => "typing",
            Self::JoinRoom => "join_room",
            Self::LeaveRoom => "leave_room",
            Self::UserStatus => "user_status",
            Self::UserJoined => "user_joined",
            Self::UserLeft => "user_left",
            Self::Unknown => "unknown",
        }
    }

    /// Kinds only the server may emit. Clients sending them are ignored.
    pub fn is_server_only(&self) -> bool {
        matches!(self, Self::UserJoined | Self::UserLeft)
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Presence states broadcast by the hub itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserStatus {
    Online,
    Offline,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }
}

/// One frame on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageKind,

    /// Server-assigned id, present on persisted chat messages only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub room_id: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sender_id: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,

    /// Opaque client payload. JSON `null` is treated as absent.
    #[serde(default, skip_serializing_if = "is_absent")]
    pub data: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

fn is_absent(data: &Option<serde_json::Value>) -> bool {
    matches!(data, None | Some(serde_json::Value::Null))
}

impl Envelope {
    fn stamped(kind: MessageKind, room_id: &str, sender_id: &str, content: String) -> Self {
        Self {
            kind,
            id: None,
            room_id: room_id.to_string(),
            sender_id: sender_id.to_string(),
            content,
            data: None,
            created_at: Some(Utc::now()),
        }
    }

    /// Decode a single text frame.
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Attach a client payload, dropping a bare `null`.
    pub fn with_data(mut self, data: Option<serde_json::Value>) -> Self {
        self.data = data.filter(|value| !value.is_null());
        self
    }

    /// Encode for the wire.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Notice sent to a room after `user_id` joined it.
    pub fn user_joined(room_id: &str, user_id: &str) -> Self {
        Self::stamped(MessageKind::UserJoined, room_id, user_id, String::new())
    }

    /// Notice sent to a room after `user_id` left it.
    pub fn user_left(room_id: &str, user_id: &str) -> Self {
        Self::stamped(MessageKind::UserLeft, room_id, user_id, String::new())
    }

    pub fn typing(room_id: &str, user_id: &str, content: &str) -> Self {
        Self::stamped(MessageKind::Typing, room_id, user_id, content.to_string())
    }

    /// Platform-wide presence update. Not scoped to a room.
    pub fn user_status(user_id: &str, status: &str) -> Self {
        Self::stamped(MessageKind::UserStatus, "", user_id, status.to_string())
    }
}

impl From<PersistedMessage> for Envelope {
    fn from(message: PersistedMessage) -> Self {
        Self {
            kind: message.kind,
            id: Some(message.id),
            room_id: message.room_id,
            sender_id: message.sender_id,
            content: message.content,
            data: None,
            created_at: Some(message.created_at),
        }
    }
}

/// A chat message as recorded by the chat history store.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedMessage {
    pub id: String,
    pub room_id: String,
    pub sender_id: String,
    pub kind: MessageKind,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A room with its authoritative member list.
#[derive(Debug, Clone, PartialEq)]
pub struct Room {
    pub id: String,
    pub name: String,
    pub member_ids: Vec<String>,
}

impl Room {
    pub fn has_member(&self, user_id: &str) -> bool {
        self.member_ids.iter().any(|m| m == user_id)
    }
}
