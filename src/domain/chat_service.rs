//! Chat Service contract.
//!
//! The hub records chat messages and looks up rooms through this trait only;
//! it never talks to a store directly.

use async_trait::async_trait;

use super::message::{MessageKind, PersistedMessage, Room};

/// Errors surfaced by a chat history store
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatServiceError {
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    #[error("User {user_id} is not a member of room {room_id}")]
    NotMember { room_id: String, user_id: String },

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Persists chat messages and resolves room membership.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatService: Send + Sync {
    /// Durably record a message and return it with its server-assigned id and timestamp.
    async fn send_message(
        &self,
        room_id: &str,
        sender_id: &str,
        kind: MessageKind,
        content: &str,
    ) -> Result<PersistedMessage, ChatServiceError>;

    /// Fetch a room with its authoritative member list.
    async fn get_room(&self, room_id: &str) -> Result<Room, ChatServiceError>;
}
