//! In-memory chat history store.
//!
//! Backs the standalone server and the tests. Production deployments plug a
//! real store in behind the same `ChatService` trait.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use crate::domain::{ChatService, ChatServiceError, MessageKind, PersistedMessage, Room};

pub struct InMemoryChatService {
    rooms: DashMap<String, Room>,
    messages: DashMap<String, Vec<PersistedMessage>>,
    /// Create unknown rooms on first message instead of rejecting it
    auto_create_rooms: bool,
}

impl InMemoryChatService {
    pub fn new(auto_create_rooms: bool) -> Self {
        Self {
            rooms: DashMap::new(),
            messages: DashMap::new(),
            auto_create_rooms,
        }
    }

    pub fn create_room(&self, id: &str, name: &str, member_ids: Vec<String>) -> Room {
        let room = Room {
            id: id.to_string(),
            name: name.to_string(),
            member_ids,
        };
        self.rooms.insert(room.id.clone(), room.clone());
        room
    }

    /// Messages recorded for a room, oldest first.
    pub fn history(&self, room_id: &str) -> Vec<PersistedMessage> {
        self.messages
            .get(room_id)
            .map(|messages| messages.clone())
            .unwrap_or_default()
    }
}

impl Default for InMemoryChatService {
    fn default() -> Self {
        Self::new(false)
    }
}

#[async_trait]
impl ChatService for InMemoryChatService {
    async fn send_message(
        &self,
        room_id: &str,
        sender_id: &str,
        kind: MessageKind,
        content: &str,
    ) -> Result<PersistedMessage, ChatServiceError> {
        // Rooms without a member list are open to everyone.
        let may_post = self
            .rooms
            .get(room_id)
            .map(|room| room.member_ids.is_empty() || room.has_member(sender_id));

        match may_post {
            Some(true) => {}
            Some(false) => {
                return Err(ChatServiceError::NotMember {
                    room_id: room_id.to_string(),
                    user_id: sender_id.to_string(),
                });
            }
            None if self.auto_create_rooms => {
                self.rooms
                    .entry(room_id.to_string())
                    .or_insert_with(|| Room {
                        id: room_id.to_string(),
                        name: room_id.to_string(),
                        member_ids: Vec::new(),
                    });
            }
            None => return Err(ChatServiceError::RoomNotFound(room_id.to_string())),
        }

        let message = PersistedMessage {
            id: Uuid::now_v7().to_string(),
            room_id: room_id.to_string(),
            sender_id: sender_id.to_string(),
            kind,
            content: content.to_string(),
            created_at: Utc::now(),
        };

        self.messages
            .entry(room_id.to_string())
            .or_default()
            .push(message.clone());

        Ok(message)
    }

    async fn get_room(&self, room_id: &str) -> Result<Room, ChatServiceError> {
        self.rooms
            .get(room_id)
            .map(|room| room.clone())
            .ok_or_else(|| ChatServiceError::RoomNotFound(room_id.to_string()))
    }
}
