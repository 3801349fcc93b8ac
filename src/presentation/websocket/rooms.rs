//! Per-connection room membership.

use std::collections::HashSet;

/// Rooms a single connection has joined.
///
/// This is a cache of the subset of the authoritative membership that matters
/// for fan-out. It only changes through `join_room` / `leave_room` frames on
/// the owning connection, so it can lag behind the chat store.
#[derive(Debug, Default, Clone)]
pub struct RoomMembership {
    rooms: HashSet<String>,
}

impl RoomMembership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the room was not joined before.
    pub fn join(&mut self, room_id: &str) -> bool {
        self.rooms.insert(room_id.to_string())
    }

    /// Returns `true` if the room was joined before.
    pub fn leave(&mut self, room_id: &str) -> bool {
        self.rooms.remove(room_id)
    }

    pub fn contains(&self, room_id: &str) -> bool {
        self.rooms.contains(room_id)
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}
