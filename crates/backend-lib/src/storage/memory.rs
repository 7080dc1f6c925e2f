//! In-memory [`RoomStore`], used for tests and throwaway deployments.
use std::sync::Arc;

use async_trait::async_trait;
use chatroom_common::{Message, Room, RoomId};
use dashmap::{mapref::entry::Entry, DashMap};

use super::{apply_delta, most_recent, next_timestamp, RoomStore};
use crate::error::ChatError;

#[derive(Clone, Default)]
pub struct MemoryStore {
    rooms: Arc<DashMap<RoomId, Room>>,
    messages: Arc<DashMap<RoomId, Vec<Message>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoomStore for MemoryStore {
    async fn create_room(&self, room: Room) -> Result<Room, ChatError> {
        match self.rooms.entry(room.room_id.clone()) {
            Entry::Occupied(_) => Err(ChatError::Persistence(format!(
                "room {} already exists",
                room.room_id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(room.clone());
                Ok(room)
            },
        }
    }

    async fn find_room(&self, room_id: &str) -> Result<Room, ChatError> {
        self.rooms
            .get(room_id)
            .map(|room| room.clone())
            .ok_or_else(|| ChatError::RoomNotFound(room_id.to_string()))
    }

    async fn increment_active_users(&self, room_id: &str, delta: i64) -> Result<Room, ChatError> {
        // the shard write lock makes this a single atomic update
        let mut room = self
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| ChatError::RoomNotFound(room_id.to_string()))?;
        room.active_users = apply_delta(room.active_users, delta);
        Ok(room.clone())
    }

    async fn insert_message(
        &self,
        room_id: &str,
        username: &str,
        text: &str,
    ) -> Result<Message, ChatError> {
        if !self.rooms.contains_key(room_id) {
            return Err(ChatError::RoomNotFound(room_id.to_string()));
        }

        let mut log = self.messages.entry(room_id.to_string()).or_default();
        let message = Message {
            room_id: room_id.to_string(),
            username: username.to_string(),
            message: text.to_string(),
            timestamp: next_timestamp(log.last().map(|m| m.timestamp)),
        };
        log.push(message.clone());
        Ok(message)
    }

    async fn list_messages(&self, room_id: &str, limit: usize) -> Result<Vec<Message>, ChatError> {
        let log = self
            .messages
            .get(room_id)
            .map(|log| log.clone())
            .unwrap_or_default();
        Ok(most_recent(log, limit))
    }
}
