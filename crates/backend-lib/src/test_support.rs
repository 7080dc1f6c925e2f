//! Store wrapper with switchable failures for exercising error paths.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chatroom_common::{Message, Room};

use crate::error::ChatError;
use crate::storage::{MemoryStore, RoomStore};

#[derive(Clone, Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    fail_increments: Arc<AtomicBool>,
    fail_inserts: Arc<AtomicBool>,
    fail_lookups: Arc<AtomicBool>,
    fail_rereads: Arc<AtomicBool>,
    /// Set by a successful increment, cleared by the next lookup
    incremented: Arc<AtomicBool>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_increments(&self, fail: bool) {
        self.fail_increments.store(fail, Ordering::SeqCst);
    }

    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }

    /// Fail only the lookup that directly follows a successful increment
    pub fn fail_rereads(&self, fail: bool) {
        self.fail_rereads.store(fail, Ordering::SeqCst);
    }

    fn check(flag: &AtomicBool) -> Result<(), ChatError> {
        if flag.load(Ordering::SeqCst) {
            Err(ChatError::Persistence("store unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RoomStore for FlakyStore {
    async fn create_room(&self, room: Room) -> Result<Room, ChatError> {
        self.inner.create_room(room).await
    }

    async fn find_room(&self, room_id: &str) -> Result<Room, ChatError> {
        Self::check(&self.fail_lookups)?;
        if self.incremented.swap(false, Ordering::SeqCst) {
            Self::check(&self.fail_rereads)?;
        }
        self.inner.find_room(room_id).await
    }

    async fn increment_active_users(&self, room_id: &str, delta: i64) -> Result<Room, ChatError> {
        Self::check(&self.fail_increments)?;
        let room = self.inner.increment_active_users(room_id, delta).await?;
        self.incremented.store(true, Ordering::SeqCst);
        Ok(room)
    }

    async fn insert_message(
        &self,
        room_id: &str,
        username: &str,
        text: &str,
    ) -> Result<Message, ChatError> {
        Self::check(&self.fail_inserts)?;
        self.inner.insert_message(room_id, username, text).await
    }

    async fn list_messages(&self, room_id: &str, limit: usize) -> Result<Vec<Message>, ChatError> {
        self.inner.list_messages(room_id, limit).await
    }
}
