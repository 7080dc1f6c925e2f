// ============================
// crates/backend-lib/src/storage.rs
// ============================
//! Storage abstraction with flat-file and in-memory implementations.
//!
//! The coordinator never reads, modifies and writes the `activeUsers`
//! counter itself; every change goes through
//! [`RoomStore::increment_active_users`], which each backend applies
//! atomically.
use std::{
    fs,
    io::{ErrorKind, SeekFrom},
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use chatroom_common::{Message, Room, RoomId};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::{
    fs as tokio_fs,
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
    sync::{Mutex, OwnedMutexGuard},
};
use tracing::warn;

use crate::error::ChatError;
use crate::validation::validate_room_id;

pub mod memory;

pub use memory::MemoryStore;

/// Trait for storage backends
#[async_trait]
pub trait RoomStore: Send + Sync {
    /// Persist a new room; fails if the id is taken
    async fn create_room(&self, room: Room) -> Result<Room, ChatError>;

    /// Look a room up by id
    async fn find_room(&self, room_id: &str) -> Result<Room, ChatError>;

    /// Atomically add `delta` to the room's active user counter.
    ///
    /// The counter never drops below zero. Returns the updated room.
    async fn increment_active_users(&self, room_id: &str, delta: i64) -> Result<Room, ChatError>;

    /// Append a message; the store assigns the timestamp
    async fn insert_message(
        &self,
        room_id: &str,
        username: &str,
        text: &str,
    ) -> Result<Message, ChatError>;

    /// The most recent `limit` messages of a room, oldest first
    async fn list_messages(&self, room_id: &str, limit: usize) -> Result<Vec<Message>, ChatError>;
}

/// Apply a signed delta to a counter, clamping at zero
pub(crate) fn apply_delta(current: u64, delta: i64) -> u64 {
    if delta >= 0 {
        current.saturating_add(delta.unsigned_abs())
    } else {
        current.saturating_sub(delta.unsigned_abs())
    }
}

/// Timestamp for the next message of a room, never earlier than the last one
pub(crate) fn next_timestamp(last: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now();
    match last {
        Some(last) if last > now => last,
        _ => now,
    }
}

/// Keep only the newest `limit` entries of an oldest-first log
pub(crate) fn most_recent<T>(mut entries: Vec<T>, limit: usize) -> Vec<T> {
    let start = entries.len().saturating_sub(limit);
    entries.split_off(start)
}

/// Bytes read per step when scanning the end of a message log
const TAIL_CHUNK: u64 = 8 * 1024;

/// Flat-file implementation of the [`RoomStore`] trait
///
/// Layout: `<root>/rooms/<room_id>/room.json` and an append-only
/// `<root>/rooms/<room_id>/messages.log` with one JSON message per line.
#[derive(Clone)]
pub struct FlatFileStorage {
    root: PathBuf,
    locks: Arc<DashMap<RoomId, Arc<Mutex<()>>>>,
}

/// Exclusive access to one room's files within this process.
///
/// The lock entry is dropped from the map once nobody holds or waits on it.
struct RoomGuard<'a> {
    locks: &'a DashMap<RoomId, Arc<Mutex<()>>>,
    room_id: &'a str,
    held: Option<OwnedMutexGuard<()>>,
}

impl Drop for RoomGuard<'_> {
    fn drop(&mut self) {
        self.held.take();
        self.locks
            .remove_if(self.room_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl FlatFileStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, ChatError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("rooms"))?;
        Ok(Self {
            root,
            locks: Arc::new(DashMap::new()),
        })
    }

    fn room_dir(&self, room_id: &str) -> Result<PathBuf, ChatError> {
        validate_room_id(room_id).map_err(|_| ChatError::RoomNotFound(room_id.to_string()))?;
        Ok(self.root.join("rooms").join(room_id))
    }

    /// Serialize access to a room's files
    async fn lock_room<'a>(&'a self, room_id: &'a str) -> RoomGuard<'a> {
        let lock = self
            .locks
            .entry(room_id.to_string())
            .or_default()
            .value()
            .clone();
        RoomGuard {
            locks: self.locks.as_ref(),
            room_id,
            held: Some(lock.lock_owned().await),
        }
    }

    async fn read_room(&self, room_id: &str, dir: &Path) -> Result<Room, ChatError> {
        match tokio_fs::read_to_string(dir.join("room.json")).await {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(ChatError::RoomNotFound(room_id.to_string()))
            },
            Err(e) => Err(e.into()),
        }
    }

    /// Replace `room.json` via a temp file so readers never see a torn write
    async fn write_room(&self, dir: &Path, room: &Room) -> Result<(), ChatError> {
        let tmp = dir.join("room.json.tmp");
        tokio_fs::write(&tmp, serde_json::to_string_pretty(room)?).await?;
        tokio_fs::rename(&tmp, dir.join("room.json")).await?;
        Ok(())
    }

    /// Every complete message in the log. A final line without its newline
    /// is an append that never finished and is skipped.
    async fn read_log(&self, dir: &Path) -> Result<Vec<Message>, ChatError> {
        let content = match tokio_fs::read_to_string(dir.join("messages.log")).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let torn_tail = !content.is_empty() && !content.ends_with('\n');
        let mut lines = content.lines().filter(|line| !line.trim().is_empty()).peekable();
        let mut messages = Vec::new();
        while let Some(line) = lines.next() {
            match serde_json::from_str(line) {
                Ok(message) => messages.push(message),
                Err(e) if torn_tail && lines.peek().is_none() => {
                    warn!(path = %dir.display(), error = %e, "skipping unfinished message log entry");
                },
                Err(e) => return Err(e.into()),
            }
        }
        Ok(messages)
    }

    /// Cut an unfinished final line off the log and return the timestamp of
    /// the last complete message. Only the end of the file is read.
    async fn settle_log(&self, path: &Path) -> Result<Option<DateTime<Utc>>, ChatError> {
        let mut file = match tokio_fs::OpenOptions::new().read(true).write(true).open(path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let len = file.metadata().await?.len();

        // grow a window backwards until it spans the last complete line
        let mut start = len;
        let mut tail: Vec<u8> = Vec::new();
        while start > 0 && tail.iter().filter(|&&b| b == b'\n').count() < 2 {
            let from = start.saturating_sub(TAIL_CHUNK);
            let mut chunk = vec![0u8; (start - from) as usize];
            file.seek(SeekFrom::Start(from)).await?;
            file.read_exact(&mut chunk).await?;
            chunk.extend_from_slice(&tail);
            tail = chunk;
            start = from;
        }

        if tail.last().is_some_and(|&b| b != b'\n') {
            let keep = tail.iter().rposition(|&b| b == b'\n').map_or(0, |pos| pos + 1);
            warn!(
                path = %path.display(),
                dropped = tail.len() - keep,
                "truncating unfinished message log entry"
            );
            tail.truncate(keep);
            file.set_len(start + keep as u64).await?;
        }

        let Some((_, body)) = tail.split_last() else {
            return Ok(None);
        };
        let line = match body.iter().rposition(|&b| b == b'\n') {
            Some(pos) => &body[pos + 1..],
            None => body,
        };
        match serde_json::from_slice::<Message>(line) {
            Ok(message) => Ok(Some(message.timestamp)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "last message log entry unreadable");
                Ok(None)
            },
        }
    }
}

#[async_trait]
impl RoomStore for FlatFileStorage {
    async fn create_room(&self, room: Room) -> Result<Room, ChatError> {
        let room_id = room.room_id.clone();
        let dir = self.room_dir(&room_id)?;
        let _guard = self.lock_room(&room_id).await;

        if tokio_fs::try_exists(dir.join("room.json")).await? {
            return Err(ChatError::Persistence(format!(
                "room {} already exists",
                room.room_id
            )));
        }

        tokio_fs::create_dir_all(&dir).await?;
        self.write_room(&dir, &room).await?;
        Ok(room)
    }

    async fn find_room(&self, room_id: &str) -> Result<Room, ChatError> {
        let dir = self.room_dir(room_id)?;
        self.read_room(room_id, &dir).await
    }

    async fn increment_active_users(&self, room_id: &str, delta: i64) -> Result<Room, ChatError> {
        let dir = self.room_dir(room_id)?;
        let _guard = self.lock_room(room_id).await;

        let mut room = self.read_room(room_id, &dir).await?;
        room.active_users = apply_delta(room.active_users, delta);
        self.write_room(&dir, &room).await?;
        Ok(room)
    }

    async fn insert_message(
        &self,
        room_id: &str,
        username: &str,
        text: &str,
    ) -> Result<Message, ChatError> {
        let dir = self.room_dir(room_id)?;
        let _guard = self.lock_room(room_id).await;

        // the room must exist at write time
        self.read_room(room_id, &dir).await?;

        let path = dir.join("messages.log");
        let message = Message {
            room_id: room_id.to_string(),
            username: username.to_string(),
            message: text.to_string(),
            timestamp: next_timestamp(self.settle_log(&path).await?),
        };

        let mut line = serde_json::to_string(&message)?;
        line.push('\n');
        let mut file = tokio_fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        Ok(message)
    }

    async fn list_messages(&self, room_id: &str, limit: usize) -> Result<Vec<Message>, ChatError> {
        let dir = self.room_dir(room_id)?;
        let _guard = self.lock_room(room_id).await;
        Ok(most_recent(self.read_log(&dir).await?, limit))
    }
}
