// ================
// common/src/lib.rs
// ================
//! Common types and structures
//! used for communication between chat clients and the server.
//! This module defines the WebSocket event protocol, the persisted records
//! and the JSON bodies of the room HTTP API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque room identifier
pub type RoomId = String;

/// System text broadcast when a user enters a room
pub fn joined_text(username: &str) -> String {
    format!("{username} joined the chat")
}

/// System text broadcast when a user leaves a room
pub fn left_text(username: &str) -> String {
    format!("{username} left the chat")
}

/// A chat room as persisted by the store
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    /// Unique, immutable identifier
    pub room_id: RoomId,
    /// Display name
    pub room_name: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Number of connections currently bound to the room
    pub active_users: u64,
}

impl Room {
    /// Create a fresh room with a generated id and no active users
    pub fn new(room_name: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), room_name)
    }

    /// Create a fresh room with a caller-chosen id
    pub fn with_id(room_id: impl Into<RoomId>, room_name: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            room_name: room_name.into(),
            created_at: Utc::now(),
            active_users: 0,
        }
    }
}

/// A chat message as persisted by the store
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub room_id: RoomId,
    pub username: String,
    pub message: String,
    /// Assigned by the store at write time
    pub timestamp: DateTime<Utc>,
}

/// Payload of `join-room`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoom {
    pub room_id: RoomId,
    pub username: String,
}

/// Payload of `send-message`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    pub room_id: RoomId,
    pub username: String,
    pub message: String,
}

/// Payload of `typing` and `stop-typing`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TypingNotice {
    pub room_id: RoomId,
    pub username: String,
}

/// Events sent from client to server
///
/// Framed as `{"event": "join-room", "data": {...}}`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Bind the connection to a room under a username
    JoinRoom(JoinRoom),
    /// Persist a message and relay it to the whole room
    SendMessage(SendMessage),
    /// Tell the rest of the room the user started typing
    Typing(TypingNotice),
    /// Tell the rest of the room the user stopped typing
    StopTyping(TypingNotice),
}

impl ClientEvent {
    /// Room the event is addressed to
    pub fn room_id(&self) -> &str {
        match self {
            ClientEvent::JoinRoom(JoinRoom { room_id, .. })
            | ClientEvent::SendMessage(SendMessage { room_id, .. })
            | ClientEvent::Typing(TypingNotice { room_id, .. })
            | ClientEvent::StopTyping(TypingNotice { room_id, .. }) => room_id,
        }
    }

    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinRoom(_) => "join-room",
            ClientEvent::SendMessage(_) => "send-message",
            ClientEvent::Typing(_) => "typing",
            ClientEvent::StopTyping(_) => "stop-typing",
        }
    }
}

/// Payload of `room-joined`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoomJoined {
    pub room_name: String,
    pub active_users: u64,
}

/// Payload of `user-joined` and `user-left`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceChange {
    pub username: String,
    /// Human readable system line, e.g. "alice joined the chat"
    pub message: String,
    pub active_users: u64,
}

/// Payload of `receive-message`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatLine {
    pub username: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl From<Message> for ChatLine {
    fn from(message: Message) -> Self {
        Self {
            username: message.username,
            message: message.message,
            timestamp: message.timestamp,
        }
    }
}

/// Payload of `user-typing` and `user-stop-typing`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Typist {
    pub username: String,
}

/// Events sent from server to client
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Sent to the joining connection only
    RoomJoined(RoomJoined),
    /// Sent to the rest of the room when someone joins
    UserJoined(PresenceChange),
    /// Sent to the entire room, sender included
    ReceiveMessage(ChatLine),
    UserTyping(Typist),
    UserStopTyping(Typist),
    /// Sent to the remaining members when someone disconnects
    UserLeft(PresenceChange),
    /// Failure reason, sent to the offending connection only
    Error(String),
}

impl ServerEvent {
    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::RoomJoined(_) => "room-joined",
            ServerEvent::UserJoined(_) => "user-joined",
            ServerEvent::ReceiveMessage(_) => "receive-message",
            ServerEvent::UserTyping(_) => "user-typing",
            ServerEvent::UserStopTyping(_) => "user-stop-typing",
            ServerEvent::UserLeft(_) => "user-left",
            ServerEvent::Error(_) => "error",
        }
    }
}

/// Body of `POST /api/rooms/create`
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomRequest {
    pub room_name: String,
}

/// Response of `POST /api/rooms/create`
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomResponse {
    pub success: bool,
    pub room_id: RoomId,
    pub room_name: String,
    /// Shareable link to the room in the web client
    pub link: String,
}

/// Response of `GET /api/rooms/{roomId}`
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RoomResponse {
    pub success: bool,
    pub room: Room,
}

/// Response of `GET /api/rooms/{roomId}/messages`
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct HistoryResponse {
    pub success: bool,
    pub messages: Vec<Message>,
}

/// Response of `GET /api/rooms/{roomId}/presence`
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PresenceResponse {
    pub success: bool,
    pub room_id: RoomId,
    /// Usernames currently connected to this server process
    pub members: Vec<String>,
    /// Persisted counter
    pub active_users: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_event_wire_format() {
        let raw = json!({
            "event": "join-room",
            "data": { "roomId": "abc", "username": "alice" }
        });
        let event: ClientEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(
            event,
            ClientEvent::JoinRoom(JoinRoom {
                room_id: "abc".to_string(),
                username: "alice".to_string(),
            })
        );
        assert_eq!(event.room_id(), "abc");
        assert_eq!(event.name(), "join-room");

        let raw = json!({
            "event": "stop-typing",
            "data": { "roomId": "abc", "username": "bob" }
        });
        let event: ClientEvent = serde_json::from_value(raw).unwrap();
        assert!(matches!(event, ClientEvent::StopTyping(_)));
    }

    #[test]
    fn test_unknown_client_event_is_rejected() {
        let raw = json!({ "event": "leave-room", "data": { "roomId": "abc" } });
        assert!(serde_json::from_value::<ClientEvent>(raw).is_err());
    }

    #[test]
    fn test_server_event_wire_format() {
        let joined = ServerEvent::UserJoined(PresenceChange {
            username: "bob".to_string(),
            message: joined_text("bob"),
            active_users: 2,
        });
        let value = serde_json::to_value(&joined).unwrap();
        assert_eq!(value["event"], "user-joined");
        assert_eq!(value["data"]["username"], "bob");
        assert_eq!(value["data"]["message"], "bob joined the chat");
        assert_eq!(value["data"]["activeUsers"], 2);
        assert_eq!(joined.name(), "user-joined");

        let error = serde_json::to_value(ServerEvent::Error("Room not found".into())).unwrap();
        assert_eq!(error, json!({ "event": "error", "data": "Room not found" }));
    }

    #[test]
    fn test_room_serializes_camel_case() {
        let room = Room::with_id("abc", "General");
        let value = serde_json::to_value(&room).unwrap();
        assert_eq!(value["roomId"], "abc");
        assert_eq!(value["roomName"], "General");
        assert_eq!(value["activeUsers"], 0);
        assert!(value["createdAt"].is_string());
    }

    #[test]
    fn test_generated_room_ids_are_unique() {
        let a = Room::new("a");
        let b = Room::new("b");
        assert_ne!(a.room_id, b.room_id);
        assert_eq!(left_text("alice"), "alice left the chat");
    }
}
