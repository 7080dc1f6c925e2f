// ============================
// crates/backend-lib/src/session.rs
// ============================
//! Per-connection sessions and the registry that owns them.
//!
//! A session is `Unbound` from connect until a join succeeds, then `Bound`
//! to exactly one room. Closing removes it from the registry, so `Closed` is
//! simply "not present" and can never transition again.
use chatroom_common::{RoomId, ServerEvent};
use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

pub type ConnectionId = Uuid;

/// Queue feeding a connection's writer task
pub type Outbound = mpsc::Sender<ServerEvent>;

/// Lifecycle state of a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unbound,
    Bound { room_id: RoomId, username: String },
    Closed,
}

#[derive(Debug)]
pub struct Session {
    pub state: SessionState,
    outbound: Outbound,
}

/// All live connections, keyed by connection id
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<ConnectionId, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection as `Unbound`
    pub fn open(&self, outbound: Outbound) -> ConnectionId {
        let connection_id = Uuid::new_v4();
        self.sessions.insert(
            connection_id,
            Session {
                state: SessionState::Unbound,
                outbound,
            },
        );
        connection_id
    }

    pub fn state(&self, connection_id: ConnectionId) -> SessionState {
        self.sessions
            .get(&connection_id)
            .map_or(SessionState::Closed, |session| session.state.clone())
    }

    pub fn outbound(&self, connection_id: ConnectionId) -> Option<Outbound> {
        self.sessions
            .get(&connection_id)
            .map(|session| session.outbound.clone())
    }

    /// `Unbound -> Bound`. Returns the connection's outbound queue on success,
    /// `None` when the session is already bound or has been closed.
    pub fn bind(&self, connection_id: ConnectionId, room_id: &str, username: &str) -> Option<Outbound> {
        let mut session = self.sessions.get_mut(&connection_id)?;
        if session.state != SessionState::Unbound {
            return None;
        }
        session.state = SessionState::Bound {
            room_id: room_id.to_string(),
            username: username.to_string(),
        };
        Some(session.outbound.clone())
    }

    /// Roll a failed join back to `Unbound`; no-op once closed
    pub fn unbind(&self, connection_id: ConnectionId) {
        if let Some(mut session) = self.sessions.get_mut(&connection_id) {
            session.state = SessionState::Unbound;
        }
    }

    /// Remove the session, returning its final state
    pub fn close(&self, connection_id: ConnectionId) -> Option<Session> {
        self.sessions.remove(&connection_id).map(|(_, session)| session)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
