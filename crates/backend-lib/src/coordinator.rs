// ============================
// crates/backend-lib/src/coordinator.rs
// ============================
//! Room broadcast coordinator.
//!
//! Entry point for everything a connection does: it owns the session
//! registry and the room actors, and dispatches each inbound event on the
//! pair `(session state, event kind)`:
//!
//! | state     | join-room           | send-message / typing            |
//! |-----------|---------------------|----------------------------------|
//! | `Unbound` | look up and join    | rejected when membership is strict |
//! | `Bound`   | "Already joined"    | routed to the bound room         |
//! | `Closed`  | ignored             | ignored                          |
//!
//! Failures never escape [`Coordinator::dispatch`]; they are turned into an
//! `error` event for the sending connection only.
use std::sync::Arc;

use chatroom_common::{ClientEvent, JoinRoom, RoomId, SendMessage, ServerEvent, TypingNotice};
use dashmap::DashMap;
use tracing::{debug, error, info, instrument, warn};

use crate::config::Settings;
use crate::error::{ChatError, JOIN_FAILED, SEND_FAILED};
use crate::metrics::{MESSAGE_FAILED, MESSAGE_SENT, ROOM_JOINED, ROOM_JOIN_FAILED, ROOM_LEFT};
use crate::room_actor::{spawn_room_actor, RoomHandle};
use crate::session::{ConnectionId, Outbound, SessionRegistry, SessionState};
use crate::storage::RoomStore;
use crate::validation::{validate_message, validate_room_id, validate_username};

/// A join that keeps landing on retiring actors gives up after this many tries
const JOIN_ATTEMPTS: usize = 3;

/// Coordinator knobs taken from [`Settings`]
#[derive(Debug, Clone, Copy)]
pub struct CoordinatorConfig {
    /// Require room events to target the room the connection joined, and
    /// take the username from the session instead of the payload
    pub strict_membership: bool,
    pub max_message_len: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for CoordinatorConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            strict_membership: settings.strict_membership,
            max_message_len: settings.max_message_len,
        }
    }
}

pub struct Coordinator {
    store: Arc<dyn RoomStore>,
    sessions: Arc<SessionRegistry>,
    rooms: DashMap<RoomId, RoomHandle>,
    config: CoordinatorConfig,
}

impl Coordinator {
    pub fn new(store: Arc<dyn RoomStore>, config: CoordinatorConfig) -> Self {
        Coordinator {
            store,
            sessions: Arc::new(SessionRegistry::new()),
            rooms: DashMap::new(),
            config,
        }
    }

    /// Register a new connection; it starts `Unbound`
    pub fn connect(&self, outbound: Outbound) -> ConnectionId {
        let connection_id = self.sessions.open(outbound);
        debug!(%connection_id, "session opened");
        connection_id
    }

    pub fn session_state(&self, connection_id: ConnectionId) -> SessionState {
        self.sessions.state(connection_id)
    }

    pub fn connection_count(&self) -> usize {
        self.sessions.len()
    }

    /// Live actor of a room that currently has members on this process
    pub fn room(&self, room_id: &str) -> Option<RoomHandle> {
        self.rooms
            .get(room_id)
            .map(|handle| handle.value().clone())
            .filter(|handle| !handle.is_closed())
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    fn room_or_spawn(&self, room_id: &str) -> RoomHandle {
        let spawn = || spawn_room_actor(room_id, self.store.clone(), self.sessions.clone());
        let mut entry = self.rooms.entry(room_id.to_string()).or_insert_with(spawn);
        if entry.is_closed() {
            *entry.value_mut() = spawn();
        }
        entry.value().clone()
    }

    /// Forget a room whose actor has retired
    fn prune_room(&self, room_id: &str) {
        if self.rooms.remove_if(room_id, |_, handle| handle.is_closed()).is_some() {
            debug!(%room_id, "room actor released");
        }
    }

    /// Usernames connected to a room on this process
    pub async fn members(&self, room_id: &str) -> Result<Vec<String>, ChatError> {
        match self.room(room_id) {
            Some(handle) => handle.members().await,
            None => Ok(Vec::new()),
        }
    }

    /// Handle one inbound event from a connection
    #[instrument(skip(self, event), fields(event = event.name(), room_id = event.room_id()))]
    pub async fn dispatch(&self, connection_id: ConnectionId, event: ClientEvent) {
        let state = self.sessions.state(connection_id);

        let (result, fallback) = match (state, event) {
            (SessionState::Closed, _) => {
                debug!("event for a closed session ignored");
                return;
            },
            (SessionState::Unbound, ClientEvent::JoinRoom(join)) => {
                (self.join_room(connection_id, join).await, JOIN_FAILED)
            },
            (SessionState::Bound { .. }, ClientEvent::JoinRoom(_)) => (
                Err(ChatError::ProtocolMisuse("Already joined a room".to_string())),
                JOIN_FAILED,
            ),
            (state, ClientEvent::SendMessage(send)) => {
                (self.send_message(connection_id, &state, send).await, SEND_FAILED)
            },
            (state, ClientEvent::Typing(notice)) => {
                self.typing(connection_id, &state, notice, true);
                return;
            },
            (state, ClientEvent::StopTyping(notice)) => {
                self.typing(connection_id, &state, notice, false);
                return;
            },
        };

        if let Err(err) = result {
            if err.status_code().is_server_error() {
                warn!(error = %err, "event failed");
            } else {
                debug!(error = %err, "event rejected");
            }
            self.emit_error(connection_id, err.client_reason(fallback));
        }
    }

    /// Send an `error` event to one connection
    pub fn emit_error(&self, connection_id: ConnectionId, reason: String) {
        if let Some(outbound) = self.sessions.outbound(connection_id) {
            if outbound.try_send(ServerEvent::Error(reason)).is_err() {
                debug!(%connection_id, "could not queue error event");
            }
        }
    }

    async fn join_room(&self, connection_id: ConnectionId, join: JoinRoom) -> Result<(), ChatError> {
        let username = validate_username(&join.username)?.to_string();
        // an id that cannot exist is reported like any other unknown room
        validate_room_id(&join.room_id)
            .map_err(|_| ChatError::RoomNotFound(join.room_id.clone()))?;

        let result = match self.store.find_room(&join.room_id).await {
            Ok(room) => self.join_actor(connection_id, &username, &room.room_id, &room.room_name).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(_) => {
                ::metrics::counter!(ROOM_JOINED).increment(1);
                Ok(())
            },
            Err(e) => {
                ::metrics::counter!(ROOM_JOIN_FAILED).increment(1);
                Err(e)
            },
        }
    }

    /// Hand the join to the room's actor, starting a fresh one when the
    /// current actor retired while the join was on its way
    async fn join_actor(
        &self,
        connection_id: ConnectionId,
        username: &str,
        room_id: &str,
        room_name: &str,
    ) -> Result<u64, ChatError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let result = self
                .room_or_spawn(room_id)
                .join(connection_id, username.to_string(), room_name.to_string())
                .await;
            match result {
                Err(ChatError::RoomClosed) if attempts < JOIN_ATTEMPTS => {
                    debug!(%room_id, attempts, "room actor retired mid-join, retrying");
                },
                Err(e) => {
                    self.prune_room(room_id);
                    return Err(e);
                },
                Ok(active_users) => return Ok(active_users),
            }
        }
    }

    /// Room and username an event is attributed to
    fn resolve_sender(
        &self,
        state: &SessionState,
        room_id: &str,
        username: &str,
    ) -> Result<(RoomId, String), ChatError> {
        if !self.config.strict_membership {
            return Ok((room_id.to_string(), validate_username(username)?.to_string()));
        }
        match state {
            SessionState::Bound {
                room_id: bound_room,
                username: bound_name,
            } if bound_room == room_id => Ok((bound_room.clone(), bound_name.clone())),
            SessionState::Bound { .. } => Err(ChatError::ProtocolMisuse(
                "Not a member of this room".to_string(),
            )),
            _ => Err(ChatError::ProtocolMisuse("Join a room first".to_string())),
        }
    }

    async fn send_message(
        &self,
        connection_id: ConnectionId,
        state: &SessionState,
        send: SendMessage,
    ) -> Result<(), ChatError> {
        let text = validate_message(&send.message, self.config.max_message_len)?.to_string();
        let (room_id, username) = self.resolve_sender(state, &send.room_id, &send.username)?;

        let result = match self.room(&room_id) {
            Some(handle) => handle.send_message(connection_id, username, text).await,
            // no member of this room on this process: persist only
            None => self.store.insert_message(&room_id, &username, &text).await,
        };

        match result {
            Ok(_) => {
                ::metrics::counter!(MESSAGE_SENT).increment(1);
                Ok(())
            },
            Err(e) => {
                ::metrics::counter!(MESSAGE_FAILED).increment(1);
                Err(e)
            },
        }
    }

    fn typing(&self, connection_id: ConnectionId, state: &SessionState, notice: TypingNotice, active: bool) {
        let (room_id, username) = match self.resolve_sender(state, &notice.room_id, &notice.username) {
            Ok(sender) => sender,
            Err(e) => {
                debug!(error = %e, "typing notice ignored");
                return;
            },
        };
        if let Some(handle) = self.room(&room_id) {
            if let Err(e) = handle.typing(connection_id, username, active) {
                warn!(error = %e, "typing notice not delivered");
            }
        }
    }

    /// Tear a connection down. Safe to call more than once.
    ///
    /// A bound session is counted down in its room; an unbound one just
    /// disappears.
    #[instrument(skip(self))]
    pub async fn disconnect(&self, connection_id: ConnectionId) {
        let Some(session) = self.sessions.close(connection_id) else {
            return;
        };

        if let SessionState::Bound { room_id, username } = session.state {
            // a join that failed after binding can retire the room first
            let Some(handle) = self.room(&room_id) else {
                debug!(%room_id, "room actor already retired");
                return;
            };
            match handle.leave(connection_id).await {
                Ok(()) => {
                    ::metrics::counter!(ROOM_LEFT).increment(1);
                    info!(%room_id, %username, "session closed");
                },
                Err(e) => error!(%room_id, error = %e, "leave was not processed"),
            }
            self.prune_room(&room_id);
        } else {
            debug!("unbound session closed");
        }
    }
}
