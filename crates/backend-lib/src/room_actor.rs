// ============================
// crates/backend-lib/src/room_actor.rs
// ============================
//! One actor per active room.
//!
//! The actor owns the room's [`RoomPresence`] and processes its mailbox one
//! message at a time, which gives every room a single serialization point:
//! joins, leaves, messages and typing notices are applied and fanned out in
//! the order they were enqueued. Different rooms run concurrently.
//!
//! An actor retires as soon as its room is empty: it closes its mailbox,
//! settles whatever was already queued and stops. Joins that were queued
//! behind the retirement are refused with [`ChatError::RoomClosed`] so the
//! caller can start a fresh actor.
use std::sync::Arc;

use chatroom_common::{
    joined_text, left_text, Message, PresenceChange, RoomId, RoomJoined, ServerEvent, Typist,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::error::ChatError;
use crate::presence::{Audience, Member, RoomPresence};
use crate::session::{ConnectionId, SessionRegistry};
use crate::storage::RoomStore;

/// Message sent *into* the actor
#[derive(Debug)]
pub enum RoomMsg {
    Join {
        connection_id: ConnectionId,
        username: String,
        room_name: String,
        resp_tx: oneshot::Sender<Result<u64, ChatError>>,
    },
    SendMessage {
        connection_id: ConnectionId,
        username: String,
        text: String,
        resp_tx: oneshot::Sender<Result<Message, ChatError>>,
    },
    Typing {
        connection_id: ConnectionId,
        username: String,
        active: bool,
    },
    Leave {
        connection_id: ConnectionId,
        resp_tx: oneshot::Sender<()>,
    },
    Members {
        resp_tx: oneshot::Sender<Vec<String>>,
    },
}

/// Handle that other components keep: the actor's command channel
#[derive(Clone, Debug)]
pub struct RoomHandle {
    cmd_tx: mpsc::UnboundedSender<RoomMsg>,
}

impl RoomHandle {
    /// True once the actor has retired and takes no more commands
    pub fn is_closed(&self) -> bool {
        self.cmd_tx.is_closed()
    }

    /// Bind the connection to this room; resolves to the new active user count
    pub async fn join(
        &self,
        connection_id: ConnectionId,
        username: String,
        room_name: String,
    ) -> Result<u64, ChatError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.cmd_tx.send(RoomMsg::Join {
            connection_id,
            username,
            room_name,
            resp_tx,
        })?;
        resp_rx.await?
    }

    pub async fn send_message(
        &self,
        connection_id: ConnectionId,
        username: String,
        text: String,
    ) -> Result<Message, ChatError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.cmd_tx.send(RoomMsg::SendMessage {
            connection_id,
            username,
            text,
            resp_tx,
        })?;
        resp_rx.await?
    }

    /// Fire-and-forget typing notice
    pub fn typing(&self, connection_id: ConnectionId, username: String, active: bool) -> Result<(), ChatError> {
        self.cmd_tx.send(RoomMsg::Typing {
            connection_id,
            username,
            active,
        })?;
        Ok(())
    }

    /// Remove the connection from the room.
    ///
    /// Once enqueued the leave runs to completion even if the caller stops
    /// waiting for it.
    pub async fn leave(&self, connection_id: ConnectionId) -> Result<(), ChatError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.cmd_tx.send(RoomMsg::Leave {
            connection_id,
            resp_tx,
        })?;
        Ok(resp_rx.await?)
    }

    /// Usernames currently present, sorted
    pub async fn members(&self) -> Result<Vec<String>, ChatError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.cmd_tx.send(RoomMsg::Members { resp_tx })?;
        Ok(resp_rx.await?)
    }
}

pub struct RoomActor {
    room_id: RoomId,
    store: Arc<dyn RoomStore>,
    sessions: Arc<SessionRegistry>,
    presence: RoomPresence,
}

impl RoomActor {
    pub fn new(room_id: RoomId, store: Arc<dyn RoomStore>, sessions: Arc<SessionRegistry>) -> Self {
        RoomActor {
            room_id,
            store,
            sessions,
            presence: RoomPresence::new(),
        }
    }

    #[cfg(test)]
    pub fn presence(&self) -> &RoomPresence {
        &self.presence
    }

    pub async fn handle_join(
        &mut self,
        connection_id: ConnectionId,
        username: String,
        room_name: String,
    ) -> Result<u64, ChatError> {
        // Fails if the connection closed while the join was queued; nothing
        // has been mutated yet at that point.
        let Some(outbound) = self.sessions.bind(connection_id, &self.room_id, &username) else {
            return Err(ChatError::ProtocolMisuse(
                "Connection is closed or already in a room".to_string(),
            ));
        };
        self.presence.insert(
            connection_id,
            Member {
                username: username.clone(),
                outbound,
            },
        );

        let updated = match self.store.increment_active_users(&self.room_id, 1).await {
            Ok(room) => room,
            Err(e) => {
                self.presence.remove(connection_id);
                self.sessions.unbind(connection_id);
                return Err(e);
            },
        };
        let active_users = match self.store.find_room(&self.room_id).await {
            Ok(room) => room.active_users,
            Err(e) => {
                warn!(error = %e, "re-read after join failed, using increment result");
                updated.active_users
            },
        };

        self.presence.emit(
            Audience::Except(connection_id),
            &ServerEvent::UserJoined(PresenceChange {
                message: joined_text(&username),
                username: username.clone(),
                active_users,
            }),
        );
        self.presence.emit(
            Audience::Only(connection_id),
            &ServerEvent::RoomJoined(RoomJoined {
                room_name,
                active_users,
            }),
        );

        info!(%connection_id, %username, active_users, "user joined");
        Ok(active_users)
    }

    pub async fn handle_send_message(
        &mut self,
        connection_id: ConnectionId,
        username: String,
        text: String,
    ) -> Result<Message, ChatError> {
        let message = self
            .store
            .insert_message(&self.room_id, &username, &text)
            .await?;

        let delivered = self.presence.emit(
            Audience::Everyone,
            &ServerEvent::ReceiveMessage(message.clone().into()),
        );
        debug!(%connection_id, %username, delivered, "message relayed");
        Ok(message)
    }

    pub fn handle_typing(&self, connection_id: ConnectionId, username: String, active: bool) {
        let typist = Typist { username };
        let event = if active {
            ServerEvent::UserTyping(typist)
        } else {
            ServerEvent::UserStopTyping(typist)
        };
        self.presence.emit(Audience::Except(connection_id), &event);
    }

    /// Drop a member and tell the rest of the room.
    ///
    /// Only connections that actually reached the member set are counted
    /// down, so a join that failed or never ran cannot be decremented.
    pub async fn handle_leave(&mut self, connection_id: ConnectionId) {
        let Some(member) = self.presence.remove(connection_id) else {
            debug!(%connection_id, "leave for a connection that never joined");
            return;
        };

        let updated = match self.store.increment_active_users(&self.room_id, -1).await {
            Ok(room) => Some(room.active_users),
            Err(e) if e.is_not_found() => None,
            Err(e) => {
                error!(%connection_id, error = %e, "error updating user count");
                return;
            },
        };
        let active_users = match (self.store.find_room(&self.room_id).await, updated) {
            (Ok(room), _) => room.active_users,
            (Err(e), _) if e.is_not_found() => 0,
            (Err(e), Some(count)) => {
                warn!(error = %e, "re-read after leave failed, using decrement result");
                count
            },
            (Err(e), None) => {
                error!(%connection_id, error = %e, "error reading user count");
                return;
            },
        };

        self.presence.emit(
            Audience::Everyone,
            &ServerEvent::UserLeft(PresenceChange {
                message: left_text(&member.username),
                username: member.username.clone(),
                active_users,
            }),
        );
        info!(%connection_id, username = %member.username, active_users, "user left");
    }

    /// Apply one command and produce its reply
    async fn handle(&mut self, msg: RoomMsg) -> Reply {
        match msg {
            RoomMsg::Join {
                connection_id,
                username,
                room_name,
                resp_tx,
            } => Reply::Join(
                resp_tx,
                self.handle_join(connection_id, username, room_name).await,
            ),
            RoomMsg::SendMessage {
                connection_id,
                username,
                text,
                resp_tx,
            } => Reply::SendMessage(
                resp_tx,
                self.handle_send_message(connection_id, username, text).await,
            ),
            RoomMsg::Typing {
                connection_id,
                username,
                active,
            } => {
                self.handle_typing(connection_id, username, active);
                Reply::Nothing
            },
            RoomMsg::Leave {
                connection_id,
                resp_tx,
            } => {
                self.handle_leave(connection_id).await;
                Reply::Leave(resp_tx)
            },
            RoomMsg::Members { resp_tx } => Reply::Members(resp_tx, self.presence.usernames()),
        }
    }

    /// Settle a command that was queued before the mailbox closed
    async fn handle_retired(&mut self, msg: RoomMsg) {
        match msg {
            RoomMsg::Join { resp_tx, .. } => {
                let _ = resp_tx.send(Err(ChatError::RoomClosed));
            },
            RoomMsg::Typing { .. } => {},
            other => self.handle(other).await.send(),
        }
    }

    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<RoomMsg>) {
        while let Some(msg) = rx.recv().await {
            let reply = self.handle(msg).await;
            if self.presence.is_empty() {
                // closed before replying, so a caller that sees the reply
                // also sees the handle as closed
                rx.close();
                reply.send();
                break;
            }
            reply.send();
        }

        while let Some(msg) = rx.recv().await {
            self.handle_retired(msg).await;
        }
        debug!("room actor retired");
    }
}

/// Reply owed to the sender of a command
enum Reply {
    Join(oneshot::Sender<Result<u64, ChatError>>, Result<u64, ChatError>),
    SendMessage(oneshot::Sender<Result<Message, ChatError>>, Result<Message, ChatError>),
    Leave(oneshot::Sender<()>),
    Members(oneshot::Sender<Vec<String>>, Vec<String>),
    Nothing,
}

impl Reply {
    /// The requester may have stopped waiting; that is not an error
    fn send(self) {
        match self {
            Reply::Join(tx, result) => {
                let _ = tx.send(result);
            },
            Reply::SendMessage(tx, result) => {
                let _ = tx.send(result);
            },
            Reply::Leave(tx) => {
                let _ = tx.send(());
            },
            Reply::Members(tx, names) => {
                let _ = tx.send(names);
            },
            Reply::Nothing => {},
        }
    }
}

/// Spawn a new room actor and return its handle
pub fn spawn_room_actor(
    room_id: &str,
    store: Arc<dyn RoomStore>,
    sessions: Arc<SessionRegistry>,
) -> RoomHandle {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let actor = RoomActor::new(room_id.to_string(), store, sessions);

    tokio::spawn(
        actor
            .run(cmd_rx)
            .instrument(info_span!("room", room_id = %room_id)),
    );

    RoomHandle { cmd_tx }
}
