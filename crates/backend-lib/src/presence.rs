// ============================
// crates/backend-lib/src/presence.rs
// ============================
//! Live membership of one room and event fan-out to its connections.
//!
//! Delivery is at-most-once: events are pushed with `try_send`, so a member
//! whose queue is full or whose writer has gone away simply misses them.
use std::collections::HashMap;

use chatroom_common::ServerEvent;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::metrics::EVENTS_DROPPED;
use crate::session::{ConnectionId, Outbound};

#[derive(Debug, Clone)]
pub struct Member {
    pub username: String,
    pub outbound: Outbound,
}

/// Which members of a room an event goes to
#[derive(Debug, Clone, Copy)]
pub enum Audience {
    /// One connection only
    Only(ConnectionId),
    /// Everyone but one connection
    Except(ConnectionId),
    /// Every member
    Everyone,
}

#[derive(Debug, Default)]
pub struct RoomPresence {
    members: HashMap<ConnectionId, Member>,
}

impl RoomPresence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, connection_id: ConnectionId, member: Member) {
        self.members.insert(connection_id, member);
    }

    pub fn remove(&mut self, connection_id: ConnectionId) -> Option<Member> {
        self.members.remove(&connection_id)
    }

    #[cfg(test)]
    pub fn contains(&self, connection_id: ConnectionId) -> bool {
        self.members.contains_key(&connection_id)
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Usernames of current members, sorted
    pub fn usernames(&self) -> Vec<String> {
        let mut names: Vec<String> = self.members.values().map(|m| m.username.clone()).collect();
        names.sort();
        names
    }

    /// Push `event` to the chosen audience; returns how many queues accepted it
    pub fn emit(&self, audience: Audience, event: &ServerEvent) -> usize {
        let mut delivered = 0;
        for (id, member) in &self.members {
            let wanted = match audience {
                Audience::Only(target) => *id == target,
                Audience::Except(skip) => *id != skip,
                Audience::Everyone => true,
            };
            if wanted && deliver(*id, member, event.clone()) {
                delivered += 1;
            }
        }
        delivered
    }
}

fn deliver(connection_id: ConnectionId, member: &Member, event: ServerEvent) -> bool {
    match member.outbound.try_send(event) {
        Ok(()) => true,
        Err(TrySendError::Full(event)) => {
            warn!(%connection_id, event = event.name(), "outbound queue full, dropping event");
            ::metrics::counter!(EVENTS_DROPPED).increment(1);
            false
        },
        Err(TrySendError::Closed(event)) => {
            debug!(%connection_id, event = event.name(), "connection already gone");
            false
        },
    }
}
