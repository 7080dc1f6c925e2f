// ============================
// crates/backend-lib/src/lib.rs
// ============================
//! Core backend functionality for the chat room server.
//!
//! Connections arrive on the WebSocket router, are registered with the
//! [`coordinator::Coordinator`] and fan their events out through one
//! [`room_actor`] per room. Rooms and messages live behind the
//! [`storage::RoomStore`] trait.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod presence;
pub mod room_actor;
pub mod session;
pub mod storage;
pub mod validation;
pub mod ws_router;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;

use crate::config::{Settings, StorageBackend};
use crate::coordinator::{Coordinator, CoordinatorConfig};
use crate::error::ChatError;
use crate::storage::{FlatFileStorage, MemoryStore, RoomStore};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    /// Session and room coordinator
    pub coordinator: Arc<Coordinator>,
    /// Storage backend
    pub store: Arc<dyn RoomStore>,
    /// Settings the server was started with
    pub settings: Arc<Settings>,
}

impl AppState {
    /// Create a new application state over an existing store
    pub fn new(store: Arc<dyn RoomStore>, settings: Settings) -> Self {
        let coordinator = Arc::new(Coordinator::new(
            store.clone(),
            CoordinatorConfig::from(&settings),
        ));

        Self {
            coordinator,
            store,
            settings: Arc::new(settings),
        }
    }

    /// Create the state with the storage backend named in the settings
    pub fn from_settings(settings: Settings) -> Result<Self, ChatError> {
        let store: Arc<dyn RoomStore> = match settings.storage {
            StorageBackend::File => Arc::new(FlatFileStorage::new(&settings.data_dir)?),
            StorageBackend::Memory => Arc::new(MemoryStore::new()),
        };
        Ok(Self::new(store, settings))
    }

    /// Default settings over a fresh in-memory store
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), Settings::default())
    }
}
