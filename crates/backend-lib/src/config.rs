// ============================
// crates/backend-lib/src/config.rs
// ============================
//! Configuration management.
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default config file looked up in the working directory
pub const CONFIG_FILE: &str = "chatroom.toml";
/// Prefix of environment overrides, e.g. `CHATROOM_BIND_ADDR`
pub const ENV_PREFIX: &str = "CHATROOM_";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<figment::Error> for SettingsError {
    fn from(err: figment::Error) -> Self {
        SettingsError::Load(Box::new(err))
    }
}

/// Which persistent store backs rooms and messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// JSON files under `data_dir`
    File,
    /// Process memory; lost on restart
    Memory,
}

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Server bind address
    pub bind_addr: SocketAddr,
    /// Data directory path for the flat-file store
    pub data_dir: PathBuf,
    /// Storage backend
    pub storage: StorageBackend,
    /// Log level, overridden by `RUST_LOG`
    pub log_level: String,
    /// Most recent messages returned by the history endpoint
    pub history_limit: usize,
    /// Per-connection queue of outbound events; overflow is dropped
    pub outbound_buffer: usize,
    /// Longest accepted chat message, in characters
    pub max_message_len: usize,
    /// Reject room events whose room id differs from the connection's room
    pub strict_membership: bool,
    /// Allowed CORS origin; any origin when unset
    pub cors_origin: Option<String>,
    /// Base URL of the web client, used to build shareable room links
    pub public_base_url: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 5000)),
            data_dir: PathBuf::from("data"),
            storage: StorageBackend::File,
            log_level: "info".to_string(),
            history_limit: 100,
            outbound_buffer: 32,
            max_message_len: 2000,
            strict_membership: true,
            cors_origin: None,
            public_base_url: "http://localhost:3000".to_string(),
        }
    }
}

impl Settings {
    /// Check invariants figment cannot express
    pub fn validate(&self) -> Result<(), SettingsError> {
        if !LOG_LEVELS.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            return Err(SettingsError::Invalid(format!(
                "unknown log level '{}'",
                self.log_level
            )));
        }
        if self.history_limit == 0 {
            return Err(SettingsError::Invalid("history_limit must be positive".into()));
        }
        if self.outbound_buffer == 0 {
            return Err(SettingsError::Invalid("outbound_buffer must be positive".into()));
        }
        if self.max_message_len == 0 {
            return Err(SettingsError::Invalid("max_message_len must be positive".into()));
        }
        Ok(())
    }

    /// Link handed out when a room is created
    pub fn room_link(&self, room_id: &str) -> String {
        format!("{}/room/{room_id}", self.public_base_url.trim_end_matches('/'))
    }
}

fn figment_for(path: &Path) -> Figment {
    Figment::from(Serialized::defaults(Settings::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX))
}

/// Load settings from `chatroom.toml` and `CHATROOM_*` variables
pub fn load_settings() -> Result<Settings, SettingsError> {
    load_settings_from(CONFIG_FILE)
}

/// Load settings from an explicit TOML file, then environment overrides
pub fn load_settings_from<P: AsRef<Path>>(path: P) -> Result<Settings, SettingsError> {
    let settings: Settings = figment_for(path.as_ref()).extract()?;
    settings.validate()?;
    Ok(settings)
}
