// ============================
// crates/backend-lib/src/validation/mod.rs
// ============================
//! Payload validation for events and HTTP bodies.

use thiserror::Error;

const MAX_USERNAME_LENGTH: usize = 50;
const MAX_ROOM_NAME_LENGTH: usize = 100;
const MAX_ROOM_ID_LENGTH: usize = 64;

/// Possible validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid username: {0}")]
    InvalidUsername(String),

    #[error("Invalid room name: {0}")]
    InvalidRoomName(String),

    #[error("Invalid room id")]
    InvalidRoomId,

    #[error("Message must not be empty")]
    EmptyMessage,

    #[error("Message exceeds {0} characters")]
    MessageTooLong(usize),

    #[error("Invalid request body: {0}")]
    InvalidBody(String),
}

/// Result type for validation operations
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validate a username and return it trimmed
pub fn validate_username(username: &str) -> ValidationResult<&str> {
    let username = username.trim();
    if username.is_empty() {
        return Err(ValidationError::InvalidUsername(
            "Username must not be empty".to_string(),
        ));
    }
    if username.chars().count() > MAX_USERNAME_LENGTH {
        return Err(ValidationError::InvalidUsername(format!(
            "Username must be at most {MAX_USERNAME_LENGTH} characters"
        )));
    }
    Ok(username)
}

/// Validate a room display name and return it trimmed
pub fn validate_room_name(room_name: &str) -> ValidationResult<&str> {
    let room_name = room_name.trim();
    if room_name.is_empty() {
        return Err(ValidationError::InvalidRoomName(
            "Room name must not be empty".to_string(),
        ));
    }
    if room_name.chars().count() > MAX_ROOM_NAME_LENGTH {
        return Err(ValidationError::InvalidRoomName(format!(
            "Room name must be at most {MAX_ROOM_NAME_LENGTH} characters"
        )));
    }
    Ok(room_name)
}

/// Validate a room id.
///
/// Ids are alphanumeric plus hyphens; this also keeps them safe to use as
/// directory names in the flat-file store.
pub fn validate_room_id(room_id: &str) -> ValidationResult<&str> {
    let ok = !room_id.is_empty()
        && room_id.len() <= MAX_ROOM_ID_LENGTH
        && room_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
    if ok {
        Ok(room_id)
    } else {
        Err(ValidationError::InvalidRoomId)
    }
}

/// Validate message text against the configured maximum length
pub fn validate_message(text: &str, max_len: usize) -> ValidationResult<&str> {
    if text.trim().is_empty() {
        return Err(ValidationError::EmptyMessage);
    }
    if text.chars().count() > max_len {
        return Err(ValidationError::MessageTooLong(max_len));
    }
    Ok(text)
}
