// crates/backend-lib/src/error.rs

//! Central error type + Axum integration.
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::validation::ValidationError;

/// Reason sent to a client whose join attempt failed inside the store
pub const JOIN_FAILED: &str = "Failed to join room";
/// Reason sent to a client whose message could not be persisted
pub const SEND_FAILED: &str = "Failed to send message";

/// Application error types with error codes and context
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    #[error("Room actor has retired")]
    RoomClosed,

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    ProtocolMisuse(String),

    #[error(transparent)]
    InvalidInput(#[from] ValidationError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChatError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ChatError::RoomNotFound(_) => StatusCode::NOT_FOUND,
            ChatError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ChatError::ProtocolMisuse(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            ChatError::RoomNotFound(_) => "ROOM_001",
            ChatError::RoomClosed => "ROOM_002",
            ChatError::Persistence(_) => "STORE_001",
            ChatError::Io(_) => "IO_001",
            ChatError::Json(_) => "JSON_001",
            ChatError::ProtocolMisuse(_) => "PROTO_001",
            ChatError::InvalidInput(_) => "VAL_001",
            ChatError::Internal(_) => "INT_001",
        }
    }

    /// Get a sanitized message suitable for production use
    pub fn sanitized_message(&self) -> String {
        match self {
            ChatError::RoomNotFound(_) => "Room not found".to_string(),
            ChatError::InvalidInput(e) => e.to_string(),
            ChatError::ProtocolMisuse(msg) => msg.clone(),
            _ => "An internal server error occurred".to_string(),
        }
    }

    /// Reason carried by the `error` event sent back to the client.
    ///
    /// Store failures collapse to `fallback` so internals never leak to peers.
    pub fn client_reason(&self, fallback: &str) -> String {
        match self {
            ChatError::RoomNotFound(_) => "Room not found".to_string(),
            ChatError::ProtocolMisuse(msg) => msg.clone(),
            ChatError::InvalidInput(e) => e.to_string(),
            _ => fallback.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ChatError::RoomNotFound(_))
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();

        // Use detailed messages in development, sanitized in production
        let message = if cfg!(debug_assertions) {
            self.to_string()
        } else {
            self.sanitized_message()
        };

        if status.is_server_error() {
            tracing::error!(code = error_code, error = %self, "request failed");
        }

        let body = serde_json::json!({
            "success": false,
            "error": {
                "code": error_code,
                "message": message,
            }
        });

        (status, axum::Json(body)).into_response()
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for ChatError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        ChatError::RoomClosed
    }
}

impl From<axum::extract::rejection::JsonRejection> for ChatError {
    fn from(rejection: axum::extract::rejection::JsonRejection) -> Self {
        ChatError::InvalidInput(ValidationError::InvalidBody(rejection.body_text()))
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for ChatError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        ChatError::Internal("Room actor dropped the request".to_string())
    }
}
