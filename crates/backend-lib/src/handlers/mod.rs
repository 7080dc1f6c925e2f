//! HTTP request handlers.
pub mod rooms;
