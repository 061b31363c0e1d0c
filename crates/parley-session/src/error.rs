//! Error types for the chat session manager.

use parley_core::ConnectionStatus;
use parley_stomp::StompError;

/// Errors surfaced by the session manager.
///
/// Connection failures are not errors here: they degrade to `reconnecting`.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("message cannot be empty")]
    EmptyMessage,
    #[error("message exceeds maximum length of {0} characters")]
    MessageTooLong(usize),
    #[error("invalid connection transition: {from} -> {to}")]
    InvalidTransition {
        from: ConnectionStatus,
        to: ConnectionStatus,
    },
    #[error("session has shut down")]
    ShutDown,
    #[error("presence query failed: {0}")]
    Presence(String),
    #[error("broker error: {0}")]
    Broker(String),
}

impl From<StompError> for SessionError {
    fn from(err: StompError) -> Self {
        SessionError::Broker(err.to_string())
    }
}

impl From<reqwest::Error> for SessionError {
    fn from(err: reqwest::Error) -> Self {
        SessionError::Presence(err.to_string())
    }
}
