//! Error types for the STOMP/SockJS layer.

/// Errors from framing, transports, and the STOMP handshake.
#[derive(Debug, thiserror::Error)]
pub enum StompError {
    #[error("malformed STOMP frame: {0}")]
    Frame(String),
    #[error("malformed SockJS frame: {0}")]
    SockJs(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("broker error: {0}")]
    Protocol(String),
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("connection closed")]
    Closed,
    #[error("invalid URL: {0}")]
    Url(String),
}

impl From<reqwest::Error> for StompError {
    fn from(err: reqwest::Error) -> Self {
        StompError::Http(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for StompError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        StompError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for StompError {
    fn from(err: serde_json::Error) -> Self {
        StompError::SockJs(err.to_string())
    }
}
