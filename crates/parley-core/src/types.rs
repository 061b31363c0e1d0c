use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Connection status
// =============================================================================

/// Connection status exposed to the view.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// The first connection attempt after mount is in flight.
    Connecting,
    /// STOMP handshake completed and both broadcast channels are subscribed.
    Connected,
    /// The link was lost; an automatic or triggered attempt will follow.
    Reconnecting,
    /// The session was torn down. Terminal.
    Disconnected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::Connected => write!(f, "connected"),
            ConnectionStatus::Reconnecting => write!(f, "reconnecting"),
            ConnectionStatus::Disconnected => write!(f, "disconnected"),
        }
    }
}

impl ConnectionStatus {
    /// Returns whether a transition from `self` to `target` is valid.
    ///
    /// `Connecting` only occurs before the first handshake; later attempts
    /// stay in `Reconnecting` until they succeed. `Reconnecting -> Reconnecting`
    /// lets a newer failure or resumption replace the reason text.
    pub fn can_transition_to(&self, target: &ConnectionStatus) -> bool {
        use ConnectionStatus::*;
        matches!(
            (self, target),
            (Connecting, Connected)
                | (Connecting, Reconnecting)
                | (Connected, Reconnecting)
                | (Reconnecting, Connected)
                | (Reconnecting, Reconnecting)
                // Teardown
                | (Connecting, Disconnected)
                | (Connected, Disconnected)
                | (Reconnecting, Disconnected)
        )
    }

    /// Whether a connection attempt is either in flight or already complete.
    pub fn is_active(&self) -> bool {
        matches!(self, ConnectionStatus::Connecting | ConnectionStatus::Connected)
    }
}

// =============================================================================
// Feed entries
// =============================================================================

/// Sort key for the message feed.
///
/// Timestamp in epoch milliseconds first, then the per-session insertion
/// sequence, so two entries never compare equal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OrderingKey {
    pub timestamp_ms: i64,
    pub seq: u64,
}

/// One entry in the message feed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Server-assigned id. `None` for locally generated notices.
    pub id: Option<String>,
    /// Sender's session identity, when the server relays it.
    pub user_id: Option<String>,
    /// Sender display name.
    pub sender: String,
    pub content: String,
    /// Authoritative server timestamp.
    pub created_at: Option<DateTime<Utc>>,
    /// Client send timestamp, used when `created_at` is absent.
    pub client_sent_at: Option<DateTime<Utc>>,
    /// True for synthetic connection-lifecycle notices.
    pub is_system_notice: bool,
    /// Insertion sequence number, strictly increasing per session.
    pub seq: u64,
}

/// Display name used for system notices.
pub const SYSTEM_SENDER: &str = "system";

impl ChatMessage {
    /// Build a feed entry from a broadcast payload.
    pub fn from_inbound(payload: InboundChatMessage, seq: u64) -> Self {
        Self {
            id: payload.id.filter(|id| !id.is_empty()),
            user_id: payload.user_id,
            sender: payload.sender,
            content: payload.content,
            created_at: payload.created_at,
            client_sent_at: payload.client_sent_at,
            is_system_notice: false,
            seq,
        }
    }

    /// Build a system notice stamped with `at`.
    pub fn notice(text: impl Into<String>, at: DateTime<Utc>, seq: u64) -> Self {
        Self {
            id: None,
            user_id: None,
            sender: SYSTEM_SENDER.to_string(),
            content: text.into(),
            created_at: None,
            client_sent_at: Some(at),
            is_system_notice: true,
            seq,
        }
    }

    /// The effective timestamp: `created_at`, else `client_sent_at`, else epoch zero.
    pub fn effective_timestamp_ms(&self) -> i64 {
        self.created_at
            .or(self.client_sent_at)
            .map(|ts| ts.timestamp_millis())
            .unwrap_or(0)
    }

    pub fn ordering_key(&self) -> OrderingKey {
        OrderingKey {
            timestamp_ms: self.effective_timestamp_ms(),
            seq: self.seq,
        }
    }
}

// =============================================================================
// Wire payloads
// =============================================================================

/// Outbound chat message published to the send destination.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundChatMessage {
    pub user_id: String,
    pub sender: String,
    pub content: String,
    pub client_sent_at: DateTime<Utc>,
}

/// Chat message as broadcast on the message topic.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundChatMessage {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    pub sender: String,
    pub content: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub client_sent_at: Option<DateTime<Utc>>,
}

/// Presence count, both as broadcast and as returned by the count endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceCount {
    pub count: u32,
}

/// Best-effort join notice published after each successful connect.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinNotice {
    pub user_id: String,
    pub sender: String,
}
