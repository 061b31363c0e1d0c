//! System notice generation with a textual dedup window.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

/// Lifecycle notices shown in the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Link came back after having been connected before.
    Reconnected,
    /// The broker sent an ERROR frame.
    ProtocolError,
    /// The transport failed or went silent.
    TransportError,
    /// The transport closed.
    ConnectionClosed,
    /// A send was attempted while the link was down.
    SendWhileDisconnected,
    /// An accepted resumption trigger that asked to be announced.
    Resuming(String),
}

impl Notice {
    pub fn text(&self) -> String {
        match self {
            Notice::Reconnected => "Connected again.".to_string(),
            Notice::ProtocolError => "Connection error. Reconnecting...".to_string(),
            Notice::TransportError => "Network error. Reconnecting...".to_string(),
            Notice::ConnectionClosed => "Connection lost. Reconnecting...".to_string(),
            Notice::SendWhileDisconnected => {
                "Message not sent: not connected. Reconnecting...".to_string()
            }
            Notice::Resuming(reason) => format!("{reason}. Reconnecting..."),
        }
    }
}

/// Remembers when each notice text was last shown.
///
/// The set of distinct texts is small and fixed, so entries are never evicted.
#[derive(Debug)]
pub struct NoticeLedger {
    window: Duration,
    last_shown: HashMap<String, Instant>,
}

impl NoticeLedger {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_shown: HashMap::new(),
        }
    }

    /// Returns true if `text` may be shown at `now`, and records it.
    ///
    /// A repeat exactly `window` after the previous showing is admitted.
    pub fn admit(&mut self, text: &str, now: Instant) -> bool {
        if let Some(&previous) = self.last_shown.get(text) {
            if now.saturating_duration_since(previous) < self.window {
                debug!(notice = text, "Suppressing duplicate notice");
                return false;
            }
        }
        self.last_shown.insert(text.to_string(), now);
        true
    }
}
