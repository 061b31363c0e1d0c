//! The ordered, deduplicated message feed.
//!
//! Entries are kept sorted by [`parley_core::OrderingKey`]: effective timestamp, then an
//! insertion sequence shared by broadcast messages and system notices. Each
//! insertion lands at its binary-searched position, so the feed is ordered
//! after every call without a full re-sort.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::debug;

use parley_core::{ChatMessage, InboundChatMessage};

/// Result of offering one broadcast frame to the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Inserted,
    /// The server id was already seen.
    Duplicate,
    /// The body did not parse as a chat message.
    Malformed,
}

#[derive(Debug)]
pub struct MessageFeed {
    entries: Vec<ChatMessage>,
    seen_ids: HashSet<String>,
    next_seq: u64,
}

impl Default for MessageFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageFeed {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            seen_ids: HashSet::new(),
            next_seq: 1,
        }
    }

    pub fn entries(&self) -> &[ChatMessage] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse a broadcast body and merge it.
    pub fn ingest_json(&mut self, body: &str) -> IngestOutcome {
        match serde_json::from_str::<InboundChatMessage>(body) {
            Ok(payload) => self.ingest(payload),
            Err(e) => {
                debug!(error = %e, "Dropping malformed chat message");
                IngestOutcome::Malformed
            }
        }
    }

    pub fn ingest(&mut self, payload: InboundChatMessage) -> IngestOutcome {
        if let Some(id) = payload.id.as_deref().filter(|id| !id.is_empty()) {
            if !self.seen_ids.insert(id.to_string()) {
                debug!(id, "Dropping duplicate chat message");
                return IngestOutcome::Duplicate;
            }
        }
        let seq = self.take_seq();
        self.insert(ChatMessage::from_inbound(payload, seq));
        IngestOutcome::Inserted
    }

    /// Insert a system notice stamped `at`. Returns its sequence number.
    pub fn push_notice(&mut self, text: &str, at: DateTime<Utc>) -> u64 {
        let seq = self.take_seq();
        self.insert(ChatMessage::notice(text, at, seq));
        seq
    }

    fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq = seq + 1;
        seq
    }

    fn insert(&mut self, message: ChatMessage) {
        let key = message.ordering_key();
        let at = self.entries.partition_point(|e| e.ordering_key() < key);
        self.entries.insert(at, message);
    }
}
