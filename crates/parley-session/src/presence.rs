//! Presence reconciliation.
//!
//! Two paths feed one count: broadcast pushes on the presence topic, and
//! pulls from the counting endpoint. Every pull carries a ticket so a slow
//! reply can never overwrite a newer one.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use parley_core::{ParleyConfig, PresenceCount};

use crate::error::SessionError;

/// Source of authoritative presence counts.
#[async_trait]
pub trait PresenceSource: Send + Sync + 'static {
    async fn fetch_count(&self) -> Result<u32, SessionError>;
}

/// Queries the backend's counting endpoint over HTTP.
#[derive(Debug, Clone)]
pub struct HttpPresenceClient {
    url: String,
    timeout: Duration,
    http: reqwest::Client,
}

impl HttpPresenceClient {
    pub fn new(url: impl Into<String>, timeout: Duration, http: reqwest::Client) -> Self {
        Self {
            url: url.into(),
            timeout,
            http,
        }
    }

    /// Build from `broker.base_url` + `presence.count_path`.
    pub fn from_config(config: &ParleyConfig, http: reqwest::Client) -> Self {
        let url = format!(
            "{}{}",
            config.broker.base_url.trim_end_matches('/'),
            config.presence.count_path
        );
        Self::new(
            url,
            Duration::from_millis(config.presence.request_timeout_ms),
            http,
        )
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl PresenceSource for HttpPresenceClient {
    async fn fetch_count(&self) -> Result<u32, SessionError> {
        let response = self
            .http
            .get(&self.url)
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?;
        let body: PresenceCount = response.json().await?;
        Ok(body.count)
    }
}

/// The displayed presence count plus pull bookkeeping.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    count: Option<u32>,
    issued: u64,
    applied: u64,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last known count, `None` until the first update.
    pub fn count(&self) -> Option<u32> {
        self.count
    }

    /// Allocate a ticket for a new pull.
    pub fn begin_pull(&mut self) -> u64 {
        self.issued += 1;
        self.issued
    }

    /// Apply a pull reply. Returns true if the displayed value changed.
    ///
    /// Replies older than the newest applied pull are ignored.
    pub fn complete_pull(&mut self, ticket: u64, count: u32) -> bool {
        if ticket <= self.applied {
            debug!(ticket, applied = self.applied, "Ignoring stale presence reply");
            return false;
        }
        self.applied = ticket;
        self.set(count)
    }

    /// Apply a broadcast push. Returns true if the displayed value changed.
    pub fn apply_push(&mut self, count: u32) -> bool {
        self.set(count)
    }

    fn set(&mut self, count: u32) -> bool {
        if self.count == Some(count) {
            return false;
        }
        self.count = Some(count);
        true
    }
}
