//! Connection state machine.
//!
//! Valid transitions:
//! - Connecting -> Connected (first handshake)
//! - Connecting/Connected -> Reconnecting (failure, resumption, offline send)
//! - Reconnecting -> Reconnecting (newer reason)
//! - Reconnecting -> Connected (retry succeeded)
//! - any live state -> Disconnected (teardown)

use parley_core::ConnectionStatus;

use crate::error::SessionError;

/// Current status plus an optional diagnostic reason.
///
/// Every change goes through [`ConnectionState::transition`], which bumps a
/// revision only when the visible value actually changes.
#[derive(Debug, Clone)]
pub struct ConnectionState {
    status: ConnectionStatus,
    reason: Option<String>,
    revision: u64,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionState {
    /// Start in `Connecting`.
    pub fn new() -> Self {
        Self {
            status: ConnectionStatus::Connecting,
            reason: None,
            revision: 0,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Move to `target` with `reason`.
    ///
    /// Returns `Ok(true)` if the visible state changed, `Ok(false)` for a
    /// permitted no-op (same status and reason).
    pub fn transition(
        &mut self,
        target: ConnectionStatus,
        reason: Option<String>,
    ) -> Result<bool, SessionError> {
        if !self.status.can_transition_to(&target) {
            return Err(SessionError::InvalidTransition {
                from: self.status,
                to: target,
            });
        }
        if self.status == target && self.reason == reason {
            return Ok(false);
        }
        tracing::debug!(
            from = %self.status,
            to = %target,
            reason = reason.as_deref().unwrap_or(""),
            "Connection state"
        );
        self.status = target;
        self.reason = reason;
        self.revision += 1;
        Ok(true)
    }
}
