//! Resumption triggers and their suppression policy.
//!
//! Environment signals that suggest the device silently dropped the link all
//! funnel into one trigger. The policy here decides whether a trigger is
//! acted on; the session core performs the resulting transition.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

/// Signals from the hosting environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentSignal {
    /// The view became visible again.
    VisibilityVisible,
    /// The window regained focus.
    WindowFocus,
    /// The view was restored from a suspended cache.
    PageRestored,
    /// The network came back online.
    NetworkOnline,
}

impl EnvironmentSignal {
    /// Reason recorded on the connection state.
    pub fn reason(&self) -> &'static str {
        match self {
            EnvironmentSignal::VisibilityVisible => "Resumed from background",
            EnvironmentSignal::WindowFocus => "Window focused",
            EnvironmentSignal::PageRestored => "Page restored",
            EnvironmentSignal::NetworkOnline => "Back online",
        }
    }

    /// Whether an accepted trigger should add a notice to the feed.
    ///
    /// Focus fires alongside visibility on most platforms and stays quiet.
    pub fn announce(&self) -> bool {
        !matches!(self, EnvironmentSignal::WindowFocus)
    }
}

impl fmt::Display for EnvironmentSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EnvironmentSignal::VisibilityVisible => "visibility",
            EnvironmentSignal::WindowFocus => "focus",
            EnvironmentSignal::PageRestored => "restore",
            EnvironmentSignal::NetworkOnline => "online",
        };
        f.write_str(name)
    }
}

/// What happened to a resumption trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumptionDecision {
    Accepted,
    /// Inside the cold-start window after mount.
    ColdStart,
    /// A connection is already in flight or established.
    AlreadyActive,
    /// Too soon after the previous accepted trigger.
    CoolingDown,
    /// The session has been torn down.
    TornDown,
}

impl ResumptionDecision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ResumptionDecision::Accepted)
    }
}

/// Time gates for resumption triggers.
#[derive(Debug)]
pub struct ResumptionPolicy {
    cold_start: Duration,
    cooldown: Duration,
    mounted_at: Instant,
    last_accepted: Option<Instant>,
}

impl ResumptionPolicy {
    pub fn new(cold_start: Duration, cooldown: Duration, mounted_at: Instant) -> Self {
        Self {
            cold_start,
            cooldown,
            mounted_at,
            last_accepted: None,
        }
    }

    /// Apply the time gates and record acceptance.
    ///
    /// `active` is true while the link is connecting or connected. The
    /// checks run in order: cold start, active link, cooldown.
    pub fn evaluate(&mut self, active: bool, now: Instant) -> ResumptionDecision {
        if now.saturating_duration_since(self.mounted_at) < self.cold_start {
            return ResumptionDecision::ColdStart;
        }
        if active {
            return ResumptionDecision::AlreadyActive;
        }
        if let Some(last) = self.last_accepted {
            if now.saturating_duration_since(last) < self.cooldown {
                return ResumptionDecision::CoolingDown;
            }
        }
        self.last_accepted = Some(now);
        ResumptionDecision::Accepted
    }
}
