//! The session core: every state change of the chat session manager.
//!
//! `SessionCore` performs no I/O and reads no clock. Callers pass the current
//! [`Instant`] and collect [`Command`]s with [`SessionCore::drain_commands`];
//! the async driver in [`crate::manager`] executes them. All transitions go
//! through [`ConnectionState::transition`].

use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use parley_core::{
    ChatMessage, ConnectionStatus, JoinNotice, OutboundChatMessage, PresenceCount,
    SessionIdentity,
};
use parley_stomp::ConnectRequest;

use crate::error::SessionError;
use crate::feed::{IngestOutcome, MessageFeed};
use crate::notice::{Notice, NoticeLedger};
use crate::presence::PresenceTracker;
use crate::resumption::{EnvironmentSignal, ResumptionDecision, ResumptionPolicy};
use crate::settings::SessionSettings;
use crate::state::ConnectionState;

/// Side effects requested by the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Open a new broker link.
    Connect(ConnectRequest),
    /// Close the current link, or abandon an attempt in flight.
    CloseLink,
    Subscribe(String),
    Publish { destination: String, body: String },
    /// Query the counting endpoint; hand the reply back with `ticket`.
    QueryPresence { ticket: u64 },
    /// Call [`SessionCore::presence_pull_due`] after the delay.
    SchedulePresencePull { after: Duration },
    /// Call [`SessionCore::on_reconnect_due`] after the delay.
    ScheduleReconnect { after: Duration },
    CancelReconnect,
}

/// How the broker link failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkFailure {
    /// ERROR frame, with its message when present.
    Protocol(Option<String>),
    /// Transport-level failure.
    Transport(Option<String>),
    /// The link closed, with the close code when known.
    Closed(Option<u16>),
}

impl LinkFailure {
    /// Diagnostic reason for the connection state.
    pub fn reason(&self) -> String {
        match self {
            LinkFailure::Protocol(Some(message)) if !message.is_empty() => message.clone(),
            LinkFailure::Protocol(_) => "protocol error".to_string(),
            LinkFailure::Transport(_) => "transport error".to_string(),
            LinkFailure::Closed(Some(code)) => format!("connection closed (code {code})"),
            LinkFailure::Closed(None) => "connection closed".to_string(),
        }
    }

    fn notice(&self) -> Notice {
        match self {
            LinkFailure::Protocol(_) => Notice::ProtocolError,
            LinkFailure::Transport(_) => Notice::TransportError,
            LinkFailure::Closed(_) => Notice::ConnectionClosed,
        }
    }
}

/// Result of [`SessionCore::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Handed to the broker link.
    Published,
    /// Dropped; the link was down and a reconnect was started.
    NotConnected,
}

/// Everything the view renders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub messages: Vec<ChatMessage>,
    pub presence: Option<u32>,
    pub status: ConnectionStatus,
    pub reason: Option<String>,
    /// Bumped on every visible change.
    pub revision: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkPhase {
    Idle,
    Opening,
    Open,
}

pub struct SessionCore {
    settings: SessionSettings,
    identity: SessionIdentity,
    state: ConnectionState,
    feed: MessageFeed,
    notices: NoticeLedger,
    presence: PresenceTracker,
    policy: ResumptionPolicy,
    link: LinkPhase,
    ever_connected: bool,
    reconnect_pending: bool,
    revision: u64,
    outbox: Vec<Command>,
}

impl SessionCore {
    pub fn new(settings: SessionSettings, identity: SessionIdentity, now: Instant) -> Self {
        let notices = NoticeLedger::new(settings.notice_window);
        let policy = ResumptionPolicy::new(settings.cold_start, settings.cooldown, now);
        Self {
            settings,
            identity,
            state: ConnectionState::new(),
            feed: MessageFeed::new(),
            notices,
            presence: PresenceTracker::new(),
            policy,
            link: LinkPhase::Idle,
            ever_connected: false,
            reconnect_pending: false,
            revision: 0,
            outbox: Vec::new(),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state.status()
    }

    pub fn reason(&self) -> Option<&str> {
        self.state.reason()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn ever_connected(&self) -> bool {
        self.ever_connected
    }

    pub fn messages(&self) -> &[ChatMessage] {
        self.feed.entries()
    }

    pub fn presence(&self) -> Option<u32> {
        self.presence.count()
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            messages: self.feed.entries().to_vec(),
            presence: self.presence.count(),
            status: self.state.status(),
            reason: self.state.reason().map(str::to_string),
            revision: self.revision,
        }
    }

    /// Take the commands queued since the last call.
    pub fn drain_commands(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.outbox)
    }

    // =========================================================================
    // Connection lifecycle
    // =========================================================================

    /// Open the first link.
    pub fn mount(&mut self) {
        if self.link != LinkPhase::Idle || self.status() != ConnectionStatus::Connecting {
            return;
        }
        info!(user_id = %self.identity.id, nickname = %self.identity.nickname, "Mounting chat session");
        self.open_link();
    }

    /// The handshake completed on the link requested by the last `Connect`.
    pub fn on_link_opened(&mut self, now: Instant) {
        if self.link != LinkPhase::Opening || self.status() == ConnectionStatus::Disconnected {
            debug!("Ignoring link that is no longer wanted");
            return;
        }
        self.link = LinkPhase::Open;
        let reconnected = self.ever_connected;
        self.transition(ConnectionStatus::Connected, None);
        self.ever_connected = true;
        info!(reconnected, "Chat session connected");
        if reconnected {
            self.notify(Notice::Reconnected, now);
        }

        self.outbox
            .push(Command::Subscribe(self.settings.message_topic.clone()));
        self.outbox
            .push(Command::Subscribe(self.settings.presence_topic.clone()));
        self.pull_presence();
        self.publish_join();
    }

    /// The link failed, closed, or could not be opened.
    pub fn on_link_failed(&mut self, failure: LinkFailure, now: Instant) {
        if self.status() == ConnectionStatus::Disconnected {
            return;
        }
        warn!(reason = %failure.reason(), "Broker link lost");
        self.link = LinkPhase::Idle;
        self.outbox.push(Command::CloseLink);
        self.transition(ConnectionStatus::Reconnecting, Some(failure.reason()));
        if self.ever_connected {
            self.notify(failure.notice(), now);
        }
        if !self.reconnect_pending {
            self.reconnect_pending = true;
            self.outbox.push(Command::ScheduleReconnect {
                after: self.settings.reconnect_delay,
            });
        }
    }

    /// The fixed-delay reconnect timer fired.
    pub fn on_reconnect_due(&mut self) {
        self.reconnect_pending = false;
        if self.status() == ConnectionStatus::Reconnecting {
            self.rearm();
        }
    }

    /// Tear the session down. Terminal, and silent.
    pub fn teardown(&mut self) {
        if self.status() == ConnectionStatus::Disconnected {
            return;
        }
        info!("Tearing down chat session");
        self.transition(ConnectionStatus::Disconnected, None);
        self.link = LinkPhase::Idle;
        self.reconnect_pending = false;
        self.outbox.push(Command::CloseLink);
        self.outbox.push(Command::CancelReconnect);
    }

    /// Start a link attempt unless one is already open or in flight.
    fn rearm(&mut self) {
        if self.link != LinkPhase::Idle {
            return;
        }
        if self.reconnect_pending {
            self.reconnect_pending = false;
            self.outbox.push(Command::CancelReconnect);
        }
        self.open_link();
    }

    fn open_link(&mut self) {
        self.link = LinkPhase::Opening;
        self.outbox.push(Command::Connect(ConnectRequest {
            headers: vec![(
                self.settings.identity_header.clone(),
                self.identity.id.clone(),
            )],
            heart_beat: self.settings.heart_beat,
        }));
    }

    // =========================================================================
    // Resumption
    // =========================================================================

    /// Shared entry point for every resumption trigger.
    pub fn request_resumption(
        &mut self,
        reason: &str,
        announce: bool,
        now: Instant,
    ) -> ResumptionDecision {
        if self.status() == ConnectionStatus::Disconnected {
            return ResumptionDecision::TornDown;
        }
        let decision = self.policy.evaluate(self.status().is_active(), now);
        if !decision.is_accepted() {
            debug!(reason, ?decision, "Resumption trigger ignored");
            return decision;
        }

        info!(reason, "Resuming chat session");
        self.transition(ConnectionStatus::Reconnecting, Some(reason.to_string()));
        if announce && self.ever_connected {
            self.notify(Notice::Resuming(reason.to_string()), now);
        }
        self.rearm();
        self.pull_presence();
        decision
    }

    pub fn on_environment_signal(
        &mut self,
        signal: EnvironmentSignal,
        now: Instant,
    ) -> ResumptionDecision {
        debug!(%signal, "Environment signal");
        self.request_resumption(signal.reason(), signal.announce(), now)
    }

    // =========================================================================
    // Messages
    // =========================================================================

    /// Publish `text` as a chat message.
    ///
    /// While the link is down nothing is published: the state is forced to
    /// `reconnecting` and the link is re-armed.
    pub fn send(&mut self, text: &str, now: Instant) -> Result<SendOutcome, SessionError> {
        if self.status() == ConnectionStatus::Disconnected {
            return Err(SessionError::ShutDown);
        }
        let content = text.trim();
        if content.is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        if content.chars().count() > self.settings.max_message_length {
            return Err(SessionError::MessageTooLong(self.settings.max_message_length));
        }

        if self.status() != ConnectionStatus::Connected || self.link != LinkPhase::Open {
            warn!("Message not sent: not connected");
            let reason = self
                .state
                .reason()
                .map(str::to_string)
                .unwrap_or_else(|| "not connected".to_string());
            self.transition(ConnectionStatus::Reconnecting, Some(reason));
            if self.ever_connected {
                self.notify(Notice::SendWhileDisconnected, now);
            }
            self.rearm();
            return Ok(SendOutcome::NotConnected);
        }

        let payload = OutboundChatMessage {
            user_id: self.identity.id.clone(),
            sender: self.identity.nickname.clone(),
            content: content.to_string(),
            client_sent_at: Utc::now(),
        };
        match serde_json::to_string(&payload) {
            Ok(body) => {
                self.outbox.push(Command::Publish {
                    destination: self.settings.send_destination.clone(),
                    body,
                });
                Ok(SendOutcome::Published)
            }
            Err(e) => Err(SessionError::Broker(e.to_string())),
        }
    }

    /// A MESSAGE frame arrived on `destination`.
    pub fn on_frame(&mut self, destination: &str, body: &str) {
        if self.status() == ConnectionStatus::Disconnected {
            return;
        }
        if destination == self.settings.message_topic {
            if self.feed.ingest_json(body) == IngestOutcome::Inserted {
                self.bump();
            }
        } else if destination == self.settings.presence_topic {
            match serde_json::from_str::<PresenceCount>(body) {
                Ok(push) => {
                    if self.presence.apply_push(push.count) {
                        self.bump();
                    }
                }
                Err(e) => debug!(error = %e, "Dropping malformed presence frame"),
            }
        } else {
            debug!(destination, "Frame for unknown destination");
        }
    }

    // =========================================================================
    // Presence
    // =========================================================================

    /// A delayed presence pull is due.
    pub fn presence_pull_due(&mut self) {
        if self.status() == ConnectionStatus::Disconnected {
            return;
        }
        let ticket = self.presence.begin_pull();
        self.outbox.push(Command::QueryPresence { ticket });
    }

    /// A presence query finished. Failures leave the count as it was.
    pub fn on_presence_reply(&mut self, ticket: u64, result: Result<u32, SessionError>) {
        if self.status() == ConnectionStatus::Disconnected {
            return;
        }
        match result {
            Ok(count) => {
                if self.presence.complete_pull(ticket, count) {
                    debug!(ticket, count, "Presence reconciled");
                    self.bump();
                }
            }
            Err(e) => debug!(ticket, error = %e, "Presence query failed"),
        }
    }

    /// Pull now and again after the recheck delay.
    fn pull_presence(&mut self) {
        let ticket = self.presence.begin_pull();
        self.outbox.push(Command::QueryPresence { ticket });
        self.outbox.push(Command::SchedulePresencePull {
            after: self.settings.presence_recheck,
        });
    }

    fn publish_join(&mut self) {
        let Some(destination) = self.settings.join_destination.clone() else {
            return;
        };
        let notice = JoinNotice {
            user_id: self.identity.id.clone(),
            sender: self.identity.nickname.clone(),
        };
        match serde_json::to_string(&notice) {
            Ok(body) => self.outbox.push(Command::Publish { destination, body }),
            Err(e) => debug!(error = %e, "Skipping join notice"),
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn transition(&mut self, target: ConnectionStatus, reason: Option<String>) {
        match self.state.transition(target, reason) {
            Ok(true) => self.bump(),
            Ok(false) => {}
            Err(e) => debug!(error = %e, "Transition rejected"),
        }
    }

    fn notify(&mut self, notice: Notice, now: Instant) {
        let text = notice.text();
        if self.notices.admit(&text, now) {
            self.feed.push_notice(&text, Utc::now());
            self.bump();
        }
    }

    fn bump(&mut self) {
        self.revision += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn new_core() -> (SessionCore, Instant) {
        let t0 = Instant::now();
        let identity = SessionIdentity::from_id("7f3c2a10-0000-4000-8000-00000000abcd");
        let mut core = SessionCore::new(SessionSettings::default(), identity, t0);
        core.mount();
        (core, t0)
    }

    /// A core that has completed its first handshake, commands drained.
    fn connected_core() -> (SessionCore, Instant) {
        let (mut core, t0) = new_core();
        core.on_link_opened(t0 + ms(100));
        core.drain_commands();
        (core, t0)
    }

    fn notices(core: &SessionCore) -> Vec<String> {
        core.messages()
            .iter()
            .filter(|m| m.is_system_notice)
            .map(|m| m.content.clone())
            .collect()
    }

    fn count_connects(commands: &[Command]) -> usize {
        commands
            .iter()
            .filter(|c| matches!(c, Command::Connect(_)))
            .count()
    }

    fn has_publish(commands: &[Command]) -> bool {
        commands
            .iter()
            .any(|c| matches!(c, Command::Publish { .. }))
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    #[test]
    fn test_mount_opens_one_link_with_identity_header() {
        let (mut core, _) = new_core();
        let commands = core.drain_commands();
        assert_eq!(commands.len(), 1);
        match &commands[0] {
            Command::Connect(request) => {
                assert_eq!(
                    request.headers,
                    vec![(
                        "userId".to_string(),
                        "7f3c2a10-0000-4000-8000-00000000abcd".to_string()
                    )]
                );
                assert_eq!(request.heart_beat.outgoing_ms, 0);
                assert_eq!(request.heart_beat.incoming_ms, 10_000);
            }
            other => panic!("expected connect, got {other:?}"),
        }
        assert_eq!(core.status(), ConnectionStatus::Connecting);

        core.mount();
        assert!(core.drain_commands().is_empty());
    }

    #[test]
    fn test_connect_subscribes_both_topics_then_pulls_presence() {
        let (mut core, t0) = new_core();
        core.drain_commands();
        core.on_link_opened(t0 + ms(50));

        assert_eq!(core.status(), ConnectionStatus::Connected);
        assert_eq!(core.reason(), None);
        let commands = core.drain_commands();
        assert_eq!(commands[0], Command::Subscribe("/topic/messages".into()));
        assert_eq!(commands[1], Command::Subscribe("/topic/presence".into()));
        assert_eq!(commands[2], Command::QueryPresence { ticket: 1 });
        assert_eq!(commands[3], Command::SchedulePresencePull { after: ms(200) });
        match &commands[4] {
            Command::Publish { destination, body } => {
                assert_eq!(destination, "/app/chat.join");
                assert!(body.contains("\"userId\""));
            }
            other => panic!("expected join publish, got {other:?}"),
        }
        // First connect is silent.
        assert!(notices(&core).is_empty());
    }

    #[test]
    fn test_join_notice_can_be_disabled() {
        let t0 = Instant::now();
        let settings = SessionSettings {
            join_destination: None,
            ..SessionSettings::default()
        };
        let mut core = SessionCore::new(settings, SessionIdentity::generate(), t0);
        core.mount();
        core.on_link_opened(t0);
        assert!(!has_publish(&core.drain_commands()));
    }

    #[test]
    fn test_first_attempt_failure_is_silent() {
        let (mut core, t0) = new_core();
        core.drain_commands();
        core.on_link_failed(LinkFailure::Transport(Some("refused".into())), t0 + ms(20));

        assert_eq!(core.status(), ConnectionStatus::Reconnecting);
        assert_eq!(core.reason(), Some("transport error"));
        assert!(notices(&core).is_empty());
        let commands = core.drain_commands();
        assert!(commands.contains(&Command::ScheduleReconnect { after: ms(5000) }));
    }

    #[test]
    fn test_failure_after_connect_emits_notice_and_schedules_retry() {
        let (mut core, t0) = connected_core();
        core.on_link_failed(LinkFailure::Closed(Some(1006)), t0 + ms(2000));

        assert_eq!(core.status(), ConnectionStatus::Reconnecting);
        assert_eq!(core.reason(), Some("connection closed (code 1006)"));
        assert_eq!(notices(&core), vec!["Connection lost. Reconnecting..."]);
        let commands = core.drain_commands();
        assert_eq!(commands[0], Command::CloseLink);
        assert_eq!(commands[1], Command::ScheduleReconnect { after: ms(5000) });
    }

    #[test]
    fn test_protocol_error_reason_uses_message() {
        let (mut core, t0) = connected_core();
        core.on_link_failed(LinkFailure::Protocol(Some("session expired".into())), t0 + ms(2000));
        assert_eq!(core.reason(), Some("session expired"));
        assert_eq!(notices(&core), vec!["Connection error. Reconnecting..."]);
    }

    #[test]
    fn test_reconnect_timer_reopens_link_once() {
        let (mut core, t0) = connected_core();
        core.on_link_failed(LinkFailure::Closed(None), t0 + ms(2000));
        core.drain_commands();

        core.on_reconnect_due();
        let commands = core.drain_commands();
        assert_eq!(count_connects(&commands), 1);
        assert_eq!(core.status(), ConnectionStatus::Reconnecting);

        // Already opening: a second due timer does nothing.
        core.on_reconnect_due();
        assert!(core.drain_commands().is_empty());

        core.on_link_opened(t0 + ms(7100));
        assert_eq!(core.status(), ConnectionStatus::Connected);
        assert_eq!(
            notices(&core),
            vec!["Connection lost. Reconnecting...", "Connected again."]
        );
    }

    #[test]
    fn test_repeated_failures_keep_one_timer() {
        let (mut core, t0) = connected_core();
        core.on_link_failed(LinkFailure::Closed(None), t0 + ms(2000));
        core.on_link_failed(LinkFailure::Transport(None), t0 + ms(2001));
        let schedules = core
            .drain_commands()
            .into_iter()
            .filter(|c| matches!(c, Command::ScheduleReconnect { .. }))
            .count();
        assert_eq!(schedules, 1);
        assert_eq!(core.reason(), Some("transport error"));
    }

    #[test]
    fn test_teardown_is_silent_and_terminal() {
        let (mut core, t0) = connected_core();
        let before = core.messages().len();
        core.teardown();

        assert_eq!(core.status(), ConnectionStatus::Disconnected);
        assert_eq!(core.messages().len(), before);
        assert_eq!(
            core.drain_commands(),
            vec![Command::CloseLink, Command::CancelReconnect]
        );

        // Nothing mutates state afterwards.
        let revision = core.revision();
        core.on_link_failed(LinkFailure::Closed(None), t0 + ms(3000));
        core.on_link_opened(t0 + ms(3000));
        core.on_frame(
            "/topic/messages",
            r#"{"id":"late","sender":"Bob","content":"hi"}"#,
        );
        core.on_presence_reply(1, Ok(9));
        assert_eq!(
            core.request_resumption("Back online", true, t0 + ms(5000)),
            ResumptionDecision::TornDown
        );
        assert!(matches!(
            core.send("hello", t0 + ms(5000)),
            Err(SessionError::ShutDown)
        ));
        assert_eq!(core.revision(), revision);
        assert!(core.drain_commands().is_empty());
    }

    // =========================================================================
    // Resumption
    // =========================================================================

    #[test]
    fn test_cold_start_suppresses_resumption() {
        let (mut core, t0) = new_core();
        core.on_link_failed(LinkFailure::Transport(None), t0 + ms(100));
        core.drain_commands();
        let revision = core.revision();

        let decision = core.on_environment_signal(EnvironmentSignal::VisibilityVisible, t0 + ms(500));
        assert_eq!(decision, ResumptionDecision::ColdStart);
        assert_eq!(core.revision(), revision);
        assert!(core.drain_commands().is_empty());
    }

    #[test]
    fn test_resumption_ignored_while_connected() {
        let (mut core, t0) = connected_core();
        let decision = core.on_environment_signal(EnvironmentSignal::WindowFocus, t0 + ms(5000));
        assert_eq!(decision, ResumptionDecision::AlreadyActive);
        assert_eq!(core.status(), ConnectionStatus::Connected);
    }

    #[test]
    fn test_accepted_resumption_rearms_and_pulls_presence() {
        let (mut core, t0) = connected_core();
        core.on_link_failed(LinkFailure::Closed(None), t0 + ms(2000));
        core.drain_commands();

        let decision =
            core.on_environment_signal(EnvironmentSignal::VisibilityVisible, t0 + ms(2500));
        assert_eq!(decision, ResumptionDecision::Accepted);
        assert_eq!(core.status(), ConnectionStatus::Reconnecting);
        assert_eq!(core.reason(), Some("Resumed from background"));

        let commands = core.drain_commands();
        assert!(commands.contains(&Command::CancelReconnect));
        assert_eq!(count_connects(&commands), 1);
        assert!(commands
            .iter()
            .any(|c| matches!(c, Command::QueryPresence { .. })));
        assert!(commands.contains(&Command::SchedulePresencePull { after: ms(200) }));
        assert!(notices(&core).contains(&"Resumed from background. Reconnecting...".to_string()));
    }

    #[test]
    fn test_cooldown_yields_single_transition() {
        let (mut core, t0) = connected_core();
        core.on_link_failed(LinkFailure::Closed(None), t0 + ms(900));
        core.drain_commands();

        assert!(core
            .on_environment_signal(EnvironmentSignal::NetworkOnline, t0 + ms(1000))
            .is_accepted());
        core.on_link_failed(LinkFailure::Transport(None), t0 + ms(1050));
        let revision = core.revision();
        let decision = core.on_environment_signal(EnvironmentSignal::PageRestored, t0 + ms(1100));

        assert_eq!(decision, ResumptionDecision::CoolingDown);
        assert_eq!(core.revision(), revision);
        assert_eq!(core.reason(), Some("transport error"));
    }

    #[test]
    fn test_focus_and_visibility_burst_transitions_once() {
        let (mut core, t0) = connected_core();
        core.on_link_failed(LinkFailure::Closed(None), t0 + ms(900));
        core.drain_commands();

        assert!(core
            .on_environment_signal(EnvironmentSignal::VisibilityVisible, t0 + ms(2000))
            .is_accepted());
        assert_eq!(
            core.on_environment_signal(EnvironmentSignal::WindowFocus, t0 + ms(2100)),
            ResumptionDecision::CoolingDown
        );
        assert_eq!(count_connects(&core.drain_commands()), 1);
    }

    #[test]
    fn test_resumption_before_first_connect_is_silent() {
        let (mut core, t0) = new_core();
        core.on_link_failed(LinkFailure::Transport(None), t0 + ms(100));
        core.drain_commands();

        let decision = core.request_resumption("Back online", true, t0 + ms(1000));
        assert_eq!(decision, ResumptionDecision::Accepted);
        assert_eq!(core.status(), ConnectionStatus::Reconnecting);
        assert!(notices(&core).is_empty());
    }

    #[test]
    fn test_unannounced_resumption_adds_no_notice() {
        let (mut core, t0) = connected_core();
        core.on_link_failed(LinkFailure::Closed(None), t0 + ms(900));
        let before = notices(&core).len();
        core.on_environment_signal(EnvironmentSignal::WindowFocus, t0 + ms(5000));
        assert_eq!(notices(&core).len(), before);
    }

    #[test]
    fn test_resumption_while_attempt_in_flight_does_not_double_connect() {
        let (mut core, t0) = new_core();
        core.on_link_failed(LinkFailure::Transport(None), t0 + ms(100));
        core.on_reconnect_due();
        core.drain_commands();

        // Attempt in flight, status reconnecting: accepted but no new link.
        assert!(core
            .request_resumption("Page restored", true, t0 + ms(1000))
            .is_accepted());
        assert_eq!(count_connects(&core.drain_commands()), 0);
    }

    // =========================================================================
    // Sending
    // =========================================================================

    #[test]
    fn test_send_publishes_trimmed_payload() {
        let (mut core, t0) = connected_core();
        let outcome = core.send("  hello  ", t0 + ms(1000)).unwrap();
        assert_eq!(outcome, SendOutcome::Published);

        let commands = core.drain_commands();
        match &commands[..] {
            [Command::Publish { destination, body }] => {
                assert_eq!(destination, "/app/chat.send");
                let value: serde_json::Value = serde_json::from_str(body).unwrap();
                assert_eq!(value["content"], "hello");
                assert_eq!(value["userId"], "7f3c2a10-0000-4000-8000-00000000abcd");
                assert_eq!(value["sender"], core.identity().nickname.as_str());
                assert!(value["clientSentAt"].is_string());
            }
            other => panic!("expected one publish, got {other:?}"),
        }
    }

    #[test]
    fn test_send_rejects_empty_and_oversized() {
        let (mut core, t0) = connected_core();
        assert!(matches!(core.send("   ", t0), Err(SessionError::EmptyMessage)));
        let long = "x".repeat(2001);
        assert!(matches!(
            core.send(&long, t0),
            Err(SessionError::MessageTooLong(2000))
        ));
        assert!(core.send(&"x".repeat(2000), t0).is_ok());
    }

    #[test]
    fn test_send_while_disconnected_is_dropped() {
        let (mut core, t0) = connected_core();
        core.on_link_failed(LinkFailure::Closed(None), t0 + ms(2000));
        core.drain_commands();
        let before = notices(&core).len();

        let outcome = core.send("hi", t0 + ms(2100)).unwrap();
        assert_eq!(outcome, SendOutcome::NotConnected);
        assert_eq!(core.status(), ConnectionStatus::Reconnecting);

        let commands = core.drain_commands();
        assert!(!has_publish(&commands));
        assert_eq!(count_connects(&commands), 1);
        let shown = notices(&core);
        assert_eq!(shown.len(), before + 1);
        assert_eq!(
            shown.last().map(String::as_str),
            Some("Message not sent: not connected. Reconnecting...")
        );
    }

    #[test]
    fn test_send_before_first_connect_is_silent() {
        let (mut core, t0) = new_core();
        core.drain_commands();
        let outcome = core.send("hi", t0 + ms(10)).unwrap();
        assert_eq!(outcome, SendOutcome::NotConnected);
        assert_eq!(core.status(), ConnectionStatus::Reconnecting);
        assert!(notices(&core).is_empty());
        // The first attempt is still in flight.
        assert_eq!(count_connects(&core.drain_commands()), 0);
    }

    // =========================================================================
    // Ingestion
    // =========================================================================

    #[test]
    fn test_duplicate_frame_yields_single_entry() {
        let (mut core, _) = connected_core();
        let body = r#"{"id":"m1","sender":"Bob","content":"hi","createdAt":"2024-01-01T00:00:00Z"}"#;
        core.on_frame("/topic/messages", body);
        let revision = core.revision();
        core.on_frame("/topic/messages", body);

        assert_eq!(core.messages().len(), 1);
        assert_eq!(core.revision(), revision);
    }

    #[test]
    fn test_equal_timestamps_are_both_kept() {
        let (mut core, _) = connected_core();
        core.on_frame(
            "/topic/messages",
            r#"{"id":"a","sender":"Bob","content":"one","createdAt":"2024-01-01T00:00:00Z"}"#,
        );
        core.on_frame(
            "/topic/messages",
            r#"{"id":"b","sender":"Ann","content":"two","createdAt":"2024-01-01T00:00:00Z"}"#,
        );
        let contents: Vec<_> = core.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "two"]);
    }

    #[test]
    fn test_malformed_frame_changes_nothing() {
        let (mut core, _) = connected_core();
        let revision = core.revision();
        core.on_frame("/topic/messages", "{broken");
        core.on_frame("/topic/presence", r#"{"count":"many"}"#);
        assert_eq!(core.revision(), revision);
        assert!(core.messages().is_empty());
        assert_eq!(core.status(), ConnectionStatus::Connected);
    }

    #[test]
    fn test_notice_dedup_window_applies_to_failures() {
        let (mut core, t0) = connected_core();
        core.on_link_failed(LinkFailure::Closed(None), t0 + ms(1000));
        core.on_reconnect_due();
        core.on_link_failed(LinkFailure::Closed(None), t0 + ms(2000));
        assert_eq!(notices(&core).len(), 1);

        core.on_reconnect_due();
        core.on_link_failed(LinkFailure::Closed(None), t0 + ms(4000));
        assert_eq!(notices(&core).len(), 2);
    }

    // =========================================================================
    // Presence
    // =========================================================================

    #[test]
    fn test_pull_overrides_earlier_push() {
        let (mut core, _) = new_core();
        core.drain_commands();
        core.on_link_opened(Instant::now());
        let ticket = core
            .drain_commands()
            .into_iter()
            .find_map(|c| match c {
                Command::QueryPresence { ticket } => Some(ticket),
                _ => None,
            })
            .unwrap();

        core.on_frame("/topic/presence", r#"{"count":5}"#);
        assert_eq!(core.presence(), Some(5));
        core.on_presence_reply(ticket, Ok(4));
        assert_eq!(core.presence(), Some(4));
    }

    #[test]
    fn test_failed_pull_keeps_stale_count() {
        let (mut core, _) = connected_core();
        core.on_frame("/topic/presence", r#"{"count":3}"#);
        core.presence_pull_due();
        let ticket = match core.drain_commands().as_slice() {
            [Command::QueryPresence { ticket }] => *ticket,
            other => panic!("expected query, got {other:?}"),
        };
        core.on_presence_reply(ticket, Err(SessionError::Presence("timeout".into())));
        assert_eq!(core.presence(), Some(3));
    }

    #[test]
    fn test_delayed_pull_beats_slow_immediate_pull() {
        let (mut core, _) = connected_core();
        core.presence_pull_due();
        core.presence_pull_due();
        let tickets: Vec<u64> = core
            .drain_commands()
            .into_iter()
            .filter_map(|c| match c {
                Command::QueryPresence { ticket } => Some(ticket),
                _ => None,
            })
            .collect();
        core.on_presence_reply(tickets[1], Ok(8));
        core.on_presence_reply(tickets[0], Ok(6));
        assert_eq!(core.presence(), Some(8));
    }

    #[test]
    fn test_snapshot_reflects_state() {
        let (mut core, _) = connected_core();
        core.on_frame("/topic/presence", r#"{"count":2}"#);
        let snapshot = core.snapshot();
        assert_eq!(snapshot.status, ConnectionStatus::Connected);
        assert_eq!(snapshot.presence, Some(2));
        assert_eq!(snapshot.reason, None);
        assert_eq!(snapshot.revision, core.revision());
    }
}
