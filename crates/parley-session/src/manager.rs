//! Async driver for [`SessionCore`].
//!
//! One actor task owns the core, the live broker link, and every timer.
//! Sends, environment signals, link events, presence replies and timer
//! expiries all enter through its mailbox, so state changes are applied one
//! at a time in arrival order. Consumers watch [`SessionSnapshot`]s, which
//! are published only when the core's revision moves.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use parley_core::SessionIdentity;
use parley_stomp::{Connector, StompError, StompEvent, StompSession};

use crate::error::SessionError;
use crate::presence::PresenceSource;
use crate::resumption::EnvironmentSignal;
use crate::session::{Command, LinkFailure, SendOutcome, SessionCore, SessionSnapshot};
use crate::settings::SessionSettings;

enum Input {
    Send {
        text: String,
        reply: oneshot::Sender<Result<SendOutcome, SessionError>>,
    },
    Signal(EnvironmentSignal),
    Opened {
        generation: u64,
        result: Result<StompSession, StompError>,
    },
    PresenceReply {
        ticket: u64,
        result: Result<u32, SessionError>,
    },
    PresencePullDue,
    ReconnectDue,
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// Starts chat sessions.
pub struct ChatSessionManager;

impl ChatSessionManager {
    /// Mount a session and start connecting. Must be called inside a tokio
    /// runtime.
    pub fn start(
        settings: SessionSettings,
        identity: SessionIdentity,
        connector: Arc<dyn Connector>,
        presence: Arc<dyn PresenceSource>,
    ) -> ChatSessionHandle {
        let mut core = SessionCore::new(settings, identity, Instant::now());
        core.mount();

        let (state_tx, state_rx) = watch::channel(core.snapshot());
        let (tx, mailbox) = mpsc::unbounded_channel();
        let driver = Driver {
            published: core.revision(),
            core,
            connector,
            presence,
            mailbox_tx: tx.downgrade(),
            link: None,
            generation: 0,
            connect_task: None,
            reconnect_timer: None,
            tasks: Vec::new(),
            state_tx,
        };
        tokio::spawn(driver.run(mailbox));

        ChatSessionHandle {
            tx,
            state: state_rx,
        }
    }
}

/// Consumer handle for a running session. Cheap to clone.
#[derive(Clone, Debug)]
pub struct ChatSessionHandle {
    tx: mpsc::UnboundedSender<Input>,
    state: watch::Receiver<SessionSnapshot>,
}

impl ChatSessionHandle {
    /// Send a chat message.
    ///
    /// `Ok(SendOutcome::NotConnected)` means the message was dropped and a
    /// reconnect started; it is not queued.
    pub async fn send(&self, text: impl Into<String>) -> Result<SendOutcome, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Input::Send {
                text: text.into(),
                reply,
            })
            .map_err(|_| SessionError::ShutDown)?;
        rx.await.map_err(|_| SessionError::ShutDown)?
    }

    /// Report an environment signal. Ignored after shutdown.
    pub fn signal(&self, signal: EnvironmentSignal) {
        let _ = self.tx.send(Input::Signal(signal));
    }

    /// Subscribe to state changes.
    pub fn state(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    /// Tear the session down and wait until no further state change can
    /// happen.
    pub async fn shutdown(&self) {
        let (done, rx) = oneshot::channel();
        if self.tx.send(Input::Shutdown { done }).is_ok() {
            let _ = rx.await;
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.tx.is_closed()
    }

    /// A handle that reports signals without keeping the session alive.
    pub fn downgrade(&self) -> WeakSessionHandle {
        WeakSessionHandle {
            tx: self.tx.downgrade(),
        }
    }
}

/// Signal-only handle. The session stops once every [`ChatSessionHandle`]
/// is dropped, whatever weak handles remain.
#[derive(Clone, Debug)]
pub struct WeakSessionHandle {
    tx: mpsc::WeakUnboundedSender<Input>,
}

impl WeakSessionHandle {
    /// Report an environment signal. Returns false once the session is gone.
    pub fn signal(&self, signal: EnvironmentSignal) -> bool {
        match self.tx.upgrade() {
            Some(tx) => tx.send(Input::Signal(signal)).is_ok(),
            None => false,
        }
    }
}

struct Driver {
    core: SessionCore,
    connector: Arc<dyn Connector>,
    presence: Arc<dyn PresenceSource>,
    mailbox_tx: mpsc::WeakUnboundedSender<Input>,
    link: Option<StompSession>,
    /// Bumped whenever the wanted link changes; stale connect results are dropped.
    generation: u64,
    connect_task: Option<JoinHandle<()>>,
    reconnect_timer: Option<JoinHandle<()>>,
    tasks: Vec<JoinHandle<()>>,
    state_tx: watch::Sender<SessionSnapshot>,
    published: u64,
}

impl Driver {
    async fn run(mut self, mut mailbox: mpsc::UnboundedReceiver<Input>) {
        self.execute();
        loop {
            tokio::select! {
                input = mailbox.recv() => match input {
                    Some(Input::Shutdown { done }) => {
                        self.stop();
                        let _ = done.send(());
                        break;
                    }
                    Some(input) => self.handle(input),
                    None => {
                        debug!("All session handles dropped");
                        self.stop();
                        break;
                    }
                },
                event = next_link_event(&mut self.link) => self.on_link_event(event),
            }
            self.execute();
        }
        mailbox.close();
        debug!("Session driver stopped");
    }

    fn handle(&mut self, input: Input) {
        let now = Instant::now();
        match input {
            Input::Send { text, reply } => {
                let _ = reply.send(self.core.send(&text, now));
            }
            Input::Signal(signal) => {
                self.core.on_environment_signal(signal, now);
            }
            Input::Opened { generation, result } => {
                if generation != self.generation {
                    if let Ok(session) = result {
                        session.handle.disconnect();
                    }
                    debug!(generation, "Discarding stale connect result");
                    return;
                }
                self.connect_task = None;
                match result {
                    Ok(session) => {
                        self.link = Some(session);
                        self.core.on_link_opened(now);
                    }
                    Err(StompError::Protocol(message)) => {
                        self.core
                            .on_link_failed(LinkFailure::Protocol(Some(message)), now);
                    }
                    Err(e) => {
                        warn!(error = %e, "Connect attempt failed");
                        self.core
                            .on_link_failed(LinkFailure::Transport(Some(e.to_string())), now);
                    }
                }
            }
            Input::PresenceReply { ticket, result } => {
                self.core.on_presence_reply(ticket, result);
            }
            Input::PresencePullDue => self.core.presence_pull_due(),
            Input::ReconnectDue => {
                self.reconnect_timer = None;
                self.core.on_reconnect_due();
            }
            Input::Shutdown { .. } => {}
        }
    }

    fn on_link_event(&mut self, event: Option<StompEvent>) {
        let now = Instant::now();
        let failure = match event {
            Some(StompEvent::Message { destination, body }) => {
                self.core.on_frame(&destination, &body);
                return;
            }
            Some(StompEvent::Error { message }) => LinkFailure::Protocol(Some(message)),
            Some(StompEvent::TransportError(detail)) => LinkFailure::Transport(Some(detail)),
            Some(StompEvent::Closed { code, reason }) => {
                debug!(?code, reason, "Link closed");
                LinkFailure::Closed(code)
            }
            None => LinkFailure::Closed(None),
        };
        self.core.on_link_failed(failure, now);
    }

    /// Run every queued command until the core is quiet, then publish.
    fn execute(&mut self) {
        loop {
            let commands = self.core.drain_commands();
            if commands.is_empty() {
                break;
            }
            for command in commands {
                self.apply(command);
            }
        }
        self.publish();
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::Connect(request) => {
                self.generation += 1;
                let generation = self.generation;
                let connector = Arc::clone(&self.connector);
                let mailbox = self.mailbox_tx.clone();
                debug!(generation, "Opening broker link");
                if let Some(task) = self.connect_task.take() {
                    task.abort();
                }
                self.connect_task = Some(tokio::spawn(async move {
                    let result = connector.connect(request).await;
                    if let Some(tx) = mailbox.upgrade() {
                        let _ = tx.send(Input::Opened { generation, result });
                    }
                }));
            }
            Command::CloseLink => {
                self.generation += 1;
                if let Some(task) = self.connect_task.take() {
                    task.abort();
                }
                if let Some(link) = self.link.take() {
                    link.handle.disconnect();
                }
            }
            Command::Subscribe(destination) => {
                if let Some(link) = &self.link {
                    match link.handle.subscribe(&destination) {
                        Ok(id) => debug!(destination, id, "Subscribed"),
                        Err(e) => debug!(destination, error = %e, "Subscribe failed"),
                    }
                }
            }
            Command::Publish { destination, body } => {
                if let Some(link) = &self.link {
                    // A dead link reports itself through its event channel.
                    if let Err(e) = link.handle.publish(&destination, body) {
                        debug!(destination, error = %e, "Publish failed");
                    }
                }
            }
            Command::QueryPresence { ticket } => {
                let presence = Arc::clone(&self.presence);
                let mailbox = self.mailbox_tx.clone();
                self.track(tokio::spawn(async move {
                    let result = presence.fetch_count().await;
                    if let Some(tx) = mailbox.upgrade() {
                        let _ = tx.send(Input::PresenceReply { ticket, result });
                    }
                }));
            }
            Command::SchedulePresencePull { after } => {
                let mailbox = self.mailbox_tx.clone();
                self.track(tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    if let Some(tx) = mailbox.upgrade() {
                        let _ = tx.send(Input::PresencePullDue);
                    }
                }));
            }
            Command::ScheduleReconnect { after } => {
                if let Some(timer) = self.reconnect_timer.take() {
                    timer.abort();
                }
                info!(delay = ?after, "Reconnect scheduled");
                let mailbox = self.mailbox_tx.clone();
                self.reconnect_timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    if let Some(tx) = mailbox.upgrade() {
                        let _ = tx.send(Input::ReconnectDue);
                    }
                }));
            }
            Command::CancelReconnect => {
                if let Some(timer) = self.reconnect_timer.take() {
                    timer.abort();
                }
            }
        }
    }

    fn track(&mut self, task: JoinHandle<()>) {
        self.tasks.retain(|t| !t.is_finished());
        self.tasks.push(task);
    }

    fn publish(&mut self) {
        let revision = self.core.revision();
        if revision != self.published {
            self.published = revision;
            self.state_tx.send_replace(self.core.snapshot());
        }
    }

    /// Tear down the core and cancel everything in flight.
    fn stop(&mut self) {
        self.core.teardown();
        self.execute();
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if let Some(task) = self.connect_task.take() {
            task.abort();
        }
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
    }
}

async fn next_link_event(link: &mut Option<StompSession>) -> Option<StompEvent> {
    match link {
        Some(session) => session.events.recv().await,
        None => std::future::pending().await,
    }
}
