//! STOMP client session over a SockJS transport.
//!
//! [`SockJsConnector::connect`] negotiates a transport, performs the
//! CONNECT/CONNECTED handshake, and hands back a [`StompSession`]: a cheap
//! [`StompHandle`] for outbound frames plus a channel of [`StompEvent`]s fed
//! by a background task that also runs the heart-beat watchdog.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use parley_core::config::BrokerConfig;

use crate::error::StompError;
use crate::frame::{Frame, FrameDecoder};
use crate::heartbeat::{HeartBeat, Negotiated};
use crate::sockjs::SockJsUrls;
use crate::transport::{
    open_with_fallback, parse_kinds, OpenTransport, TransportKind, TransportMessage,
    TransportWriter,
};

const EVENT_CAPACITY: usize = 256;

/// Parameters of one STOMP CONNECT.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Extra CONNECT headers, e.g. the session identity.
    pub headers: Vec<(String, String)>,
    pub heart_beat: HeartBeat,
}

/// Inbound events from a live STOMP session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StompEvent {
    /// A MESSAGE frame on a subscribed destination.
    Message { destination: String, body: String },
    /// An ERROR frame. The broker closes the link afterwards.
    Error { message: String },
    /// The link closed.
    Closed { code: Option<u16>, reason: String },
    /// The transport failed or went silent.
    TransportError(String),
}

/// Outbound requests queued on a [`StompHandle`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    Frame(Frame),
    Disconnect,
}

/// Cloneable sender for a live session. Never blocks.
#[derive(Clone, Debug)]
pub struct StompHandle {
    tx: mpsc::UnboundedSender<Outbound>,
    next_subscription: Arc<AtomicU64>,
}

impl StompHandle {
    /// A handle plus the receiving end of its outbound queue.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                next_subscription: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Subscribe to `destination`; returns the subscription id.
    pub fn subscribe(&self, destination: &str) -> Result<String, StompError> {
        let id = format!(
            "sub-{}",
            self.next_subscription.fetch_add(1, Ordering::Relaxed)
        );
        self.queue(Outbound::Frame(Frame::subscribe(&id, destination)))?;
        Ok(id)
    }

    /// Publish a JSON body to `destination`.
    pub fn publish(&self, destination: &str, body: impl Into<String>) -> Result<(), StompError> {
        self.queue(Outbound::Frame(Frame::send(destination, body)))
    }

    /// Ask the session task to send DISCONNECT and close quietly.
    pub fn disconnect(&self) {
        let _ = self.queue(Outbound::Disconnect);
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn queue(&self, item: Outbound) -> Result<(), StompError> {
        self.tx.send(item).map_err(|_| StompError::Closed)
    }
}

/// A connected STOMP session.
///
/// The background task ends once every [`StompHandle`] clone is dropped or
/// [`StompHandle::disconnect`] is called.
#[derive(Debug)]
pub struct StompSession {
    pub handle: StompHandle,
    pub events: mpsc::Receiver<StompEvent>,
    pub negotiated: Negotiated,
}

impl StompSession {
    /// Assemble a session from existing channels with no background task.
    pub fn from_parts(handle: StompHandle, events: mpsc::Receiver<StompEvent>) -> Self {
        Self {
            handle,
            events,
            negotiated: Negotiated::default(),
        }
    }
}

/// Opens STOMP sessions.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, request: ConnectRequest) -> Result<StompSession, StompError>;
}

/// Connects over SockJS with transport fallback.
#[derive(Debug, Clone)]
pub struct SockJsConnector {
    base_url: String,
    endpoint: String,
    transports: Vec<TransportKind>,
    handshake_timeout: Duration,
    http: reqwest::Client,
}

impl SockJsConnector {
    pub fn new(config: &BrokerConfig, http: reqwest::Client) -> Self {
        Self {
            base_url: config.base_url.clone(),
            endpoint: config.endpoint.clone(),
            transports: parse_kinds(&config.transports),
            handshake_timeout: config.handshake_timeout(),
            http,
        }
    }
}

#[async_trait]
impl Connector for SockJsConnector {
    async fn connect(&self, request: ConnectRequest) -> Result<StompSession, StompError> {
        let urls = SockJsUrls::new(&self.base_url, &self.endpoint)?;
        let mut transport = open_with_fallback(&self.transports, &urls, &self.http).await?;

        let connect = Frame::connect(
            &urls.host(),
            &request.heart_beat.header_value(),
            &request.headers,
        );
        transport.writer.send(vec![connect.encode()]).await?;

        let mut decoder = FrameDecoder::new();
        let connected = tokio::time::timeout(
            self.handshake_timeout,
            await_connected(&mut transport, &mut decoder),
        )
        .await
        .map_err(|_| StompError::Handshake("no CONNECTED frame".to_string()))??;

        let server_beat = match connected.get("heart-beat") {
            Some(value) => HeartBeat::parse(value)?,
            None => HeartBeat::default(),
        };
        let negotiated = HeartBeat::negotiate(request.heart_beat, server_beat);
        info!(
            transport = %transport.kind,
            version = connected.get("version").unwrap_or("1.0"),
            incoming = ?negotiated.incoming,
            "STOMP session established"
        );

        let (handle, outbound) = StompHandle::channel();
        let (event_tx, events) = mpsc::channel(EVENT_CAPACITY);
        tokio::spawn(run_session(
            transport, decoder, outbound, event_tx, negotiated,
        ));

        Ok(StompSession {
            handle,
            events,
            negotiated,
        })
    }
}

async fn await_connected(
    transport: &mut OpenTransport,
    decoder: &mut FrameDecoder,
) -> Result<Frame, StompError> {
    loop {
        match transport.inbound.recv().await {
            Some(TransportMessage::Text(text)) => {
                decoder.push(&text);
                while let Some(frame) = decoder.next_frame()? {
                    match frame.command.as_str() {
                        "CONNECTED" => return Ok(frame),
                        "ERROR" => return Err(StompError::Protocol(error_message(&frame))),
                        other => debug!(command = other, "Ignoring frame before CONNECTED"),
                    }
                }
            }
            Some(TransportMessage::Heartbeat) => {}
            Some(TransportMessage::Closed { code, reason }) => {
                return Err(StompError::Handshake(format!(
                    "closed during handshake ({}): {reason}",
                    code.map(|c| c.to_string()).unwrap_or_else(|| "no code".to_string())
                )))
            }
            Some(TransportMessage::Error(e)) => return Err(StompError::Transport(e)),
            None => return Err(StompError::Closed),
        }
    }
}

fn error_message(frame: &Frame) -> String {
    frame
        .get("message")
        .map(str::to_string)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| frame.body.trim().to_string())
}

/// Pump frames between the transport and the session channels until the
/// link ends. Emits exactly one terminal event unless the client asked to
/// disconnect.
async fn run_session(
    mut transport: OpenTransport,
    mut decoder: FrameDecoder,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::Sender<StompEvent>,
    negotiated: Negotiated,
) {
    let deadline = negotiated.incoming_deadline();
    let idle = Duration::from_secs(3600);
    let mut watchdog = tokio::time::interval(negotiated.incoming.unwrap_or(idle));
    let mut beat = tokio::time::interval(negotiated.outgoing.unwrap_or(idle));
    let mut last_seen = Instant::now();

    // Frames that arrived together with CONNECTED.
    if !dispatch_frames(&mut decoder, &events).await {
        return;
    }

    loop {
        tokio::select! {
            cmd = outbound.recv() => match cmd {
                Some(Outbound::Frame(frame)) => {
                    debug!(frame = %frame, "STOMP send");
                    if let Err(e) = transport.writer.send(vec![frame.encode()]).await {
                        let _ = events.send(StompEvent::TransportError(e.to_string())).await;
                        return;
                    }
                }
                Some(Outbound::Disconnect) | None => {
                    let _ = transport.writer.send(vec![Frame::disconnect().encode()]).await;
                    transport.writer.close().await;
                    debug!("STOMP session closed by client");
                    return;
                }
            },
            msg = transport.inbound.recv() => match msg {
                Some(TransportMessage::Text(text)) => {
                    last_seen = Instant::now();
                    decoder.push(&text);
                    if !dispatch_frames(&mut decoder, &events).await {
                        return;
                    }
                }
                Some(TransportMessage::Heartbeat) => last_seen = Instant::now(),
                Some(TransportMessage::Closed { code, reason }) => {
                    let _ = events.send(StompEvent::Closed { code, reason }).await;
                    return;
                }
                Some(TransportMessage::Error(e)) => {
                    let _ = events.send(StompEvent::TransportError(e)).await;
                    return;
                }
                None => {
                    let _ = events
                        .send(StompEvent::Closed { code: None, reason: "transport ended".to_string() })
                        .await;
                    return;
                }
            },
            _ = watchdog.tick(), if deadline.is_some() => {
                if let Some(limit) = deadline {
                    if last_seen.elapsed() > limit {
                        warn!(silent = ?last_seen.elapsed(), "Server heart-beats missed");
                        transport.writer.close().await;
                        let _ = events
                            .send(StompEvent::TransportError("missed server heart-beats".to_string()))
                            .await;
                        return;
                    }
                }
            },
            _ = beat.tick(), if negotiated.outgoing.is_some() => {
                if let Err(e) = transport.writer.send(vec!["\n".to_string()]).await {
                    let _ = events.send(StompEvent::TransportError(e.to_string())).await;
                    return;
                }
            },
        }
    }
}

/// Forward every buffered frame. Returns false if the consumer is gone.
async fn dispatch_frames(decoder: &mut FrameDecoder, events: &mpsc::Sender<StompEvent>) -> bool {
    loop {
        let frame = match decoder.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => return true,
            Err(e) => {
                debug!(error = %e, "Dropping malformed STOMP frame");
                return true;
            }
        };
        let event = match frame.command.as_str() {
            "MESSAGE" => StompEvent::Message {
                destination: frame.get("destination").unwrap_or_default().to_string(),
                body: frame.body,
            },
            "ERROR" => StompEvent::Error {
                message: error_message(&frame),
            },
            other => {
                debug!(command = other, "Ignoring STOMP frame");
                continue;
            }
        };
        if events.send(event).await.is_err() {
            return false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_subscribe_assigns_increasing_ids() {
        let (handle, mut rx) = StompHandle::channel();
        assert_eq!(handle.subscribe("/topic/messages").unwrap(), "sub-0");
        assert_eq!(handle.subscribe("/topic/presence").unwrap(), "sub-1");

        match rx.try_recv().unwrap() {
            Outbound::Frame(frame) => {
                assert_eq!(frame.command, "SUBSCRIBE");
                assert_eq!(frame.get("destination"), Some("/topic/messages"));
                assert_eq!(frame.get("id"), Some("sub-0"));
            }
            other => panic!("unexpected outbound: {other:?}"),
        }
    }

    #[test]
    fn test_handle_publish_after_close_fails() {
        let (handle, rx) = StompHandle::channel();
        drop(rx);
        assert!(handle.is_closed());
        assert!(matches!(
            handle.publish("/app/chat.send", "{}"),
            Err(StompError::Closed)
        ));
    }

    #[test]
    fn test_error_message_prefers_header() {
        let frame = Frame::new("ERROR").header("message", "denied").body("details");
        assert_eq!(error_message(&frame), "denied");
        let frame = Frame::new("ERROR").body(" details \n");
        assert_eq!(error_message(&frame), "details");
    }

    #[tokio::test]
    async fn test_dispatch_frames_routes_message_and_error() {
        let mut decoder = FrameDecoder::new();
        decoder.push("MESSAGE\ndestination:/topic/presence\n\n{\"count\":2}\0");
        decoder.push("RECEIPT\nreceipt-id:9\n\n\0ERROR\nmessage:bye\n\n\0");
        let (tx, mut rx) = mpsc::channel(8);

        assert!(dispatch_frames(&mut decoder, &tx).await);
        assert_eq!(
            rx.recv().await,
            Some(StompEvent::Message {
                destination: "/topic/presence".into(),
                body: "{\"count\":2}".into()
            })
        );
        assert_eq!(
            rx.recv().await,
            Some(StompEvent::Error {
                message: "bye".into()
            })
        );
    }

    #[tokio::test]
    async fn test_from_parts_defaults_negotiation() {
        let (handle, _rx) = StompHandle::channel();
        let (_tx, events) = mpsc::channel(1);
        let session = StompSession::from_parts(handle, events);
        assert_eq!(session.negotiated, Negotiated::default());
    }
}
