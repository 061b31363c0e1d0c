//! Fallback-capable SockJS transports.
//!
//! Each transport yields a writer half and a channel of inbound messages fed
//! by a background reader task. Negotiation tries the configured transports
//! in order and keeps the first one that delivers the SockJS open frame.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::error::StompError;
use crate::sockjs::{encode_messages, ServerInfo, SockJsFrame, SockJsUrls};

/// Time allowed for a transport to deliver the SockJS open frame.
const OPEN_TIMEOUT: Duration = Duration::from_secs(10);

const INBOUND_CAPACITY: usize = 256;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Available SockJS transports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransportKind {
    WebSocket,
    XhrPolling,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::WebSocket => write!(f, "websocket"),
            TransportKind::XhrPolling => write!(f, "xhr-polling"),
        }
    }
}

impl FromStr for TransportKind {
    type Err = StompError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "websocket" => Ok(TransportKind::WebSocket),
            "xhr-polling" | "xhr_polling" | "xhr" => Ok(TransportKind::XhrPolling),
            other => Err(StompError::Transport(format!("unknown transport: {other}"))),
        }
    }
}

/// What the reader task reports.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportMessage {
    /// One SockJS message, carrying STOMP text.
    Text(String),
    /// SockJS-level heart-beat. Only proves liveness.
    Heartbeat,
    /// The server or the socket closed the session.
    Closed { code: Option<u16>, reason: String },
    /// The transport failed.
    Error(String),
}

/// Outbound half of an open transport.
#[async_trait]
pub trait TransportWriter: Send {
    async fn send(&mut self, messages: Vec<String>) -> Result<(), StompError>;
    async fn close(&mut self);
}

/// A transport that completed the SockJS open handshake.
pub struct OpenTransport {
    pub kind: TransportKind,
    pub writer: Box<dyn TransportWriter>,
    pub inbound: mpsc::Receiver<TransportMessage>,
    reader: JoinHandle<()>,
}

impl fmt::Debug for OpenTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenTransport")
            .field("kind", &self.kind)
            .finish()
    }
}

impl Drop for OpenTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Parse configured transport names, skipping unknown ones.
pub fn parse_kinds(names: &[String]) -> Vec<TransportKind> {
    names
        .iter()
        .filter_map(|name| match name.parse() {
            Ok(kind) => Some(kind),
            Err(e) => {
                warn!(error = %e, "Ignoring transport");
                None
            }
        })
        .collect()
}

/// Query the SockJS info endpoint. Failures assume websocket is allowed.
pub async fn fetch_info(http: &reqwest::Client, urls: &SockJsUrls) -> ServerInfo {
    let result = async {
        let response = http.get(urls.info_url()).send().await?.error_for_status()?;
        response.json::<ServerInfo>().await
    }
    .await;
    match result {
        Ok(info) => info,
        Err(e) => {
            debug!(error = %e, "SockJS info unavailable, assuming websocket");
            ServerInfo { websocket: true }
        }
    }
}

/// Open the first transport in `kinds` that completes the SockJS handshake.
pub async fn open_with_fallback(
    kinds: &[TransportKind],
    urls: &SockJsUrls,
    http: &reqwest::Client,
) -> Result<OpenTransport, StompError> {
    let info = fetch_info(http, urls).await;
    let mut last_error = StompError::Transport("no transport configured".to_string());

    for kind in kinds {
        if *kind == TransportKind::WebSocket && !info.websocket {
            debug!("Server disabled websocket transport");
            continue;
        }
        let attempt = match kind {
            TransportKind::WebSocket => open_websocket(urls).await,
            TransportKind::XhrPolling => open_xhr_polling(urls, http.clone()).await,
        };
        match attempt {
            Ok(transport) => {
                info!(transport = %kind, "SockJS transport open");
                return Ok(transport);
            }
            Err(e) => {
                warn!(transport = %kind, error = %e, "SockJS transport failed, trying next");
                last_error = e;
            }
        }
    }
    Err(last_error)
}

// =============================================================================
// WebSocket
// =============================================================================

struct WebSocketWriter {
    sink: SplitSink<WsStream, Message>,
}

#[async_trait]
impl TransportWriter for WebSocketWriter {
    async fn send(&mut self, messages: Vec<String>) -> Result<(), StompError> {
        let payload = encode_messages(&messages)?;
        self.sink.send(Message::Text(payload)).await?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Err(e) = self.sink.close().await {
            debug!(error = %e, "WebSocket close failed");
        }
    }
}

async fn open_websocket(urls: &SockJsUrls) -> Result<OpenTransport, StompError> {
    let url = urls.websocket_url()?;
    let (ws, _) = tokio::time::timeout(OPEN_TIMEOUT, tokio_tungstenite::connect_async(url.as_str()))
        .await
        .map_err(|_| StompError::Transport("websocket connect timed out".to_string()))??;
    let (sink, mut stream) = ws.split();

    let first = tokio::time::timeout(OPEN_TIMEOUT, stream.next())
        .await
        .map_err(|_| StompError::Transport("no SockJS open frame".to_string()))?;
    match first {
        Some(Ok(Message::Text(text))) => {
            if SockJsFrame::parse(&text)? != SockJsFrame::Open {
                return Err(StompError::Transport(format!(
                    "unexpected first SockJS frame: {text}"
                )));
            }
        }
        Some(Ok(other)) => {
            return Err(StompError::Transport(format!(
                "unexpected first websocket message: {other:?}"
            )))
        }
        Some(Err(e)) => return Err(e.into()),
        None => return Err(StompError::Closed),
    }

    let (tx, inbound) = mpsc::channel(INBOUND_CAPACITY);
    let reader = tokio::spawn(async move {
        while let Some(item) = stream.next().await {
            let message = match item {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(frame)) => {
                    let (code, reason) = frame
                        .map(|f| (Some(u16::from(f.code)), f.reason.into_owned()))
                        .unwrap_or((None, String::new()));
                    let _ = tx.send(TransportMessage::Closed { code, reason }).await;
                    return;
                }
                Ok(_) => continue,
                Err(e) => {
                    let _ = tx.send(TransportMessage::Error(e.to_string())).await;
                    return;
                }
            };
            if !forward_sockjs(&tx, &message).await {
                return;
            }
        }
        let _ = tx
            .send(TransportMessage::Closed {
                code: None,
                reason: "websocket stream ended".to_string(),
            })
            .await;
    });

    Ok(OpenTransport {
        kind: TransportKind::WebSocket,
        writer: Box::new(WebSocketWriter { sink }),
        inbound,
        reader,
    })
}

/// Forward one raw SockJS frame. Returns false once the session is over.
async fn forward_sockjs(tx: &mpsc::Sender<TransportMessage>, raw: &str) -> bool {
    match SockJsFrame::parse(raw) {
        Ok(SockJsFrame::Open) => true,
        Ok(SockJsFrame::Heartbeat) => tx.send(TransportMessage::Heartbeat).await.is_ok(),
        Ok(SockJsFrame::Messages(messages)) => {
            for message in messages {
                if tx.send(TransportMessage::Text(message)).await.is_err() {
                    return false;
                }
            }
            true
        }
        Ok(SockJsFrame::Close { code, reason }) => {
            let _ = tx
                .send(TransportMessage::Closed {
                    code: Some(code),
                    reason,
                })
                .await;
            false
        }
        Err(e) => {
            debug!(error = %e, "Dropping malformed SockJS frame");
            true
        }
    }
}

// =============================================================================
// XHR polling
// =============================================================================

struct XhrWriter {
    http: reqwest::Client,
    send_url: String,
}

#[async_trait]
impl TransportWriter for XhrWriter {
    async fn send(&mut self, messages: Vec<String>) -> Result<(), StompError> {
        let payload = encode_messages(&messages)?;
        self.http
            .post(&self.send_url)
            .header("content-type", "text/plain;charset=UTF-8")
            .body(payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn close(&mut self) {}
}

async fn poll_once(http: &reqwest::Client, url: &str) -> Result<String, StompError> {
    let response = http.post(url).send().await?.error_for_status()?;
    Ok(response.text().await?)
}

async fn open_xhr_polling(
    urls: &SockJsUrls,
    http: reqwest::Client,
) -> Result<OpenTransport, StompError> {
    let poll_url = urls.xhr_url();
    let first = tokio::time::timeout(OPEN_TIMEOUT, poll_once(&http, &poll_url))
        .await
        .map_err(|_| StompError::Transport("xhr open timed out".to_string()))??;
    if SockJsFrame::parse(&first)? != SockJsFrame::Open {
        return Err(StompError::Transport(format!(
            "unexpected first xhr frame: {first}"
        )));
    }

    let (tx, inbound) = mpsc::channel(INBOUND_CAPACITY);
    let reader_http = http.clone();
    let reader = tokio::spawn(async move {
        loop {
            let body = match poll_once(&reader_http, &poll_url).await {
                Ok(body) => body,
                Err(e) => {
                    let _ = tx.send(TransportMessage::Error(e.to_string())).await;
                    return;
                }
            };
            for line in body.lines().filter(|l| !l.trim().is_empty()) {
                if !forward_sockjs(&tx, line).await {
                    return;
                }
            }
        }
    });

    Ok(OpenTransport {
        kind: TransportKind::XhrPolling,
        writer: Box::new(XhrWriter {
            http,
            send_url: urls.xhr_send_url(),
        }),
        inbound,
        reader,
    })
}
