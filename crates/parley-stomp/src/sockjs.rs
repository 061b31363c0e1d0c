//! SockJS framing and URL layout.

use rand::distr::{Alphanumeric, SampleString};
use rand::Rng;
use reqwest::Url;
use serde::Deserialize;

use crate::error::StompError;

/// A frame as sent by a SockJS server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SockJsFrame {
    /// `o`
    Open,
    /// `h`
    Heartbeat,
    /// `a[...]` or `m"..."`
    Messages(Vec<String>),
    /// `c[code,"reason"]`
    Close { code: u16, reason: String },
}

impl SockJsFrame {
    pub fn parse(raw: &str) -> Result<Self, StompError> {
        let raw = raw.trim_end_matches(['\n', '\r']);
        let mut chars = raw.chars();
        let kind = chars
            .next()
            .ok_or_else(|| StompError::SockJs("empty frame".to_string()))?;
        let payload = chars.as_str();
        match kind {
            'o' => Ok(SockJsFrame::Open),
            'h' => Ok(SockJsFrame::Heartbeat),
            'a' => Ok(SockJsFrame::Messages(serde_json::from_str(payload)?)),
            'm' => Ok(SockJsFrame::Messages(vec![serde_json::from_str(payload)?])),
            'c' => {
                let (code, reason): (u16, String) = serde_json::from_str(payload)?;
                Ok(SockJsFrame::Close { code, reason })
            }
            other => Err(StompError::SockJs(format!("unknown frame type: {other}"))),
        }
    }
}

/// Encode outbound messages as a SockJS JSON array.
pub fn encode_messages(messages: &[String]) -> Result<String, StompError> {
    Ok(serde_json::to_string(messages)?)
}

/// Response of `GET <endpoint>/info`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ServerInfo {
    #[serde(default = "default_true")]
    pub websocket: bool,
}

fn default_true() -> bool {
    true
}

/// URLs for one SockJS session.
#[derive(Clone, Debug)]
pub struct SockJsUrls {
    endpoint: Url,
    server_id: String,
    session_id: String,
}

impl SockJsUrls {
    /// Build URLs for `base_url` + `endpoint` with random server/session ids.
    pub fn new(base_url: &str, endpoint: &str) -> Result<Self, StompError> {
        let server_id = format!("{:03}", rand::rng().random_range(0..1000));
        let session_id = Alphanumeric.sample_string(&mut rand::rng(), 8);
        Self::with_ids(base_url, endpoint, server_id, session_id)
    }

    pub fn with_ids(
        base_url: &str,
        endpoint: &str,
        server_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Result<Self, StompError> {
        let base = Url::parse(base_url).map_err(|e| StompError::Url(e.to_string()))?;
        let endpoint = base
            .join(endpoint.trim_end_matches('/'))
            .map_err(|e| StompError::Url(e.to_string()))?;
        Ok(Self {
            endpoint,
            server_id: server_id.into(),
            session_id: session_id.into(),
        })
    }

    /// Host header value for the STOMP CONNECT frame.
    pub fn host(&self) -> String {
        self.endpoint.host_str().unwrap_or("localhost").to_string()
    }

    pub fn info_url(&self) -> String {
        format!("{}/info", self.endpoint)
    }

    fn session_url(&self, suffix: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            self.endpoint, self.server_id, self.session_id, suffix
        )
    }

    pub fn websocket_url(&self) -> Result<String, StompError> {
        let http = self.session_url("websocket");
        if let Some(rest) = http.strip_prefix("https://") {
            Ok(format!("wss://{rest}"))
        } else if let Some(rest) = http.strip_prefix("http://") {
            Ok(format!("ws://{rest}"))
        } else {
            Err(StompError::Url(format!("unsupported scheme: {http}")))
        }
    }

    pub fn xhr_url(&self) -> String {
        self.session_url("xhr")
    }

    pub fn xhr_send_url(&self) -> String {
        self.session_url("xhr_send")
    }
}
