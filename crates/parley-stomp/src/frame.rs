//! STOMP 1.2 frame encoding and streaming decoding.
//!
//! Frames are text-only here because every transport underneath is SockJS,
//! which carries UTF-8 strings.

use std::fmt;

use crate::error::StompError;

/// Largest body a `content-length` header may announce.
pub const MAX_BODY_LEN: usize = 1 << 20;

/// A single STOMP frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub command: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First value for `key`. Repeated headers keep the first occurrence.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn escapes_headers(&self) -> bool {
        self.command != "CONNECT" && self.command != "CONNECTED"
    }

    /// Serialize to wire text, NUL-terminated.
    pub fn encode(&self) -> String {
        let escape = self.escapes_headers();
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(&self.command);
        out.push('\n');
        for (key, value) in &self.headers {
            if escape {
                out.push_str(&escape_header(key));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(key);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        if !self.body.is_empty() && self.get("content-length").is_none() {
            out.push_str(&format!("content-length:{}\n", self.body.len()));
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    pub fn connect(host: &str, heart_beat: &str, extra: &[(String, String)]) -> Self {
        let mut frame = Frame::new("CONNECT")
            .header("accept-version", "1.2,1.1,1.0")
            .header("host", host)
            .header("heart-beat", heart_beat);
        for (key, value) in extra {
            frame = frame.header(key.clone(), value.clone());
        }
        frame
    }

    pub fn subscribe(id: &str, destination: &str) -> Self {
        Frame::new("SUBSCRIBE")
            .header("id", id)
            .header("destination", destination)
            .header("ack", "auto")
    }

    pub fn send(destination: &str, body: impl Into<String>) -> Self {
        Frame::new("SEND")
            .header("destination", destination)
            .header("content-type", "application/json")
            .body(body)
    }

    pub fn disconnect() -> Self {
        Frame::new("DISCONNECT")
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.command)?;
        if let Some(dest) = self.get("destination") {
            write!(f, " {}", dest)?;
        }
        Ok(())
    }
}

fn escape_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(raw: &str) -> Result<String, StompError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            other => {
                return Err(StompError::Frame(format!(
                    "invalid header escape: \\{}",
                    other.map(String::from).unwrap_or_default()
                )))
            }
        }
    }
    Ok(out)
}

/// Locate the blank line ending the header block.
///
/// Returns `(end_of_headers, start_of_body)` as byte offsets.
fn find_header_end(buf: &str) -> Option<(usize, usize)> {
    let bytes = buf.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\n' {
            if bytes.get(i + 1) == Some(&b'\n') {
                return Some((i, i + 2));
            }
            if bytes.get(i + 1) == Some(&b'\r') && bytes.get(i + 2) == Some(&b'\n') {
                return Some((i, i + 3));
            }
        }
        i += 1;
    }
    None
}

/// Incremental decoder for a stream of STOMP text.
///
/// Chunks may hold several frames, a partial frame, or bare EOL heart-beats.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: String,
    heartbeats: u64,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &str) {
        self.buf.push_str(chunk);
    }

    /// Number of bare heart-beat EOLs seen so far.
    pub fn heartbeats(&self) -> u64 {
        self.heartbeats
    }

    /// Decode the next complete frame, if one is buffered.
    ///
    /// On a malformed frame the buffer is discarded so the stream can resync
    /// at the next chunk.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, StompError> {
        self.skip_heartbeats();
        if self.buf.is_empty() {
            return Ok(None);
        }

        let Some((header_end, body_start)) = find_header_end(&self.buf) else {
            return Ok(None);
        };

        match self.parse_at(header_end, body_start) {
            Ok(Some((frame, consumed))) => {
                self.buf.drain(..consumed);
                Ok(Some(frame))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                self.buf.clear();
                Err(e)
            }
        }
    }

    fn skip_heartbeats(&mut self) {
        let trimmed = self.buf.trim_start_matches(['\n', '\r']);
        let skipped = self.buf.len() - trimmed.len();
        if skipped > 0 {
            self.heartbeats += self.buf[..skipped].matches('\n').count() as u64;
            self.buf.drain(..skipped);
        }
    }

    fn parse_at(
        &self,
        header_end: usize,
        body_start: usize,
    ) -> Result<Option<(Frame, usize)>, StompError> {
        let head = &self.buf[..header_end];
        let mut lines = head.split('\n').map(|l| l.trim_end_matches('\r'));
        let command = lines
            .next()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| StompError::Frame("missing command".to_string()))?
            .to_string();
        let escaped = command != "CONNECT" && command != "CONNECTED";

        let mut headers = Vec::new();
        for line in lines {
            let (key, value) = line
                .split_once(':')
                .ok_or_else(|| StompError::Frame(format!("header without colon: {line}")))?;
            if escaped {
                headers.push((unescape_header(key)?, unescape_header(value)?));
            } else {
                headers.push((key.to_string(), value.to_string()));
            }
        }

        let content_length = headers
            .iter()
            .find(|(k, _)| k == "content-length")
            .map(|(_, v)| {
                v.trim()
                    .parse::<usize>()
                    .map_err(|_| StompError::Frame(format!("bad content-length: {v}")))
            })
            .transpose()?;

        let (body_end, consumed) = match content_length {
            Some(len) => {
                let end = body_start
                    .checked_add(len)
                    .filter(|_| len <= MAX_BODY_LEN)
                    .ok_or_else(|| StompError::Frame(format!("bad content-length: {len}")))?;
                if self.buf.len() <= end {
                    return Ok(None);
                }
                if self.buf.as_bytes()[end] != 0 || !self.buf.is_char_boundary(end) {
                    return Err(StompError::Frame(
                        "body does not end at content-length".to_string(),
                    ));
                }
                (end, end + 1)
            }
            None => match self.buf[body_start..].find('\0') {
                Some(offset) => (body_start + offset, body_start + offset + 1),
                None => return Ok(None),
            },
        };

        let frame = Frame {
            command,
            headers,
            body: self.buf[body_start..body_end].to_string(),
        };
        Ok(Some((frame, consumed)))
    }
}
