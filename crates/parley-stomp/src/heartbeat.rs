//! STOMP heart-beat negotiation.
//!
//! The client never originates heart-beats (outgoing 0): suspended mobile
//! contexts starve client timers, so the server's beats are the liveness
//! signal and the client only watches for their absence.

use std::time::Duration;

use crate::error::StompError;

/// A `heart-beat` header value: `<outgoing>,<incoming>` in milliseconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeartBeat {
    pub outgoing_ms: u64,
    pub incoming_ms: u64,
}

impl HeartBeat {
    pub fn new(outgoing_ms: u64, incoming_ms: u64) -> Self {
        Self {
            outgoing_ms,
            incoming_ms,
        }
    }

    pub fn parse(value: &str) -> Result<Self, StompError> {
        let (out, inc) = value
            .split_once(',')
            .ok_or_else(|| StompError::Frame(format!("bad heart-beat header: {value}")))?;
        let parse = |s: &str| {
            s.trim()
                .parse::<u64>()
                .map_err(|_| StompError::Frame(format!("bad heart-beat header: {value}")))
        };
        Ok(Self::new(parse(out)?, parse(inc)?))
    }

    pub fn header_value(&self) -> String {
        format!("{},{}", self.outgoing_ms, self.incoming_ms)
    }

    /// Combine the client offer with the server's CONNECTED header.
    ///
    /// Either side declaring 0 disables that direction; otherwise the larger
    /// interval wins.
    pub fn negotiate(client: HeartBeat, server: HeartBeat) -> Negotiated {
        let pick = |mine: u64, theirs: u64| {
            if mine == 0 || theirs == 0 {
                None
            } else {
                Some(Duration::from_millis(mine.max(theirs)))
            }
        };
        Negotiated {
            outgoing: pick(client.outgoing_ms, server.incoming_ms),
            incoming: pick(client.incoming_ms, server.outgoing_ms),
        }
    }
}

/// Effective heart-beat intervals after the handshake.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Negotiated {
    /// How often the client must send. `None` when disabled.
    pub outgoing: Option<Duration>,
    /// How often the server will send. `None` when disabled.
    pub incoming: Option<Duration>,
}

impl Negotiated {
    /// Silence longer than this means the link is dead.
    pub fn incoming_deadline(&self) -> Option<Duration> {
        self.incoming.map(|interval| interval * 2)
    }
}
