//! STOMP 1.2 over SockJS for the Parley client.
//!
//! Provides the frame codecs, heart-beat negotiation, the fallback-capable
//! SockJS transports, and a connector that yields a live [`StompSession`].

pub mod client;
pub mod error;
pub mod frame;
pub mod heartbeat;
pub mod sockjs;
pub mod transport;

pub use client::{ConnectRequest, Connector, SockJsConnector, StompEvent, StompHandle, StompSession};
pub use error::StompError;
pub use frame::{Frame, FrameDecoder};
pub use heartbeat::HeartBeat;
pub use sockjs::SockJsFrame;
pub use transport::TransportKind;
