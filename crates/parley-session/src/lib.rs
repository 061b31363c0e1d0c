//! Chat session manager for Parley.
//!
//! Keeps exactly one broker session alive across flaky networks, merges the
//! inbound feed in a stable order without duplicates, reconciles presence,
//! and exposes a small reactive state surface to the view.

pub mod error;
pub mod feed;
pub mod manager;
pub mod notice;
pub mod presence;
pub mod resumption;
pub mod session;
pub mod settings;
pub mod state;

pub use error::SessionError;
pub use feed::{IngestOutcome, MessageFeed};
pub use manager::{ChatSessionHandle, ChatSessionManager, WeakSessionHandle};
pub use notice::{Notice, NoticeLedger};
pub use presence::{HttpPresenceClient, PresenceSource, PresenceTracker};
pub use resumption::{EnvironmentSignal, ResumptionDecision, ResumptionPolicy};
pub use session::{Command, LinkFailure, SendOutcome, SessionCore, SessionSnapshot};
pub use settings::SessionSettings;
pub use state::ConnectionState;
