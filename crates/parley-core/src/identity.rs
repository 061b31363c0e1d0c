//! Session identity: an opaque id plus a nickname derived from it.
//!
//! Profile-scoped identities are persisted as JSON under the data directory
//! so the backend can correlate reconnects across restarts.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::IdentityScope;
use crate::error::{ParleyError, Result};

const ADJECTIVES: [&str; 16] = [
    "Amber", "Brisk", "Calm", "Dusky", "Eager", "Fuzzy", "Gentle", "Hazy", "Idle", "Jolly",
    "Keen", "Lucky", "Misty", "Nimble", "Quiet", "Rapid",
];

const ANIMALS: [&str; 16] = [
    "Otter", "Heron", "Badger", "Falcon", "Lynx", "Marten", "Newt", "Panda", "Quail", "Raven",
    "Stoat", "Tapir", "Vole", "Wren", "Yak", "Zebu",
];

/// Identity of this client for the lifetime of its scope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub id: String,
    pub nickname: String,
}

impl SessionIdentity {
    /// Generate a fresh identity.
    pub fn generate() -> Self {
        Self::from_id(Uuid::new_v4().to_string())
    }

    /// Build an identity for an existing id, deriving the nickname.
    pub fn from_id(id: impl Into<String>) -> Self {
        let id = id.into();
        let nickname = derive_nickname(&id);
        Self { id, nickname }
    }

    /// Replace the display name, keeping the id.
    pub fn with_nickname(mut self, nickname: impl Into<String>) -> Self {
        self.nickname = nickname.into();
        self
    }
}

/// Derive a display nickname from the last six hex digits of `id`.
///
/// Non-hex characters are skipped, so any id maps to a stable nickname.
pub fn derive_nickname(id: &str) -> String {
    let hex: Vec<char> = id.chars().filter(|c| c.is_ascii_hexdigit()).collect();
    let suffix: String = hex[hex.len().saturating_sub(6)..].iter().collect();
    let value = u32::from_str_radix(&suffix, 16).unwrap_or(0);

    let adjective = ADJECTIVES[(value >> 4) as usize % ADJECTIVES.len()];
    let animal = ANIMALS[(value >> 8) as usize % ANIMALS.len()];
    let tag: String = suffix
        .chars()
        .skip(suffix.len().saturating_sub(4))
        .collect::<String>()
        .to_uppercase();
    format!("{adjective}{animal}-{tag}")
}

/// Loads or creates the session identity for a given scope.
#[derive(Debug, Clone)]
pub struct IdentityStore {
    path: PathBuf,
    scope: IdentityScope,
}

impl IdentityStore {
    pub fn new(data_dir: &Path, scope: IdentityScope) -> Self {
        Self {
            path: data_dir.join("identity.json"),
            scope,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Return the identity for this scope.
    ///
    /// Process scope always generates a new identity. Profile scope reuses the
    /// persisted one and replaces it if it is missing or unreadable.
    pub fn load_or_create(&self) -> Result<SessionIdentity> {
        if self.scope == IdentityScope::Process {
            let identity = SessionIdentity::generate();
            debug!(id = %identity.id, "Generated process-scoped identity");
            return Ok(identity);
        }

        match self.load() {
            Ok(identity) => {
                debug!(id = %identity.id, path = %self.path.display(), "Loaded identity");
                Ok(identity)
            }
            Err(e) => {
                if self.path.exists() {
                    warn!(path = %self.path.display(), error = %e, "Discarding unreadable identity");
                }
                let identity = SessionIdentity::generate();
                self.save(&identity)?;
                info!(id = %identity.id, nickname = %identity.nickname, "Created identity");
                Ok(identity)
            }
        }
    }

    fn load(&self) -> Result<SessionIdentity> {
        let content = std::fs::read_to_string(&self.path)?;
        let stored: SessionIdentity = serde_json::from_str(&content)?;
        if stored.id.trim().is_empty() {
            return Err(ParleyError::Identity("empty identity id".to_string()));
        }
        // The nickname is always re-derived so the mapping stays authoritative.
        Ok(SessionIdentity::from_id(stored.id))
    }

    fn save(&self, identity: &SessionIdentity) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(identity)?)?;
        Ok(())
    }
}
