use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ParleyError, Result};

/// Top-level configuration for the Parley client.
///
/// Loaded from `~/.parley/config.toml` by default. Every section falls back
/// to its defaults when missing, so a partial file is always valid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParleyConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub presence: PresenceConfig,
    #[serde(default)]
    pub resumption: ResumptionConfig,
    #[serde(default)]
    pub feed: FeedConfig,
}

impl ParleyConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ParleyConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| ParleyError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directory holding the persisted identity and other client state.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.parley".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl GeneralConfig {
    /// Expand a leading `~` in `data_dir` to the user's home directory.
    pub fn resolved_data_dir(&self) -> PathBuf {
        let data_dir = &self.data_dir;
        if data_dir.starts_with("~/") || data_dir.starts_with("~\\") {
            #[cfg(target_os = "windows")]
            let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
            #[cfg(not(target_os = "windows"))]
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(&data_dir[2..])
        } else {
            PathBuf::from(data_dir)
        }
    }
}

/// How long a session identity lives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityScope {
    /// Persisted under the data directory and reused across runs.
    #[default]
    Profile,
    /// Generated fresh for every process.
    Process,
}

/// Session identity configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub scope: IdentityScope,
}

/// Broker connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// HTTP base URL of the backend, e.g. `http://localhost:8080`.
    pub base_url: String,
    /// SockJS endpoint path.
    pub endpoint: String,
    /// Transports to try, in order: "websocket", "xhr-polling".
    pub transports: Vec<String>,
    /// CONNECT header carrying the session identity.
    pub identity_header: String,
    /// Broadcast destination for chat messages.
    pub message_topic: String,
    /// Broadcast destination for presence counts.
    pub presence_topic: String,
    /// Destination for outbound chat messages.
    pub send_destination: String,
    /// Destination for the join notice. Empty disables it.
    pub join_destination: String,
    /// Fixed delay before an automatic reconnect attempt.
    pub reconnect_delay_ms: u64,
    /// Interval at which the server is asked to send heart-beats.
    pub heartbeat_incoming_ms: u64,
    /// Interval at which the client offers to send heart-beats.
    pub heartbeat_outgoing_ms: u64,
    /// Time allowed for CONNECTED after the transport opened. A failed
    /// handshake counts as a transport failure and takes the fixed retry.
    pub handshake_timeout_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            endpoint: "/ws".to_string(),
            transports: vec!["websocket".to_string(), "xhr-polling".to_string()],
            identity_header: "userId".to_string(),
            message_topic: "/topic/messages".to_string(),
            presence_topic: "/topic/presence".to_string(),
            send_destination: "/app/chat.send".to_string(),
            join_destination: "/app/chat.join".to_string(),
            reconnect_delay_ms: 5000,
            heartbeat_incoming_ms: 10_000,
            heartbeat_outgoing_ms: 0,
            handshake_timeout_ms: 10_000,
        }
    }
}

impl BrokerConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// The join destination, or `None` when join notices are disabled.
    pub fn join_destination(&self) -> Option<&str> {
        let dest = self.join_destination.trim();
        (!dest.is_empty()).then_some(dest)
    }
}

/// Presence query configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// Path of the counting endpoint, relative to `broker.base_url`.
    pub count_path: String,
    /// Timeout for a single presence query.
    pub request_timeout_ms: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            count_path: "/api/presence/count".to_string(),
            request_timeout_ms: 5000,
        }
    }
}

/// Resumption trigger tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResumptionConfig {
    /// Window after mount during which resumption signals are ignored.
    pub cold_start_ms: u64,
    /// Minimum gap between two accepted resumption triggers.
    pub cooldown_ms: u64,
    /// Delay before the second presence pull after a connect or resumption.
    pub presence_recheck_ms: u64,
}

impl Default for ResumptionConfig {
    fn default() -> Self {
        Self {
            cold_start_ms: 800,
            cooldown_ms: 500,
            presence_recheck_ms: 200,
        }
    }
}

impl ResumptionConfig {
    pub fn cold_start(&self) -> Duration {
        Duration::from_millis(self.cold_start_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn presence_recheck(&self) -> Duration {
        Duration::from_millis(self.presence_recheck_ms)
    }
}

/// Message feed configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Identical system notices inside this window are shown once.
    pub notice_dedup_window_ms: u64,
    /// Maximum outbound message length in characters.
    pub max_message_length: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            notice_dedup_window_ms: 3000,
            max_message_length: 2000,
        }
    }
}

impl FeedConfig {
    pub fn notice_dedup_window(&self) -> Duration {
        Duration::from_millis(self.notice_dedup_window_ms)
    }
}
