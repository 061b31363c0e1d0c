use std::time::Duration;

use parley_core::ParleyConfig;
use parley_stomp::HeartBeat;

/// Flattened view of the configuration the session core needs.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub identity_header: String,
    pub message_topic: String,
    pub presence_topic: String,
    pub send_destination: String,
    /// `None` disables the join notice.
    pub join_destination: Option<String>,
    pub heart_beat: HeartBeat,
    pub reconnect_delay: Duration,
    pub cold_start: Duration,
    pub cooldown: Duration,
    pub presence_recheck: Duration,
    pub notice_window: Duration,
    pub max_message_length: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&ParleyConfig::default())
    }
}

impl SessionSettings {
    pub fn from_config(config: &ParleyConfig) -> Self {
        let broker = &config.broker;
        Self {
            identity_header: broker.identity_header.clone(),
            message_topic: broker.message_topic.clone(),
            presence_topic: broker.presence_topic.clone(),
            send_destination: broker.send_destination.clone(),
            join_destination: broker.join_destination().map(str::to_string),
            heart_beat: HeartBeat::new(broker.heartbeat_outgoing_ms, broker.heartbeat_incoming_ms),
            reconnect_delay: broker.reconnect_delay(),
            cold_start: config.resumption.cold_start(),
            cooldown: config.resumption.cooldown(),
            presence_recheck: config.resumption.presence_recheck(),
            notice_window: config.feed.notice_dedup_window(),
            max_message_length: config.feed.max_message_length,
        }
    }
}
