//! Terminal input parsing and feed rendering.

use std::collections::HashSet;

use chrono::Local;

use parley_core::{ChatMessage, ConnectionStatus};
use parley_session::{EnvironmentSignal, SessionSnapshot};

pub const HELP: &str = "\
Commands:
  /focus     report window focus
  /visible   report the view becoming visible
  /restore   report a restore from suspension
  /online    report the network coming back
  /help      show this help
  /quit      leave the chat
Anything else is sent as a message.";

/// One line typed by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInput {
    Message(String),
    Signal(EnvironmentSignal),
    Help,
    Quit,
    Unknown(String),
    Empty,
}

impl ConsoleInput {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return ConsoleInput::Empty;
        }
        let Some(command) = line.strip_prefix('/') else {
            return ConsoleInput::Message(line.to_string());
        };
        match command.to_ascii_lowercase().as_str() {
            "focus" => ConsoleInput::Signal(EnvironmentSignal::WindowFocus),
            "visible" => ConsoleInput::Signal(EnvironmentSignal::VisibilityVisible),
            "restore" => ConsoleInput::Signal(EnvironmentSignal::PageRestored),
            "online" => ConsoleInput::Signal(EnvironmentSignal::NetworkOnline),
            "help" | "?" => ConsoleInput::Help,
            "quit" | "exit" => ConsoleInput::Quit,
            _ => ConsoleInput::Unknown(line.to_string()),
        }
    }
}

/// Turns snapshots into terminal lines.
///
/// A terminal cannot reorder what it already printed, so each feed entry is
/// printed once, when it first appears, in feed order among the new ones.
#[derive(Debug, Default)]
pub struct Renderer {
    printed: HashSet<u64>,
    status: Option<(ConnectionStatus, Option<String>)>,
    presence: Option<u32>,
}

impl Renderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines to print for everything that changed since the last snapshot.
    pub fn render(&mut self, snapshot: &SessionSnapshot) -> Vec<String> {
        let mut lines = Vec::new();

        let status = (snapshot.status, snapshot.reason.clone());
        if self.status.as_ref() != Some(&status) {
            lines.push(match &status.1 {
                Some(reason) => format!("-- {} ({reason})", status.0),
                None => format!("-- {}", status.0),
            });
            self.status = Some(status);
        }

        if snapshot.presence != self.presence {
            if let Some(count) = snapshot.presence {
                lines.push(format!("-- {count} online"));
            }
            self.presence = snapshot.presence;
        }

        for message in &snapshot.messages {
            if self.printed.insert(message.seq) {
                lines.push(format_message(message));
            }
        }
        lines
    }
}

fn format_message(message: &ChatMessage) -> String {
    let time = message
        .created_at
        .or(message.client_sent_at)
        .map(|ts| ts.with_timezone(&Local).format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--:--:--".to_string());
    if message.is_system_notice {
        format!("[{time}] * {}", message.content)
    } else {
        format!("[{time}] {}: {}", message.sender, message.content)
    }
}
