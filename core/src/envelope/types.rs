// Envelope types — the one thing that crosses the wire

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// User-chosen presence shown next to a chat line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Presence {
    Working,
    Sleeping,
    Eating,
}

impl Presence {
    /// All presence values, in display order
    pub const ALL: [Presence; 3] = [Presence::Working, Presence::Sleeping, Presence::Eating];

    /// Stable lowercase form used by config files and the CLI
    pub fn as_str(&self) -> &'static str {
        match self {
            Presence::Working => "working",
            Presence::Sleeping => "sleeping",
            Presence::Eating => "eating",
        }
    }

    /// Short label for rendering a chat line
    pub fn label(&self) -> &'static str {
        match self {
            Presence::Working => "Working",
            Presence::Sleeping => "Sleeping",
            Presence::Eating => "Eating",
        }
    }

    /// Label for an optional presence; `-` when unset
    pub fn label_or_dash(presence: Option<Presence>) -> &'static str {
        presence.map(|p| p.label()).unwrap_or("-")
    }

    /// Parse user input into an optional presence.
    ///
    /// `none`, `-` and the empty string mean "no presence".
    pub fn parse_optional(input: &str) -> Result<Option<Presence>, PresenceParseError> {
        let trimmed = input.trim();
        if trimmed.is_empty() || trimmed == "-" || trimmed.eq_ignore_ascii_case("none") {
            return Ok(None);
        }
        trimmed.parse().map(Some)
    }
}

impl fmt::Display for Presence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown presence: {0}")]
pub struct PresenceParseError(pub String);

impl FromStr for Presence {
    type Err = PresenceParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Presence::ALL
            .iter()
            .copied()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| PresenceParseError(s.to_string()))
    }
}

/// A chat line: the only envelope kind that is ever shown to a user
/// or kept in history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatLine {
    /// Display name of the author
    pub sender: String,
    /// Message text
    pub body: String,
    /// Address the author reported for itself
    pub origin_address: String,
    /// Unix timestamp (milliseconds)
    pub timestamp: u64,
    /// Author's presence at send time
    pub presence: Option<Presence>,
}

impl ChatLine {
    /// Create a chat line stamped with the current time
    pub fn new(
        sender: impl Into<String>,
        body: impl Into<String>,
        origin_address: impl Into<String>,
        presence: Option<Presence>,
    ) -> Self {
        Self {
            sender: sender.into(),
            body: body.into(),
            origin_address: origin_address.into(),
            timestamp: current_timestamp_millis(),
            presence,
        }
    }
}

/// Control messages exchanged between client and server
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Notification {
    /// First envelope on every connection: who the peer claims to be
    Auth { name: String, credential: String },
    /// Client is leaving
    Closing,
    /// Liveness probe from the server
    KeepAlive,
    /// Server is dropping this client
    ForceClose,
}

// Credentials must never reach a log line through `{:?}`.
impl fmt::Debug for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notification::Auth { name, .. } => f
                .debug_struct("Auth")
                .field("name", name)
                .field("credential", &"<redacted>")
                .finish(),
            Notification::Closing => f.write_str("Closing"),
            Notification::KeepAlive => f.write_str("KeepAlive"),
            Notification::ForceClose => f.write_str("ForceClose"),
        }
    }
}

/// One framed message on a connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Envelope {
    Payload(ChatLine),
    Notification(Notification),
}

impl Envelope {
    pub fn auth(name: impl Into<String>, credential: impl Into<String>) -> Self {
        Envelope::Notification(Notification::Auth {
            name: name.into(),
            credential: credential.into(),
        })
    }

    pub fn closing() -> Self {
        Envelope::Notification(Notification::Closing)
    }

    pub fn keep_alive() -> Self {
        Envelope::Notification(Notification::KeepAlive)
    }

    pub fn force_close() -> Self {
        Envelope::Notification(Notification::ForceClose)
    }

    /// The chat line carried by a payload envelope
    pub fn as_chat_line(&self) -> Option<&ChatLine> {
        match self {
            Envelope::Payload(line) => Some(line),
            Envelope::Notification(_) => None,
        }
    }

    /// Human-readable kind, for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Payload(_) => "Payload",
            Envelope::Notification(Notification::Auth { .. }) => "Auth",
            Envelope::Notification(Notification::Closing) => "Closing",
            Envelope::Notification(Notification::KeepAlive) => "KeepAlive",
            Envelope::Notification(Notification::ForceClose) => "ForceClose",
        }
    }
}

impl From<ChatLine> for Envelope {
    fn from(line: ChatLine) -> Self {
        Envelope::Payload(line)
    }
}

pub(crate) fn current_timestamp_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
