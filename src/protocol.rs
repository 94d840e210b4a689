//! WebSocket protocol: connection parameters, inbound classification and
//! the server-originated messages.
//!
//! Inbound text frames are JSON objects discriminated by `command` or `type`.
//! Relayed payloads are kept as raw JSON maps so fields the relay does not
//! know about survive forwarding untouched.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;

use crate::constants::DEFAULT_ROOM;

/// Signaling role of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Pub,
    #[default]
    Sub,
}

impl Role {
    /// Unrecognised roles fall back to subscriber
    pub fn from_query(value: &str) -> Self {
        match value {
            "pub" => Role::Pub,
            _ => Role::Sub,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Pub => "pub",
            Role::Sub => "sub",
        }
    }

    /// The role signaling messages without an explicit target are relayed to
    pub fn opposite(&self) -> Self {
        match self {
            Role::Pub => Role::Sub,
            Role::Sub => Role::Pub,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dashboard page a connection belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(from = "String", into = "String")]
pub enum Page {
    #[default]
    Audio,
    Video,
    Other(String),
}

impl From<String> for Page {
    fn from(value: String) -> Self {
        match value.as_str() {
            "audio" => Page::Audio,
            "video" => Page::Video,
            _ => Page::Other(value),
        }
    }
}

impl From<Page> for String {
    fn from(page: Page) -> Self {
        page.to_string()
    }
}

impl fmt::Display for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Page::Audio => f.write_str("audio"),
            Page::Video => f.write_str("video"),
            Page::Other(name) => f.write_str(name),
        }
    }
}

/// Query parameters of the WebSocket endpoint
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ConnectParams {
    pub role: Option<String>,
    pub room: Option<String>,
    pub page: Option<String>,
}

impl ConnectParams {
    pub fn role(&self) -> Role {
        self.role.as_deref().map(Role::from_query).unwrap_or_default()
    }

    pub fn room(&self) -> String {
        match self.room.as_deref() {
            Some(room) if !room.is_empty() => room.to_string(),
            _ => DEFAULT_ROOM.to_string(),
        }
    }

    pub fn page(&self) -> Page {
        match self.page.as_deref() {
            Some(page) if !page.is_empty() => Page::from(page.to_string()),
            _ => Page::default(),
        }
    }
}

/// Dashboard control commands (`{command: ...}`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    StartIntegration,
    StopIntegration,
    GetSettings,
}

impl ControlCommand {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "start_integration" => Some(Self::StartIntegration),
            "stop_integration" => Some(Self::StopIntegration),
            "get_settings" => Some(Self::GetSettings),
            _ => None,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Self::StartIntegration => "start_integration",
            Self::StopIntegration => "stop_integration",
            Self::GetSettings => "get_settings",
        }
    }

    /// `{command: ...}` as relayed to other peers
    pub fn to_message(&self) -> String {
        json!({ "command": self.tag() }).to_string()
    }
}

/// Scalar telemetry delivered to audio pages only
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryKind {
    Levels,
    MomentaryLkfs,
    ShortTermLkfs,
    IntegratedLkfs,
    Correlation,
    Eq,
    LoudnessRange,
    SystemStats,
}

impl TelemetryKind {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "levels" => Some(Self::Levels),
            "lkfs" => Some(Self::MomentaryLkfs),
            "s_lkfs" => Some(Self::ShortTermLkfs),
            "i_lkfs" => Some(Self::IntegratedLkfs),
            "correlation" => Some(Self::Correlation),
            "eq" => Some(Self::Eq),
            "lra" => Some(Self::LoudnessRange),
            "system_stats" => Some(Self::SystemStats),
            _ => None,
        }
    }
}

/// Visualization payloads whose last value is replayed to late joiners
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheCategory {
    Vectorscope,
    SignalInfo,
}

impl CacheCategory {
    pub const ALL: [CacheCategory; 2] = [CacheCategory::Vectorscope, CacheCategory::SignalInfo];

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "vectorscope_samples" => Some(Self::Vectorscope),
            "signal_info" => Some(Self::SignalInfo),
            _ => None,
        }
    }

    /// Whether a peer on `page` consumes this category
    pub fn serves(&self, page: &Page) -> bool {
        match self {
            CacheCategory::Vectorscope => *page == Page::Audio,
            CacheCategory::SignalInfo => matches!(page, Page::Audio | Page::Video),
        }
    }
}

/// WebRTC negotiation messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Offer,
    Answer,
    Candidate,
    NeedOffer,
}

impl SignalKind {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "offer" => Some(Self::Offer),
            "answer" => Some(Self::Answer),
            "candidate" => Some(Self::Candidate),
            "need-offer" => Some(Self::NeedOffer),
            _ => None,
        }
    }
}

/// A classified inbound text message
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Command(ControlCommand),
    Telemetry(TelemetryKind, Map<String, Value>),
    Visual(CacheCategory, Map<String, Value>),
    /// Addressed (`to`) or room-scoped signaling
    Signal {
        to: Option<String>,
        body: Map<String, Value>,
    },
    /// Valid JSON the relay has no route for
    Ignored(String),
}

impl Inbound {
    /// Parse and classify a text frame. Only malformed JSON is an error.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(text)?;
        Ok(Self::classify(value))
    }

    /// Anything carrying a string `to` is relayed as signaling regardless of
    /// its type; otherwise `command` wins over `type`.
    pub fn classify(value: Value) -> Self {
        let Value::Object(body) = value else {
            return Inbound::Ignored("non-object message".into());
        };

        if let Some(to) = body.get("to").and_then(Value::as_str) {
            return Inbound::Signal {
                to: Some(to.to_string()),
                body,
            };
        }

        if let Some(command) = body.get("command").and_then(Value::as_str) {
            return match ControlCommand::from_tag(command) {
                Some(command) => Inbound::Command(command),
                None => Inbound::Ignored(format!("command {command}")),
            };
        }

        let Some(tag) = body.get("type").and_then(Value::as_str) else {
            return Inbound::Ignored("missing type".into());
        };

        if let Some(kind) = TelemetryKind::from_tag(tag) {
            Inbound::Telemetry(kind, body)
        } else if let Some(category) = CacheCategory::from_tag(tag) {
            Inbound::Visual(category, body)
        } else if SignalKind::from_tag(tag).is_some() {
            Inbound::Signal { to: None, body }
        } else {
            Inbound::Ignored(format!("type {tag}"))
        }
    }
}

/// Directive asking a publisher to create an offer for a new subscriber
pub fn need_offer(subscriber: &str, room: &str) -> String {
    json!({ "type": "need-offer", "to": subscriber, "room": room }).to_string()
}

/// Derived integration state pushed to audio pages
pub fn integration_state(is_integrating: bool) -> String {
    json!({ "type": "integration_state", "is_integrating": is_integrating }).to_string()
}

/// Re-emit a relayed message with the sender stamped as `from`
pub fn stamp_from(mut body: Map<String, Value>, from: &str) -> String {
    body.insert("from".into(), Value::String(from.to_string()));
    Value::Object(body).to_string()
}
