//! Inbound event envelopes and event-type decoding.
//!
//! The platform encodes `stage.task.status` into the trailing segments of
//! the event type string. That string is decoded exactly once, at the
//! boundary, into an [`EventType`]; everything downstream matches on the
//! typed value instead of comparing strings.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Prefix of the legacy (v1) event catalog, e.g. `sh.keptn.events.deployment-finished`
const LEGACY_PREFIX: &str = "sh.keptn.events.";

/// Task name whose triggered events follow the action protocol
pub const ACTION_TASK: &str = "action";

/// Errors raised when an inbound event cannot be decoded
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Failed to split event of type {0}")]
    UndecodableType(String),

    #[error("Event {id} of type {event_type} carries no data payload")]
    MissingData { id: String, event_type: String },

    #[error("Event {id} has a malformed data payload: {source}")]
    MalformedData {
        id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Action event {0} does not name an action")]
    MissingActionName(String),
}

/// Structured event envelope as delivered by the listener.
///
/// Unknown top-level attributes are retained in `extensions` so that the
/// serialized event handed to scripts is the full inbound document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: String,

    #[serde(rename = "type")]
    pub event_type: String,

    #[serde(default)]
    pub source: String,

    #[serde(default = "default_spec_version")]
    pub specversion: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,

    /// Cross-service correlation id
    #[serde(default)]
    pub shkeptncontext: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggeredid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datacontenttype: Option<String>,

    #[serde(default)]
    pub data: serde_json::Value,

    #[serde(flatten)]
    pub extensions: serde_json::Map<String, serde_json::Value>,
}

fn default_spec_version() -> String {
    "1.0".to_string()
}

impl EventEnvelope {
    /// Parse an envelope from its JSON text
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// The envelope as a generic JSON tree (used for placeholders and script input)
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Decode the event type string
    pub fn decode_type(&self) -> Result<EventType, ProtocolError> {
        EventType::parse(&self.event_type)
    }
}

/// Lifecycle phase encoded in the last segment of an event type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Triggered,
    Started,
    Finished,
    /// Non-lifecycle status words such as `change` or `open`
    Other(String),
}

impl Phase {
    fn parse(segment: &str) -> Self {
        match segment {
            "triggered" => Self::Triggered,
            "started" => Self::Started,
            "finished" => Self::Finished,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Triggered => "triggered",
            Self::Started => "started",
            Self::Finished => "finished",
            Self::Other(s) => s,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded event type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventType {
    /// Segment preceding the task (a stage name for sequence events)
    pub stage: String,
    pub task: String,
    pub phase: Phase,
}

impl EventType {
    /// Decode `...<stage>.<task>.<status>` or the legacy `sh.keptn.events.<task>-<status>`
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        if let Some(rest) = raw.strip_prefix(LEGACY_PREFIX) {
            if !rest.contains('.') {
                if let Some((task, status)) = rest.rsplit_once('-') {
                    if !task.is_empty() && !status.is_empty() {
                        return Ok(Self {
                            stage: String::new(),
                            task: task.to_string(),
                            phase: Phase::parse(status),
                        });
                    }
                }
            }
        }

        let split: Vec<&str> = raw.split('.').collect();
        if split.len() < 3 || split.iter().rev().take(3).any(|s| s.is_empty()) {
            return Err(ProtocolError::UndecodableType(raw.to_string()));
        }

        let n = split.len();
        Ok(Self {
            stage: split[n - 3].to_string(),
            task: split[n - 2].to_string(),
            phase: Phase::parse(split[n - 1]),
        })
    }

    /// Base event-name: `task.status`
    pub fn event_name(&self) -> String {
        format!("{}.{}", self.task, self.phase)
    }

    /// Only triggered events are answered with started/finished notifications
    pub fn requires_lifecycle(&self) -> bool {
        self.phase == Phase::Triggered
    }

    /// Whether this is a triggered action, handled by the three-step protocol
    pub fn is_action_trigger(&self) -> bool {
        self.task == ACTION_TASK && self.phase == Phase::Triggered
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.stage, self.task, self.phase)
    }
}
