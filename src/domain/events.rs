//! Outbound lifecycle notifications.
//!
//! Every triggered event that has a matching script is answered with a
//! `started` event followed by a `finished` event, both sharing the inbound
//! correlation id.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::context::EventContext;

/// Event type prefix used for outbound notifications
pub const EVENT_TYPE_PREFIX: &str = "sh.keptn.event.";

/// Status of a task: did the task itself run to completion?
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusType {
    Succeeded,
    Errored,
    Unknown,
}

impl StatusType {
    /// Parse a single status token (case-insensitive)
    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "succeeded" => Some(Self::Succeeded),
            "errored" => Some(Self::Errored),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for StatusType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Succeeded => "succeeded",
            Self::Errored => "errored",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Result of a task: what did the task find out?
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultType {
    Pass,
    Warning,
    #[serde(rename = "fail")]
    Failed,
}

impl fmt::Display for ResultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pass => "pass",
            Self::Warning => "warning",
            Self::Failed => "fail",
        };
        f.write_str(s)
    }
}

/// Lifecycle notification kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    Started,
    Finished,
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Started => f.write_str("started"),
            Self::Finished => f.write_str("finished"),
        }
    }
}

/// Data payload of an outbound notification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskEventData {
    pub project: String,
    pub stage: String,
    pub service: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    pub status: StatusType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ResultType>,

    pub message: String,

    /// Task-named sub-objects merged from script responses
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl TaskEventData {
    /// Data for a started notification
    pub fn started(ctx: &EventContext, message: impl Into<String>) -> Self {
        Self {
            project: ctx.scope.project.clone(),
            stage: ctx.scope.stage.clone(),
            service: ctx.scope.service.clone(),
            labels: ctx.labels.clone(),
            status: StatusType::Succeeded,
            result: None,
            message: message.into(),
            extra: serde_json::Map::new(),
        }
    }

    /// Data for a finished notification
    pub fn finished(
        ctx: &EventContext,
        status: StatusType,
        result: ResultType,
        message: impl Into<String>,
    ) -> Self {
        Self {
            result: Some(result),
            status,
            ..Self::started(ctx, message)
        }
    }

    /// Merge a JSON object as a sub-property named after the task
    pub fn merge_task_output(&mut self, task: &str, output: serde_json::Map<String, serde_json::Value>) {
        match self.extra.get_mut(task) {
            Some(serde_json::Value::Object(existing)) => existing.extend(output),
            _ => {
                self.extra
                    .insert(task.to_string(), serde_json::Value::Object(output));
            }
        }
    }
}

/// A complete outbound event envelope
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutboundEvent {
    pub specversion: String,
    pub id: Uuid,

    #[serde(rename = "type")]
    pub event_type: String,

    pub source: String,
    pub time: DateTime<Utc>,
    pub datacontenttype: String,
    pub shkeptncontext: String,
    pub triggeredid: String,
    pub data: TaskEventData,
}

impl OutboundEvent {
    /// Create a notification answering the event described by `ctx`
    pub fn new(
        ctx: &EventContext,
        notification: Notification,
        source: impl Into<String>,
        data: TaskEventData,
    ) -> Self {
        Self {
            specversion: "1.0".to_string(),
            id: Uuid::new_v4(),
            event_type: format!(
                "{}{}.{}",
                EVENT_TYPE_PREFIX, ctx.event_type.task, notification
            ),
            source: source.into(),
            time: Utc::now(),
            datacontenttype: "application/json".to_string(),
            shkeptncontext: ctx.context.clone(),
            triggeredid: ctx.event_id.clone(),
            data,
        }
    }
}
