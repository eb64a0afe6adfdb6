//! The canonical per-event record carried through the pipeline.
//!
//! An [`EventContext`] is created once per inbound event, lives for the
//! duration of that event's processing and is then dropped.

use std::collections::BTreeMap;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Deserializer};

use super::envelope::{EventEnvelope, EventType, ProtocolError};

/// Scope identifiers used to look up resources
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeIds {
    pub project: String,
    pub stage: String,
    pub service: String,
}

/// Problem metadata carried by problem/remediation events
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProblemInfo {
    pub id: String,
    pub title: String,
    pub state: String,
    pub pid: String,
}

/// Canonical per-event record
#[derive(Debug, Clone)]
pub struct EventContext {
    /// Inbound event id
    pub event_id: String,
    /// Correlation id (shkeptncontext)
    pub context: String,
    /// Originating event type, verbatim
    pub event: String,
    pub source: String,

    pub time: String,
    pub time_utc: String,
    pub time_utc_ms: String,

    pub scope: ScopeIds,
    pub event_type: EventType,

    /// Action name for action events (may be set during action handling)
    pub action: String,
    pub status: String,
    pub result: String,

    pub labels: BTreeMap<String, String>,

    pub image: String,
    pub tag: String,
    pub deployment_strategy: String,
    pub test_strategy: String,
    pub deployment_uri_local: String,
    pub deployment_uri_public: String,
    pub evaluation_start: String,
    pub evaluation_end: String,
    pub problem: ProblemInfo,
}

/// Typed view of the data attributes the executor understands.
///
/// Accepts both the v1 (flat) and v2 (nested) payload shapes.
#[derive(Debug, Default, Deserialize)]
struct EventData {
    #[serde(default, deserialize_with = "null_as_default")]
    project: String,
    #[serde(default, deserialize_with = "null_as_default")]
    stage: String,
    #[serde(default, deserialize_with = "null_as_default")]
    service: String,
    #[serde(default)]
    labels: Option<BTreeMap<String, String>>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    result: Option<String>,

    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    tag: Option<String>,
    #[serde(default, alias = "deploymentstrategy")]
    deployment_strategy: Option<String>,
    #[serde(default, alias = "teststrategy")]
    test_strategy: Option<String>,
    #[serde(default, rename = "deploymentURILocal")]
    deployment_uri_local: Option<String>,
    #[serde(default, rename = "deploymentURIPublic")]
    deployment_uri_public: Option<String>,

    #[serde(default)]
    deployment: Option<DeploymentData>,
    #[serde(default)]
    test: Option<TestData>,
    #[serde(default)]
    evaluation: Option<EvaluationData>,
    #[serde(default)]
    problem: Option<ProblemData>,
    #[serde(default)]
    action: Option<ActionData>,

    // v1 problem events carry the problem fields at top level
    #[serde(default, rename = "ProblemID")]
    problem_id: Option<String>,
    #[serde(default, rename = "ProblemTitle")]
    problem_title: Option<String>,
    #[serde(default, rename = "State")]
    problem_state: Option<String>,
    #[serde(default, rename = "PID")]
    pid: Option<String>,
}

// nil slices and strings arrive as explicit nulls
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Default, Deserialize)]
struct DeploymentData {
    #[serde(default, rename = "deploymentstrategy")]
    strategy: Option<String>,
    #[serde(default, rename = "deploymentURIsLocal", deserialize_with = "null_as_default")]
    uris_local: Vec<String>,
    #[serde(default, rename = "deploymentURIsPublic", deserialize_with = "null_as_default")]
    uris_public: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TestData {
    #[serde(default, rename = "teststrategy")]
    strategy: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct EvaluationData {
    #[serde(default, alias = "timeStart")]
    start: Option<String>,
    #[serde(default, alias = "timeEnd")]
    end: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ProblemData {
    #[serde(default, rename = "problemID", alias = "ProblemID")]
    id: Option<String>,
    #[serde(default, rename = "problemTitle", alias = "ProblemTitle")]
    title: Option<String>,
    #[serde(default, alias = "State")]
    state: Option<String>,
    #[serde(default, rename = "PID")]
    pid: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ActionData {
    #[serde(default)]
    action: Option<String>,
}

impl EventContext {
    /// Build the context for an inbound event.
    ///
    /// Fails with a [`ProtocolError`] when the type cannot be decoded or the
    /// data payload does not have the expected shape.
    pub fn from_envelope(envelope: &EventEnvelope) -> Result<Self, ProtocolError> {
        let event_type = envelope.decode_type()?;

        if !envelope.data.is_object() {
            return Err(ProtocolError::MissingData {
                id: envelope.id.clone(),
                event_type: envelope.event_type.clone(),
            });
        }

        let data: EventData = serde_json::from_value(envelope.data.clone()).map_err(|source| {
            ProtocolError::MalformedData {
                id: envelope.id.clone(),
                source,
            }
        })?;

        let time = envelope.time.unwrap_or_else(Utc::now);
        let (time, time_utc, time_utc_ms) = format_times(time);

        let deployment = data.deployment.unwrap_or_default();
        let problem = data.problem.unwrap_or_default();

        Ok(Self {
            event_id: envelope.id.clone(),
            context: envelope.shkeptncontext.clone(),
            event: envelope.event_type.clone(),
            source: envelope.source.clone(),
            time,
            time_utc,
            time_utc_ms,
            scope: ScopeIds {
                project: data.project,
                stage: data.stage,
                service: data.service,
            },
            event_type,
            action: data.action.and_then(|a| a.action).unwrap_or_default(),
            status: data.status.unwrap_or_default(),
            result: data.result.unwrap_or_default(),
            labels: data.labels.unwrap_or_default(),
            image: data.image.unwrap_or_default(),
            tag: data.tag.unwrap_or_default(),
            deployment_strategy: data
                .deployment_strategy
                .or(deployment.strategy)
                .unwrap_or_default(),
            test_strategy: data
                .test_strategy
                .or(data.test.and_then(|t| t.strategy))
                .unwrap_or_default(),
            deployment_uri_local: data
                .deployment_uri_local
                .or_else(|| deployment.uris_local.first().cloned())
                .unwrap_or_default(),
            deployment_uri_public: data
                .deployment_uri_public
                .or_else(|| deployment.uris_public.first().cloned())
                .unwrap_or_default(),
            evaluation_start: data
                .evaluation
                .as_ref()
                .and_then(|e| e.start.clone())
                .unwrap_or_default(),
            evaluation_end: data
                .evaluation
                .as_ref()
                .and_then(|e| e.end.clone())
                .unwrap_or_default(),
            problem: ProblemInfo {
                id: problem.id.or(data.problem_id).unwrap_or_default(),
                title: problem.title.or(data.problem_title).unwrap_or_default(),
                state: problem.state.or(data.problem_state).unwrap_or_default(),
                pid: problem.pid.or(data.pid).unwrap_or_default(),
            },
        })
    }

    /// Add a label during action-specific handling
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Event names to try, most specific first
    pub fn event_names(&self) -> Vec<String> {
        let base = self.event_type.event_name();
        if self.event_type.is_action_trigger() && !self.action.is_empty() {
            vec![format!("{}.{}", base, self.action), base]
        } else {
            vec![base]
        }
    }

    /// Core context fields exposed as `$FIELD` placeholders and script environment
    pub fn core_fields(&self) -> Vec<(&'static str, &str)> {
        vec![
            ("TIMESTRING", self.time.as_str()),
            ("TIMEUTC", self.time_utc.as_str()),
            ("TIMEUTCMS", self.time_utc_ms.as_str()),
            ("CONTEXT", self.context.as_str()),
            ("EVENT", self.event.as_str()),
            ("SOURCE", self.source.as_str()),
            ("PROJECT", self.scope.project.as_str()),
            ("STAGE", self.scope.stage.as_str()),
            ("SERVICE", self.scope.service.as_str()),
            ("DEPLOYMENT", self.deployment_strategy.as_str()),
            ("TESTSTRATEGY", self.test_strategy.as_str()),
            ("DEPLOYMENTURILOCAL", self.deployment_uri_local.as_str()),
            ("DEPLOYMENTURIPUBLIC", self.deployment_uri_public.as_str()),
            ("IMAGE", self.image.as_str()),
            ("TAG", self.tag.as_str()),
            ("ACTION", self.action.as_str()),
            ("PROBLEMID", self.problem.id.as_str()),
            ("PROBLEMTITLE", self.problem.title.as_str()),
            ("PROBLEMSTATE", self.problem.state.as_str()),
            ("PID", self.problem.pid.as_str()),
        ]
    }
}

fn format_times(time: DateTime<Utc>) -> (String, String, String) {
    let local = time.with_timezone(&Local);
    (
        local.to_string(),
        time.to_string(),
        time.timestamp_millis().to_string(),
    )
}
