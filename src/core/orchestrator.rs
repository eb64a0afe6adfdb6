//! Per-event orchestration.
//!
//! For one inbound event the orchestrator:
//! 1. decodes the event into an [`EventContext`]
//! 2. plans the candidate files per event name
//! 3. resolves and executes matching files
//! 4. answers triggered events with `started` and `finished` notifications
//!
//! Triggered actions follow a three-step protocol: probe for any matching
//! file without executing, emit `started` only if something was found, then
//! execute every match and emit one aggregated `finished`.

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use super::executor::Executor;
use super::plan::{ExecutionPlan, MatchPolicy};
use super::resolver::{ResolveError, ResourceResolver};
use crate::adapters::{EventSink, Scope, SinkError};
use crate::domain::{
    EventContext, EventEnvelope, ExecutionOutcome, Notification, OutboundEvent, ProtocolError,
    ResultType, StatusType, TaskEventData,
};

/// Errors that abort processing of one event
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Emit(#[from] SinkError),
}

/// Processing state of one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingState {
    Received,
    Resolving,
    NoAction,
    Executing,
    ReportingStarted,
    Running,
    ReportingFinished,
    Done,
    Failed,
}

impl fmt::Display for ProcessingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Received => "received",
            Self::Resolving => "resolving",
            Self::NoAction => "no_action",
            Self::Executing => "executing",
            Self::ReportingStarted => "reporting_started",
            Self::Running => "running",
            Self::ReportingFinished => "reporting_finished",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One executed file
#[derive(Debug, Clone)]
pub struct FileExecution {
    pub event_name: String,
    pub file: String,
    pub scope: Option<Scope>,
    pub outcome: ExecutionOutcome,
}

/// Summary of one processed event
#[derive(Debug, Clone)]
pub struct ProcessingReport {
    pub event_id: String,
    pub context: String,
    pub state: ProcessingState,
    pub executions: Vec<FileExecution>,
    /// Types of the notifications sent, in order
    pub emitted: Vec<String>,
}

impl ProcessingReport {
    fn new(ctx: &EventContext) -> Self {
        Self {
            event_id: ctx.event_id.clone(),
            context: ctx.context.clone(),
            state: ProcessingState::Received,
            executions: Vec::new(),
            emitted: Vec::new(),
        }
    }

    fn transition(&mut self, state: ProcessingState) {
        debug!(from = %self.state, to = %state, "State transition");
        self.state = state;
    }

    /// Whether any file was executed
    pub fn executed(&self) -> bool {
        !self.executions.is_empty()
    }
}

/// How a script or HTTP response body is interpreted
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptResponse {
    Empty,
    /// Anything that is not a JSON object
    Text(String),
    /// JSON object merged under the task name
    Structured(Map<String, Value>),
    /// JSON object with an `error` key
    ReportedError(String),
    /// Looked like JSON but did not parse
    Malformed(String),
}

impl ScriptResponse {
    pub fn classify(payload: &str) -> Self {
        let trimmed = payload.trim();
        if trimmed.is_empty() {
            return Self::Empty;
        }
        if !trimmed.starts_with('{') {
            return Self::Text(trimmed.to_string());
        }

        match serde_json::from_str::<Map<String, Value>>(trimmed) {
            Ok(map) => match map.get("error") {
                Some(Value::String(e)) => Self::ReportedError(e.clone()),
                Some(other) => Self::ReportedError(other.to_string()),
                None => Self::Structured(map),
            },
            Err(e) => Self::Malformed(e.to_string()),
        }
    }

    /// Result downgrade implied by the response, if any
    pub fn result_floor(&self) -> ResultType {
        match self {
            Self::ReportedError(_) | Self::Malformed(_) => ResultType::Warning,
            _ => ResultType::Pass,
        }
    }
}

/// Aggregated lifecycle result of one or more executions
#[derive(Debug)]
struct Verdict {
    status: StatusType,
    result: ResultType,
    messages: Vec<String>,
    output: Map<String, Value>,
}

impl Verdict {
    fn new() -> Self {
        Self {
            status: StatusType::Succeeded,
            result: ResultType::Pass,
            messages: Vec::new(),
            output: Map::new(),
        }
    }

    /// Fold one execution into the verdict; returns the response for status overrides
    fn absorb(&mut self, file: &str, outcome: &ExecutionOutcome) -> Option<ScriptResponse> {
        let Some((status, result)) = outcome.lifecycle() else {
            return None;
        };
        if status == StatusType::Errored {
            self.status = StatusType::Errored;
        }
        self.result = self.result.max(result);

        match outcome {
            ExecutionOutcome::Succeeded { payload } => {
                let response = ScriptResponse::classify(payload);
                self.result = self.result.max(response.result_floor());
                self.messages.push(match &response {
                    ScriptResponse::Empty => format!("Successfully executed {}", file),
                    ScriptResponse::Text(text) => format!("Successfully executed {}: {}", file, text),
                    ScriptResponse::Structured(_) => format!("Successfully executed {}", file),
                    ScriptResponse::ReportedError(e) => format!("{} reported an error: {}", file, e),
                    ScriptResponse::Malformed(e) => {
                        format!("{} returned a malformed JSON response: {}", file, e)
                    }
                });
                if let ScriptResponse::Structured(map) = &response {
                    self.output.extend(map.clone());
                }
                Some(response)
            }
            ExecutionOutcome::Failed { payload, cause } => {
                let mut message = format!("Failed executing {}: {}", file, cause);
                if let Some(text) = payload.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
                    message.push('\n');
                    message.push_str(text);
                }
                self.messages.push(message);
                None
            }
            ExecutionOutcome::NotFound => None,
        }
    }

    fn into_data(self, ctx: &EventContext) -> TaskEventData {
        let mut data = TaskEventData::finished(ctx, self.status, self.result, self.messages.join("\n"));
        if !self.output.is_empty() {
            data.merge_task_output(&ctx.event_type.task, self.output);
        }
        data
    }
}

/// Event pipeline driver
pub struct Orchestrator {
    resolver: ResourceResolver,
    executor: Executor,
    sink: Arc<dyn EventSink>,
    /// `source` of outbound events
    service_name: String,
    /// Folder holding the scripts within each scope
    resource_folder: String,
    match_policy: MatchPolicy,
}

impl Orchestrator {
    pub fn new(resolver: ResourceResolver, executor: Executor, sink: Arc<dyn EventSink>) -> Self {
        Self {
            resolver,
            executor,
            sink,
            service_name: "generic-executor-service".to_string(),
            resource_folder: "generic-executor/".to_string(),
            match_policy: MatchPolicy::default(),
        }
    }

    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    pub fn with_resource_folder(mut self, folder: impl Into<String>) -> Self {
        self.resource_folder = folder.into();
        self
    }

    pub fn with_match_policy(mut self, policy: MatchPolicy) -> Self {
        self.match_policy = policy;
        self
    }

    /// Plan the candidates for an event without touching the repository
    pub fn plan(&self, envelope: &EventEnvelope) -> Result<ExecutionPlan, ProtocolError> {
        let ctx = EventContext::from_envelope(envelope)?;
        Ok(ExecutionPlan::for_event(&ctx, &self.resource_folder))
    }

    /// Process one inbound event to completion
    #[instrument(skip(self, envelope), fields(event_id = %envelope.id, event_type = %envelope.event_type, context = %envelope.shkeptncontext))]
    pub async fn handle_event(&self, envelope: &EventEnvelope) -> Result<ProcessingReport, DispatchError> {
        let ctx = match EventContext::from_envelope(envelope) {
            Ok(ctx) => ctx,
            Err(e) => {
                error!(error = %e, "Failed to decode event");
                return Err(e.into());
            }
        };

        let event = envelope.to_value();
        let plan = ExecutionPlan::for_event(&ctx, &self.resource_folder);
        let mut report = ProcessingReport::new(&ctx);

        info!(event_names = ?ctx.event_names(), lifecycle = plan.lifecycle, "Processing event");

        let result = if plan.multi_match {
            self.handle_action(&ctx, &event, &plan, &mut report).await
        } else {
            self.handle_single(&ctx, &event, &plan, &mut report).await
        };

        match result {
            Ok(()) => {
                if report.state != ProcessingState::NoAction {
                    report.transition(ProcessingState::Done);
                }
                info!(state = %report.state, executed = report.executions.len(), "Event processed");
                Ok(report)
            }
            Err(e) => {
                report.transition(ProcessingState::Failed);
                error!(error = %e, "Event processing failed");
                Err(e)
            }
        }
    }

    /// First found file wins
    async fn handle_single(
        &self,
        ctx: &EventContext,
        event: &Value,
        plan: &ExecutionPlan,
        report: &mut ProcessingReport,
    ) -> Result<(), DispatchError> {
        report.transition(ProcessingState::Resolving);

        for set in &plan.sets {
            for file in &set.files {
                let resource = match self.resolver.resolve(ctx, file).await {
                    Ok(Some(resource)) => resource,
                    Ok(None) => continue,
                    Err(e) => return self.abort_on_resolve_error(ctx, plan, report, e).await,
                };

                report.transition(ProcessingState::Executing);
                info!(event_name = %set.event_name, file = %file, scope = ?resource.scope, "Found file");

                if plan.lifecycle {
                    report.transition(ProcessingState::ReportingStarted);
                    let data = TaskEventData::started(ctx, format!("Found {}, executing", file));
                    self.emit(ctx, Notification::Started, data, report).await?;
                }

                report.transition(ProcessingState::Running);
                let scope = resource.scope;
                let outcome = self.executor.execute(&resource, ctx, event).await;
                drop(resource);

                let mut verdict = Verdict::new();
                verdict.absorb(file, &outcome);
                report.executions.push(FileExecution {
                    event_name: set.event_name.clone(),
                    file: file.clone(),
                    scope,
                    outcome,
                });

                if plan.lifecycle {
                    report.transition(ProcessingState::ReportingFinished);
                    self.emit(ctx, Notification::Finished, verdict.into_data(ctx), report)
                        .await?;
                }
                return Ok(());
            }
            debug!(event_name = %set.event_name, "No file found");
        }

        report.transition(ProcessingState::NoAction);
        info!("No matching file, nothing to do");
        Ok(())
    }

    /// Probe, report started, execute every match, report one finished
    async fn handle_action(
        &self,
        ctx: &EventContext,
        event: &Value,
        plan: &ExecutionPlan,
        report: &mut ProcessingReport,
    ) -> Result<(), DispatchError> {
        report.transition(ProcessingState::Resolving);

        // step 1: probe only
        let mut matches: Vec<(String, String, Option<Scope>)> = Vec::new();
        for set in &plan.sets {
            for file in &set.files {
                let located = match self.resolver.locate(ctx, file).await {
                    Ok(located) => located,
                    Err(e) => return self.abort_on_resolve_error(ctx, plan, report, e).await,
                };
                if let Some(located) = located {
                    if matches.iter().any(|(_, f, _)| f == file) {
                        debug!(event_name = %set.event_name, file = %file, "Already matched for a previous event name");
                    } else {
                        matches.push((set.event_name.clone(), file.clone(), located.scope));
                    }
                    break;
                }
            }
        }

        if matches.is_empty() {
            report.transition(ProcessingState::NoAction);
            info!(action = %ctx.action, "No action file found, not answering");
            return Ok(());
        }

        // step 2: announce
        report.transition(ProcessingState::ReportingStarted);
        let files: Vec<&str> = matches.iter().map(|(_, f, _)| f.as_str()).collect();
        let data = TaskEventData::started(
            ctx,
            format!("Found {} for action {}, executing", files.join(", "), ctx.action),
        );
        self.emit(ctx, Notification::Started, data, report).await?;

        // step 3: execute
        report.transition(ProcessingState::Running);
        let mut verdict = Verdict::new();
        let mut status_override = None;

        for (event_name, file, scope) in matches {
            let resource = match self.resolver.resolve(ctx, &file).await {
                Ok(Some(resource)) => resource,
                Ok(None) => {
                    warn!(file = %file, "File disappeared between probe and execution");
                    continue;
                }
                Err(e) => return self.abort_on_resolve_error(ctx, plan, report, e).await,
            };

            let outcome = self.executor.execute(&resource, ctx, event).await;
            drop(resource);

            if let Some(ScriptResponse::Text(text)) = verdict.absorb(&file, &outcome) {
                if let Some(status) = StatusType::from_token(&text) {
                    status_override = Some(status);
                }
            }

            let succeeded = outcome.is_success();
            report.executions.push(FileExecution {
                event_name,
                file,
                scope,
                outcome,
            });

            if succeeded && self.match_policy == MatchPolicy::FirstSuccess {
                debug!("Stopping after first successful match");
                break;
            }
        }

        if let Some(status) = status_override {
            debug!(%status, "Status overridden by script response");
            verdict.status = status;
        }

        report.transition(ProcessingState::ReportingFinished);
        self.emit(ctx, Notification::Finished, verdict.into_data(ctx), report)
            .await?;
        Ok(())
    }

    /// Report a repository failure on triggered events, then abort
    async fn abort_on_resolve_error(
        &self,
        ctx: &EventContext,
        plan: &ExecutionPlan,
        report: &mut ProcessingReport,
        error: ResolveError,
    ) -> Result<(), DispatchError> {
        error!(error = %error, "Resource resolution failed");
        if plan.lifecycle {
            let data = TaskEventData::finished(
                ctx,
                StatusType::Errored,
                ResultType::Failed,
                format!("Failed to resolve resources: {}", error),
            );
            self.emit(ctx, Notification::Finished, data, report).await?;
        }
        Err(error.into())
    }

    async fn emit(
        &self,
        ctx: &EventContext,
        notification: Notification,
        data: TaskEventData,
        report: &mut ProcessingReport,
    ) -> Result<(), DispatchError> {
        let event = OutboundEvent::new(ctx, notification, &self.service_name, data);
        debug!(event_type = %event.event_type, sink = self.sink.name(), "Sending event");
        self.sink.send(&event).await?;
        report.emitted.push(event.event_type);
        Ok(())
    }
}
