//! Core event pipeline.
//!
//! This module contains:
//! - Plan: candidate files per event name, match and storage policies
//! - Resolver: scope-hierarchy lookup and per-event materialization
//! - Placeholders: `${path}` / `$FIELD` substitution and script environment
//! - HttpRequest: parser for `.http` definition files
//! - Executor: script and HTTP execution
//! - Orchestrator: per-event state machine and lifecycle notifications
//! - EventSink: local sinks for outbound notifications

pub mod event_sink;
pub mod executor;
pub mod http_request;
pub mod orchestrator;
pub mod placeholders;
pub mod plan;
pub mod resolver;
pub mod secrets;

// Re-export commonly used types
pub use event_sink::{JsonlSink, MemorySink, StdoutSink};
pub use executor::{Executor, Interpreters};
pub use http_request::{GenericHttpRequest, HttpParseError};
pub use orchestrator::{
    DispatchError, FileExecution, Orchestrator, ProcessingReport, ProcessingState, ScriptResponse,
};
pub use placeholders::{env_name, EnvAssignments, PlaceholderEngine};
pub use plan::{candidate_files, CandidateSet, ExecutionPlan, MatchPolicy, StorageErrorPolicy};
pub use resolver::{Located, ResolveError, ResourceDescriptor, ResourceResolver};
pub use secrets::{SecretFilter, MANDATORY_SECRET_PATTERN};
