//! genexec - Generic event-driven executor
//!
//! Receives lifecycle events from a delivery-pipeline orchestrator, resolves
//! a user-supplied script or HTTP-request file for the event from a layered
//! configuration repository, executes it, and reports the outcome back as
//! follow-up events.
//!
//! # Pipeline
//!
//! - An inbound envelope is decoded into an `EventContext`
//! - Candidate files `<task>.<status>.{sh,py,http}` and `all.events.*` are
//!   looked up at service, stage, then project level
//! - The file is rendered with the event data and executed
//! - Triggered events are answered with `started` and `finished` events
//!
//! # Modules
//!
//! - `adapters`: External systems (configuration service, event broker, subprocesses, HTTP)
//! - `core`: Resolver, placeholder engine, HTTP parser, executor, orchestrator
//! - `domain`: Data structures (EventEnvelope, EventContext, OutboundEvent, ExecutionOutcome)
//! - `config`: Settings from config file and environment
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Handle one event and send the notifications to the broker
//! EVENTBROKER=http://localhost:8081/event genexec handle --event event.json
//!
//! # Run scripts from the working directory and log notifications locally
//! genexec handle --local --sink jsonl --event event.json
//!
//! # See which files would be tried
//! genexec plan --event event.json
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use crate::config::Settings;
pub use crate::core::{DispatchError, Orchestrator, ProcessingReport};
pub use crate::domain::{EventContext, EventEnvelope, ExecutionOutcome, OutboundEvent};
