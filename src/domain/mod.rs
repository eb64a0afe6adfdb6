//! Domain types for the generic executor.
//!
//! This module contains the core data structures:
//! - Envelope: Inbound events and event-type decoding
//! - Context: The canonical per-event record
//! - Events: Outbound lifecycle notifications
//! - Outcome: Normalized execution results

pub mod context;
pub mod envelope;
pub mod events;
pub mod outcome;

// Re-export commonly used types
pub use context::{EventContext, ProblemInfo, ScopeIds};
pub use envelope::{EventEnvelope, EventType, Phase, ProtocolError};
pub use events::{Notification, OutboundEvent, ResultType, StatusType, TaskEventData};
pub use outcome::{ExecutionOutcome, FailureCause};
