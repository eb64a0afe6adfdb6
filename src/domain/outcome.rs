//! Normalized result of executing one resource.

use std::fmt;

use super::events::{ResultType, StatusType};

/// Why an execution failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    /// The interpreter could not be started or the event file not written
    Spawn(String),
    /// The process ran and exited nonzero (`None` when killed by a signal)
    ExitCode(Option<i32>),
    /// The HTTP call completed with a non-2xx status
    HttpStatus(u16),
    /// The HTTP call could not be completed
    Transport(String),
    /// The HTTP-definition file could not be parsed
    Parse(String),
    /// No interpreter is registered for the file extension
    UnhandledExtension(String),
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spawn(e) => write!(f, "failed to start: {}", e),
            Self::ExitCode(Some(code)) => write!(f, "exited with code {}", code),
            Self::ExitCode(None) => write!(f, "terminated by signal"),
            Self::HttpStatus(code) => write!(f, "HTTP call returned status code {}", code),
            Self::Transport(e) => write!(f, "HTTP request failed: {}", e),
            Self::Parse(e) => write!(f, "failed to parse: {}", e),
            Self::UnhandledExtension(file) => write!(f, "Unhandled extension for file {}", file),
        }
    }
}

/// Tri-state execution outcome.
///
/// `Failed` always carries a cause; `Succeeded` never does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// No resource matched
    NotFound,
    /// Exit code 0 or HTTP 2xx; payload is stdout or the response body
    Succeeded { payload: String },
    Failed {
        payload: Option<String>,
        cause: FailureCause,
    },
}

impl ExecutionOutcome {
    pub fn failed(cause: FailureCause) -> Self {
        Self::Failed {
            payload: None,
            cause,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    pub fn payload(&self) -> Option<&str> {
        match self {
            Self::NotFound => None,
            Self::Succeeded { payload } => Some(payload),
            Self::Failed { payload, .. } => payload.as_deref(),
        }
    }

    pub fn error(&self) -> Option<&FailureCause> {
        match self {
            Self::Failed { cause, .. } => Some(cause),
            _ => None,
        }
    }

    /// Map the outcome to the status/result pair reported in a finished event.
    ///
    /// Returns `None` for `NotFound`, which is never reported.
    pub fn lifecycle(&self) -> Option<(StatusType, ResultType)> {
        match self {
            Self::NotFound => None,
            Self::Succeeded { .. } => Some((StatusType::Succeeded, ResultType::Pass)),
            Self::Failed { cause, .. } => Some(match cause {
                // the remote side was reached and answered
                FailureCause::HttpStatus(_) => (StatusType::Succeeded, ResultType::Failed),
                FailureCause::Parse(_) => (StatusType::Succeeded, ResultType::Warning),
                FailureCause::Spawn(_)
                | FailureCause::ExitCode(_)
                | FailureCause::Transport(_)
                | FailureCause::UnhandledExtension(_) => (StatusType::Errored, ResultType::Failed),
            }),
        }
    }
}
