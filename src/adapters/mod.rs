//! Adapter interfaces for external systems.
//!
//! Adapters connect the executor to its collaborators: the resource
//! repository that stores per-scope configuration files, the event broker
//! that receives lifecycle notifications, and the subprocess/HTTP backends
//! used to run the resolved files.

pub mod broker;
pub mod configuration_service;
pub mod http;
pub mod memory;
pub mod script;

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{OutboundEvent, ScopeIds};

// Re-export the concrete adapters
pub use broker::BrokerSink;
pub use configuration_service::ConfigurationServiceClient;
pub use http::{HttpCallError, HttpClient, HttpResponse};
pub use memory::MemoryRepository;
pub use script::{ScriptOutput, ScriptRunner};

/// Configuration scope, narrowest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Service,
    Stage,
    Project,
}

impl Scope {
    /// Search order used by the resolver
    pub const SEARCH_ORDER: [Scope; 3] = [Scope::Service, Scope::Stage, Scope::Project];
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Service => f.write_str("service"),
            Self::Stage => f.write_str("stage"),
            Self::Project => f.write_str("project"),
        }
    }
}

/// Errors from the resource repository.
///
/// "Not found" is not an error: it is reported as `Ok(None)`.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Resource repository unreachable: {0}")]
    Transport(String),

    #[error("Resource repository returned status {status} for {path}")]
    Status { status: u16, path: String },

    #[error("Malformed resource repository response for {path}: {reason}")]
    Malformed { path: String, reason: String },
}

/// Errors from delivering outbound events
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Event broker endpoint is not configured: {0}")]
    Endpoint(String),

    #[error("Failed to send event: {0}")]
    Delivery(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Scope-hierarchy resource repository
#[async_trait]
pub trait ResourceRepository: Send + Sync {
    /// Fetch `path` at one scope. Empty content counts as not found.
    async fn get_resource(
        &self,
        scope: Scope,
        ids: &ScopeIds,
        path: &str,
    ) -> Result<Option<String>, RepositoryError>;
}

/// Destination of outbound lifecycle notifications
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Human-readable sink name
    fn name(&self) -> &str;

    /// Deliver one event
    async fn send(&self, event: &OutboundEvent) -> Result<(), SinkError>;
}
