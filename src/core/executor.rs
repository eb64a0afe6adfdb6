//! Runs resolved files and normalizes their outcome.
//!
//! - `.sh` runs through the shell interpreter
//! - `.py` runs through the Python 3 interpreter
//! - `.http` is rendered, parsed and sent with the HTTP client
//!
//! Scripts receive the path of the serialized event as their only argument.
//! That file lives next to the materialized resources and is removed as soon
//! as the script returns.

use std::io::Write;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::http_request::GenericHttpRequest;
use super::placeholders::PlaceholderEngine;
use super::resolver::ResourceDescriptor;
use super::secrets::SecretFilter;
use crate::adapters::{HttpCallError, HttpClient, ScriptRunner};
use crate::domain::{EventContext, ExecutionOutcome, FailureCause};

/// Interpreter commands per script type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interpreters {
    #[serde(default = "default_shell")]
    pub shell: String,

    #[serde(default = "default_python")]
    pub python: String,
}

fn default_shell() -> String {
    "bash".to_string()
}

fn default_python() -> String {
    "python3".to_string()
}

impl Default for Interpreters {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            python: default_python(),
        }
    }
}

/// Executes one resource per call
#[derive(Debug, Clone)]
pub struct Executor {
    interpreters: Interpreters,
    secrets: SecretFilter,
    runner: ScriptRunner,
    http: HttpClient,
    /// Where serialized event files are written
    work_dir: PathBuf,
}

impl Executor {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            interpreters: Interpreters::default(),
            secrets: SecretFilter::default(),
            runner: ScriptRunner::new(),
            http: HttpClient::new(),
            work_dir: work_dir.into(),
        }
    }

    pub fn with_interpreters(mut self, interpreters: Interpreters) -> Self {
        self.interpreters = interpreters;
        self
    }

    pub fn with_secret_filter(mut self, secrets: SecretFilter) -> Self {
        self.secrets = secrets;
        self
    }

    /// Placeholder index for one execution, built from the current process environment
    pub fn placeholders(&self, ctx: &EventContext, event: &Value) -> PlaceholderEngine {
        PlaceholderEngine::new(ctx, event, std::env::vars(), &self.secrets)
    }

    /// Run `resource` for the event `ctx`; `event` is the inbound event as JSON
    pub async fn execute(&self, resource: &ResourceDescriptor, ctx: &EventContext, event: &Value) -> ExecutionOutcome {
        let engine = self.placeholders(ctx, event);

        let outcome = match resource.extension.as_str() {
            "sh" => {
                self.run_script(&self.interpreters.shell, resource, ctx, event, &engine)
                    .await
            }
            "py" => {
                self.run_script(&self.interpreters.python, resource, ctx, event, &engine)
                    .await
            }
            "http" => self.run_http(resource, &engine).await,
            _ => ExecutionOutcome::failed(FailureCause::UnhandledExtension(
                resource.relative_path.clone(),
            )),
        };

        match outcome.error() {
            None => info!(file = %resource.relative_path, "Execution succeeded"),
            Some(cause) => warn!(file = %resource.relative_path, %cause, "Execution failed"),
        }
        outcome
    }

    async fn run_script(
        &self,
        interpreter: &str,
        resource: &ResourceDescriptor,
        ctx: &EventContext,
        event: &Value,
        engine: &PlaceholderEngine,
    ) -> ExecutionOutcome {
        // removed when dropped, whatever the script does
        let event_file = match self.write_event_file(ctx, event) {
            Ok(file) => file,
            Err(e) => return ExecutionOutcome::failed(FailureCause::Spawn(e.to_string())),
        };

        let env = engine.env().to_vec();
        let args = [resource.local_path.as_path(), event_file.path()];

        match self.runner.run(interpreter, &args, &env).await {
            Ok(output) if output.success => ExecutionOutcome::Succeeded {
                payload: output.output,
            },
            Ok(output) => ExecutionOutcome::Failed {
                payload: Some(output.output),
                cause: FailureCause::ExitCode(output.exit_code),
            },
            Err(e) => ExecutionOutcome::failed(FailureCause::Spawn(format!("{:#}", e))),
        }
    }

    async fn run_http(&self, resource: &ResourceDescriptor, engine: &PlaceholderEngine) -> ExecutionOutcome {
        let template = match tokio::fs::read_to_string(&resource.local_path).await {
            Ok(text) => text,
            Err(e) => {
                return ExecutionOutcome::failed(FailureCause::Spawn(format!(
                    "failed to read {}: {}",
                    resource.local_path.display(),
                    e
                )))
            }
        };

        let request = match GenericHttpRequest::parse(&engine.render_text(&template)) {
            Ok(request) => request,
            Err(e) => return ExecutionOutcome::failed(FailureCause::Parse(e.to_string())),
        };

        debug!(method = %request.method, uri = %request.uri, "Executing HTTP definition");

        match self.http.execute(&request).await {
            Ok(response) if response.is_success() => ExecutionOutcome::Succeeded {
                payload: response.body,
            },
            Ok(response) => ExecutionOutcome::Failed {
                payload: Some(response.body),
                cause: FailureCause::HttpStatus(response.status),
            },
            Err(HttpCallError::InvalidMethod(method)) => ExecutionOutcome::failed(
                FailureCause::Parse(format!("invalid HTTP method '{}'", method)),
            ),
            Err(HttpCallError::Transport(e)) => ExecutionOutcome::failed(FailureCause::Transport(e)),
        }
    }

    fn write_event_file(&self, ctx: &EventContext, event: &Value) -> std::io::Result<tempfile::NamedTempFile> {
        std::fs::create_dir_all(&self.work_dir)?;

        let prefix = format!("{}-", ctx.event_id.replace('/', "_"));
        let mut file = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".event.json")
            .tempfile_in(&self.work_dir)?;

        let json = serde_json::to_vec(event)?;
        file.write_all(&json)?;
        file.flush()?;
        Ok(file)
    }
}
