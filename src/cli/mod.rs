//! Command-line interface for genexec.
//!
//! Provides commands for handling one event end to end, rendering templates
//! against an event, planning candidate files, and showing the resolved
//! configuration.

use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use crate::adapters::{BrokerSink, ConfigurationServiceClient, EventSink};
use crate::config::{load_settings, Settings};
use crate::core::{
    ExecutionPlan, Executor, JsonlSink, Orchestrator, ProcessingState, ResourceResolver, StdoutSink,
};
use crate::domain::{EventContext, EventEnvelope};

/// genexec - Generic event-driven executor
#[derive(Parser, Debug)]
#[command(name = "genexec")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Handle one event: resolve, execute and report
    Handle {
        /// Event file (reads from stdin if not provided)
        #[arg(short, long)]
        event: Option<PathBuf>,

        /// Where outbound events are sent
        #[arg(short, long, value_enum, default_value = "broker")]
        sink: SinkKind,

        /// Output file for the jsonl sink
        #[arg(long, default_value = "events.jsonl")]
        jsonl: PathBuf,

        /// Read scripts from the current directory instead of the repository
        #[arg(long)]
        local: bool,
    },

    /// Render a template against an event
    Render {
        /// Event file
        #[arg(short, long)]
        event: PathBuf,

        /// Template file (.http, .sh, ...)
        template: PathBuf,

        /// Also print the script environment
        #[arg(long)]
        env: bool,
    },

    /// Show the event names and candidate files for an event
    Plan {
        /// Event file
        #[arg(short, long)]
        event: PathBuf,
    },

    /// Show resolved configuration (debug)
    Config,
}

/// Outbound event destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SinkKind {
    /// POST to the event broker
    Broker,
    /// Append to a JSONL file
    Jsonl,
    /// Print to stdout
    Stdout,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self, settings: Settings) -> Result<()> {
        match self.command {
            Commands::Handle {
                event,
                sink,
                jsonl,
                local,
            } => handle_event(settings, event, sink, &jsonl, local).await,
            Commands::Render {
                event,
                template,
                env,
            } => render_template(&settings, &event, &template, env),
            Commands::Plan { event } => show_plan(&settings, &event),
            Commands::Config => show_config(&settings),
        }
    }
}

/// Load settings, applying the CLI verbosity flag
pub fn settings_for(cli: &Cli) -> Result<Settings> {
    let mut settings = load_settings()?;
    settings.verbose |= cli.verbose;
    Ok(settings)
}

/// Wire the orchestrator from settings
pub fn build_orchestrator(settings: &Settings, sink: Arc<dyn EventSink>) -> Result<Orchestrator> {
    let repository = ConfigurationServiceClient::new(&settings.configuration_service)
        .with_context(|| format!("Invalid configuration service URL: {}", settings.configuration_service))?;

    let mut resolver = ResourceResolver::new(Arc::new(repository), &settings.work_dir)
        .with_storage_error_policy(settings.storage_error_policy);
    if settings.local_mode {
        resolver = resolver.with_local_root(&settings.local_root);
    }

    let executor = Executor::new(&settings.work_dir)
        .with_interpreters(settings.interpreters.clone())
        .with_secret_filter(settings.secret_filter());

    Ok(Orchestrator::new(resolver, executor, sink)
        .with_service_name(&settings.service_name)
        .with_resource_folder(&settings.resource_folder)
        .with_match_policy(settings.match_policy))
}

/// Handle one event end to end
async fn handle_event(
    mut settings: Settings,
    event_file: Option<PathBuf>,
    sink_kind: SinkKind,
    jsonl: &Path,
    local: bool,
) -> Result<()> {
    settings.local_mode |= local;

    let input = if let Some(path) = event_file {
        std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read event file: {}", path.display()))?
    } else if !io::stdin().is_terminal() {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read from stdin")?;
        buffer
    } else {
        anyhow::bail!("No event provided. Use --event <file> or pipe to stdin");
    };

    let envelope = EventEnvelope::from_json(&input).context("Failed to parse event envelope")?;

    let sink: Arc<dyn EventSink> = match sink_kind {
        SinkKind::Broker => {
            let endpoint = settings
                .event_broker
                .as_deref()
                .context("EVENTBROKER is not set; use --sink jsonl or --sink stdout")?;
            Arc::new(BrokerSink::new(endpoint)?)
        }
        SinkKind::Jsonl => Arc::new(JsonlSink::new(jsonl)),
        SinkKind::Stdout => Arc::new(StdoutSink),
    };

    let orchestrator = build_orchestrator(&settings, sink)?;
    let report = orchestrator.handle_event(&envelope).await?;

    match report.state {
        ProcessingState::NoAction => {
            eprintln!("[Event {}: no matching file]", report.event_id);
        }
        _ => {
            for execution in &report.executions {
                let verdict = match execution.outcome.error() {
                    None => "ok".to_string(),
                    Some(cause) => cause.to_string(),
                };
                eprintln!("[{} -> {}: {}]", execution.event_name, execution.file, verdict);
            }
            if !report.emitted.is_empty() {
                eprintln!("[Sent {}]", report.emitted.join(", "));
            }
        }
    }

    Ok(())
}

fn read_event(path: &Path) -> Result<(EventEnvelope, EventContext)> {
    let input = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read event file: {}", path.display()))?;
    let envelope = EventEnvelope::from_json(&input).context("Failed to parse event envelope")?;
    let ctx = EventContext::from_envelope(&envelope).context("Failed to decode event")?;
    Ok((envelope, ctx))
}

/// Print a rendered template
fn render_template(settings: &Settings, event: &Path, template: &Path, show_env: bool) -> Result<()> {
    let (envelope, ctx) = read_event(event)?;
    let text = std::fs::read_to_string(template)
        .with_context(|| format!("Failed to read template: {}", template.display()))?;

    let executor = Executor::new(&settings.work_dir).with_secret_filter(settings.secret_filter());
    let engine = executor.placeholders(&ctx, &envelope.to_value());
    let (rendered, env) = engine.render(&text);

    print!("{}", rendered);
    if show_env {
        println!();
        println!("Environment:");
        for (name, value) in env {
            println!("  {}={}", name, value);
        }
    }

    Ok(())
}

/// Print event names and candidate files
fn show_plan(settings: &Settings, event: &Path) -> Result<()> {
    let (_, ctx) = read_event(event)?;
    let plan = ExecutionPlan::for_event(&ctx, &settings.resource_folder);

    println!("Event:      {}", ctx.event);
    println!("Context:    {}", ctx.context);
    println!("Scope:      {}/{}/{}", ctx.scope.project, ctx.scope.stage, ctx.scope.service);
    println!("Lifecycle:  {}", if plan.lifecycle { "started/finished" } else { "none" });
    println!("Matching:   {}", if plan.multi_match { "every event name" } else { "first found" });
    println!();

    for set in &plan.sets {
        println!("{}:", set.event_name);
        for file in &set.files {
            println!("  {}", file);
        }
    }

    Ok(())
}

/// Print resolved settings
fn show_config(settings: &Settings) -> Result<()> {
    println!(
        "Config file: {}",
        settings
            .config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();

    let yaml = serde_yaml::to_string(settings).context("Failed to serialize settings")?;
    print!("{}", yaml);

    Ok(())
}
