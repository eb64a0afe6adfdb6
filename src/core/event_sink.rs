//! Local event sinks.
//!
//! - `JsonlSink`: append-only newline-delimited JSON log, one event per line
//! - `StdoutSink`: prints each event as one JSON line
//! - `MemorySink`: keeps events in memory for embedders and tests

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::adapters::{EventSink, SinkError};
use crate::domain::OutboundEvent;

/// File-based sink using JSONL format
#[derive(Debug, Clone)]
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back all events in the order they were written
    pub async fn replay(&self) -> Result<Vec<OutboundEvent>, SinkError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path).await?;
        let mut lines = BufReader::new(file).lines();
        let mut events = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            events.push(serde_json::from_str(&line)?);
        }

        Ok(events)
    }
}

#[async_trait]
impl EventSink for JsonlSink {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn send(&self, event: &OutboundEvent) -> Result<(), SinkError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        let json = serde_json::to_string(event)?;
        file.write_all(format!("{}\n", json).as_bytes()).await?;
        file.flush().await?;

        Ok(())
    }
}

/// Prints events to stdout
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutSink;

#[async_trait]
impl EventSink for StdoutSink {
    fn name(&self) -> &str {
        "stdout"
    }

    async fn send(&self, event: &OutboundEvent) -> Result<(), SinkError> {
        let json = serde_json::to_string(event)?;
        let mut stdout = tokio::io::stdout();
        stdout.write_all(format!("{}\n", json).as_bytes()).await?;
        stdout.flush().await?;
        Ok(())
    }
}

/// Records events in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<OutboundEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the recorded events
    pub fn events(&self) -> Vec<OutboundEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Recorded event types, in order
    pub fn event_types(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.event_type).collect()
    }
}

#[async_trait]
impl EventSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn send(&self, event: &OutboundEvent) -> Result<(), SinkError> {
        let mut events = self
            .events
            .lock()
            .map_err(|e| SinkError::Delivery(e.to_string()))?;
        events.push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EventContext, EventEnvelope, Notification, TaskEventData};
    use serde_json::json;
    use tempfile::TempDir;

    fn outbound(notification: Notification) -> OutboundEvent {
        let envelope: EventEnvelope = serde_json::from_value(json!({
            "id": "e-1",
            "type": "sh.keptn.event.dev.deployment.triggered",
            "source": "test",
            "shkeptncontext": "ctx-1",
            "data": {"project": "p", "stage": "dev", "service": "s"},
        }))
        .unwrap();
        let ctx = EventContext::from_envelope(&envelope).unwrap();
        OutboundEvent::new(
            &ctx,
            notification,
            "generic-executor-service",
            TaskEventData::started(&ctx, "hello"),
        )
    }

    #[tokio::test]
    async fn test_jsonl_append_and_replay() {
        let temp = TempDir::new().unwrap();
        let sink = JsonlSink::new(temp.path().join("nested").join("events.jsonl"));

        assert!(sink.replay().await.unwrap().is_empty());

        let started = outbound(Notification::Started);
        let finished = outbound(Notification::Finished);
        sink.send(&started).await.unwrap();
        sink.send(&finished).await.unwrap();

        let replayed = sink.replay().await.unwrap();
        assert_eq!(replayed, vec![started, finished]);

        let raw = std::fs::read_to_string(sink.path()).unwrap();
        assert_eq!(raw.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_memory_sink_records_in_order() {
        let sink = MemorySink::new();
        sink.send(&outbound(Notification::Started)).await.unwrap();
        sink.send(&outbound(Notification::Finished)).await.unwrap();
        assert_eq!(
            sink.event_types(),
            vec![
                "sh.keptn.event.deployment.started",
                "sh.keptn.event.deployment.finished"
            ]
        );
    }
}
