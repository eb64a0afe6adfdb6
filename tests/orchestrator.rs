//! Orchestrator Integration Tests
//!
//! End-to-end event handling against an in-memory repository, real bash
//! scripts and an in-memory sink.

use std::sync::Arc;

use genexec::adapters::{MemoryRepository, Scope};
use genexec::core::{
    DispatchError, Executor, MatchPolicy, MemorySink, Orchestrator, ProcessingState,
    ResourceResolver, StorageErrorPolicy,
};
use genexec::domain::{EventEnvelope, ResultType, StatusType};
use serde_json::json;
use tempfile::TempDir;

struct Harness {
    repo: Arc<MemoryRepository>,
    sink: Arc<MemorySink>,
    work: TempDir,
}

impl Harness {
    fn new() -> Self {
        Self {
            repo: Arc::new(MemoryRepository::new()),
            sink: Arc::new(MemorySink::new()),
            work: TempDir::new().unwrap(),
        }
    }

    fn orchestrator(&self, storage: StorageErrorPolicy, matching: MatchPolicy) -> Orchestrator {
        let resolver = ResourceResolver::new(self.repo.clone(), self.work.path())
            .with_storage_error_policy(storage);
        let executor = Executor::new(self.work.path());
        Orchestrator::new(resolver, executor, self.sink.clone()).with_match_policy(matching)
    }

    fn default_orchestrator(&self) -> Orchestrator {
        self.orchestrator(StorageErrorPolicy::Fatal, MatchPolicy::RunAll)
    }

    /// Nothing but the work dir itself may remain after an event
    fn assert_work_dir_clean(&self) {
        let leftovers: Vec<_> = std::fs::read_dir(self.work.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert!(leftovers.is_empty(), "leftover files: {:?}", leftovers);
    }
}

fn event(event_type: &str, data: serde_json::Value) -> EventEnvelope {
    serde_json::from_value(json!({
        "id": "event-1",
        "type": event_type,
        "source": "shipyard-controller",
        "specversion": "1.0",
        "time": "2024-03-01T10:00:00Z",
        "shkeptncontext": "ctx-42",
        "data": data,
    }))
    .unwrap()
}

fn scope_data() -> serde_json::Value {
    json!({"project": "sockshop", "stage": "dev", "service": "carts", "labels": {"team": "a"}})
}

#[tokio::test]
async fn test_no_file_means_no_events() {
    let h = Harness::new();
    let orchestrator = h.default_orchestrator();

    for event_type in [
        "sh.keptn.event.dev.deployment.triggered",
        "sh.keptn.event.dev.deployment.finished",
        "sh.keptn.event.production.action.triggered",
    ] {
        let report = orchestrator
            .handle_event(&event(event_type, scope_data()))
            .await
            .unwrap();
        assert_eq!(report.state, ProcessingState::NoAction);
        assert!(!report.executed());
    }

    assert!(h.sink.events().is_empty());
}

#[tokio::test]
async fn test_triggered_event_reports_started_then_finished() {
    let h = Harness::new();
    h.repo.insert(
        Scope::Service,
        "generic-executor/deployment.triggered.sh",
        "echo '{\"url\":\"http://x\"}'\n",
    );

    let report = h
        .default_orchestrator()
        .handle_event(&event("sh.keptn.event.dev.deployment.triggered", scope_data()))
        .await
        .unwrap();

    assert_eq!(report.state, ProcessingState::Done);
    assert_eq!(
        h.sink.event_types(),
        vec![
            "sh.keptn.event.deployment.started",
            "sh.keptn.event.deployment.finished"
        ]
    );

    let events = h.sink.events();
    let finished = &events[1];
    assert_eq!(finished.shkeptncontext, "ctx-42");
    assert_eq!(finished.triggeredid, "event-1");
    assert_eq!(finished.data.status, StatusType::Succeeded);
    assert_eq!(finished.data.result, Some(ResultType::Pass));
    assert_eq!(finished.data.extra.get("deployment"), Some(&json!({"url": "http://x"})));
    assert_eq!(finished.data.labels.get("team").map(String::as_str), Some("a"));
    assert!(events[0].data.message.contains("deployment.triggered.sh"));

    h.assert_work_dir_clean();
}

#[tokio::test]
async fn test_error_key_downgrades_result_to_warning() {
    let h = Harness::new();
    h.repo.insert(
        Scope::Project,
        "generic-executor/test.triggered.sh",
        "echo '{\"error\":\"bad config\"}'\nexit 0\n",
    );

    h.default_orchestrator()
        .handle_event(&event("sh.keptn.event.dev.test.triggered", scope_data()))
        .await
        .unwrap();

    let events = h.sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].data.status, StatusType::Succeeded);
    assert_eq!(events[1].data.result, Some(ResultType::Warning));
    assert!(events[1].data.extra.get("test").is_none());
    assert!(events[1].data.message.contains("bad config"));
}

#[tokio::test]
async fn test_failing_script_reports_errored() {
    let h = Harness::new();
    h.repo.insert(
        Scope::Stage,
        "generic-executor/deployment.triggered.sh",
        "echo 'cannot deploy' >&2\nexit 2\n",
    );

    h.default_orchestrator()
        .handle_event(&event("sh.keptn.event.dev.deployment.triggered", scope_data()))
        .await
        .unwrap();

    let finished = &h.sink.events()[1];
    assert_eq!(finished.data.status, StatusType::Errored);
    assert_eq!(finished.data.result, Some(ResultType::Failed));
    assert!(finished.data.message.contains("cannot deploy"));
    h.assert_work_dir_clean();
}

#[tokio::test]
async fn test_non_triggered_event_runs_for_side_effects_only() {
    let h = Harness::new();
    let marker = h.work.path().join("marker.txt");
    h.repo.insert(
        Scope::Stage,
        "generic-executor/deployment.finished.sh",
        format!("echo \"$PROJECT-$STAGE\" > '{}'\n", marker.display()),
    );

    let report = h
        .default_orchestrator()
        .handle_event(&event("sh.keptn.event.dev.deployment.finished", scope_data()))
        .await
        .unwrap();

    assert_eq!(report.executions.len(), 1);
    assert_eq!(report.executions[0].scope, Some(Scope::Stage));
    assert!(report.emitted.is_empty());
    assert!(h.sink.events().is_empty());
    assert_eq!(std::fs::read_to_string(&marker).unwrap(), "sockshop-dev\n");
}

#[tokio::test]
async fn test_specific_file_beats_fallback() {
    let h = Harness::new();
    h.repo.insert(Scope::Service, "generic-executor/all.events.sh", "echo fallback\n");
    h.repo.insert(Scope::Project, "generic-executor/deployment.finished.sh", "echo specific\n");

    let report = h
        .default_orchestrator()
        .handle_event(&event("sh.keptn.event.dev.deployment.finished", scope_data()))
        .await
        .unwrap();

    assert_eq!(report.executions.len(), 1);
    assert_eq!(report.executions[0].file, "generic-executor/deployment.finished.sh");
}

#[tokio::test]
async fn test_fallback_file_handles_any_event() {
    let h = Harness::new();
    h.repo.insert(Scope::Service, "generic-executor/all.events.sh", "echo \"$EVENT\"\n");

    let report = h
        .default_orchestrator()
        .handle_event(&event("sh.keptn.event.dev.evaluation.finished", scope_data()))
        .await
        .unwrap();

    assert_eq!(report.executions.len(), 1);
    assert_eq!(
        report.executions[0].outcome.payload(),
        Some("sh.keptn.event.dev.evaluation.finished\n")
    );
}

#[tokio::test]
async fn test_action_runs_specific_and_generic_scripts() {
    let h = Harness::new();
    h.repo.insert(
        Scope::Service,
        "generic-executor/action.triggered.scale.sh",
        "echo '{\"replicas\":3}'\n",
    );
    h.repo.insert(
        Scope::Project,
        "generic-executor/action.triggered.sh",
        "echo '{\"notified\":true}'\n",
    );

    let mut data = scope_data();
    data["action"] = json!({"action": "scale", "value": "3"});
    let report = h
        .default_orchestrator()
        .handle_event(&event("sh.keptn.event.production.action.triggered", data))
        .await
        .unwrap();

    assert_eq!(report.executions.len(), 2);
    assert_eq!(report.executions[0].event_name, "action.triggered.scale");
    assert_eq!(report.executions[1].event_name, "action.triggered");

    let events = h.sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event_type, "sh.keptn.event.action.started");
    assert_eq!(events[1].event_type, "sh.keptn.event.action.finished");
    assert_eq!(
        events[1].data.extra.get("action"),
        Some(&json!({"replicas": 3, "notified": true}))
    );
    h.assert_work_dir_clean();
}

#[tokio::test]
async fn test_action_first_success_policy_stops_early() {
    let h = Harness::new();
    h.repo.insert(Scope::Service, "generic-executor/action.triggered.scale.sh", "echo one\n");
    h.repo.insert(Scope::Service, "generic-executor/action.triggered.sh", "echo two\n");

    let mut data = scope_data();
    data["action"] = json!({"action": "scale"});
    let report = h
        .orchestrator(StorageErrorPolicy::Fatal, MatchPolicy::FirstSuccess)
        .handle_event(&event("sh.keptn.event.production.action.triggered", data))
        .await
        .unwrap();

    assert_eq!(report.executions.len(), 1);
    assert_eq!(report.executions[0].file, "generic-executor/action.triggered.scale.sh");
}

#[tokio::test]
async fn test_action_shared_fallback_runs_once() {
    let h = Harness::new();
    h.repo.insert(Scope::Service, "generic-executor/all.events.sh", "echo once\n");

    let mut data = scope_data();
    data["action"] = json!({"action": "scale"});
    let report = h
        .default_orchestrator()
        .handle_event(&event("sh.keptn.event.production.action.triggered", data))
        .await
        .unwrap();

    assert_eq!(report.executions.len(), 1);
    assert_eq!(h.sink.events().len(), 2);
}

#[tokio::test]
async fn test_action_status_token_overrides_status() {
    let h = Harness::new();
    h.repo.insert(Scope::Service, "generic-executor/action.triggered.sh", "echo errored\n");

    let mut data = scope_data();
    data["action"] = json!({"action": "restart"});
    h.default_orchestrator()
        .handle_event(&event("sh.keptn.event.production.action.triggered", data))
        .await
        .unwrap();

    let finished = &h.sink.events()[1];
    assert_eq!(finished.data.status, StatusType::Errored);
    assert_eq!(finished.data.result, Some(ResultType::Pass));
}

#[tokio::test]
async fn test_storage_error_is_fatal_by_default() {
    let h = Harness::new();
    h.repo.set_unavailable(true);

    let err = h
        .default_orchestrator()
        .handle_event(&event("sh.keptn.event.dev.deployment.triggered", scope_data()))
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::Resolve(_)));

    // the failure is still reported for triggered events
    let events = h.sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, "sh.keptn.event.deployment.finished");
    assert_eq!(events[0].data.status, StatusType::Errored);
    assert_eq!(events[0].data.result, Some(ResultType::Failed));
}

#[tokio::test]
async fn test_storage_error_treated_as_not_found() {
    let h = Harness::new();
    h.repo.set_unavailable(true);

    let report = h
        .orchestrator(StorageErrorPolicy::TreatAsNotFound, MatchPolicy::RunAll)
        .handle_event(&event("sh.keptn.event.dev.deployment.triggered", scope_data()))
        .await
        .unwrap();

    assert_eq!(report.state, ProcessingState::NoAction);
    assert!(h.sink.events().is_empty());
}

#[tokio::test]
async fn test_undecodable_event_is_protocol_error() {
    let h = Harness::new();
    let err = h
        .default_orchestrator()
        .handle_event(&event("nodots", scope_data()))
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::Protocol(_)));

    let err = h
        .default_orchestrator()
        .handle_event(&event("sh.keptn.event.dev.deployment.triggered", json!("not an object")))
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::Protocol(_)));
    assert!(h.sink.events().is_empty());
}

#[tokio::test]
async fn test_local_mode_reads_scripts_from_disk() {
    let h = Harness::new();
    let root = TempDir::new().unwrap();
    std::fs::create_dir_all(root.path().join("generic-executor")).unwrap();
    std::fs::write(
        root.path().join("generic-executor/deployment.triggered.sh"),
        "echo \"local $SERVICE\"\n",
    )
    .unwrap();

    let resolver = ResourceResolver::new(h.repo.clone(), h.work.path()).with_local_root(root.path());
    let orchestrator = Orchestrator::new(resolver, Executor::new(h.work.path()), h.sink.clone());

    orchestrator
        .handle_event(&event("sh.keptn.event.dev.deployment.triggered", scope_data()))
        .await
        .unwrap();

    let finished = &h.sink.events()[1];
    assert!(finished.data.message.contains("local carts"));
    assert!(root.path().join("generic-executor/deployment.triggered.sh").exists());
}

#[tokio::test]
async fn test_null_payload_fields_still_dispatch() {
    let h = Harness::new();
    h.repo.insert(
        Scope::Service,
        "generic-executor/deployment.triggered.sh",
        "echo \"strategy=$DATA_DEPLOYMENT_DEPLOYMENTSTRATEGY\"\n",
    );

    let report = h
        .default_orchestrator()
        .handle_event(&event(
            "sh.keptn.event.dev.deployment.triggered",
            json!({
                "project": "sockshop",
                "stage": "dev",
                "service": "carts",
                "labels": null,
                "deployment": {
                    "deploymentURIsLocal": null,
                    "deploymentURIsPublic": null,
                    "deploymentstrategy": "direct"
                }
            }),
        ))
        .await
        .unwrap();

    assert_eq!(report.state, ProcessingState::Done);
    assert_eq!(
        report.executions[0].outcome.payload().unwrap().trim(),
        "strategy=direct"
    );
    assert_eq!(
        h.sink.event_types(),
        vec![
            "sh.keptn.event.deployment.started",
            "sh.keptn.event.deployment.finished"
        ]
    );
    h.assert_work_dir_clean();
}
