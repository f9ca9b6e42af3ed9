//! End-to-end plan execution scenarios against the public supervisor API.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use talos_core::{
    AgentDescriptor, AgentKind, CapabilityRegistry, ConversationContext, ErrorKind, Intent,
    IntentKind, Outcome, PlanStatus, StepContext, StepEvent, StepInput, StepStatus, Supervisor,
    SupervisorConfig, SupervisorRequest, Worker,
};
use tokio::sync::Barrier;
use tokio::time::sleep;

/// Worker that always succeeds with a fixed payload.
struct StaticWorker {
    name: &'static str,
    payload: Value,
}

#[async_trait]
impl Worker for StaticWorker {
    fn name(&self) -> &str {
        self.name
    }

    async fn execute(&self, _input: &StepInput, _ctx: &StepContext) -> Outcome {
        Outcome::ok(self.payload.clone())
    }
}

/// Worker that fails its first `fails` calls, then succeeds.
struct FlakyWorker {
    name: &'static str,
    fails: u32,
    kind: ErrorKind,
    calls: AtomicU32,
    payload: Value,
}

#[async_trait]
impl Worker for FlakyWorker {
    fn name(&self) -> &str {
        self.name
    }

    async fn execute(&self, _input: &StepInput, _ctx: &StepContext) -> Outcome {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.fails {
            Outcome::failure(self.kind)
        } else {
            Outcome::ok(self.payload.clone())
        }
    }
}

/// Worker that waits on a shared barrier before answering. Completes only if
/// its peer runs concurrently.
struct BarrierWorker {
    name: &'static str,
    barrier: Arc<Barrier>,
    payload: Value,
}

#[async_trait]
impl Worker for BarrierWorker {
    fn name(&self) -> &str {
        self.name
    }

    async fn execute(&self, _input: &StepInput, _ctx: &StepContext) -> Outcome {
        self.barrier.wait().await;
        Outcome::ok(self.payload.clone())
    }
}

fn architecture_payload() -> Value {
    json!({"architecture": {"components": [
        {"name": "api", "category": "backend"},
        {"name": "web", "category": "frontend"},
    ]}})
}

fn fast_config() -> SupervisorConfig {
    SupervisorConfig {
        retry_base_ms: 1,
        ..SupervisorConfig::default()
    }
}

fn request(kind: IntentKind) -> SupervisorRequest {
    SupervisorRequest {
        intent: Intent::new(kind, 0.9),
        context: ConversationContext::new("tester").with_project("proj-1"),
    }
}

fn count(entries: &[talos_core::LogEntry], step_id: uuid::Uuid, event: StepEvent) -> usize {
    entries
        .iter()
        .filter(|e| e.step_id == step_id && e.event == event)
        .count()
}

/// create_project with a healthy planner and a coder that times out on every
/// attempt and has no fallback: the plan ends partially failed, with the full
/// recovery history in the log.
#[tokio::test]
async fn test_create_project_partial_failure_audit_trail() {
    let registry = Arc::new(CapabilityRegistry::new());
    registry.register(
        AgentDescriptor::planner(),
        Arc::new(StaticWorker {
            name: "planner-1",
            payload: architecture_payload(),
        }),
    );
    registry.register(
        AgentDescriptor::coder(),
        Arc::new(FlakyWorker {
            name: "coder-timeouts",
            fails: u32::MAX,
            kind: ErrorKind::Timeout,
            calls: AtomicU32::new(0),
            payload: json!({"code": "unreached"}),
        }),
    );
    let supervisor = Supervisor::new(registry, fast_config());

    let response = supervisor
        .process_request(request(IntentKind::CreateProject))
        .await
        .unwrap();

    assert_eq!(response.status, PlanStatus::PartiallyFailed);

    let planner = &response.steps[0];
    let coder = &response.steps[1];
    assert_eq!(planner.agent, AgentKind::Planner);
    assert_eq!(planner.status, StepStatus::Succeeded);
    assert_eq!(coder.agent, AgentKind::Coder);
    assert_eq!(coder.status, StepStatus::TerminallyFailed);
    assert_eq!(coder.attempts, 3);

    // partial success still returns the planner's output
    assert!(response.content.contains("## planner"));
    assert_eq!(response.failures.len(), 1);
    assert_eq!(response.failures[0].error, Some(ErrorKind::Timeout));

    let entries = supervisor.log_entries(response.plan_id, 0).await.unwrap();
    assert_eq!(count(&entries, planner.step_id, StepEvent::Dispatched), 1);
    assert_eq!(count(&entries, planner.step_id, StepEvent::Succeeded), 1);
    assert_eq!(count(&entries, coder.step_id, StepEvent::Dispatched), 1);
    assert_eq!(count(&entries, coder.step_id, StepEvent::Failed), 3);
    assert_eq!(count(&entries, coder.step_id, StepEvent::Retried), 2);
    assert_eq!(count(&entries, coder.step_id, StepEvent::Aborted), 1);
}

/// debug_error declares its tutor and coder steps independent: both dispatch
/// in the same ready round and run concurrently. Each worker blocks on a
/// shared barrier, so the test completes only under true concurrency.
#[tokio::test]
async fn test_debug_error_runs_independent_steps_concurrently() {
    let barrier = Arc::new(Barrier::new(2));
    let registry = Arc::new(CapabilityRegistry::new());
    registry.register(
        AgentDescriptor::tutor(),
        Arc::new(BarrierWorker {
            name: "tutor-1",
            barrier: Arc::clone(&barrier),
            payload: json!({"explanation": "the null deref comes from an unchecked index"}),
        }),
    );
    registry.register(
        AgentDescriptor::coder(),
        Arc::new(BarrierWorker {
            name: "coder-1",
            barrier,
            payload: json!({"code": "items.get(i).copied()"}),
        }),
    );
    let supervisor = Supervisor::new(registry, fast_config());

    let response = tokio::time::timeout(
        Duration::from_secs(5),
        supervisor.process_request(request(IntentKind::DebugError)),
    )
    .await
    .expect("independent steps must not serialize")
    .unwrap();

    assert_eq!(response.status, PlanStatus::Completed);

    let entries = supervisor.log_entries(response.plan_id, 0).await.unwrap();
    assert_eq!(entries[0].event, StepEvent::Dispatched);
    assert_eq!(entries[1].event, StepEvent::Dispatched);
}

/// Two transient failures followed by a success leave the step succeeded and
/// the plan completed.
#[tokio::test]
async fn test_transient_failures_then_success() {
    let registry = Arc::new(CapabilityRegistry::new());
    registry.register(
        AgentDescriptor::tutor(),
        Arc::new(FlakyWorker {
            name: "tutor-flaky",
            fails: 2,
            kind: ErrorKind::ServiceUnavailable,
            calls: AtomicU32::new(0),
            payload: json!({"explanation": "recovered"}),
        }),
    );
    let supervisor = Supervisor::new(registry, fast_config());

    let response = supervisor
        .process_request(request(IntentKind::ExplainConcept))
        .await
        .unwrap();

    assert_eq!(response.status, PlanStatus::Completed);
    assert_eq!(response.steps[0].attempts, 3);
    assert_eq!(response.steps[0].status, StepStatus::Succeeded);
    assert!(response.failures.is_empty());
}

/// A rejected primary is reassigned to the fallback candidate, which passes
/// validation.
#[tokio::test]
async fn test_rejected_outcome_reassigned_to_fallback() {
    let registry = Arc::new(CapabilityRegistry::new());
    registry.register(
        AgentDescriptor::tutor(),
        Arc::new(StaticWorker {
            name: "tutor-empty",
            payload: json!({"explanation": ""}),
        }),
    );
    registry.register(
        AgentDescriptor::tutor(),
        Arc::new(StaticWorker {
            name: "tutor-backup",
            payload: json!({"explanation": "a trait object erases the concrete type"}),
        }),
    );
    let supervisor = Supervisor::new(registry, fast_config());

    let response = supervisor
        .process_request(request(IntentKind::ExplainConcept))
        .await
        .unwrap();

    assert_eq!(response.status, PlanStatus::Completed);
    assert_eq!(response.steps[0].attempts, 2);

    let entries = supervisor.log_entries(response.plan_id, 0).await.unwrap();
    let step_id = response.steps[0].step_id;
    assert_eq!(count(&entries, step_id, StepEvent::Rejected), 1);
    assert_eq!(count(&entries, step_id, StepEvent::Reassigned), 1);
    assert_eq!(count(&entries, step_id, StepEvent::Succeeded), 1);
}

/// deploy_app chains coder then deployment; a deployment worker with no
/// payload target is rejected and, with no fallback, the plan partially
/// fails while the coder's output is preserved.
#[tokio::test]
async fn test_deploy_app_preserves_partial_results() {
    let registry = Arc::new(CapabilityRegistry::new());
    registry.register(
        AgentDescriptor::coder(),
        Arc::new(StaticWorker {
            name: "coder-1",
            payload: json!({"code": "fn handler() {}"}),
        }),
    );
    registry.register(
        AgentDescriptor::deployment(),
        Arc::new(StaticWorker {
            name: "deploy-vague",
            payload: json!({"status": "maybe"}),
        }),
    );
    let supervisor = Supervisor::new(registry, fast_config());

    let response = supervisor
        .process_request(request(IntentKind::DeployApp))
        .await
        .unwrap();

    assert_eq!(response.status, PlanStatus::PartiallyFailed);
    assert_eq!(response.steps[0].status, StepStatus::Succeeded);
    assert_eq!(response.steps[1].status, StepStatus::TerminallyFailed);
    assert!(response.content.contains("## coder"));
    assert_eq!(response.failures.len(), 1);
}

/// Caller-initiated cancellation interrupts the in-flight step and settles
/// the plan as failed without further dispatch.
#[tokio::test]
async fn test_cancellation_fails_plan_immediately() {
    struct StallingWorker;

    #[async_trait]
    impl Worker for StallingWorker {
        fn name(&self) -> &str {
            "staller"
        }

        async fn execute(&self, _input: &StepInput, _ctx: &StepContext) -> Outcome {
            sleep(Duration::from_secs(300)).await;
            Outcome::ok(json!({"explanation": "unreachable"}))
        }
    }

    let registry = Arc::new(CapabilityRegistry::new());
    registry.register(AgentDescriptor::tutor(), Arc::new(StallingWorker));
    let supervisor = Arc::new(Supervisor::new(registry, fast_config()));

    let runner = {
        let supervisor = Arc::clone(&supervisor);
        tokio::spawn(async move {
            supervisor
                .process_request(request(IntentKind::ExplainConcept))
                .await
        })
    };

    // wait until the plan is tracked, then cancel it
    let plan_id = loop {
        if let Some(id) = supervisor.plan_ids().first().copied() {
            break id;
        }
        sleep(Duration::from_millis(5)).await;
    };
    assert!(supervisor.cancel(plan_id));

    let response = tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .expect("cancellation must interrupt the worker")
        .unwrap()
        .unwrap();

    assert_eq!(response.status, PlanStatus::Failed);
    assert_eq!(response.steps[0].error, Some(ErrorKind::Cancelled));
    assert_eq!(response.steps[0].attempts, 1);
}
