use super::*;
use crate::context::IntentKind;
use crate::registry::{AgentDescriptor, Outcome, StepContext, StepInput, Worker};
use async_trait::async_trait;
use serde_json::{json, Value};

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

fn request(kind: IntentKind) -> SupervisorRequest {
    SupervisorRequest {
        intent: Intent::new(kind, 0.9),
        context: ConversationContext::new("tester"),
    }
}

fn populated_supervisor() -> Supervisor {
    let registry = Arc::new(CapabilityRegistry::new());
    registry.register(
        AgentDescriptor::planner(),
        Arc::new(StaticWorker {
            name: "planner-1",
            payload: json!({"architecture": {"components": [{"name": "api"}]}}),
        }),
    );
    registry.register(
        AgentDescriptor::coder(),
        Arc::new(StaticWorker {
            name: "coder-1",
            payload: json!({"code": "fn main() {}"}),
        }),
    );
    registry.register(
        AgentDescriptor::tutor(),
        Arc::new(StaticWorker {
            name: "tutor-1",
            payload: json!({"explanation": "lifetimes tie borrows to scopes"}),
        }),
    );
    Supervisor::new(registry, SupervisorConfig::default())
}

#[tokio::test]
async fn test_completed_plan_aggregates_in_dependency_order() {
    let supervisor = populated_supervisor();

    let response = supervisor
        .process_request(request(IntentKind::CreateProject))
        .await
        .unwrap();

    assert_eq!(response.status, PlanStatus::Completed);
    assert!(response.failures.is_empty());
    assert_eq!(response.steps.len(), 2);
    assert_eq!(response.steps[0].agent, AgentKind::Planner);
    assert_eq!(response.steps[1].agent, AgentKind::Coder);

    // planner section precedes coder section in the formatted content
    let planner_at = response.content.find("## planner").unwrap();
    let coder_at = response.content.find("## coder").unwrap();
    assert!(planner_at < coder_at);
}

#[tokio::test]
async fn test_configuration_error_dispatches_nothing() {
    let registry = Arc::new(CapabilityRegistry::new());
    let supervisor = Supervisor::new(registry, SupervisorConfig::default());

    let err = supervisor
        .process_request(request(IntentKind::ExplainConcept))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::UnknownAgentType(AgentKind::Tutor)));
    assert!(err.is_configuration());
    assert_eq!(supervisor.plan_count(), 0);
}

#[tokio::test]
async fn test_log_replay_from_offset() {
    let supervisor = populated_supervisor();

    let response = supervisor
        .process_request(request(IntentKind::ExplainConcept))
        .await
        .unwrap();

    let full = supervisor.log_entries(response.plan_id, 0).await.unwrap();
    assert!(!full.is_empty());

    let tail = supervisor.log_entries(response.plan_id, 1).await.unwrap();
    assert_eq!(tail.len(), full.len() - 1);
    assert_eq!(tail[0].seq, 1);
}

#[tokio::test]
async fn test_unknown_plan_id_is_reported() {
    let supervisor = populated_supervisor();
    let missing = Uuid::new_v4();

    assert!(matches!(
        supervisor.log_entries(missing, 0).await.unwrap_err(),
        Error::PlanNotFound(_)
    ));
    assert!(matches!(
        supervisor.subscribe_log(missing).unwrap_err(),
        Error::PlanNotFound(_)
    ));
    assert!(!supervisor.cancel(missing));
}

#[tokio::test]
async fn test_records_are_retained_after_completion() {
    let supervisor = populated_supervisor();

    let a = supervisor
        .process_request(request(IntentKind::ExplainConcept))
        .await
        .unwrap();
    let b = supervisor
        .process_request(request(IntentKind::CreateProject))
        .await
        .unwrap();

    assert_eq!(supervisor.plan_count(), 2);
    let ids = supervisor.plan_ids();
    assert!(ids.contains(&a.plan_id));
    assert!(ids.contains(&b.plan_id));
    // finished plans still serve their audit trail
    assert!(!supervisor.log_entries(a.plan_id, 0).await.unwrap().is_empty());
}

#[test]
fn test_config_defaults() {
    let config: SupervisorConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(config.max_retries, 2);
    assert_eq!(config.retry_base_ms, 1000);
    assert_eq!(config.log_capacity, 256);
}

#[test]
fn test_render_payload_prefers_plain_strings() {
    assert_eq!(render_payload(&json!("plain text")), "plain text");
    let rendered = render_payload(&json!({"code": "fn main() {}"}));
    assert!(rendered.contains("\"code\""));
}
