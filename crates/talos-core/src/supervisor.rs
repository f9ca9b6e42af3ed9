//! Supervisor - public entry point
//!
//! Accepts a classified request, builds a plan, runs it through a
//! dispatcher, and formats the aggregated result. Per-plan records (log,
//! progress bus, cancellation token) stay available after completion:
//! nothing is deleted mid-flight or after, only appended to or marked
//! terminal.

use crate::context::{ConversationContext, Intent};
use crate::dispatcher::Dispatcher;
use crate::error::{Error, ErrorKind, Result};
use crate::log::{ExecutionLog, LogEntry, ProgressBus, ProgressEvent};
use crate::plan::{topological_order, ExecutionPlan, PlanBuilder, PlanStatus, StepStatus};
use crate::recovery::{FailureCoordinator, RetryPolicy};
use crate::registry::{AgentKind, CapabilityRegistry};
use crate::validator::Validator;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};
use uuid::Uuid;

/// Supervisor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Broadcast capacity of each plan's log stream
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
    /// Broadcast capacity of each plan's progress stream
    #[serde(default = "default_progress_capacity")]
    pub progress_capacity: usize,
    /// Transient-failure retries per worker
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Initial retry backoff in milliseconds
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    /// Backoff multiplier per retry
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_log_capacity() -> usize {
    256
}

fn default_progress_capacity() -> usize {
    64
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_base_ms() -> u64 {
    1000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            log_capacity: default_log_capacity(),
            progress_capacity: default_progress_capacity(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl SupervisorConfig {
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_retries(self.max_retries)
            .with_initial_delay(Duration::from_millis(self.retry_base_ms))
            .with_backoff_multiplier(self.backoff_multiplier)
    }
}

/// A request handed to the supervisor: classified intent plus the
/// conversation snapshot it applies to.
#[derive(Debug, Clone)]
pub struct SupervisorRequest {
    /// Classified intent
    pub intent: Intent,
    /// Conversation snapshot, frozen for the lifetime of the plan
    pub context: ConversationContext,
}

/// Per-step entry of an aggregated response.
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    /// Step id
    pub step_id: Uuid,
    /// Agent kind that owned the step
    pub agent: AgentKind,
    /// Terminal step status
    pub status: StepStatus,
    /// Dispatch attempts, including retries and reassignments
    pub attempts: u32,
    /// Accepted payload, for succeeded steps
    pub payload: Option<serde_json::Value>,
    /// Last recorded error kind, for failed steps
    pub error: Option<ErrorKind>,
}

/// Aggregated result of one processed request.
#[derive(Debug, Clone, Serialize)]
pub struct AgentResponse {
    /// Plan that produced this response
    pub plan_id: Uuid,
    /// Terminal plan status
    pub status: PlanStatus,
    /// Formatted output of succeeded steps, in dependency order
    pub content: String,
    /// Per-step reports in dependency order
    pub steps: Vec<StepReport>,
    /// Itemized terminally-failed steps; empty when the plan completed
    pub failures: Vec<StepReport>,
    /// Wall-clock duration of the run in milliseconds
    pub duration_ms: u64,
}

struct PlanRecord {
    log: Arc<ExecutionLog>,
    progress: ProgressBus,
    cancel: CancellationToken,
}

/// Public entry point for the orchestration core.
///
/// One supervisor instance per deployment, constructed explicitly and torn
/// down with the process; there are no ambient singletons. Independent
/// requests run independent plans with no shared mutable state beyond the
/// registry and the per-plan logs.
pub struct Supervisor {
    registry: Arc<CapabilityRegistry>,
    builder: PlanBuilder,
    config: SupervisorConfig,
    plans: DashMap<Uuid, PlanRecord>,
}

impl Supervisor {
    /// Create a supervisor over a populated registry.
    #[must_use]
    pub fn new(registry: Arc<CapabilityRegistry>, config: SupervisorConfig) -> Self {
        let builder = PlanBuilder::new(Arc::clone(&registry));
        Self {
            registry,
            builder,
            config,
            plans: DashMap::new(),
        }
    }

    /// The registry this supervisor dispatches against.
    #[must_use]
    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    /// Process one request: build, run, format.
    ///
    /// Configuration problems (unknown agent kind, invalid plan graph)
    /// surface as errors with nothing dispatched. Step-level failures are
    /// absorbed into the response's failure list; partial success returns
    /// whatever succeeded plus itemized failures, never an opaque error.
    #[instrument(skip(self, request), fields(intent = ?request.intent.kind, user = %request.context.user_id))]
    pub async fn process_request(&self, request: SupervisorRequest) -> Result<AgentResponse> {
        let start = Instant::now();
        let mut plan = self.builder.build(&request.intent, &request.context)?;
        let conversation = Arc::new(request.context);

        let record = PlanRecord {
            log: Arc::new(ExecutionLog::new(plan.id, self.config.log_capacity)),
            progress: ProgressBus::new(self.config.progress_capacity),
            cancel: CancellationToken::new(),
        };
        let log = Arc::clone(&record.log);
        let progress = record.progress.clone();
        let cancel = record.cancel.clone();
        self.plans.insert(plan.id, record);

        info!(plan_id = %plan.id, steps = plan.steps.len(), "Plan accepted");

        let dispatcher = Dispatcher::new(
            Arc::clone(&self.registry),
            Validator,
            FailureCoordinator::new(self.config.retry_policy()),
            log,
            progress,
            cancel,
        );
        let status = dispatcher.run(&mut plan, conversation).await;

        Ok(format_response(&plan, status, start.elapsed()))
    }

    /// Cancel a running plan. Returns `false` for unknown plans or plans
    /// already signalled; signalling a finished plan has no effect.
    pub fn cancel(&self, plan_id: Uuid) -> bool {
        match self.plans.get(&plan_id) {
            Some(record) if !record.cancel.is_cancelled() => {
                record.cancel.cancel();
                info!(plan_id = %plan_id, "Plan cancelled by caller");
                true
            }
            _ => false,
        }
    }

    /// Subscribe to a plan's live log stream.
    pub fn subscribe_log(&self, plan_id: Uuid) -> Result<broadcast::Receiver<LogEntry>> {
        self.plans
            .get(&plan_id)
            .map(|r| r.log.subscribe())
            .ok_or(Error::PlanNotFound(plan_id))
    }

    /// Subscribe to a plan's worker progress stream.
    pub fn subscribe_progress(&self, plan_id: Uuid) -> Result<broadcast::Receiver<ProgressEvent>> {
        self.plans
            .get(&plan_id)
            .map(|r| r.progress.subscribe())
            .ok_or(Error::PlanNotFound(plan_id))
    }

    /// Replay a plan's log from a sequence offset (restartable stream).
    pub async fn log_entries(&self, plan_id: Uuid, from: u64) -> Result<Vec<LogEntry>> {
        let log = self
            .plans
            .get(&plan_id)
            .map(|r| Arc::clone(&r.log))
            .ok_or(Error::PlanNotFound(plan_id))?;
        Ok(log.entries_from(from).await)
    }

    /// Ids of all plans tracked by this supervisor. Records are retained
    /// for the lifetime of the instance; iteration order is unspecified.
    #[must_use]
    pub fn plan_ids(&self) -> Vec<Uuid> {
        self.plans.iter().map(|r| *r.key()).collect()
    }

    /// Number of plans tracked by this supervisor.
    #[must_use]
    pub fn plan_count(&self) -> usize {
        self.plans.len()
    }
}

/// Render the terminal plan into a caller-facing response.
fn format_response(plan: &ExecutionPlan, status: PlanStatus, elapsed: Duration) -> AgentResponse {
    let order =
        topological_order(&plan.steps).unwrap_or_else(|_| (0..plan.steps.len()).collect());

    let mut content = String::new();
    let mut steps = Vec::with_capacity(plan.steps.len());
    let mut failures = Vec::new();

    for &idx in &order {
        let step = &plan.steps[idx];
        let payload = match (&step.status, &step.outcome) {
            (StepStatus::Succeeded, Some(outcome)) => Some(outcome.payload.clone()),
            _ => None,
        };

        if let Some(payload) = &payload {
            content.push_str(&format!("## {}\n{}\n\n", step.agent, render_payload(payload)));
        }

        let report = StepReport {
            step_id: step.id,
            agent: step.agent,
            status: step.status,
            attempts: step.attempts,
            payload,
            error: step.last_error(),
        };
        if step.status == StepStatus::TerminallyFailed {
            failures.push(report.clone());
        }
        steps.push(report);
    }

    AgentResponse {
        plan_id: plan.id,
        status,
        content: content.trim_end().to_string(),
        steps,
        failures,
        duration_ms: elapsed.as_millis() as u64,
    }
}

fn render_payload(payload: &serde_json::Value) -> String {
    match payload {
        serde_json::Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| "{}".to_string()),
    }
}

#[cfg(test)]
mod tests;
