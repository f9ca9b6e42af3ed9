//! Plan dispatcher
//!
//! Runs a single plan to a terminal status: dependency-ordered dispatch,
//! concurrent execution of ready steps, validation gating, and failure
//! recovery. One dispatcher task owns the plan for its whole lifetime;
//! nothing else mutates it.
//!
//! The fan-in resumes on *each* step completion, not when a whole round
//! finishes, so a slow branch never stalls an independent one. When several
//! steps become ready at once they dispatch in plan insertion order.

use crate::context::ConversationContext;
use crate::error::ErrorKind;
use crate::log::{ExecutionLog, ProgressBus, StepEvent};
use crate::plan::{transitive_dependents, ExecutionPlan, PlanStatus, StepStatus};
use crate::recovery::{Decision, FailureCause, FailureCoordinator};
use crate::registry::{CapabilityRegistry, Outcome, StepContext};
use crate::validator::Validator;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Completion of one in-flight step attempt.
struct StepCompletion {
    idx: usize,
    outcome: Outcome,
}

/// Worker assignment bookkeeping for one step.
#[derive(Debug, Clone, Copy, Default)]
struct Assignment {
    candidate: usize,
    failures_on_candidate: u32,
}

type InFlight = FuturesUnordered<BoxFuture<'static, StepCompletion>>;

/// Runs one [`ExecutionPlan`] to completion.
pub struct Dispatcher {
    registry: Arc<CapabilityRegistry>,
    validator: Validator,
    coordinator: FailureCoordinator,
    log: Arc<ExecutionLog>,
    progress: ProgressBus,
    cancel: CancellationToken,
}

impl Dispatcher {
    /// Create a dispatcher for one plan run.
    #[must_use]
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        validator: Validator,
        coordinator: FailureCoordinator,
        log: Arc<ExecutionLog>,
        progress: ProgressBus,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            validator,
            coordinator,
            log,
            progress,
            cancel,
        }
    }

    /// Run the plan to a terminal status.
    ///
    /// A step is never dispatched before all of its dependencies have
    /// succeeded. Cancellation interrupts in-flight invocations, settles
    /// them as `Cancelled`, and suppresses all further dispatch.
    #[instrument(skip(self, plan, conversation), fields(plan_id = %plan.id))]
    pub async fn run(
        &self,
        plan: &mut ExecutionPlan,
        conversation: Arc<ConversationContext>,
    ) -> PlanStatus {
        plan.status = PlanStatus::Running;
        info!(steps = plan.steps.len(), "Plan running");

        let mut assignments = vec![Assignment::default(); plan.steps.len()];
        let mut in_flight = InFlight::new();

        for idx in self.ready_steps(plan) {
            self.dispatch(plan, &mut assignments, &mut in_flight, &conversation, idx, None)
                .await;
        }

        while let Some(done) = in_flight.next().await {
            self.on_completion(plan, &mut assignments, &mut in_flight, &conversation, done)
                .await;
        }

        self.finish(plan)
    }

    /// Pending steps whose dependencies have all succeeded, in insertion
    /// order. Empty once cancellation is requested.
    fn ready_steps(&self, plan: &ExecutionPlan) -> Vec<usize> {
        if self.cancel.is_cancelled() {
            return Vec::new();
        }
        let succeeded: HashSet<Uuid> = plan
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Succeeded)
            .map(|s| s.id)
            .collect();
        plan.steps
            .iter()
            .enumerate()
            .filter(|(_, s)| {
                s.status == StepStatus::Pending
                    && s.depends_on.iter().all(|d| succeeded.contains(d))
            })
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Hand one step to its assigned worker candidate.
    async fn dispatch(
        &self,
        plan: &mut ExecutionPlan,
        assignments: &mut [Assignment],
        in_flight: &mut InFlight,
        conversation: &Arc<ConversationContext>,
        idx: usize,
        delay: Option<Duration>,
    ) {
        let plan_id = plan.id;
        let (step_id, kind, input, attempt) = {
            let step = &mut plan.steps[idx];
            step.status = StepStatus::Dispatched;
            step.attempts += 1;
            (step.id, step.agent, step.input.clone(), step.attempts)
        };

        if attempt == 1 {
            self.log
                .append(step_id, StepEvent::Dispatched, format!("agent={kind}"))
                .await;
        }
        debug!(step_id = %step_id, agent = %kind, attempt, "Dispatching step");

        let registry = Arc::clone(&self.registry);
        let candidate = assignments[idx].candidate;
        let ctx = StepContext {
            conversation: Arc::clone(conversation),
            progress: self.progress.sink(plan_id, step_id),
            cancel: self.cancel.child_token(),
        };

        let future: BoxFuture<'static, StepCompletion> = Box::pin(async move {
            if let Some(delay) = delay {
                sleep(delay).await;
            }
            let outcome = match registry.invoke(kind, candidate, &input, &ctx).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(step_id = %step_id, error = %e, "Invocation could not start");
                    Outcome::failure(ErrorKind::InvalidInput)
                }
            };
            StepCompletion { idx, outcome }
        });
        in_flight.push(future);
    }

    /// Settle one completed attempt: validate, succeed, or recover.
    async fn on_completion(
        &self,
        plan: &mut ExecutionPlan,
        assignments: &mut [Assignment],
        in_flight: &mut InFlight,
        conversation: &Arc<ConversationContext>,
        done: StepCompletion,
    ) {
        let StepCompletion { idx, outcome } = done;
        let step_id = plan.steps[idx].id;
        let agent = plan.steps[idx].agent;
        plan.steps[idx].outcome = Some(outcome.clone());

        if outcome.success {
            match self.validator.validate(&plan.steps[idx], &outcome) {
                Ok(()) => {
                    self.log.append(step_id, StepEvent::Validated, "accepted").await;
                    plan.steps[idx].status = StepStatus::Succeeded;
                    self.log
                        .append(
                            step_id,
                            StepEvent::Succeeded,
                            format!("attempts={}", plan.steps[idx].attempts),
                        )
                        .await;
                    info!(step_id = %step_id, agent = %agent, "Step succeeded");

                    for ready in self.ready_steps(plan) {
                        self.dispatch(plan, assignments, in_flight, conversation, ready, None)
                            .await;
                    }
                }
                Err(reason) => {
                    warn!(step_id = %step_id, agent = %agent, reason = %reason, "Outcome rejected");
                    self.log.append(step_id, StepEvent::Rejected, reason.clone()).await;
                    plan.steps[idx].status = StepStatus::Failed;
                    self.recover(
                        plan,
                        assignments,
                        in_flight,
                        conversation,
                        idx,
                        FailureCause::Rejected(reason),
                    )
                    .await;
                }
            }
        } else {
            let kind = outcome.error.unwrap_or(ErrorKind::ServiceUnavailable);
            warn!(step_id = %step_id, agent = %agent, error = %kind, "Step failed");
            self.log.append(step_id, StepEvent::Failed, kind.to_string()).await;
            plan.steps[idx].status = StepStatus::Failed;
            self.recover(
                plan,
                assignments,
                in_flight,
                conversation,
                idx,
                FailureCause::Worker(kind),
            )
            .await;
        }
    }

    /// Apply the failure coordinator's decision for one failed attempt.
    /// The decision is appended to the log before it takes effect.
    async fn recover(
        &self,
        plan: &mut ExecutionPlan,
        assignments: &mut [Assignment],
        in_flight: &mut InFlight,
        conversation: &Arc<ConversationContext>,
        idx: usize,
        cause: FailureCause,
    ) {
        let step_id = plan.steps[idx].id;
        assignments[idx].failures_on_candidate += 1;
        let fallbacks = self
            .registry
            .candidate_count(plan.steps[idx].agent)
            .saturating_sub(assignments[idx].candidate + 1);

        let decision =
            self.coordinator
                .decide(&cause, assignments[idx].failures_on_candidate, fallbacks);

        match decision {
            Decision::Retry { delay } => {
                self.log
                    .append(
                        step_id,
                        StepEvent::Retried,
                        format!(
                            "attempt={} delay_ms={}",
                            plan.steps[idx].attempts + 1,
                            delay.as_millis()
                        ),
                    )
                    .await;
                plan.steps[idx].status = StepStatus::RetryPending;
                self.dispatch(plan, assignments, in_flight, conversation, idx, Some(delay))
                    .await;
            }
            Decision::Reassign => {
                assignments[idx].candidate += 1;
                assignments[idx].failures_on_candidate = 0;
                self.log
                    .append(
                        step_id,
                        StepEvent::Reassigned,
                        format!("candidate={}", assignments[idx].candidate),
                    )
                    .await;
                plan.steps[idx].status = StepStatus::ReassignPending;
                self.dispatch(plan, assignments, in_flight, conversation, idx, None)
                    .await;
            }
            Decision::Abort => {
                let detail = match &cause {
                    FailureCause::Worker(kind) => kind.to_string(),
                    FailureCause::Rejected(reason) => reason.clone(),
                };
                self.log.append(step_id, StepEvent::Aborted, detail).await;
                plan.steps[idx].status = StepStatus::TerminallyFailed;
                warn!(step_id = %step_id, "Step terminally failed");
                self.skip_dependents(plan, idx);
            }
        }
    }

    /// Mark everything transitively downstream of a dead step as skipped.
    /// Skipped steps are never dispatched.
    fn skip_dependents(&self, plan: &mut ExecutionPlan, idx: usize) {
        for dependent in transitive_dependents(&plan.steps, idx) {
            let step = &mut plan.steps[dependent];
            if step.status == StepStatus::Pending {
                step.status = StepStatus::Skipped;
                debug!(step_id = %step.id, "Step skipped");
            }
        }
    }

    /// Compute and record the plan's terminal status.
    fn finish(&self, plan: &mut ExecutionPlan) -> PlanStatus {
        let total = plan.steps.len();
        let succeeded = plan
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Succeeded)
            .count();

        if self.cancel.is_cancelled() && succeeded < total {
            for step in &mut plan.steps {
                if !step.status.is_terminal() {
                    step.status = StepStatus::Skipped;
                }
            }
            plan.status = PlanStatus::Failed;
            info!("Plan cancelled");
            return plan.status;
        }

        plan.status = if succeeded == total {
            PlanStatus::Completed
        } else if succeeded > 0 {
            PlanStatus::PartiallyFailed
        } else {
            PlanStatus::Failed
        };
        info!(succeeded, total, status = ?plan.status, "Plan finished");
        plan.status
    }
}
