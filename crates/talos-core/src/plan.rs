//! Execution plans and the plan builder
//!
//! A plan is an ordered, dependency-annotated set of steps derived from one
//! classified intent. The builder owns the fixed intent-to-agent lookup
//! table and rejects graphs that cannot execute: cycles, dangling
//! dependencies, and unregistered agent kinds all fail before anything is
//! dispatched.

use crate::context::{ConversationContext, Intent, IntentKind};
use crate::error::{Error, ErrorKind, Result};
use crate::registry::{AgentKind, CapabilityRegistry, Outcome, StepInput};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Step lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Waiting for dependencies
    Pending,
    /// Handed to a worker, awaiting its outcome
    Dispatched,
    /// Last attempt failed; recovery decision pending
    Failed,
    /// Scheduled for another attempt on the same worker
    RetryPending,
    /// Scheduled for a fallback worker
    ReassignPending,
    /// Outcome accepted
    Succeeded,
    /// Recovery exhausted
    TerminallyFailed,
    /// Never dispatched because a dependency terminally failed
    Skipped,
}

impl StepStatus {
    /// Terminal states never transition again.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepStatus::Succeeded | StepStatus::TerminallyFailed | StepStatus::Skipped
        )
    }
}

/// One sub-task within a plan, bound to one agent kind.
///
/// Created by the plan builder; mutated only by the dispatcher and failure
/// coordinator, which own the plan exclusively while it runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    /// Unique step id
    pub id: Uuid,
    /// Agent kind that executes this step
    pub agent: AgentKind,
    /// Task input handed to the worker
    pub input: StepInput,
    /// Steps that must succeed before this one dispatches
    #[serde(default)]
    pub depends_on: Vec<Uuid>,
    /// Lifecycle state
    pub status: StepStatus,
    /// Dispatch attempts so far, including retries and reassignments
    pub attempts: u32,
    /// Outcome of the last attempt
    pub outcome: Option<Outcome>,
}

impl PlanStep {
    /// Create a pending step with a fresh id and no dependencies.
    #[must_use]
    pub fn new(agent: AgentKind, input: StepInput) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent,
            input,
            depends_on: Vec::new(),
            status: StepStatus::Pending,
            attempts: 0,
            outcome: None,
        }
    }

    /// Add a dependency edge.
    #[must_use]
    pub fn depends_on_step(mut self, id: Uuid) -> Self {
        self.depends_on.push(id);
        self
    }

    /// Error kind of the last attempt, if it failed.
    #[must_use]
    pub fn last_error(&self) -> Option<ErrorKind> {
        self.outcome.as_ref().and_then(|o| o.error)
    }
}

/// Plan lifecycle states. Terminal statuses are immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    /// Built, not yet running
    Pending,
    /// Owned by a dispatcher
    Running,
    /// Every step succeeded
    Completed,
    /// Nothing succeeded, or the plan was cancelled
    Failed,
    /// Independent branches completed while others terminally failed
    PartiallyFailed,
}

impl PlanStatus {
    /// Terminal statuses never transition again.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PlanStatus::Completed | PlanStatus::Failed | PlanStatus::PartiallyFailed
        )
    }
}

/// An executable plan: one per supervisor request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Unique plan id
    pub id: Uuid,
    /// Steps in insertion order
    pub steps: Vec<PlanStep>,
    /// Build time
    pub created_at: DateTime<Utc>,
    /// Lifecycle state
    pub status: PlanStatus,
}

impl ExecutionPlan {
    pub(crate) fn new(steps: Vec<PlanStep>) -> Self {
        Self {
            id: Uuid::new_v4(),
            steps,
            created_at: Utc::now(),
            status: PlanStatus::Pending,
        }
    }

    /// Look up a step by id.
    #[must_use]
    pub fn step(&self, id: Uuid) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.id == id)
    }
}

/// Maps classified intents to executable plans.
pub struct PlanBuilder {
    registry: Arc<CapabilityRegistry>,
}

impl PlanBuilder {
    /// Create a builder backed by a registry.
    #[must_use]
    pub fn new(registry: Arc<CapabilityRegistry>) -> Self {
        Self { registry }
    }

    /// Agent kinds required for an intent, and whether they chain.
    ///
    /// This table is the single seam for new task categories: add a row here
    /// and a registry entry, never dispatcher changes. It is total over
    /// `IntentKind`; unknown intents fall back to a lone tutor step.
    fn required_agents(kind: IntentKind) -> (&'static [AgentKind], bool) {
        match kind {
            IntentKind::CreateProject => (&[AgentKind::Planner, AgentKind::Coder], true),
            IntentKind::DebugError => (&[AgentKind::Tutor, AgentKind::Coder], false),
            IntentKind::DeployApp => (&[AgentKind::Coder, AgentKind::Deployment], true),
            IntentKind::ExplainConcept | IntentKind::Unknown => (&[AgentKind::Tutor], true),
        }
    }

    fn objective_for(kind: AgentKind) -> &'static str {
        match kind {
            AgentKind::Planner => "design the project structure",
            AgentKind::Coder => "produce the code changes",
            AgentKind::Tutor => "explain the concept and likely causes",
            AgentKind::Deployment => "ship the build to the target environment",
        }
    }

    /// Build a plan for a classified intent.
    ///
    /// Steps chain in declared order unless the intent's sub-tasks are
    /// independent, in which case no dependency edges are added and the
    /// dispatcher may run them concurrently. Building twice from the same
    /// input yields structurally identical plans with fresh ids.
    pub fn build(&self, intent: &Intent, context: &ConversationContext) -> Result<ExecutionPlan> {
        let (kinds, chained) = Self::required_agents(intent.kind);

        let mut steps = Vec::with_capacity(kinds.len());
        let mut previous: Option<Uuid> = None;
        for kind in kinds {
            let input = StepInput::new(Self::objective_for(*kind)).with_payload(json!({
                "slots": intent.slots,
                "language": context.language,
                "project_id": context.project_id,
            }));
            let mut step = PlanStep::new(*kind, input);
            if chained {
                if let Some(prev) = previous {
                    step.depends_on.push(prev);
                }
            }
            previous = Some(step.id);
            steps.push(step);
        }

        debug!(intent = ?intent.kind, steps = steps.len(), chained, "Built plan steps");
        self.assemble(steps)
    }

    /// Assemble a plan from explicit steps.
    ///
    /// Extension seam for runtime-dependent agent selection: callers that
    /// know more than the lookup table (say, a project that is not
    /// deploy-ready) construct their own step graph and submit it here.
    /// Runs the same registration and graph checks as [`PlanBuilder::build`].
    pub fn assemble(&self, steps: Vec<PlanStep>) -> Result<ExecutionPlan> {
        if steps.is_empty() {
            return Err(Error::InvalidPlan("plan has no steps".to_string()));
        }
        for step in &steps {
            if self.registry.candidate_count(step.agent) == 0 {
                return Err(Error::UnknownAgentType(step.agent));
            }
        }
        topological_order(&steps)?;
        Ok(ExecutionPlan::new(steps))
    }
}

/// Topological order of step indices, or `InvalidPlan` for graphs that
/// cannot execute. Ties resolve in insertion order, which keeps dispatch
/// deterministic and testable.
pub(crate) fn topological_order(steps: &[PlanStep]) -> Result<Vec<usize>> {
    let positions: HashMap<Uuid, usize> = steps.iter().enumerate().map(|(i, s)| (s.id, i)).collect();
    if positions.len() != steps.len() {
        return Err(Error::InvalidPlan("duplicate step id".to_string()));
    }

    let mut indegree = vec![0usize; steps.len()];
    let mut dependents: HashMap<usize, Vec<usize>> = HashMap::new();
    for (idx, step) in steps.iter().enumerate() {
        for dep in &step.depends_on {
            let Some(&dep_idx) = positions.get(dep) else {
                return Err(Error::InvalidPlan(format!(
                    "step {} depends on unknown step {}",
                    step.id, dep
                )));
            };
            if dep_idx == idx {
                return Err(Error::InvalidPlan(format!(
                    "step {} depends on itself",
                    step.id
                )));
            }
            indegree[idx] += 1;
            dependents.entry(dep_idx).or_default().push(idx);
        }
    }

    let mut queue: VecDeque<usize> = (0..steps.len()).filter(|&i| indegree[i] == 0).collect();
    let mut order = Vec::with_capacity(steps.len());
    while let Some(idx) = queue.pop_front() {
        order.push(idx);
        for &child in dependents.get(&idx).into_iter().flatten() {
            indegree[child] -= 1;
            if indegree[child] == 0 {
                queue.push_back(child);
            }
        }
    }

    if order.len() != steps.len() {
        return Err(Error::InvalidPlan(
            "dependency graph contains a cycle".to_string(),
        ));
    }
    Ok(order)
}

/// Steps that are transitively downstream of the given step.
pub(crate) fn transitive_dependents(steps: &[PlanStep], root: usize) -> HashSet<usize> {
    let mut dead: HashSet<Uuid> = HashSet::from([steps[root].id]);
    let mut result = HashSet::new();
    loop {
        let mut changed = false;
        for (idx, step) in steps.iter().enumerate() {
            if !result.contains(&idx)
                && idx != root
                && step.depends_on.iter().any(|d| dead.contains(d))
            {
                dead.insert(step.id);
                result.insert(idx);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    result
}
