//! Capability registry
//!
//! Maps each agent kind to an ordered list of interchangeable worker
//! candidates behind one `execute` contract. The first registered candidate
//! is primary; later ones are fallbacks for reassignment. The registry also
//! enforces the per-kind admission limit and the invocation deadline, so
//! workers themselves stay free of scheduling concerns.

use crate::context::ConversationContext;
use crate::error::{Error, ErrorKind, Result};
use crate::log::ProgressSink;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[cfg(test)]
use mockall::automock;

/// Task categories a worker can implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    /// Architecture and project structure
    Planner,
    /// Code generation and modification
    Coder,
    /// Explanation and diagnosis
    Tutor,
    /// Shipping builds to a target environment
    Deployment,
}

impl AgentKind {
    /// Kinds whose output is generated content, gated on a non-empty payload.
    #[must_use]
    pub fn is_generative(self) -> bool {
        !matches!(self, AgentKind::Deployment)
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AgentKind::Planner => "planner",
            AgentKind::Coder => "coder",
            AgentKind::Tutor => "tutor",
            AgentKind::Deployment => "deployment",
        };
        f.write_str(name)
    }
}

/// Worker registration descriptor. Registered once at startup, read-only
/// thereafter; when several candidates share a kind, the first registration's
/// descriptor wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDescriptor {
    /// Task category this descriptor covers
    pub kind: AgentKind,
    /// Admission limit for concurrently running steps of this kind
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Invocation deadline in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_max_concurrency() -> usize {
    2
}

fn default_timeout_secs() -> u64 {
    120
}

impl AgentDescriptor {
    /// Create a descriptor with default limits.
    #[must_use]
    pub fn new(kind: AgentKind) -> Self {
        Self {
            kind,
            max_concurrency: default_max_concurrency(),
            timeout_secs: default_timeout_secs(),
        }
    }

    /// Set the admission limit.
    #[must_use]
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = limit;
        self
    }

    /// Set the invocation deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs();
        self
    }

    /// Invocation deadline as a [`Duration`].
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Default planner descriptor.
    #[must_use]
    pub fn planner() -> Self {
        Self {
            kind: AgentKind::Planner,
            max_concurrency: 2,
            timeout_secs: 180,
        }
    }

    /// Default coder descriptor. Code generation is the slowest capability.
    #[must_use]
    pub fn coder() -> Self {
        Self {
            kind: AgentKind::Coder,
            max_concurrency: 2,
            timeout_secs: 300,
        }
    }

    /// Default tutor descriptor.
    #[must_use]
    pub fn tutor() -> Self {
        Self {
            kind: AgentKind::Tutor,
            max_concurrency: 4,
            timeout_secs: 120,
        }
    }

    /// Default deployment descriptor. One deploy at a time.
    #[must_use]
    pub fn deployment() -> Self {
        Self {
            kind: AgentKind::Deployment,
            max_concurrency: 1,
            timeout_secs: 240,
        }
    }

    /// Default descriptors, one per kind.
    #[must_use]
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::planner(),
            Self::coder(),
            Self::tutor(),
            Self::deployment(),
        ]
    }
}

/// Input handed to a worker for one step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepInput {
    /// Short objective for the step
    pub objective: String,
    /// Structured task payload (intent slots, language, prior-step data)
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl StepInput {
    /// Create an input with an empty payload.
    #[must_use]
    pub fn new(objective: impl Into<String>) -> Self {
        Self {
            objective: objective.into(),
            payload: serde_json::Value::Null,
        }
    }

    /// Attach the structured payload.
    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Result of one capability invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    /// Whether the worker considers the step done
    pub success: bool,
    /// Worker output; shape is agent-kind specific
    pub payload: serde_json::Value,
    /// Failure classification when `success` is false
    pub error: Option<ErrorKind>,
}

impl Outcome {
    /// Successful outcome with a payload.
    #[must_use]
    pub fn ok(payload: serde_json::Value) -> Self {
        Self {
            success: true,
            payload,
            error: None,
        }
    }

    /// Failed outcome with a classification.
    #[must_use]
    pub fn failure(kind: ErrorKind) -> Self {
        Self {
            success: false,
            payload: serde_json::Value::Null,
            error: Some(kind),
        }
    }
}

/// Per-invocation context handed to a worker alongside its input.
#[derive(Debug, Clone)]
pub struct StepContext {
    /// Immutable conversation snapshot for the whole plan
    pub conversation: Arc<ConversationContext>,
    /// Sink for streaming partial payloads; the dispatcher never awaits these
    pub progress: ProgressSink,
    /// Cancelled when the plan is cancelled; workers may poll it to stop early
    pub cancel: CancellationToken,
}

/// Capability contract implemented by every specialized worker.
///
/// Worker internals (LLM calls, deployment APIs) are opaque to the core.
/// Failures are reported through the returned [`Outcome`], never panics.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Worker: Send + Sync {
    /// Stable worker name, used in logs and reassignment entries.
    fn name(&self) -> &str;

    /// Execute one step against the shared conversation snapshot.
    async fn execute(&self, input: &StepInput, ctx: &StepContext) -> Outcome;
}

struct AgentEntry {
    descriptor: AgentDescriptor,
    workers: Vec<Arc<dyn Worker>>,
    permits: Arc<Semaphore>,
}

/// Registry of worker candidates per agent kind.
///
/// Read-mostly after startup. `register` is the plugin surface: new
/// capability kinds plug in here and in the plan builder's lookup table,
/// never in the dispatcher.
#[derive(Default)]
pub struct CapabilityRegistry {
    entries: DashMap<AgentKind, AgentEntry>,
}

impl CapabilityRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker candidate for a kind. The first registration fixes
    /// the kind's descriptor; later calls append fallback candidates.
    pub fn register(&self, descriptor: AgentDescriptor, worker: Arc<dyn Worker>) {
        let kind = descriptor.kind;
        let mut entry = self.entries.entry(kind).or_insert_with(|| AgentEntry {
            permits: Arc::new(Semaphore::new(descriptor.max_concurrency.max(1))),
            descriptor,
            workers: Vec::new(),
        });
        entry.workers.push(worker);
        debug!(
            agent = %kind,
            candidates = entry.workers.len(),
            "Registered worker"
        );
    }

    /// Ordered worker candidates for a kind (primary first, then fallbacks).
    pub fn resolve(&self, kind: AgentKind) -> Result<Vec<Arc<dyn Worker>>> {
        let entry = self
            .entries
            .get(&kind)
            .ok_or(Error::UnknownAgentType(kind))?;
        if entry.workers.is_empty() {
            return Err(Error::UnknownAgentType(kind));
        }
        Ok(entry.workers.clone())
    }

    /// Number of registered candidates for a kind.
    #[must_use]
    pub fn candidate_count(&self, kind: AgentKind) -> usize {
        self.entries.get(&kind).map_or(0, |e| e.workers.len())
    }

    /// Descriptor for a kind.
    pub fn descriptor(&self, kind: AgentKind) -> Result<AgentDescriptor> {
        self.entries
            .get(&kind)
            .map(|e| e.descriptor.clone())
            .ok_or(Error::UnknownAgentType(kind))
    }

    /// Kinds with at least one registered candidate.
    #[must_use]
    pub fn kinds(&self) -> Vec<AgentKind> {
        self.entries.iter().map(|e| *e.key()).collect()
    }

    /// Invoke one candidate under the kind's admission limit and deadline.
    ///
    /// Waiting for an admission permit is backpressure, not failure; the
    /// deadline starts once the step is admitted. Deadline expiry abandons
    /// the call and settles the attempt as a `Timeout` outcome; plan
    /// cancellation settles it as `Cancelled`.
    pub async fn invoke(
        &self,
        kind: AgentKind,
        candidate: usize,
        input: &StepInput,
        ctx: &StepContext,
    ) -> Result<Outcome> {
        let (worker, deadline, permits) = {
            let entry = self
                .entries
                .get(&kind)
                .ok_or(Error::UnknownAgentType(kind))?;
            let worker = entry
                .workers
                .get(candidate)
                .cloned()
                .ok_or(Error::UnknownAgentType(kind))?;
            (worker, entry.descriptor.timeout(), Arc::clone(&entry.permits))
        };

        let _permit = permits.acquire_owned().await.expect("semaphore closed");

        debug!(agent = %kind, candidate, worker = worker.name(), "Invoking worker");

        tokio::select! {
            result = tokio::time::timeout(deadline, worker.execute(input, ctx)) => match result {
                Ok(outcome) => Ok(outcome),
                Err(_) => {
                    warn!(
                        agent = %kind,
                        worker = worker.name(),
                        timeout_secs = deadline.as_secs(),
                        "Worker deadline elapsed"
                    );
                    Ok(Outcome::failure(ErrorKind::Timeout))
                }
            },
            _ = ctx.cancel.cancelled() => {
                warn!(agent = %kind, worker = worker.name(), "Invocation cancelled");
                Ok(Outcome::failure(ErrorKind::Cancelled))
            }
        }
    }
}
