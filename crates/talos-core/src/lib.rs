//! Talos Core - Task Orchestration Engine
//!
//! This crate provides the multi-agent orchestration core for the Talos AI
//! assistant, including:
//! - Planning: mapping classified intents to dependency-ordered plans
//! - Dispatch: concurrent, deadline-bounded execution of ready steps
//! - Validation: per-kind acceptance checks gating step outcomes
//! - Recovery: retry, reassignment, and abort decisions on failure
//! - Audit: an append-only, subscribable execution log per plan
//!
//! Specialized capabilities (planning, coding, tutoring, deployment) plug in
//! as [`Worker`] implementations through the [`CapabilityRegistry`]; their
//! internals are opaque to the core.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod context;
pub mod dispatcher;
pub mod error;
pub mod log;
pub mod plan;
pub mod recovery;
pub mod registry;
pub mod supervisor;
pub mod validator;

pub use context::{ConversationContext, Intent, IntentKind, Message, Role};
pub use dispatcher::Dispatcher;
pub use error::{Error, ErrorKind, Result};
pub use log::{ExecutionLog, LogEntry, ProgressBus, ProgressEvent, ProgressSink, StepEvent};
pub use plan::{ExecutionPlan, PlanBuilder, PlanStatus, PlanStep, StepStatus};
pub use recovery::{Decision, FailureCause, FailureCoordinator, RetryPolicy};
pub use registry::{
    AgentDescriptor, AgentKind, CapabilityRegistry, Outcome, StepContext, StepInput, Worker,
};
pub use supervisor::{
    AgentResponse, StepReport, Supervisor, SupervisorConfig, SupervisorRequest,
};
pub use validator::{RejectReason, Validator};
