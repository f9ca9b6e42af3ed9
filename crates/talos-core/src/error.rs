//! Error types for talos-core
//!
//! Plan-level errors surface to the supervisor's caller before anything is
//! dispatched. Step-level failures travel inside an [`Outcome`] as an
//! [`ErrorKind`] and are absorbed by the failure coordinator; they never
//! reach the caller directly.
//!
//! [`Outcome`]: crate::registry::Outcome

use crate::registry::AgentKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// No worker is registered for the requested agent kind
    #[error("unknown agent type: {0}")]
    UnknownAgentType(AgentKind),

    /// Plan construction failed (cycle, dangling dependency, empty plan)
    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    /// No plan with this id is tracked by the supervisor
    #[error("plan {0} not found")]
    PlanNotFound(Uuid),
}

impl Error {
    /// Whether this is a configuration problem that surfaces to the caller
    /// with nothing dispatched.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::UnknownAgentType(_) | Error::InvalidPlan(_))
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Step-level failure classification carried inside an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Worker exceeded its descriptor deadline
    Timeout,
    /// Worker or its backing service was unreachable
    ServiceUnavailable,
    /// Task input was malformed; another attempt cannot help
    InvalidInput,
    /// The plan was cancelled while the step was in flight
    Cancelled,
}

impl ErrorKind {
    /// Transient kinds are worth another attempt on the same worker.
    #[must_use]
    pub fn is_transient(self) -> bool {
        matches!(self, ErrorKind::Timeout | ErrorKind::ServiceUnavailable)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::ServiceUnavailable => "service_unavailable",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}
