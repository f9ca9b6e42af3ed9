//! Outcome validation
//!
//! Acceptance checks applied to a worker's outcome before downstream steps
//! may consume it. Rejection is not a crash: the dispatcher routes it to the
//! failure coordinator, with the reason preserved in the audit trail.

use crate::plan::PlanStep;
use crate::registry::{AgentKind, Outcome};
use serde_json::Value;

/// Why an outcome was rejected.
pub type RejectReason = String;

/// Applies per-kind acceptance checks to step outcomes.
#[derive(Debug, Clone, Copy, Default)]
pub struct Validator;

impl Validator {
    /// Accept or reject one outcome.
    pub fn validate(&self, step: &PlanStep, outcome: &Outcome) -> Result<(), RejectReason> {
        if !outcome.success {
            return Err("worker reported failure".to_string());
        }
        if step.agent.is_generative() && payload_is_empty(&outcome.payload) {
            return Err("empty payload from generative step".to_string());
        }
        match step.agent {
            AgentKind::Planner => validate_architecture(&outcome.payload),
            AgentKind::Coder => validate_code(&outcome.payload),
            AgentKind::Tutor => validate_explanation(&outcome.payload),
            AgentKind::Deployment => validate_deployment(&outcome.payload),
        }
    }
}

fn payload_is_empty(payload: &Value) -> bool {
    match payload {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn validate_architecture(payload: &Value) -> Result<(), RejectReason> {
    let components = payload
        .get("architecture")
        .and_then(|a| a.get("components"))
        .and_then(Value::as_array);
    match components {
        Some(list) if !list.is_empty() => Ok(()),
        _ => Err("architecture missing component breakdown".to_string()),
    }
}

fn validate_code(payload: &Value) -> Result<(), RejectReason> {
    let Some(code) = payload.get("code").and_then(Value::as_str) else {
        return Err("no code in payload".to_string());
    };
    if code.trim().is_empty() {
        return Err("no code in payload".to_string());
    }
    if !delimiters_balanced(code) {
        return Err("generated code does not parse".to_string());
    }
    Ok(())
}

fn validate_explanation(payload: &Value) -> Result<(), RejectReason> {
    let text = match payload {
        Value::String(s) => Some(s.as_str()),
        other => other.get("explanation").and_then(Value::as_str),
    };
    match text {
        Some(s) if !s.trim().is_empty() => Ok(()),
        _ => Err("explanation is empty".to_string()),
    }
}

fn validate_deployment(payload: &Value) -> Result<(), RejectReason> {
    let named = payload.get("target").and_then(Value::as_str).is_some()
        || payload.get("url").and_then(Value::as_str).is_some();
    if named {
        Ok(())
    } else {
        Err("deployment outcome names no target".to_string())
    }
}

/// Cheap structural parse check: bracket pairs must nest, with string
/// literals ignored.
fn delimiters_balanced(code: &str) -> bool {
    let mut stack = Vec::new();
    let mut chars = code.chars().peekable();
    let mut in_string: Option<char> = None;

    while let Some(c) = chars.next() {
        if let Some(quote) = in_string {
            if c == '\\' {
                chars.next();
            } else if c == quote {
                in_string = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => in_string = Some(c),
            '(' | '[' | '{' => stack.push(c),
            ')' => {
                if stack.pop() != Some('(') {
                    return false;
                }
            }
            ']' => {
                if stack.pop() != Some('[') {
                    return false;
                }
            }
            '}' => {
                if stack.pop() != Some('{') {
                    return false;
                }
            }
            _ => {}
        }
    }
    stack.is_empty() && in_string.is_none()
}
