//! Classified intents and conversation context
//!
//! Both types are produced by external collaborators (the intent
//! classification service, channel adapters) and consumed read-only by the
//! orchestration core. The conversation context is shared with every step of
//! one plan as an immutable snapshot; only the supervisor's caller produces
//! a new snapshot for a subsequent request.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Classified user intent category.
///
/// The plan builder's lookup table is total over this enum: every variant
/// maps to a non-empty agent list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    /// Scaffold a new project from a description
    CreateProject,
    /// Diagnose and fix a reported error
    DebugError,
    /// Ship the current project to a deployment target
    DeployApp,
    /// Explain a concept or piece of code
    ExplainConcept,
    /// Classifier could not determine a category
    Unknown,
}

/// A classified user intent. Immutable once received; the core trusts the
/// classifier's output and does not re-validate it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    /// Intent category assigned by the classifier
    pub kind: IntentKind,
    /// Classifier confidence (0.0 - 1.0)
    pub confidence: f32,
    /// Extracted entities keyed by slot name
    #[serde(default)]
    pub slots: HashMap<String, serde_json::Value>,
}

impl Intent {
    /// Create an intent with no slots.
    #[must_use]
    pub fn new(kind: IntentKind, confidence: f32) -> Self {
        Self {
            kind,
            confidence,
            slots: HashMap::new(),
        }
    }

    /// Attach a slot value.
    #[must_use]
    pub fn with_slot(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.slots.insert(name.into(), value);
        self
    }

    /// Look up a slot by name.
    #[must_use]
    pub fn slot(&self, name: &str) -> Option<&serde_json::Value> {
        self.slots.get(name)
    }
}

/// Message author role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instruction
    System,
    /// End-user message
    User,
    /// Assistant reply
    Assistant,
}

/// One message in the conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Author role
    pub role: Role,
    /// Message text
    pub content: String,
}

impl Message {
    /// Create a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Create a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create an assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Conversation state shared read-only with every step of one plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationContext {
    /// End-user identifier
    pub user_id: String,
    /// Project the conversation is about, if any
    pub project_id: Option<String>,
    /// Session identifier
    pub session_id: String,
    /// Preferred response language (BCP 47 tag)
    pub language: String,
    /// Ordered message history
    #[serde(default)]
    pub history: Vec<Message>,
}

impl ConversationContext {
    /// Create a context for a user with a fresh session id.
    #[must_use]
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            project_id: None,
            session_id: Uuid::new_v4().to_string(),
            language: "en".to_string(),
            history: Vec::new(),
        }
    }

    /// Set the project id.
    #[must_use]
    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    /// Set the response language.
    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Append a message to the history. Only the supervisor's caller holds a
    /// mutable context; steps see a frozen snapshot.
    pub fn push(&mut self, message: Message) {
        self.history.push(message);
    }
}

impl Default for ConversationContext {
    fn default() -> Self {
        Self::new("anonymous")
    }
}
