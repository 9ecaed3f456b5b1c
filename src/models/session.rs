//! Session lifecycle status, context messages and failure records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status for an agent session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Session is executing steps.
    Running,
    /// Session is paused on an interrupt until a human responds.
    WaitingForHuman,
    /// Session reached a terminal step.
    Completed,
    /// Session failed; the failure record explains why.
    Failed,
}

impl SessionStatus {
    /// Storage representation of the status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::WaitingForHuman => "waiting_for_human",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parse the storage representation.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "running" => Some(Self::Running),
            "waiting_for_human" => Some(Self::WaitingForHuman),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Whether the session can no longer make progress.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Determine whether a lifecycle transition is permitted.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (
                Self::Running,
                Self::Running | Self::WaitingForHuman | Self::Completed | Self::Failed
            ) | (Self::WaitingForHuman, Self::Running | Self::Failed)
        )
    }
}

/// Author of a context message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// Agent-level instructions.
    System,
    /// Initial input supplied when the session started.
    User,
    /// Model output.
    Assistant,
    /// Tool result.
    Tool,
    /// Response merged in by the resume gateway.
    Human,
}

/// One entry of the append-only session context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContextMessage {
    /// Message author.
    pub role: MessageRole,
    /// Message text. Structured payloads are stored as JSON text.
    pub content: String,
    /// Step that produced the message, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
}

impl ContextMessage {
    /// Construct a message not tied to a step.
    #[must_use]
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            step_id: None,
        }
    }

    /// Construct a message produced by a step.
    #[must_use]
    pub fn from_step(role: MessageRole, content: impl Into<String>, step_id: &str) -> Self {
        Self {
            role,
            content: content.into(),
            step_id: Some(step_id.to_owned()),
        }
    }

    /// Parse the content as JSON, if it is JSON.
    #[must_use]
    pub fn json(&self) -> Option<serde_json::Value> {
        serde_json::from_str(&self.content).ok()
    }
}

/// Render a JSON value as message content: strings verbatim, anything else
/// as compact JSON.
#[must_use]
pub fn value_to_content(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Classification of a session failure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// Pending human request timed out.
    Expired,
    /// Transient failures persisted past the attempt limit.
    RetriesExhausted,
    /// Effecting step failed with a non-transient error.
    StepFailed,
    /// Model or tool call ceiling exceeded.
    CallLimit,
    /// Operator aborted the session.
    Aborted,
    /// Unexpected engine failure.
    Internal,
}

/// Durable record of why a session failed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FailureRecord {
    /// Failure classification.
    pub kind: FailureKind,
    /// Human-readable detail.
    pub message: String,
    /// Step being executed when the failure happened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    /// Attempts made before giving up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    /// Failure timestamp.
    pub at: DateTime<Utc>,
}

impl FailureRecord {
    /// Construct a failure record.
    #[must_use]
    pub fn new(kind: FailureKind, message: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            kind,
            message: message.into(),
            step_id: None,
            attempts: None,
            at,
        }
    }

    /// Attach the failing step.
    #[must_use]
    pub fn at_step(mut self, step_id: &str) -> Self {
        self.step_id = Some(step_id.to_owned());
        self
    }

    /// Attach the attempt count.
    #[must_use]
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }
}
