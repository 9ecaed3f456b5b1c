//! Idempotency ledger records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Class of external effect recorded in the ledger.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    /// Model invocation.
    Model,
    /// Tool invocation.
    Tool,
}

impl EffectKind {
    /// Storage representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::Tool => "tool",
        }
    }

    /// Parse the storage representation.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "model" => Some(Self::Model),
            "tool" => Some(Self::Tool),
            _ => None,
        }
    }
}

/// Completed outcome of an effecting step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepOutcome {
    /// Effect class.
    pub kind: EffectKind,
    /// Model text (as a JSON string) or tool result.
    pub output: Value,
    /// Attempts taken to obtain the outcome.
    pub attempts: u32,
    /// Time the outcome was recorded.
    pub recorded_at: DateTime<Utc>,
}

/// Ledger row keyed by `(session_id, step_id)`.
#[derive(Debug, Clone, PartialEq)]
pub struct IdempotencyRecord {
    /// Owning session.
    pub session_id: String,
    /// Stable step identifier.
    pub step_id: String,
    /// Recorded outcome.
    pub outcome: StepOutcome,
}
