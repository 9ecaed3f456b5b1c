//! Checkpoint model: the durable snapshot of a session at one revision.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::pending::PendingRequest;
use super::session::{ContextMessage, FailureRecord, SessionStatus};
use crate::{AppError, Result};

/// Snapshot of a session tied to a `(session_id, revision)` pair.
///
/// The highest revision is the session's current state. A checkpoint is
/// immutable once written; the engine mutates a working copy and commits
/// it through the checkpoint store under the prior revision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    /// Session identifier.
    pub session_id: String,
    /// Agent definition the session runs.
    pub agent_id: String,
    /// Optimistic-concurrency revision; 0 at creation.
    pub revision: u64,
    /// Index of the next step to execute.
    pub step_index: usize,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Append-only conversation context.
    pub context: Vec<ContextMessage>,
    /// Outstanding human request; present iff waiting.
    pub pending_request: Option<PendingRequest>,
    /// Final output; present only when completed.
    pub result: Option<Value>,
    /// Failure record; present only when failed.
    pub error: Option<FailureRecord>,
    /// Session creation time.
    pub created_at: DateTime<Utc>,
    /// Time this revision was written.
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Construct the initial checkpoint of a new session.
    #[must_use]
    pub fn initial(agent_id: &str, context: Vec<ContextMessage>, now: DateTime<Utc>) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            agent_id: agent_id.to_owned(),
            revision: 0,
            step_index: 0,
            status: SessionStatus::Running,
            context,
            pending_request: None,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check the status/payload pairing before a checkpoint is persisted.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Internal` if `waiting_for_human` and the pending
    /// request disagree, or a result/error is attached to the wrong status.
    pub fn validate(&self) -> Result<()> {
        let waiting = self.status == SessionStatus::WaitingForHuman;
        if waiting != self.pending_request.is_some() {
            return Err(AppError::Internal(format!(
                "session {} status {} does not match pending request presence",
                self.session_id,
                self.status.as_str()
            )));
        }
        if self.result.is_some() && self.status != SessionStatus::Completed {
            return Err(AppError::Internal(format!(
                "session {} carries a result while {}",
                self.session_id,
                self.status.as_str()
            )));
        }
        if self.error.is_some() != (self.status == SessionStatus::Failed) {
            return Err(AppError::Internal(format!(
                "session {} failure record does not match status {}",
                self.session_id,
                self.status.as_str()
            )));
        }
        Ok(())
    }

    /// Latest message in the context.
    #[must_use]
    pub fn last_message(&self) -> Option<&ContextMessage> {
        self.context.last()
    }

    /// Transition to `failed` with the given record, clearing any pending
    /// request.
    pub fn mark_failed(&mut self, failure: FailureRecord) {
        self.status = SessionStatus::Failed;
        self.pending_request = None;
        self.result = None;
        self.error = Some(failure);
    }
}
