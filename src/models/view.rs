//! Boundary view of a session returned by every inbound operation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::checkpoint::Checkpoint;
use super::pending::PendingRequest;
use super::session::{FailureRecord, SessionStatus};

/// Caller-facing snapshot of a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionView {
    /// Session identifier.
    pub id: String,
    /// Agent the session runs.
    pub agent_id: String,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Index of the next step to execute.
    pub step_index: usize,
    /// Revision the caller must echo back when resuming.
    pub revision: u64,
    /// Outstanding human request, only while waiting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_request: Option<PendingRequest>,
    /// Final output, only when completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure record, only when failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<FailureRecord>,
    /// Time of the current revision.
    pub updated_at: DateTime<Utc>,
}

impl From<&Checkpoint> for SessionView {
    fn from(checkpoint: &Checkpoint) -> Self {
        let completed = checkpoint.status == SessionStatus::Completed;
        let failed = checkpoint.status == SessionStatus::Failed;
        Self {
            id: checkpoint.session_id.clone(),
            agent_id: checkpoint.agent_id.clone(),
            status: checkpoint.status,
            step_index: checkpoint.step_index,
            revision: checkpoint.revision,
            pending_request: checkpoint.pending_request.clone(),
            result: checkpoint.result.clone().filter(|_| completed),
            error: checkpoint.error.clone().filter(|_| failed),
            updated_at: checkpoint.updated_at,
        }
    }
}

impl From<Checkpoint> for SessionView {
    fn from(checkpoint: Checkpoint) -> Self {
        Self::from(&checkpoint)
    }
}
