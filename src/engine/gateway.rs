//! Resume gateway: merges a human response into a waiting session.
//!
//! Checks run in a fixed order so concurrent callers get deterministic
//! answers: revision (`CONFLICT`), status (`INVALID_STATE`), expiry
//! (`EXPIRED`, and the session fails), then the response schema
//! (`VALIDATION_FAILED`, no mutation). Only then is the response appended,
//! the pending request cleared and the session handed back to the
//! controller.

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, info_span, Instrument};

use super::controller::ExecutionController;
use super::expiry;
use super::EngineState;
use crate::models::session::{value_to_content, ContextMessage, MessageRole, SessionStatus};
use crate::models::view::SessionView;
use crate::{AppError, Result};

/// Accepts human responses for paused sessions.
#[derive(Clone)]
pub struct ResumeGateway {
    state: Arc<EngineState>,
    controller: ExecutionController,
}

impl ResumeGateway {
    /// Create a gateway over shared engine state.
    #[must_use]
    pub fn new(state: Arc<EngineState>, controller: ExecutionController) -> Self {
        Self { state, controller }
    }

    /// Resume a waiting session with `response`, then advance it.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` if the session does not exist.
    /// - `AppError::Conflict` if `expected_revision` is not current.
    /// - `AppError::InvalidState` if the session is not waiting.
    /// - `AppError::Expired` if the pending request lapsed; the session is
    ///   failed as a side effect.
    /// - `AppError::Validation` if the response does not match the schema.
    pub async fn resume(
        &self,
        session_id: &str,
        expected_revision: u64,
        response: Value,
    ) -> Result<SessionView> {
        let span = info_span!("resume", session_id, expected_revision);
        async move {
            let current = self.state.store.read_latest(session_id).await?;

            if current.revision != expected_revision {
                return Err(AppError::Conflict(format!(
                    "session {session_id} is at revision {}, expected {expected_revision}",
                    current.revision
                )));
            }

            if current.status != SessionStatus::WaitingForHuman {
                return Err(AppError::InvalidState(format!(
                    "session {session_id} is {}, not waiting for a human",
                    current.status.as_str()
                )));
            }

            let current = expiry::expire_if_due(&self.state, current).await?;
            if current.status != SessionStatus::WaitingForHuman {
                return Err(AppError::Expired(format!(
                    "pending request of session {session_id} has expired"
                )));
            }

            let pending = current.pending_request.as_ref().ok_or_else(|| {
                AppError::Internal(format!("session {session_id} is waiting without a request"))
            })?;

            pending
                .response_schema
                .validate(&response)
                .map_err(AppError::Validation)?;

            let agent = self.state.registry.get(&current.agent_id).ok_or_else(|| {
                AppError::Internal(format!("agent {} is not registered", current.agent_id))
            })?;

            let step_id = pending.step_id.clone();
            let mut next = current.clone();
            next.context.push(ContextMessage::from_step(
                MessageRole::Human,
                value_to_content(&response),
                &step_id,
            ));
            next.pending_request = None;
            next.status = SessionStatus::Running;
            next.step_index = agent.next_index(current.step_index, next.last_message())?;

            let now = self.state.clock.now();
            let written = self.state.store.write(&next, current.revision, now).await?;
            info!(
                %step_id,
                revision = written.revision,
                step_index = written.step_index,
                "human response accepted"
            );

            match self.controller.advance(session_id).await {
                // A concurrent advance already took the session forward.
                Err(AppError::Conflict(_)) => {
                    let latest = self.state.store.read_latest(session_id).await?;
                    Ok(SessionView::from(latest))
                }
                other => other,
            }
        }
        .instrument(span)
        .await
    }
}
