//! Session service: the inbound surface of the engine.

use std::sync::Arc;

use serde_json::Value;
use tracing::{error, info, info_span, warn, Instrument};

use super::controller::ExecutionController;
use super::expiry;
use super::gateway::ResumeGateway;
use super::EngineState;
use crate::models::checkpoint::Checkpoint;
use crate::models::session::{
    value_to_content, ContextMessage, FailureKind, FailureRecord, MessageRole, SessionStatus,
};
use crate::models::view::SessionView;
use crate::{AppError, Result};

/// Attempts to commit an abort while other writers keep moving the session.
const ABORT_WRITE_ATTEMPTS: usize = 3;

/// Start, inspect, resume and abort sessions.
#[derive(Clone)]
pub struct SessionService {
    state: Arc<EngineState>,
    controller: ExecutionController,
    gateway: ResumeGateway,
}

impl SessionService {
    /// Create the service over shared engine state.
    #[must_use]
    pub fn new(state: Arc<EngineState>) -> Self {
        let controller = ExecutionController::new(Arc::clone(&state));
        let gateway = ResumeGateway::new(Arc::clone(&state), controller.clone());
        Self {
            state,
            controller,
            gateway,
        }
    }

    /// Shared engine state.
    #[must_use]
    pub fn state(&self) -> &Arc<EngineState> {
        &self.state
    }

    /// Create a session for `agent_id` and run it until it first pauses,
    /// completes or fails.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown agent,
    /// `AppError::Validation` if the input does not match the agent's input
    /// schema, or `AppError::Db` on storage failure.
    pub async fn start_session(&self, agent_id: &str, initial_input: Value) -> Result<SessionView> {
        let agent = self
            .state
            .registry
            .get(agent_id)
            .ok_or_else(|| AppError::NotFound(format!("agent {agent_id} not found")))?;

        if let Some(ref schema) = agent.input_schema {
            schema
                .validate(&initial_input)
                .map_err(|err| AppError::Validation(format!("initial input: {err}")))?;
        }

        let mut context = Vec::with_capacity(2);
        if let Some(ref system) = agent.system_prompt {
            context.push(ContextMessage::new(MessageRole::System, system.clone()));
        }
        context.push(ContextMessage::new(
            MessageRole::User,
            value_to_content(&initial_input),
        ));

        let checkpoint = Checkpoint::initial(agent_id, context, self.state.clock.now());
        let created = self.state.store.create(&checkpoint).await?;
        info!(session_id = %created.session_id, agent_id, "session started");

        self.controller.advance(&created.session_id).await
    }

    /// Current view of a session. A lapsed pending request is expired first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session does not exist.
    pub async fn get_status(&self, session_id: &str) -> Result<SessionView> {
        let current = self.state.store.read_latest(session_id).await?;
        let current = expiry::expire_if_due(&self.state, current).await?;
        Ok(SessionView::from(current))
    }

    /// Merge a human response into a waiting session and continue it.
    ///
    /// # Errors
    ///
    /// See [`ResumeGateway::resume`].
    pub async fn resume(
        &self,
        session_id: &str,
        expected_revision: u64,
        response: Value,
    ) -> Result<SessionView> {
        self.gateway
            .resume(session_id, expected_revision, response)
            .await
    }

    /// Run a `running` session forward.
    ///
    /// # Errors
    ///
    /// See [`ExecutionController::advance`].
    pub async fn advance(&self, session_id: &str) -> Result<SessionView> {
        self.controller.advance(session_id).await
    }

    /// Fail a session with `ABORTED` and cancel its in-flight step.
    ///
    /// The failed checkpoint is committed before cancellation, so a run
    /// that was mid-step discards its work.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session does not exist,
    /// `AppError::InvalidState` if it already finished, or
    /// `AppError::Conflict` if it kept changing across every attempt.
    pub async fn abort(&self, session_id: &str) -> Result<SessionView> {
        let span = info_span!("abort", session_id);
        async move {
            for _ in 0..ABORT_WRITE_ATTEMPTS {
                let current = self.state.store.read_latest(session_id).await?;
                let current = expiry::expire_if_due(&self.state, current).await?;
                if current.status.is_terminal() {
                    return Err(AppError::InvalidState(format!(
                        "session {session_id} is already {}",
                        current.status.as_str()
                    )));
                }

                let now = self.state.clock.now();
                let mut failure =
                    FailureRecord::new(FailureKind::Aborted, "aborted by operator", now);
                if let Some(step) = self
                    .state
                    .registry
                    .get(&current.agent_id)
                    .and_then(|agent| agent.steps.get(current.step_index).cloned())
                {
                    failure = failure.at_step(&step.id);
                }

                let mut aborted = current.clone();
                aborted.mark_failed(failure);
                match self.state.store.write(&aborted, current.revision, now).await {
                    Ok(written) => {
                        let cancelled = self.state.active_runs.cancel(session_id);
                        info!(revision = written.revision, cancelled, "session aborted");
                        return Ok(SessionView::from(written));
                    }
                    Err(AppError::Conflict(msg)) => {
                        warn!(%msg, "abort raced another writer, retrying");
                    }
                    Err(err) => return Err(err),
                }
            }
            Err(AppError::Conflict(format!(
                "session {session_id} kept changing during abort"
            )))
        }
        .instrument(span)
        .await
    }

    /// Every committed revision of a session, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session does not exist.
    pub async fn history(&self, session_id: &str) -> Result<Vec<Checkpoint>> {
        self.state.store.history(session_id).await
    }

    /// Advance every session left `running`, e.g. after a restart.
    ///
    /// Per-session failures are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the running sessions cannot be listed.
    pub async fn recover_running(&self) -> Result<Vec<SessionView>> {
        let running = self.state.store.list_by_status(SessionStatus::Running).await?;
        info!(sessions = running.len(), "recovering running sessions");

        let mut recovered = Vec::with_capacity(running.len());
        for checkpoint in running {
            match self.controller.advance(&checkpoint.session_id).await {
                Ok(view) => recovered.push(view),
                Err(err) => {
                    error!(session_id = %checkpoint.session_id, %err, "recovery failed");
                }
            }
        }
        Ok(recovered)
    }
}
