//! Execution controller: drives a session forward step by step.
//!
//! A run starts from the latest checkpoint and works on an in-memory copy.
//! Effecting steps consult the idempotency ledger first and replay recorded
//! outcomes; fresh outcomes are recorded before the run moves on. The copy
//! is committed as one checkpoint when the run pauses, completes or fails,
//! guarded by the revision it started from. Step indices only move forward.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::expiry;
use super::invoker::InvokeError;
use super::EngineState;
use crate::config::LimitExit;
use crate::models::agent::{AgentDefinition, StepAction, StepDefinition, StepNext};
use crate::models::checkpoint::Checkpoint;
use crate::models::ledger::{EffectKind, StepOutcome};
use crate::models::pending::{PendingRequest, ProposedAction, ResponseSchema};
use crate::models::session::{
    value_to_content, ContextMessage, FailureKind, FailureRecord, MessageRole, SessionStatus,
};
use crate::models::view::SessionView;
use crate::policy::{Decision, PolicyInput};
use crate::{AppError, Result};

/// Effect requested by the current step.
enum Effect<'a> {
    Model {
        prompt: &'a str,
        context: &'a [ContextMessage],
    },
    Tool {
        tool: &'a str,
        args: Value,
    },
}

impl Effect<'_> {
    fn kind(&self) -> EffectKind {
        match self {
            Self::Model { .. } => EffectKind::Model,
            Self::Tool { .. } => EffectKind::Tool,
        }
    }
}

/// How an effecting step ended.
enum EffectResult {
    Done(StepOutcome),
    Failed(FailureRecord),
    LimitReached(String),
    Cancelled,
    Superseded,
}

/// Fresh invocations made by the current run.
#[derive(Debug, Default)]
struct RunCounters {
    model: u32,
    tool: u32,
}

impl RunCounters {
    fn get(&self, kind: EffectKind) -> u32 {
        match kind {
            EffectKind::Model => self.model,
            EffectKind::Tool => self.tool,
        }
    }

    fn bump(&mut self, kind: EffectKind) {
        match kind {
            EffectKind::Model => self.model += 1,
            EffectKind::Tool => self.tool += 1,
        }
    }
}

/// Drives sessions through their agent's steps.
#[derive(Clone)]
pub struct ExecutionController {
    state: Arc<EngineState>,
}

impl ExecutionController {
    /// Create a controller over shared engine state.
    #[must_use]
    pub fn new(state: Arc<EngineState>) -> Self {
        Self { state }
    }

    /// Run a session until it pauses, completes or fails.
    ///
    /// Sessions that are not `running` are returned unchanged, apart from a
    /// lapsed pending request being expired.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session does not exist,
    /// `AppError::Conflict` if another writer committed first (the run's
    /// work is discarded; recorded outcomes stay in the ledger), or
    /// `AppError::Db` on storage failure.
    pub async fn advance(&self, session_id: &str) -> Result<SessionView> {
        let span = info_span!("advance", session_id);
        async move {
            let guard = self.state.active_runs.register(session_id);
            let checkpoint = self.state.store.read_latest(session_id).await?;
            let checkpoint = expiry::expire_if_due(&self.state, checkpoint).await?;
            if checkpoint.status != SessionStatus::Running {
                return Ok(SessionView::from(checkpoint));
            }
            let committed = self.run(checkpoint, guard.token()).await?;
            Ok(SessionView::from(committed))
        }
        .instrument(span)
        .await
    }

    async fn run(&self, base: Checkpoint, cancel: &CancellationToken) -> Result<Checkpoint> {
        let base_revision = base.revision;
        let mut work = base;

        let Some(agent) = self.state.registry.get(&work.agent_id) else {
            let failure = FailureRecord::new(
                FailureKind::Internal,
                format!("agent {} is not registered", work.agent_id),
                self.state.clock.now(),
            );
            work.mark_failed(failure);
            return self.commit(work, base_revision).await;
        };

        let mut counters = RunCounters::default();

        loop {
            let Some(step) = agent.steps.get(work.step_index) else {
                let failure = FailureRecord::new(
                    FailureKind::Internal,
                    format!("agent {} has no step at index {}", agent.id, work.step_index),
                    self.state.clock.now(),
                );
                work.mark_failed(failure);
                return self.commit(work, base_revision).await;
            };
            debug!(step_id = %step.id, kind = step.action.kind_name(), "executing step");

            let effect = match &step.action {
                StepAction::LlmCall { prompt } => Effect::Model {
                    prompt,
                    context: &work.context,
                },
                StepAction::ToolCall { tool, args } => Effect::Tool {
                    tool,
                    args: resolve_tool_args(args.as_ref(), &work.context),
                },
                StepAction::Interrupt {
                    prompt,
                    response_schema,
                    ttl_seconds,
                } => {
                    let proposed = gated_tool_call(&agent, work.step_index, &work.context);
                    let input = PolicyInput {
                        session_id: &work.session_id,
                        step,
                        proposed: proposed.as_ref(),
                        context: &work.context,
                    };
                    match self.state.policy.decide(&input) {
                        Decision::Pause => {
                            let request = match self.pending_request(
                                step,
                                prompt.as_deref(),
                                response_schema.as_ref(),
                                *ttl_seconds,
                                proposed,
                            ) {
                                Ok(request) => request,
                                Err(err) => {
                                    warn!(step_id = %step.id, %err, "cannot build pending request");
                                    let failure = FailureRecord::new(
                                        FailureKind::Internal,
                                        err.to_string(),
                                        self.state.clock.now(),
                                    )
                                    .at_step(&step.id);
                                    work.mark_failed(failure);
                                    return self.commit(work, base_revision).await;
                                }
                            };
                            info!(
                                step_id = %step.id,
                                policy = self.state.policy.name(),
                                expires_at = %request.expires_at,
                                "pausing for human"
                            );
                            work.status = SessionStatus::WaitingForHuman;
                            work.pending_request = Some(request);
                            return self.commit(work, base_revision).await;
                        }
                        Decision::Skip => {
                            info!(step_id = %step.id, "interrupt skipped by policy");
                            work.step_index = approval_successor(&agent, work.step_index)
                                .ok_or_else(|| {
                                    AppError::Internal(format!(
                                        "agent {}: step {} has no successor",
                                        agent.id, step.id
                                    ))
                                })?;
                            continue;
                        }
                    }
                }
                StepAction::Terminal { result } => {
                    let result = result.clone().unwrap_or_else(|| latest_result(&work));
                    info!(step_id = %step.id, "session completed");
                    work.status = SessionStatus::Completed;
                    work.result = Some(result);
                    return self.commit(work, base_revision).await;
                }
            };

            let kind = effect.kind();
            let result = self
                .execute_effect(&work.session_id, step, effect, cancel, &mut counters, base_revision)
                .await?;
            match result {
                EffectResult::Done(outcome) => {
                    let role = match kind {
                        EffectKind::Model => MessageRole::Assistant,
                        EffectKind::Tool => MessageRole::Tool,
                    };
                    work.context.push(ContextMessage::from_step(
                        role,
                        value_to_content(&outcome.output),
                        &step.id,
                    ));
                    work.step_index = agent.next_index(work.step_index, work.last_message())?;
                }
                EffectResult::Failed(failure) => {
                    warn!(
                        step_id = %step.id,
                        kind = ?failure.kind,
                        error = %failure.message,
                        "step failed"
                    );
                    work.mark_failed(failure);
                    return self.commit(work, base_revision).await;
                }
                EffectResult::LimitReached(reason) => {
                    warn!(step_id = %step.id, %reason, "call limit reached");
                    match self.state.settings.limits.exit_behavior {
                        LimitExit::End => {
                            work.status = SessionStatus::Completed;
                            work.result = Some(latest_result(&work));
                        }
                        LimitExit::Error => {
                            let failure = FailureRecord::new(
                                FailureKind::CallLimit,
                                reason,
                                self.state.clock.now(),
                            )
                            .at_step(&step.id);
                            work.mark_failed(failure);
                        }
                    }
                    return self.commit(work, base_revision).await;
                }
                EffectResult::Cancelled => {
                    info!(step_id = %step.id, "run cancelled");
                    return self.state.store.read_latest(&work.session_id).await;
                }
                EffectResult::Superseded => {
                    info!(
                        step_id = %step.id,
                        base_revision,
                        "session changed by another writer, stopping run"
                    );
                    return self.state.store.read_latest(&work.session_id).await;
                }
            }
        }
    }

    /// Execute one effecting step: replay from the ledger, or invoke with
    /// retries and record the outcome.
    ///
    /// Every fresh attempt first checks that the session is still at
    /// `base_revision`; once another writer has committed, the run stops
    /// without invoking anything.
    async fn execute_effect(
        &self,
        session_id: &str,
        step: &StepDefinition,
        effect: Effect<'_>,
        cancel: &CancellationToken,
        counters: &mut RunCounters,
        base_revision: u64,
    ) -> Result<EffectResult> {
        if let Some(outcome) = self.state.ledger.has_outcome(session_id, &step.id).await? {
            info!(step_id = %step.id, "replaying recorded outcome");
            return Ok(EffectResult::Done(outcome));
        }

        if self.superseded(session_id, base_revision).await? {
            return Ok(EffectResult::Superseded);
        }

        let kind = effect.kind();
        if let Some(reason) = self.limit_reached(session_id, kind, counters).await? {
            return Ok(EffectResult::LimitReached(reason));
        }
        counters.bump(kind);

        let retry = self.state.settings.retry;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            if attempt > 1 && self.superseded(session_id, base_revision).await? {
                return Ok(EffectResult::Superseded);
            }
            let invocation = tokio::select! {
                () = cancel.cancelled() => return Ok(EffectResult::Cancelled),
                result = self.invoke(&effect) => result,
            };

            match invocation {
                Ok(output) => {
                    let outcome = StepOutcome {
                        kind,
                        output,
                        attempts: attempt,
                        recorded_at: self.state.clock.now(),
                    };
                    let stored = self
                        .state
                        .ledger
                        .record_outcome(session_id, &step.id, &outcome)
                        .await?;
                    return Ok(EffectResult::Done(stored));
                }
                Err(InvokeError::Transient(msg)) if retry.allows_retry(attempt) => {
                    let delay = retry.delay_for(attempt);
                    warn!(
                        step_id = %step.id,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %msg,
                        "transient failure, retrying"
                    );
                    tokio::select! {
                        () = cancel.cancelled() => return Ok(EffectResult::Cancelled),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                Err(InvokeError::Transient(msg)) => {
                    let failure = FailureRecord::new(
                        FailureKind::RetriesExhausted,
                        msg,
                        self.state.clock.now(),
                    )
                    .at_step(&step.id)
                    .with_attempts(attempt);
                    return Ok(EffectResult::Failed(failure));
                }
                Err(InvokeError::Permanent(msg)) => {
                    let failure =
                        FailureRecord::new(FailureKind::StepFailed, msg, self.state.clock.now())
                            .at_step(&step.id)
                            .with_attempts(attempt);
                    return Ok(EffectResult::Failed(failure));
                }
            }
        }
    }

    async fn invoke(&self, effect: &Effect<'_>) -> std::result::Result<Value, InvokeError> {
        match effect {
            Effect::Model { prompt, context } => self
                .state
                .model
                .invoke(prompt, context)
                .await
                .map(Value::String),
            Effect::Tool { tool, args } => self.state.tools.invoke(tool, args).await,
        }
    }

    /// Whether the stored session has moved past the revision this run
    /// started from.
    async fn superseded(&self, session_id: &str, base_revision: u64) -> Result<bool> {
        let current = self.state.store.read_latest(session_id).await?;
        Ok(current.revision != base_revision)
    }

    /// Check per-run and per-session ceilings before a fresh invocation.
    async fn limit_reached(
        &self,
        session_id: &str,
        kind: EffectKind,
        counters: &RunCounters,
    ) -> Result<Option<String>> {
        let limits = &self.state.settings.limits;
        let (per_run, per_session) = match kind {
            EffectKind::Model => (limits.model_calls_per_run, limits.model_calls_per_session),
            EffectKind::Tool => (limits.tool_calls_per_run, limits.tool_calls_per_session),
        };

        if let Some(limit) = per_run {
            if counters.get(kind) >= limit {
                return Ok(Some(format!(
                    "{} call limit per run reached ({limit})",
                    kind.as_str()
                )));
            }
        }

        if let Some(limit) = per_session {
            let used = self.state.ledger.count_for_session(session_id, kind).await?;
            if used >= u64::from(limit) {
                return Ok(Some(format!(
                    "{} call limit per session reached ({limit})",
                    kind.as_str()
                )));
            }
        }

        Ok(None)
    }

    fn pending_request(
        &self,
        step: &StepDefinition,
        prompt: Option<&str>,
        schema: Option<&ResponseSchema>,
        ttl_seconds: Option<u64>,
        proposed: Option<ProposedAction>,
    ) -> Result<PendingRequest> {
        let settings = &self.state.settings;
        let ttl = ttl_seconds.map_or(settings.pending_ttl, std::time::Duration::from_secs);
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|err| AppError::Internal(format!("invalid pending ttl: {err}")))?;
        let expires_at = self
            .state
            .clock
            .now()
            .checked_add_signed(ttl)
            .ok_or_else(|| {
                AppError::Internal(format!(
                    "pending ttl of {}s overflows the request deadline",
                    ttl.num_seconds()
                ))
            })?;

        let prompt = match (prompt, proposed.as_ref()) {
            (Some(text), _) => text.to_owned(),
            (None, Some(action)) => format!(
                "{}\n\nTool: {}\nArgs: {}",
                settings.description_prefix, action.tool, action.args
            ),
            (None, None) => format!("{}: step {}", settings.description_prefix, step.id),
        };

        Ok(PendingRequest {
            step_id: step.id.clone(),
            prompt,
            response_schema: schema.cloned().unwrap_or_else(ResponseSchema::approval),
            expires_at,
            proposed_action: proposed,
        })
    }

    async fn commit(&self, work: Checkpoint, base_revision: u64) -> Result<Checkpoint> {
        let now = self.state.clock.now();
        let committed = self.state.store.write(&work, base_revision, now).await?;
        info!(
            revision = committed.revision,
            status = committed.status.as_str(),
            step_index = committed.step_index,
            "checkpoint committed"
        );
        Ok(committed)
    }
}

/// Arguments of a tool call: the static ones, or the latest assistant
/// message as an object (plain text becomes `{"input": text}`).
#[must_use]
pub fn resolve_tool_args(args: Option<&Value>, context: &[ContextMessage]) -> Value {
    if let Some(args) = args {
        return args.clone();
    }
    let Some(message) = context
        .iter()
        .rev()
        .find(|message| message.role == MessageRole::Assistant)
    else {
        return json!({});
    };
    match message.json() {
        Some(value @ Value::Object(_)) => value,
        _ => json!({ "input": message.content }),
    }
}

/// Step taken after the interrupt at `index` when it is approved, or skipped
/// by policy: the sequential or `goto` successor, or the `then` arm of a
/// branch.
fn approval_successor(agent: &AgentDefinition, index: usize) -> Option<usize> {
    let step = agent.steps.get(index)?;
    match &step.next {
        StepNext::Sequential => Some(index + 1),
        StepNext::Goto(target) => agent.index_of(target),
        StepNext::Branch { then, .. } => agent.index_of(then),
    }
}

/// Tool call the interrupt at `index` gates, if its approval successor is
/// one.
fn gated_tool_call(
    agent: &AgentDefinition,
    index: usize,
    context: &[ContextMessage],
) -> Option<ProposedAction> {
    let next = approval_successor(agent, index)?;
    match &agent.steps.get(next)?.action {
        StepAction::ToolCall { tool, args } => Some(ProposedAction {
            tool: tool.clone(),
            args: resolve_tool_args(args.as_ref(), context),
        }),
        _ => None,
    }
}

/// Result of a session that ends without a static result: the latest
/// message, as JSON when it parses.
fn latest_result(checkpoint: &Checkpoint) -> Value {
    checkpoint.last_message().map_or(Value::Null, |message| {
        message
            .json()
            .unwrap_or_else(|| Value::String(message.content.clone()))
    })
}
