//! Static agent definitions: the step graph a session walks.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::pending::{ResponseSchema, MAX_PENDING_TTL_SECONDS};
use super::session::ContextMessage;
use crate::{AppError, Result};

/// Closed set of step kinds with their parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepAction {
    /// Invoke the model with an instruction and the session context.
    LlmCall {
        /// Instruction passed alongside the context.
        prompt: String,
    },
    /// Invoke a named tool.
    ToolCall {
        /// Tool name resolved by the tool invoker.
        tool: String,
        /// Static arguments; when absent the latest assistant message is
        /// used as the argument object.
        #[serde(default)]
        args: Option<Value>,
    },
    /// Ask the interrupt policy whether to pause for a human.
    Interrupt {
        /// Prompt shown to the approver; derived from the gated tool call
        /// when absent.
        #[serde(default)]
        prompt: Option<String>,
        /// Expected response shape; defaults to the approval schema.
        #[serde(default)]
        response_schema: Option<ResponseSchema>,
        /// Override of the configured pending-request TTL.
        #[serde(default)]
        ttl_seconds: Option<u64>,
    },
    /// Finish the session.
    Terminal {
        /// Static result; defaults to the latest message content.
        #[serde(default)]
        result: Option<Value>,
    },
}

impl StepAction {
    /// Short name of the step kind, used in logs.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::LlmCall { .. } => "llm_call",
            Self::ToolCall { .. } => "tool_call",
            Self::Interrupt { .. } => "interrupt",
            Self::Terminal { .. } => "terminal",
        }
    }
}

/// Successor rule of a step.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum StepNext {
    /// Continue with the following step.
    #[default]
    Sequential,
    /// Jump forward to the named step.
    Goto(String),
    /// Choose between two later steps by a field of the latest message.
    Branch {
        /// Top-level key looked up in the latest message parsed as JSON.
        field: String,
        /// Value that selects `then`.
        equals: Value,
        /// Step taken on a match.
        then: String,
        /// Step taken otherwise, including when the field is absent.
        otherwise: String,
    },
}

/// One step of an agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepDefinition {
    /// Identifier, unique within the agent and stable across releases.
    pub id: String,
    /// Step kind and parameters.
    #[serde(flatten)]
    pub action: StepAction,
    /// Successor rule.
    #[serde(default)]
    pub next: StepNext,
}

impl StepDefinition {
    /// Construct a step with sequential succession.
    #[must_use]
    pub fn new(id: &str, action: StepAction) -> Self {
        Self {
            id: id.to_owned(),
            action,
            next: StepNext::Sequential,
        }
    }

    /// Replace the successor rule.
    #[must_use]
    pub fn with_next(mut self, next: StepNext) -> Self {
        self.next = next;
        self
    }
}

/// Agent definition: read-only for the life of the process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentDefinition {
    /// Agent identifier used by `start_session`.
    pub id: String,
    /// Optional system message placed first in every session context.
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Guard applied to `initial_input` before a session is created.
    #[serde(default)]
    pub input_schema: Option<ResponseSchema>,
    /// Ordered steps; execution starts at index 0.
    pub steps: Vec<StepDefinition>,
}

impl AgentDefinition {
    /// Construct an agent from its steps.
    #[must_use]
    pub fn new(id: &str, steps: Vec<StepDefinition>) -> Self {
        Self {
            id: id.to_owned(),
            system_prompt: None,
            input_schema: None,
            steps,
        }
    }

    /// Position of the step with the given id.
    #[must_use]
    pub fn index_of(&self, step_id: &str) -> Option<usize> {
        self.steps.iter().position(|step| step.id == step_id)
    }

    /// Check the step graph.
    ///
    /// Step ids must be unique, every jump must land strictly later in the
    /// sequence (step indices never decrease), and no path may run past the
    /// last step without reaching a terminal. Interrupt TTLs must lie in
    /// `1..=MAX_PENDING_TTL_SECONDS`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` describing the first defect found.
    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(AppError::Config(format!("agent {} has no steps", self.id)));
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.id.as_str()) {
                return Err(AppError::Config(format!(
                    "agent {} declares step {} twice",
                    self.id, step.id
                )));
            }
            if let StepAction::Interrupt {
                ttl_seconds: Some(ttl),
                ..
            } = step.action
            {
                if ttl == 0 || ttl > MAX_PENDING_TTL_SECONDS {
                    return Err(AppError::Config(format!(
                        "agent {}: step {} ttl_seconds must be between 1 and {MAX_PENDING_TTL_SECONDS}",
                        self.id, step.id
                    )));
                }
            }
        }

        for (idx, step) in self.steps.iter().enumerate() {
            if matches!(step.action, StepAction::Terminal { .. }) {
                continue;
            }
            match &step.next {
                StepNext::Sequential => {
                    if idx + 1 >= self.steps.len() {
                        return Err(AppError::Config(format!(
                            "agent {}: step {} falls off the end without a terminal",
                            self.id, step.id
                        )));
                    }
                }
                StepNext::Goto(target) => self.check_forward(idx, &step.id, target)?,
                StepNext::Branch {
                    then, otherwise, ..
                } => {
                    self.check_forward(idx, &step.id, then)?;
                    self.check_forward(idx, &step.id, otherwise)?;
                }
            }
        }

        Ok(())
    }

    fn check_forward(&self, from: usize, step_id: &str, target: &str) -> Result<()> {
        match self.index_of(target) {
            Some(to) if to > from => Ok(()),
            Some(_) => Err(AppError::Config(format!(
                "agent {}: step {step_id} jumps backwards to {target}",
                self.id
            ))),
            None => Err(AppError::Config(format!(
                "agent {}: step {step_id} targets unknown step {target}",
                self.id
            ))),
        }
    }

    /// Resolve the index that follows `index`, given the latest message.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Internal` if the step or its target is missing,
    /// which `validate` rules out for registered agents.
    pub fn next_index(&self, index: usize, last: Option<&ContextMessage>) -> Result<usize> {
        let step = self.steps.get(index).ok_or_else(|| {
            AppError::Internal(format!("agent {} has no step at index {index}", self.id))
        })?;

        let target = match &step.next {
            StepNext::Sequential => return Ok(index + 1),
            StepNext::Goto(target) => target,
            StepNext::Branch {
                field,
                equals,
                then,
                otherwise,
            } => {
                let matched = last
                    .and_then(ContextMessage::json)
                    .and_then(|value| value.get(field).cloned())
                    .is_some_and(|value| &value == equals);
                if matched {
                    then
                } else {
                    otherwise
                }
            }
        };

        self.index_of(target).ok_or_else(|| {
            AppError::Internal(format!("agent {} has no step {target}", self.id))
        })
    }
}
