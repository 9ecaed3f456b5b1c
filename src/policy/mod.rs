//! Interrupt policies: decide, per interrupt step, whether to pause for a
//! human.
//!
//! The controller only sees the [`InterruptPolicy`] trait. Concrete rules
//! live in [`evaluator`]; [`loader`] builds the configured composition.

pub mod evaluator;
pub mod loader;

use std::sync::Arc;

use tracing::debug;

use crate::models::agent::StepDefinition;
use crate::models::pending::ProposedAction;
use crate::models::session::ContextMessage;

/// Outcome of a policy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Stop and wait for a human response.
    Pause,
    /// Continue without pausing.
    Skip,
}

/// Everything a policy may inspect.
#[derive(Debug, Clone, Copy)]
pub struct PolicyInput<'a> {
    /// Session being evaluated.
    pub session_id: &'a str,
    /// The interrupt step.
    pub step: &'a StepDefinition,
    /// Tool call the interrupt gates, if the next step is one.
    pub proposed: Option<&'a ProposedAction>,
    /// Session context so far.
    pub context: &'a [ContextMessage],
}

/// Pluggable pause decision.
pub trait InterruptPolicy: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Decide whether the interrupt step pauses.
    fn decide(&self, input: &PolicyInput<'_>) -> Decision;
}

/// Composition: pauses if any constituent pauses.
///
/// An empty composition never pauses.
pub struct AnyOf {
    policies: Vec<Arc<dyn InterruptPolicy>>,
}

impl AnyOf {
    /// Compose the given policies.
    #[must_use]
    pub fn new(policies: Vec<Arc<dyn InterruptPolicy>>) -> Self {
        Self { policies }
    }
}

impl InterruptPolicy for AnyOf {
    fn name(&self) -> &str {
        "any_of"
    }

    fn decide(&self, input: &PolicyInput<'_>) -> Decision {
        for policy in &self.policies {
            if policy.decide(input) == Decision::Pause {
                debug!(
                    session_id = input.session_id,
                    step_id = %input.step.id,
                    policy = policy.name(),
                    "policy requested pause"
                );
                return Decision::Pause;
            }
        }
        Decision::Skip
    }
}
