//! Built-in interrupt policies.
//!
//! - [`AlwaysPause`] pauses on every interrupt step.
//! - [`ToolRulePolicy`] maps gated tool names (glob patterns) to pause or
//!   skip.
//! - [`RiskScoringPolicy`] scores the gated tool call with regex rules and
//!   pauses at or above a threshold.

use regex::Regex;
use tracing::{info, info_span, warn};

use super::{Decision, InterruptPolicy, PolicyInput};

/// Pauses on every interrupt step.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysPause;

impl InterruptPolicy for AlwaysPause {
    fn name(&self) -> &str {
        "always_pause"
    }

    fn decide(&self, _input: &PolicyInput<'_>) -> Decision {
        Decision::Pause
    }
}

/// Per-tool pause switch keyed by glob pattern.
///
/// The first matching rule wins; tools no rule matches are skipped. An
/// interrupt that gates no tool call always pauses: it is an explicit
/// review point, not a tool gate.
#[derive(Debug, Clone)]
pub struct ToolRulePolicy {
    rules: Vec<(glob::Pattern, bool)>,
}

impl ToolRulePolicy {
    /// Build from `(pattern, pause)` pairs; invalid globs are skipped with a
    /// warning.
    #[must_use]
    pub fn new<I, S>(rules: I) -> Self
    where
        I: IntoIterator<Item = (S, bool)>,
        S: AsRef<str>,
    {
        let rules = rules
            .into_iter()
            .filter_map(|(pattern, pause)| match glob::Pattern::new(pattern.as_ref()) {
                Ok(compiled) => Some((compiled, pause)),
                Err(err) => {
                    warn!(
                        pattern = pattern.as_ref(),
                        %err,
                        "invalid glob pattern in interrupt rules, skipping"
                    );
                    None
                }
            })
            .collect();
        Self { rules }
    }
}

impl InterruptPolicy for ToolRulePolicy {
    fn name(&self) -> &str {
        "tool_rules"
    }

    fn decide(&self, input: &PolicyInput<'_>) -> Decision {
        let Some(action) = input.proposed else {
            return Decision::Pause;
        };

        let pause = self
            .rules
            .iter()
            .find(|(pattern, _)| pattern.matches(&action.tool))
            .is_some_and(|(_, pause)| *pause);

        if pause {
            Decision::Pause
        } else {
            Decision::Skip
        }
    }
}

/// One scoring rule of a [`RiskScoringPolicy`].
#[derive(Debug, Clone)]
pub struct RiskRule {
    /// Matched against `"<tool> <args-json>"`.
    pub pattern: Regex,
    /// Points added when the pattern matches.
    pub score: u32,
}

/// Pauses when the summed score of matching rules reaches the threshold.
#[derive(Debug, Clone)]
pub struct RiskScoringPolicy {
    rules: Vec<RiskRule>,
    threshold: u32,
}

impl RiskScoringPolicy {
    /// Build a policy from rules and a pause threshold.
    #[must_use]
    pub fn new(rules: Vec<RiskRule>, threshold: u32) -> Self {
        Self { rules, threshold }
    }

    /// Score a tool call.
    #[must_use]
    pub fn score(&self, tool: &str, args: &serde_json::Value) -> u32 {
        let subject = format!("{tool} {args}");
        self.rules
            .iter()
            .filter(|rule| rule.pattern.is_match(&subject))
            .fold(0u32, |total, rule| total.saturating_add(rule.score))
    }
}

impl InterruptPolicy for RiskScoringPolicy {
    fn name(&self) -> &str {
        "risk_score"
    }

    fn decide(&self, input: &PolicyInput<'_>) -> Decision {
        let Some(action) = input.proposed else {
            return Decision::Skip;
        };

        let _span = info_span!("risk_score", tool = %action.tool).entered();
        let score = self.score(&action.tool, &action.args);
        if score >= self.threshold {
            info!(score, threshold = self.threshold, "risk at or above threshold, pausing");
            Decision::Pause
        } else {
            Decision::Skip
        }
    }
}
