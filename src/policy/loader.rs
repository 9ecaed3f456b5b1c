//! Build the configured interrupt policy.

use std::sync::Arc;

use regex::Regex;
use tracing::info;

use super::evaluator::{AlwaysPause, RiskRule, RiskScoringPolicy, ToolRulePolicy};
use super::{AnyOf, InterruptPolicy};
use crate::config::PolicyConfig;
use crate::{AppError, Result};

/// Compose the policy described by `config`.
///
/// `always_pause`, or an empty configuration, yields [`AlwaysPause`].
/// Otherwise the tool rules and the risk policy (whichever are present)
/// are combined with [`AnyOf`].
///
/// # Errors
///
/// Returns `AppError::Config` if a risk rule pattern is not a valid regex.
pub fn build_policy(config: &PolicyConfig) -> Result<Arc<dyn InterruptPolicy>> {
    if config.always_pause || (config.interrupt_on.is_empty() && config.risk.is_none()) {
        info!("interrupt policy: always pause");
        return Ok(Arc::new(AlwaysPause));
    }

    let mut policies: Vec<Arc<dyn InterruptPolicy>> = Vec::new();

    if !config.interrupt_on.is_empty() {
        policies.push(Arc::new(ToolRulePolicy::new(
            config
                .interrupt_on
                .iter()
                .map(|rule| (rule.pattern.as_str(), rule.pause)),
        )));
    }

    if let Some(ref risk) = config.risk {
        let rules = risk
            .rules
            .iter()
            .map(|rule| {
                Regex::new(&rule.pattern)
                    .map(|pattern| RiskRule {
                        pattern,
                        score: rule.score,
                    })
                    .map_err(|err| {
                        AppError::Config(format!("invalid risk pattern {}: {err}", rule.pattern))
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        policies.push(Arc::new(RiskScoringPolicy::new(rules, risk.threshold)));
    }

    info!(policies = policies.len(), "interrupt policy: any of");
    Ok(Arc::new(AnyOf::new(policies)))
}
