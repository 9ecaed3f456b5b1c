//! Global configuration parsing and validation.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::models::agent::AgentDefinition;
use crate::models::pending::MAX_PENDING_TTL_SECONDS;
use crate::{AppError, Result};

/// Timeouts (seconds) for waiting and effecting operations.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Default lifetime of a pending human request.
    #[serde(default = "default_pending_request_seconds")]
    pub pending_request_seconds: u64,
    /// Ceiling for one model invocation; exceeding it is a transient failure.
    #[serde(default = "default_model_seconds")]
    pub model_seconds: u64,
    /// Ceiling for one tool invocation; exceeding it is a transient failure.
    #[serde(default = "default_tool_seconds")]
    pub tool_seconds: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            pending_request_seconds: default_pending_request_seconds(),
            model_seconds: default_model_seconds(),
            tool_seconds: default_tool_seconds(),
        }
    }
}

fn default_pending_request_seconds() -> u64 {
    3600
}

fn default_model_seconds() -> u64 {
    120
}

fn default_tool_seconds() -> u64 {
    60
}

/// Bounded exponential backoff for transient step failures.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Total attempts per effecting step, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the second attempt.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Cap on the doubling delay.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    250
}

fn default_max_backoff_ms() -> u64 {
    5000
}

/// What happens when a call limit is reached.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LimitExit {
    /// Complete the session with the latest message as result.
    End,
    /// Fail the session with `CALL_LIMIT`.
    #[default]
    Error,
}

/// Model and tool call ceilings. Unset means unlimited.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub struct LimitsConfig {
    /// Fresh model calls per `advance` invocation.
    #[serde(default)]
    pub model_calls_per_run: Option<u32>,
    /// Recorded model calls over the whole session.
    #[serde(default)]
    pub model_calls_per_session: Option<u32>,
    /// Fresh tool calls per `advance` invocation.
    #[serde(default)]
    pub tool_calls_per_run: Option<u32>,
    /// Recorded tool calls over the whole session.
    #[serde(default)]
    pub tool_calls_per_session: Option<u32>,
    /// Behaviour once a ceiling is hit.
    #[serde(default)]
    pub exit_behavior: LimitExit,
}

/// Background expiry sweep.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SweepConfig {
    /// Whether `serve` runs the sweep.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds between sweeps.
    #[serde(default = "default_sweep_interval")]
    pub interval_seconds: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: default_sweep_interval(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_sweep_interval() -> u64 {
    30
}

/// Pruning of superseded checkpoints.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RetentionConfig {
    /// Whether `serve` runs the retention task.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Days after a session finishes before its history is pruned.
    #[serde(default = "default_retention_days")]
    pub days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            days: default_retention_days(),
        }
    }
}

fn default_retention_days() -> u32 {
    30
}

/// External command used as the model-invocation capability.
///
/// The command receives `{"prompt": …, "context": […]}` as JSON on stdin
/// and answers on stdout.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ModelConfig {
    /// Program to execute.
    pub command: String,
    /// Arguments passed before stdin is written.
    #[serde(default)]
    pub args: Vec<String>,
}

/// External command bound to a tool name.
///
/// The command receives the tool arguments as JSON on stdin and answers on
/// stdout (JSON, or plain text).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ToolCommandConfig {
    /// Program to execute.
    pub command: String,
    /// Fixed arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Override of `timeouts.tool_seconds`.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

/// One tool pause rule; rules are evaluated in file order.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ToolRuleConfig {
    /// Glob matched against the gated tool name.
    pub pattern: String,
    /// Whether a match pauses.
    pub pause: bool,
}

/// One regex scoring rule.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RiskRuleConfig {
    /// Regular expression matched against `"<tool> <args-json>"`.
    pub pattern: String,
    /// Points added on a match.
    pub score: u32,
}

/// Risk-scoring policy settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RiskConfig {
    /// Score at or above which the interrupt pauses.
    pub threshold: u32,
    /// Scoring rules.
    #[serde(default)]
    pub rules: Vec<RiskRuleConfig>,
}

/// Interrupt policy composition.
///
/// With nothing configured, every interrupt step pauses.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PolicyConfig {
    /// Pause on every interrupt regardless of other rules.
    #[serde(default)]
    pub always_pause: bool,
    /// Ordered tool rules; the first matching pattern decides.
    #[serde(default)]
    pub interrupt_on: Vec<ToolRuleConfig>,
    /// Risk scoring; pauses when the score reaches the threshold.
    #[serde(default)]
    pub risk: Option<RiskConfig>,
    /// Prefix of generated approval prompts.
    #[serde(default = "default_description_prefix")]
    pub description_prefix: String,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            always_pause: false,
            interrupt_on: Vec::new(),
            risk: None,
            description_prefix: default_description_prefix(),
        }
    }
}

fn default_description_prefix() -> String {
    "Tool execution pending approval".into()
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// `SQLite` database file.
    pub db_path: PathBuf,
    /// Timeout configuration.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Transient-failure retry settings.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Model and tool call ceilings.
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Expiry sweep settings.
    #[serde(default)]
    pub sweep: SweepConfig,
    /// History retention settings.
    #[serde(default)]
    pub retention: RetentionConfig,
    /// Model-invocation command, if any.
    #[serde(default)]
    pub model: Option<ModelConfig>,
    /// Tool name → command.
    #[serde(default)]
    pub tools: HashMap<String, ToolCommandConfig>,
    /// Interrupt policy composition.
    #[serde(default)]
    pub policy: PolicyConfig,
    /// Agent definitions loaded into the registry at startup.
    #[serde(default)]
    pub agents: Vec<AgentDefinition>,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Database path as a string for the connection options.
    #[must_use]
    pub fn db_path(&self) -> String {
        self.db_path.to_string_lossy().into_owned()
    }

    /// Default lifetime of a pending request.
    #[must_use]
    pub fn pending_ttl(&self) -> Duration {
        Duration::from_secs(self.timeouts.pending_request_seconds)
    }

    fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(AppError::Config(
                "retry.max_attempts must be greater than zero".into(),
            ));
        }

        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(AppError::Config(
                "retry.initial_backoff_ms must not exceed retry.max_backoff_ms".into(),
            ));
        }

        if self.timeouts.pending_request_seconds == 0
            || self.timeouts.pending_request_seconds > MAX_PENDING_TTL_SECONDS
        {
            return Err(AppError::Config(format!(
                "timeouts.pending_request_seconds must be between 1 and {MAX_PENDING_TTL_SECONDS}"
            )));
        }

        if self.sweep.interval_seconds == 0 {
            return Err(AppError::Config(
                "sweep.interval_seconds must be greater than zero".into(),
            ));
        }

        if let Some(ref risk) = self.policy.risk {
            if risk.threshold == 0 {
                return Err(AppError::Config(
                    "policy.risk.threshold must be greater than zero".into(),
                ));
            }
        }

        Ok(())
    }
}
