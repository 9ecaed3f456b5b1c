//! Execution-and-checkpoint engine.
//!
//! [`controller`] drives sessions through their steps, [`gateway`] merges
//! human responses back in, [`expiry`] applies the pending-request TTL and
//! [`service`] exposes the inbound operations. All of them share one
//! [`EngineState`].

pub mod controller;
pub mod expiry;
pub mod gateway;
pub mod invoker;
pub mod process;
pub mod registry;
pub mod retry;
pub mod service;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, SystemClock};
use crate::config::{GlobalConfig, LimitsConfig};
use crate::persistence::checkpoint_repo::CheckpointStore;
use crate::persistence::db::Database;
use crate::persistence::ledger_repo::IdempotencyLedger;
use crate::policy::evaluator::AlwaysPause;
use crate::policy::{loader, InterruptPolicy};
use crate::Result;

use self::invoker::{ModelInvoker, ToolInvoker, UnconfiguredModel};
use self::process::{CommandToolbox, HostCliModel};
use self::registry::AgentRegistry;
use self::retry::RetryPolicy;

/// Tunables the controller and gateway read at runtime.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Backoff for transient step failures.
    pub retry: RetryPolicy,
    /// Default pending-request lifetime.
    pub pending_ttl: Duration,
    /// Model and tool call ceilings.
    pub limits: LimitsConfig,
    /// Prefix of generated approval prompts.
    pub description_prefix: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            pending_ttl: Duration::from_secs(3600),
            limits: LimitsConfig::default(),
            description_prefix: "Tool execution pending approval".into(),
        }
    }
}

impl EngineSettings {
    /// Derive settings from the global configuration.
    #[must_use]
    pub fn from_config(config: &GlobalConfig) -> Self {
        Self {
            retry: RetryPolicy::from_config(&config.retry),
            pending_ttl: config.pending_ttl(),
            limits: config.limits.clone(),
            description_prefix: config.policy.description_prefix.clone(),
        }
    }
}

struct RunEntry {
    token: CancellationToken,
    holders: usize,
}

/// Cancellation tokens of in-flight `advance` calls, keyed by session.
#[derive(Clone, Default)]
pub struct ActiveRuns {
    inner: Arc<Mutex<HashMap<String, RunEntry>>>,
}

impl ActiveRuns {
    /// Register an in-flight run; the token is shared by concurrent runs of
    /// the same session and released when the last guard drops.
    #[must_use]
    pub fn register(&self, session_id: &str) -> RunGuard {
        let mut runs = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = runs
            .entry(session_id.to_owned())
            .or_insert_with(|| RunEntry {
                token: CancellationToken::new(),
                holders: 0,
            });
        entry.holders += 1;
        RunGuard {
            runs: self.clone(),
            session_id: session_id.to_owned(),
            token: entry.token.clone(),
        }
    }

    /// Cancel the in-flight run of a session. Returns whether one existed.
    pub fn cancel(&self, session_id: &str) -> bool {
        let runs = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        runs.get(session_id).is_some_and(|entry| {
            entry.token.cancel();
            true
        })
    }

    /// Whether a run of the session is in flight.
    #[must_use]
    pub fn is_active(&self, session_id: &str) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(session_id)
    }

    fn release(&self, session_id: &str) {
        let mut runs = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = runs.get_mut(session_id) {
            entry.holders = entry.holders.saturating_sub(1);
            if entry.holders == 0 {
                runs.remove(session_id);
            }
        }
    }
}

/// Registration of one in-flight run.
pub struct RunGuard {
    runs: ActiveRuns,
    session_id: String,
    token: CancellationToken,
}

impl RunGuard {
    /// Token cancelled by `abort`.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.runs.release(&self.session_id);
    }
}

/// Shared collaborators of the engine.
///
/// The checkpoint store and the idempotency ledger are the only shared
/// mutable resources; everything else is read-only after construction.
pub struct EngineState {
    /// Checkpoint store.
    pub store: CheckpointStore,
    /// Idempotency ledger.
    pub ledger: IdempotencyLedger,
    /// Agent definitions.
    pub registry: Arc<AgentRegistry>,
    /// Interrupt policy.
    pub policy: Arc<dyn InterruptPolicy>,
    /// Model-invocation capability.
    pub model: Arc<dyn ModelInvoker>,
    /// Tool-invocation capability.
    pub tools: Arc<dyn ToolInvoker>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
    /// Runtime tunables.
    pub settings: EngineSettings,
    /// In-flight runs.
    pub active_runs: ActiveRuns,
}

impl EngineState {
    /// Assemble an engine with the always-pause policy, the system clock and
    /// default settings.
    #[must_use]
    pub fn new(
        db: Arc<Database>,
        registry: AgentRegistry,
        model: Arc<dyn ModelInvoker>,
        tools: Arc<dyn ToolInvoker>,
    ) -> Self {
        Self {
            store: CheckpointStore::new(Arc::clone(&db)),
            ledger: IdempotencyLedger::new(db),
            registry: Arc::new(registry),
            policy: Arc::new(AlwaysPause),
            model,
            tools,
            clock: Arc::new(SystemClock),
            settings: EngineSettings::default(),
            active_runs: ActiveRuns::default(),
        }
    }

    /// Assemble an engine from configuration: agents, policy, process-backed
    /// model and tools.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if an agent definition or policy rule is
    /// invalid.
    pub fn from_config(config: &GlobalConfig, db: Arc<Database>) -> Result<Self> {
        let registry = AgentRegistry::from_definitions(config.agents.iter().cloned())?;
        let model: Arc<dyn ModelInvoker> = match config.model {
            Some(ref model) => Arc::new(HostCliModel::new(
                model,
                Duration::from_secs(config.timeouts.model_seconds),
            )),
            None => Arc::new(UnconfiguredModel),
        };
        let tools = Arc::new(CommandToolbox::new(
            config.tools.clone(),
            Duration::from_secs(config.timeouts.tool_seconds),
        ));

        Ok(Self::new(db, registry, model, tools)
            .with_policy(loader::build_policy(&config.policy)?)
            .with_settings(EngineSettings::from_config(config)))
    }

    /// Replace the interrupt policy.
    #[must_use]
    pub fn with_policy(mut self, policy: Arc<dyn InterruptPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the time source.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the runtime tunables.
    #[must_use]
    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }
}
