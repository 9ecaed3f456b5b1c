//! Model- and tool-invocation capabilities.
//!
//! The controller only talks to these traits. Each invocation either
//! yields an output or an [`InvokeError`] classifying the failure as
//! transient (retried with backoff) or permanent (fails the session).

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

use crate::models::session::ContextMessage;

/// Failure of one model or tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvokeError {
    /// Worth retrying: timeouts, temporary unavailability.
    Transient(String),
    /// Retrying cannot help.
    Permanent(String),
}

impl fmt::Display for InvokeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient(msg) => write!(f, "transient: {msg}"),
            Self::Permanent(msg) => write!(f, "permanent: {msg}"),
        }
    }
}

impl std::error::Error for InvokeError {}

impl InvokeError {
    /// Detail message without the classification prefix.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Transient(msg) | Self::Permanent(msg) => msg,
        }
    }
}

/// Boxed future returned by invokers.
pub type InvokeFuture<'a, T> =
    Pin<Box<dyn Future<Output = std::result::Result<T, InvokeError>> + Send + 'a>>;

/// Produces model output from an instruction and the session context.
pub trait ModelInvoker: Send + Sync {
    /// Invoke the model.
    fn invoke<'a>(&'a self, prompt: &'a str, context: &'a [ContextMessage])
        -> InvokeFuture<'a, String>;
}

/// Executes named tools.
pub trait ToolInvoker: Send + Sync {
    /// Invoke `tool` with JSON arguments.
    fn invoke<'a>(&'a self, tool: &'a str, args: &'a Value) -> InvokeFuture<'a, Value>;
}

/// Model capability used when no model command is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredModel;

impl ModelInvoker for UnconfiguredModel {
    fn invoke<'a>(
        &'a self,
        _prompt: &'a str,
        _context: &'a [ContextMessage],
    ) -> InvokeFuture<'a, String> {
        Box::pin(async { Err(InvokeError::Permanent("no model command configured".into())) })
    }
}
