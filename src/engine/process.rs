//! Process-backed invokers.
//!
//! The model and each tool are external commands. The payload is written as
//! JSON to the child's stdin and the answer read from stdout. Children are
//! spawned with `kill_on_drop(true)`, so a cancelled step also stops its
//! process.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use super::invoker::{InvokeError, InvokeFuture, ModelInvoker, ToolInvoker};
use crate::config::{ModelConfig, ToolCommandConfig};
use crate::models::session::ContextMessage;

/// `EX_TEMPFAIL`: the command asks to be retried.
const EXIT_TEMPFAIL: i32 = 75;

/// Model invoker backed by a host CLI command.
#[derive(Debug, Clone)]
pub struct HostCliModel {
    command: String,
    args: Vec<String>,
    timeout: Duration,
}

impl HostCliModel {
    /// Wrap the configured command.
    #[must_use]
    pub fn new(config: &ModelConfig, timeout: Duration) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
            timeout,
        }
    }
}

impl ModelInvoker for HostCliModel {
    fn invoke<'a>(
        &'a self,
        prompt: &'a str,
        context: &'a [ContextMessage],
    ) -> InvokeFuture<'a, String> {
        Box::pin(async move {
            let payload = json!({ "prompt": prompt, "context": context });
            let stdout = run_command(&self.command, &self.args, &payload, self.timeout).await?;
            Ok(stdout.trim().to_owned())
        })
    }
}

/// Tool invoker dispatching tool names to configured commands.
#[derive(Debug, Clone, Default)]
pub struct CommandToolbox {
    tools: HashMap<String, ToolCommandConfig>,
    default_timeout: Duration,
}

impl CommandToolbox {
    /// Build from the `[tools]` table.
    #[must_use]
    pub fn new(tools: HashMap<String, ToolCommandConfig>, default_timeout: Duration) -> Self {
        Self {
            tools,
            default_timeout,
        }
    }
}

impl ToolInvoker for CommandToolbox {
    fn invoke<'a>(&'a self, tool: &'a str, args: &'a Value) -> InvokeFuture<'a, Value> {
        Box::pin(async move {
            let Some(config) = self.tools.get(tool) else {
                return Err(InvokeError::Permanent(format!("unknown tool {tool}")));
            };
            let timeout = config
                .timeout_seconds
                .map_or(self.default_timeout, Duration::from_secs);
            let stdout = run_command(&config.command, &config.args, args, timeout).await?;
            let trimmed = stdout.trim();
            Ok(serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_owned())))
        })
    }
}

/// Run `program` with `payload` on stdin and return its stdout.
///
/// Timeouts, I/O failures while talking to the child and exit status 75
/// are transient; spawn failures and other non-zero exits are permanent.
async fn run_command(
    program: &str,
    args: &[String],
    payload: &Value,
    timeout: Duration,
) -> std::result::Result<String, InvokeError> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|err| InvokeError::Permanent(format!("failed to spawn {program}: {err}")))?;
    debug!(program, pid = child.id().unwrap_or(0), "command spawned");

    let stdin = child.stdin.take();
    let input = payload.to_string();
    let feed = async move {
        let Some(mut stdin) = stdin else {
            return Ok(());
        };
        match stdin.write_all(input.as_bytes()).await {
            // The child may exit without reading its input.
            Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => {
                debug!(program, "command closed stdin early");
                Ok(())
            }
            // Dropping stdin at the end of this block closes the pipe.
            other => other,
        }
    };

    // Feed stdin and collect output under a single deadline.
    let exchange = async { tokio::join!(feed, child.wait_with_output()) };
    let (written, output) = match tokio::time::timeout(timeout, exchange).await {
        Ok(pair) => pair,
        Err(_) => {
            warn!(program, timeout_secs = timeout.as_secs(), "command timed out");
            return Err(InvokeError::Transient(format!(
                "{program} timed out after {}s",
                timeout.as_secs()
            )));
        }
    };
    written.map_err(|err| InvokeError::Transient(format!("failed to write to {program}: {err}")))?;
    let output = output
        .map_err(|err| InvokeError::Transient(format!("failed to read from {program}: {err}")))?;

    if output.status.success() {
        return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
    }

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
    let detail = format!("{program} exited with {}: {stderr}", output.status);
    if output.status.code() == Some(EXIT_TEMPFAIL) {
        Err(InvokeError::Transient(detail))
    } else {
        Err(InvokeError::Permanent(detail))
    }
}
