#![forbid(unsafe_code)]

//! `agent-waypoint`: checkpointed execution engine for human-in-the-loop
//! agents.
//!
//! Every subcommand loads the configuration, opens the `SQLite` store and
//! builds the engine. One-shot subcommands print the resulting session
//! view as JSON on stdout; `serve` recovers interrupted sessions and runs
//! the expiry sweep and retention purge until a shutdown signal.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use agent_waypoint::config::GlobalConfig;
use agent_waypoint::engine::service::SessionService;
use agent_waypoint::engine::{expiry, EngineState};
use agent_waypoint::persistence::{db, retention};
use agent_waypoint::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-waypoint", about = "Checkpointed human-in-the-loop agent engine", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start a session and run it until it pauses or finishes.
    Start {
        /// Agent identifier.
        agent: String,
        /// Initial input as JSON; bare text is taken as a string.
        input: String,
    },
    /// Show the current state of a session.
    Status {
        /// Session identifier.
        session: String,
    },
    /// Answer a pending request and continue the session.
    Resume {
        /// Session identifier.
        session: String,
        /// Revision shown by `status`.
        #[arg(long)]
        revision: u64,
        /// Response as JSON; bare text is taken as a string.
        response: String,
    },
    /// Abort a session.
    Abort {
        /// Session identifier.
        session: String,
    },
    /// Drive a running session forward.
    Advance {
        /// Session identifier.
        session: String,
    },
    /// List every committed revision of a session.
    History {
        /// Session identifier.
        session: String,
    },
    /// Expire lapsed pending requests once.
    Sweep,
    /// Recover running sessions and run background tasks until shutdown.
    Serve,
}

fn main() -> ExitCode {
    let args = Cli::parse();
    if let Err(err) = init_tracing(args.log_format) {
        eprintln!("{err}");
        return ExitCode::FAILURE;
    }

    let outcome = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))
        .and_then(|runtime| runtime.block_on(run(args)));

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(code = %err.code(), %err, "command failed");
            eprintln!("{}: {err}", err.code());
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let config = GlobalConfig::load_from_path(&args.config)?;
    info!(agents = config.agents.len(), "configuration loaded");

    // ── Initialize database ─────────────────────────────
    let db = Arc::new(db::connect(&config.db_path()).await?);
    info!("database connected");

    // ── Build engine ────────────────────────────────────
    let state = Arc::new(EngineState::from_config(&config, Arc::clone(&db))?);
    let service = SessionService::new(Arc::clone(&state));

    match args.command {
        Command::Start { agent, input } => {
            print_json(&service.start_session(&agent, parse_payload(&input)).await?)
        }
        Command::Status { session } => print_json(&service.get_status(&session).await?),
        Command::Resume {
            session,
            revision,
            response,
        } => print_json(
            &service
                .resume(&session, revision, parse_payload(&response))
                .await?,
        ),
        Command::Abort { session } => print_json(&service.abort(&session).await?),
        Command::Advance { session } => print_json(&service.advance(&session).await?),
        Command::History { session } => print_json(&service.history(&session).await?),
        Command::Sweep => {
            let expired = expiry::sweep_once(&state).await?;
            print_json(&serde_json::json!({ "expired": expired }))
        }
        Command::Serve => serve(&config, &service, db).await,
    }
}

async fn serve(config: &GlobalConfig, service: &SessionService, db: Arc<db::Database>) -> Result<()> {
    let state = Arc::clone(service.state());

    // ── Resume sessions interrupted by a prior exit ─────
    let recovered = service.recover_running().await?;
    info!(sessions = recovered.len(), "startup recovery complete");

    // ── Start background tasks ──────────────────────────
    let ct = CancellationToken::new();
    let mut handles = Vec::new();

    if config.sweep.enabled {
        handles.push(expiry::spawn_expiry_sweep(
            Arc::clone(&state),
            Duration::from_secs(config.sweep.interval_seconds),
            ct.clone(),
        ));
        info!(interval_secs = config.sweep.interval_seconds, "expiry sweep started");
    }

    if config.retention.enabled {
        handles.push(retention::spawn_retention_task(
            db,
            config.retention.days,
            Arc::clone(&state.clock),
            ct.clone(),
        ));
        info!(days = config.retention.days, "retention service started");
    }

    info!("agent-waypoint ready");

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    for handle in handles {
        if let Err(err) = handle.await {
            error!(%err, "background task panicked");
        }
    }
    info!("agent-waypoint shut down");
    Ok(())
}

/// Parse a command-line payload as JSON, falling back to a JSON string.
fn parse_payload(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|err| AppError::Internal(format!("failed to render output: {err}")))?;
    println!("{rendered}");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // Stdout carries command output.
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
