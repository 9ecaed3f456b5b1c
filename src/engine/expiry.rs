//! Pending-request expiry.
//!
//! One rule, [`PendingRequest::is_expired`], evaluated against the engine
//! clock, serves both the lazy path (status reads, `advance`, `resume`) and
//! the periodic sweep, so they never disagree.
//!
//! [`PendingRequest::is_expired`]: crate::models::pending::PendingRequest::is_expired

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::EngineState;
use crate::models::checkpoint::Checkpoint;
use crate::models::session::{FailureKind, FailureRecord, SessionStatus};
use crate::{AppError, Result};

/// Fail a waiting session whose pending request has lapsed.
///
/// Any other checkpoint is returned unchanged. If another writer got there
/// first, the current checkpoint is re-read and returned.
///
/// # Errors
///
/// Returns `AppError::Db` on storage failure.
pub async fn expire_if_due(state: &EngineState, checkpoint: Checkpoint) -> Result<Checkpoint> {
    let now = state.clock.now();
    let Some(pending) = checkpoint
        .pending_request
        .as_ref()
        .filter(|pending| checkpoint.status == SessionStatus::WaitingForHuman && pending.is_expired(now))
    else {
        return Ok(checkpoint);
    };

    let failure = FailureRecord::new(
        FailureKind::Expired,
        format!("pending request expired at {}", pending.expires_at),
        now,
    )
    .at_step(&pending.step_id);

    let base_revision = checkpoint.revision;
    let mut expired = checkpoint;
    expired.mark_failed(failure);

    match state.store.write(&expired, base_revision, now).await {
        Ok(written) => {
            warn!(
                session_id = %written.session_id,
                revision = written.revision,
                "pending request expired"
            );
            Ok(written)
        }
        Err(AppError::Conflict(_)) => state.store.read_latest(&expired.session_id).await,
        Err(err) => Err(err),
    }
}

/// Expire every lapsed pending request. Returns the number of sessions
/// failed by this pass.
///
/// # Errors
///
/// Returns `AppError::Db` if the waiting sessions cannot be listed.
pub async fn sweep_once(state: &EngineState) -> Result<usize> {
    let waiting = state.store.list_by_status(SessionStatus::WaitingForHuman).await?;
    let mut expired = 0usize;
    for checkpoint in waiting {
        let session_id = checkpoint.session_id.clone();
        match expire_if_due(state, checkpoint).await {
            Ok(current) if current.status == SessionStatus::Failed => expired += 1,
            Ok(_) => {}
            Err(err) => error!(session_id, %err, "failed to expire session"),
        }
    }
    if expired > 0 {
        info!(expired, "expiry sweep completed");
    }
    Ok(expired)
}

/// Spawn the periodic expiry sweep. Runs until `cancel` fires.
#[must_use]
pub fn spawn_expiry_sweep(
    state: Arc<EngineState>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("expiry sweep shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(err) = sweep_once(&state).await {
                        error!(?err, "expiry sweep failed");
                    }
                }
            }
        }
    })
}
