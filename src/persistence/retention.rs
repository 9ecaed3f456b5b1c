//! Retention service for superseded checkpoints.
//!
//! Runs as a background task. For sessions that completed or failed more
//! than `retention_days` ago it drops every checkpoint revision except the
//! current one, together with the session's idempotency records, which are
//! never consulted again once a session is finished.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::checkpoint_repo::CheckpointStore;
use super::db::Database;
use crate::clock::Clock;
use crate::Result;

const PURGE_INTERVAL: Duration = Duration::from_secs(3600);

/// Spawn the retention purge background task.
///
/// The task runs hourly until `cancel` fires.
#[must_use]
pub fn spawn_retention_task(
    db: Arc<Database>,
    retention_days: u32,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PURGE_INTERVAL);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("retention task shutting down");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(err) = purge(&db, retention_days, clock.as_ref()).await {
                        error!(?err, "retention purge failed");
                    }
                }
            }
        }
    })
}

/// Run one purge pass. Returns the number of sessions pruned.
///
/// # Errors
///
/// Returns `AppError::Db` if any delete fails.
pub async fn purge(db: &Arc<Database>, retention_days: u32, clock: &dyn Clock) -> Result<usize> {
    let cutoff = clock.now() - chrono::Duration::days(i64::from(retention_days));
    let pruned = CheckpointStore::new(Arc::clone(db))
        .prune_finished(cutoff)
        .await?;

    info!(
        retention_days,
        sessions = pruned.len(),
        "retention purge completed"
    );
    Ok(pruned.len())
}
