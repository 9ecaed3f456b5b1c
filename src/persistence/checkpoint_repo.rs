//! Checkpoint store backed by `SQLite`.
//!
//! The `sessions` table holds the current checkpoint of each session and
//! its revision; `checkpoints` keeps every committed revision. A write is a
//! single transaction: a revision-guarded update of the `sessions` row plus
//! the history insert. Either both land or neither does.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::models::checkpoint::Checkpoint;
use crate::models::session::SessionStatus;
use crate::{AppError, Result};

use super::db::Database;
use super::ledger_repo;
use super::{from_db_int, to_db_int};

/// Durable keyed storage for session checkpoints.
#[derive(Clone)]
pub struct CheckpointStore {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct CheckpointRow {
    id: String,
    agent_id: String,
    revision: i64,
    step_index: i64,
    status: String,
    context: String,
    pending_request: Option<String>,
    result: Option<String>,
    error: Option<String>,
    created_at: String,
    updated_at: String,
}

impl CheckpointRow {
    /// Convert a database row into the domain model.
    fn into_checkpoint(self) -> Result<Checkpoint> {
        let status = SessionStatus::parse(&self.status)
            .ok_or_else(|| AppError::Db(format!("invalid session status: {}", self.status)))?;

        Ok(Checkpoint {
            session_id: self.id,
            agent_id: self.agent_id,
            revision: from_db_int(self.revision, "revision")?,
            step_index: usize::try_from(self.step_index)
                .map_err(|_| AppError::Db(format!("invalid step_index: {}", self.step_index)))?,
            status,
            context: decode(&self.context, "context")?,
            pending_request: decode_opt(self.pending_request.as_deref(), "pending_request")?,
            result: decode_opt(self.result.as_deref(), "result")?,
            error: decode_opt(self.error.as_deref(), "error")?,
            created_at: parse_timestamp(&self.created_at, "created_at")?,
            updated_at: parse_timestamp(&self.updated_at, "updated_at")?,
        })
    }
}

/// Serialized column values shared by the session and history tables.
struct Encoded {
    revision: i64,
    step_index: i64,
    context: String,
    pending_request: Option<String>,
    result: Option<String>,
    error: Option<String>,
    created_at: String,
    updated_at: String,
}

impl Encoded {
    fn from_checkpoint(checkpoint: &Checkpoint) -> Result<Self> {
        Ok(Self {
            revision: to_db_int(checkpoint.revision, "revision")?,
            step_index: i64::try_from(checkpoint.step_index).map_err(|_| {
                AppError::Db(format!("step_index out of range: {}", checkpoint.step_index))
            })?,
            context: serde_json::to_string(&checkpoint.context)?,
            pending_request: encode_opt(checkpoint.pending_request.as_ref())?,
            result: encode_opt(checkpoint.result.as_ref())?,
            error: encode_opt(checkpoint.error.as_ref())?,
            created_at: checkpoint.created_at.to_rfc3339(),
            updated_at: checkpoint.updated_at.to_rfc3339(),
        })
    }
}

fn decode<T: DeserializeOwned>(raw: &str, column: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| AppError::Db(format!("invalid {column}: {e}")))
}

fn decode_opt<T: DeserializeOwned>(raw: Option<&str>, column: &str) -> Result<Option<T>> {
    raw.map(|s| decode(s, column)).transpose()
}

fn encode_opt<T: Serialize>(value: Option<&T>) -> Result<Option<String>> {
    value
        .map(|v| serde_json::to_string(v).map_err(AppError::from))
        .transpose()
}

fn parse_timestamp(raw: &str, column: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AppError::Db(format!("invalid {column}: {e}")))
}

impl CheckpointStore {
    /// Create a new store instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Persist the initial checkpoint (revision 0) of a new session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Conflict` if the session already exists, or
    /// `AppError::Db` if the insert fails.
    pub async fn create(&self, checkpoint: &Checkpoint) -> Result<Checkpoint> {
        checkpoint.validate()?;
        if checkpoint.revision != 0 {
            return Err(AppError::Internal(format!(
                "new session {} must start at revision 0",
                checkpoint.session_id
            )));
        }
        let row = Encoded::from_checkpoint(checkpoint)?;

        let mut tx = self.db.begin().await?;
        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO sessions (id, agent_id, revision, step_index, status, context,
             pending_request, result, error, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )
        .bind(&checkpoint.session_id)
        .bind(&checkpoint.agent_id)
        .bind(row.revision)
        .bind(row.step_index)
        .bind(checkpoint.status.as_str())
        .bind(&row.context)
        .bind(&row.pending_request)
        .bind(&row.result)
        .bind(&row.error)
        .bind(&row.created_at)
        .bind(&row.updated_at)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(AppError::Conflict(format!(
                "session {} already exists",
                checkpoint.session_id
            )));
        }

        insert_history(&mut tx, checkpoint, &row).await?;
        tx.commit().await?;

        info!(
            session_id = %checkpoint.session_id,
            agent_id = %checkpoint.agent_id,
            "session created"
        );
        Ok(checkpoint.clone())
    }

    /// Commit `checkpoint` as the successor of `expected_prior_revision`.
    ///
    /// The stored checkpoint gets revision `expected_prior_revision + 1` and
    /// `updated_at = now`; the committed copy is returned.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Conflict` if the current revision differs (no
    /// mutation is performed), `AppError::NotFound` if the session does not
    /// exist, `AppError::Internal` if the checkpoint is inconsistent, or
    /// `AppError::Db` on storage failure.
    pub async fn write(
        &self,
        checkpoint: &Checkpoint,
        expected_prior_revision: u64,
        now: DateTime<Utc>,
    ) -> Result<Checkpoint> {
        checkpoint.validate()?;

        let mut next = checkpoint.clone();
        next.revision = expected_prior_revision
            .checked_add(1)
            .ok_or_else(|| AppError::Internal("revision overflow".into()))?;
        next.updated_at = now;
        let row = Encoded::from_checkpoint(&next)?;
        let expected = to_db_int(expected_prior_revision, "revision")?;

        let mut tx = self.db.begin().await?;
        let updated = sqlx::query(
            "UPDATE sessions SET revision = ?1, step_index = ?2, status = ?3, context = ?4,
             pending_request = ?5, result = ?6, error = ?7, updated_at = ?8
             WHERE id = ?9 AND revision = ?10",
        )
        .bind(row.revision)
        .bind(row.step_index)
        .bind(next.status.as_str())
        .bind(&row.context)
        .bind(&row.pending_request)
        .bind(&row.result)
        .bind(&row.error)
        .bind(&row.updated_at)
        .bind(&next.session_id)
        .bind(expected)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            let current: Option<i64> =
                sqlx::query_scalar("SELECT revision FROM sessions WHERE id = ?1")
                    .bind(&next.session_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            tx.rollback().await?;
            return Err(match current {
                Some(found) => AppError::Conflict(format!(
                    "session {} is at revision {found}, expected {expected_prior_revision}",
                    next.session_id
                )),
                None => AppError::NotFound(format!("session {} not found", next.session_id)),
            });
        }

        insert_history(&mut tx, &next, &row).await?;
        tx.commit().await?;

        debug!(
            session_id = %next.session_id,
            revision = next.revision,
            status = next.status.as_str(),
            step_index = next.step_index,
            "checkpoint written"
        );
        Ok(next)
    }

    /// Read the current checkpoint of a session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session does not exist.
    pub async fn read_latest(&self, session_id: &str) -> Result<Checkpoint> {
        let row: Option<CheckpointRow> = sqlx::query_as("SELECT * FROM sessions WHERE id = ?1")
            .bind(session_id)
            .fetch_optional(self.db.as_ref())
            .await?;

        row.ok_or_else(|| AppError::NotFound(format!("session {session_id} not found")))?
            .into_checkpoint()
    }

    /// Every retained revision of a session, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn history(&self, session_id: &str) -> Result<Vec<Checkpoint>> {
        let rows: Vec<CheckpointRow> = sqlx::query_as(
            "SELECT c.session_id AS id, s.agent_id AS agent_id, c.revision AS revision,
                    c.step_index AS step_index, c.status AS status, c.context AS context,
                    c.pending_request AS pending_request, c.result AS result,
                    c.error AS error, s.created_at AS created_at, c.created_at AS updated_at
             FROM checkpoints c JOIN sessions s ON s.id = c.session_id
             WHERE c.session_id = ?1 ORDER BY c.revision ASC",
        )
        .bind(session_id)
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(CheckpointRow::into_checkpoint).collect()
    }

    /// Current checkpoints of all sessions in the given status.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_by_status(&self, status: SessionStatus) -> Result<Vec<Checkpoint>> {
        let rows: Vec<CheckpointRow> =
            sqlx::query_as("SELECT * FROM sessions WHERE status = ?1 ORDER BY created_at ASC")
                .bind(status.as_str())
                .fetch_all(self.db.as_ref())
                .await?;

        rows.into_iter().map(CheckpointRow::into_checkpoint).collect()
    }

    /// Drop superseded history and ledger rows of sessions that finished
    /// before `cutoff`.
    ///
    /// Only the current revision of each finished session is kept. Both
    /// deletes for a session commit in one transaction, so a failure leaves
    /// the session eligible for the next pass. Returns the ids of the
    /// sessions that had anything removed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if a delete fails.
    pub async fn prune_finished(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>> {
        let finished: Vec<(String, String)> = sqlx::query_as(
            "SELECT id, updated_at FROM sessions WHERE status IN ('completed','failed')",
        )
        .fetch_all(self.db.as_ref())
        .await?;

        let mut pruned = Vec::new();
        for (id, updated_at) in finished {
            if parse_timestamp(&updated_at, "updated_at")? >= cutoff {
                continue;
            }

            let mut tx = self.db.begin().await?;
            let history = sqlx::query(
                "DELETE FROM checkpoints WHERE session_id = ?1
                 AND revision < (SELECT revision FROM sessions WHERE id = ?1)",
            )
            .bind(&id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
            let ledger = ledger_repo::delete_session_rows(&mut tx, &id).await?;
            tx.commit().await?;

            if history + ledger > 0 {
                debug!(session_id = %id, history, ledger, "finished session pruned");
                pruned.push(id);
            }
        }

        Ok(pruned)
    }
}

async fn insert_history(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    checkpoint: &Checkpoint,
    row: &Encoded,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO checkpoints (session_id, revision, step_index, status, context,
         pending_request, result, error, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )
    .bind(&checkpoint.session_id)
    .bind(row.revision)
    .bind(row.step_index)
    .bind(checkpoint.status.as_str())
    .bind(&row.context)
    .bind(&row.pending_request)
    .bind(&row.result)
    .bind(&row.error)
    .bind(&row.updated_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
