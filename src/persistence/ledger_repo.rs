//! Idempotency ledger backed by `SQLite`.
//!
//! One row per `(session_id, step_id)`. Recording is insert-or-ignore so
//! that two writers racing on the same step converge on whichever outcome
//! committed first; both callers get that outcome back.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::{debug, warn};

use crate::models::ledger::{EffectKind, IdempotencyRecord, StepOutcome};
use crate::{AppError, Result};

use super::db::Database;
use super::from_db_int;

/// Record of already-completed effecting steps.
#[derive(Clone)]
pub struct IdempotencyLedger {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct LedgerRow {
    session_id: String,
    step_id: String,
    kind: String,
    outcome: String,
    attempts: i64,
    recorded_at: String,
}

impl LedgerRow {
    fn into_record(self) -> Result<IdempotencyRecord> {
        let kind = EffectKind::parse(&self.kind)
            .ok_or_else(|| AppError::Db(format!("invalid effect kind: {}", self.kind)))?;
        let output = serde_json::from_str(&self.outcome)
            .map_err(|e| AppError::Db(format!("invalid outcome: {e}")))?;
        let attempts = u32::try_from(from_db_int(self.attempts, "attempts")?)
            .map_err(|_| AppError::Db(format!("invalid attempts: {}", self.attempts)))?;
        let recorded_at = DateTime::parse_from_rfc3339(&self.recorded_at)
            .map_err(|e| AppError::Db(format!("invalid recorded_at: {e}")))?
            .with_timezone(&Utc);

        Ok(IdempotencyRecord {
            session_id: self.session_id,
            step_id: self.step_id,
            outcome: StepOutcome {
                kind,
                output,
                attempts,
                recorded_at,
            },
        })
    }
}

impl IdempotencyLedger {
    /// Create a new ledger instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Look up the recorded outcome of a step.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn has_outcome(&self, session_id: &str, step_id: &str) -> Result<Option<StepOutcome>> {
        let row: Option<LedgerRow> =
            sqlx::query_as("SELECT * FROM idempotency WHERE session_id = ?1 AND step_id = ?2")
                .bind(session_id)
                .bind(step_id)
                .fetch_optional(self.db.as_ref())
                .await?;

        Ok(row
            .map(LedgerRow::into_record)
            .transpose()?
            .map(|record| record.outcome))
    }

    /// Record the outcome of a completed effecting step.
    ///
    /// Must complete before any checkpoint that advances past the step is
    /// written. If an outcome was already recorded it is kept and returned
    /// in place of `outcome`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert or read-back fails.
    pub async fn record_outcome(
        &self,
        session_id: &str,
        step_id: &str,
        outcome: &StepOutcome,
    ) -> Result<StepOutcome> {
        let serialized = serde_json::to_string(&outcome.output)?;
        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO idempotency (session_id, step_id, kind, outcome, attempts, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(session_id)
        .bind(step_id)
        .bind(outcome.kind.as_str())
        .bind(&serialized)
        .bind(i64::from(outcome.attempts))
        .bind(outcome.recorded_at.to_rfc3339())
        .execute(self.db.as_ref())
        .await?;

        if inserted.rows_affected() == 1 {
            debug!(session_id, step_id, kind = outcome.kind.as_str(), "outcome recorded");
            return Ok(outcome.clone());
        }

        warn!(session_id, step_id, "outcome already recorded; keeping the first");
        self.has_outcome(session_id, step_id).await?.ok_or_else(|| {
            AppError::Db(format!(
                "ledger entry for {session_id}/{step_id} vanished after conflict"
            ))
        })
    }

    /// Number of recorded outcomes of `kind` for a session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn count_for_session(&self, session_id: &str, kind: EffectKind) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM idempotency WHERE session_id = ?1 AND kind = ?2",
        )
        .bind(session_id)
        .bind(kind.as_str())
        .fetch_one(self.db.as_ref())
        .await?;
        from_db_int(count, "count")
    }

    /// All ledger records of a session in recording order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_for_session(&self, session_id: &str) -> Result<Vec<IdempotencyRecord>> {
        let rows: Vec<LedgerRow> = sqlx::query_as(
            "SELECT * FROM idempotency WHERE session_id = ?1 ORDER BY recorded_at ASC, rowid ASC",
        )
        .bind(session_id)
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(LedgerRow::into_record).collect()
    }

    /// Delete every ledger record of a session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn delete_for_session(&self, session_id: &str) -> Result<u64> {
        let mut conn = self.db.acquire().await?;
        delete_session_rows(&mut conn, session_id).await
    }
}

/// Delete a session's ledger rows on `conn`, which may be inside a
/// transaction.
pub(crate) async fn delete_session_rows(
    conn: &mut SqliteConnection,
    session_id: &str,
) -> Result<u64> {
    let deleted = sqlx::query("DELETE FROM idempotency WHERE session_id = ?1")
        .bind(session_id)
        .execute(conn)
        .await?;
    Ok(deleted.rows_affected())
}
