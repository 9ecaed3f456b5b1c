//! `SQLite` schema bootstrap logic.
//!
//! All table definitions use `CREATE TABLE IF NOT EXISTS` and are safe to
//! re-run on every startup.

use sqlx::SqlitePool;

use crate::Result;

/// Apply all table definitions to the connected `SQLite` database.
///
/// - `sessions` holds the current checkpoint of every session.
/// - `checkpoints` keeps every committed revision for diagnostics.
/// - `idempotency` is the ledger of completed effecting steps.
///
/// # Errors
///
/// Returns `AppError::Db` if any DDL statement fails.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS sessions (
    id              TEXT PRIMARY KEY NOT NULL,
    agent_id        TEXT NOT NULL,
    revision        INTEGER NOT NULL CHECK(revision >= 0),
    step_index      INTEGER NOT NULL CHECK(step_index >= 0),
    status          TEXT NOT NULL CHECK(status IN ('running','waiting_for_human','completed','failed')),
    context         TEXT NOT NULL,
    pending_request TEXT,
    result          TEXT,
    error           TEXT,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    CHECK((status = 'waiting_for_human') = (pending_request IS NOT NULL))
);

CREATE TABLE IF NOT EXISTS checkpoints (
    session_id      TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
    revision        INTEGER NOT NULL,
    step_index      INTEGER NOT NULL,
    status          TEXT NOT NULL,
    context         TEXT NOT NULL,
    pending_request TEXT,
    result          TEXT,
    error           TEXT,
    created_at      TEXT NOT NULL,
    PRIMARY KEY (session_id, revision)
);

CREATE TABLE IF NOT EXISTS idempotency (
    session_id      TEXT NOT NULL,
    step_id         TEXT NOT NULL,
    kind            TEXT NOT NULL CHECK(kind IN ('model','tool')),
    outcome         TEXT NOT NULL,
    attempts        INTEGER NOT NULL,
    recorded_at     TEXT NOT NULL,
    PRIMARY KEY (session_id, step_id)
);

CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status);
CREATE INDEX IF NOT EXISTS idx_idempotency_kind ON idempotency(session_id, kind);
";

    sqlx::raw_sql(ddl).execute(pool).await?;
    Ok(())
}
