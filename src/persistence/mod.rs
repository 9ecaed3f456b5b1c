//! Persistence layer modules.

pub mod checkpoint_repo;
pub mod db;
pub mod ledger_repo;
pub mod retention;
pub mod schema;

/// Re-export the database pool type for convenience.
pub use sqlx::SqlitePool;

use crate::{AppError, Result};

/// Convert a domain counter into an `SQLite` integer.
pub(crate) fn to_db_int(value: u64, column: &str) -> Result<i64> {
    i64::try_from(value).map_err(|_| AppError::Db(format!("{column} out of range: {value}")))
}

/// Convert an `SQLite` integer into a domain counter.
pub(crate) fn from_db_int(value: i64, column: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| AppError::Db(format!("invalid {column}: {value}")))
}
