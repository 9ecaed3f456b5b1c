//! Error types shared across the engine.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all engine failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Persistence failure when interacting with `SQLite`.
    Db(String),
    /// Requested session or agent does not exist.
    NotFound(String),
    /// Optimistic-concurrency mismatch; the caller must refetch and retry.
    Conflict(String),
    /// Operation is not permitted in the session's current status.
    InvalidState(String),
    /// The pending human request timed out.
    Expired(String),
    /// Malformed input or schema mismatch.
    Validation(String),
    /// Unexpected engine failure.
    Internal(String),
}

/// Error codes surfaced at the service boundary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Session or agent missing.
    NotFound,
    /// Stale revision.
    Conflict,
    /// Resume or abort on a session in the wrong status.
    InvalidState,
    /// Pending request expired.
    Expired,
    /// Response or input failed validation.
    ValidationFailed,
    /// Fatal engine error.
    Internal,
}

impl ErrorCode {
    /// Wire representation of the code.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::InvalidState => "INVALID_STATE",
            Self::Expired => "EXPIRED",
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::Internal => "INTERNAL",
        }
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AppError {
    /// Map the error onto the boundary error code.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Conflict(_) => ErrorCode::Conflict,
            Self::InvalidState(_) => ErrorCode::InvalidState,
            Self::Expired(_) => ErrorCode::Expired,
            Self::Validation(_) => ErrorCode::ValidationFailed,
            Self::Config(_) | Self::Db(_) | Self::Internal(_) => ErrorCode::Internal,
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Db(msg) => write!(f, "db: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Conflict(msg) => write!(f, "conflict: {msg}"),
            Self::InvalidState(msg) => write!(f, "invalid state: {msg}"),
            Self::Expired(msg) => write!(f, "expired: {msg}"),
            Self::Validation(msg) => write!(f, "validation failed: {msg}"),
            Self::Internal(msg) => write!(f, "internal: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Db(format!("invalid json payload: {err}"))
    }
}
