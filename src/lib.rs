#![forbid(unsafe_code)]

pub mod clock;
pub mod config;
pub mod engine;
pub mod errors;
pub mod models;
pub mod persistence;
pub mod policy;

pub use config::GlobalConfig;
pub use errors::{AppError, ErrorCode, Result};
