//! Domain model module declarations.

pub mod agent;
pub mod checkpoint;
pub mod ledger;
pub mod pending;
pub mod session;
pub mod view;
