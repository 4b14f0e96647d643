//! Shared types for the business autopilot system
//!
//! Contains the domain records persisted by the orchestration core
//! (ledger entries, cache aggregates, directives) plus the identifiers,
//! error type, and logging utilities every component uses.

pub mod errors;
pub mod logging;
pub mod types;

pub use errors::*;
pub use types::*;
