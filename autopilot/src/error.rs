//! Autopilot-specific error types
//!
//! The taxonomy separates what the dispatcher absorbs (task-level channel
//! failures) from what the orchestrator absorbs (cycle-level failures) and
//! from the one systemic case that escalates to the operator.

use shared::{Channel, SharedError, TenantId};
use thiserror::Error;

/// Failure reported by a channel collaborator call
///
/// The transient/permanent split drives the dispatcher's retry decision:
/// transient errors are retried with backoff, permanent errors settle the
/// task immediately.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("transient channel failure: {message}")]
    Transient { message: String },

    #[error("permanent channel failure: {message}")]
    Permanent { message: String },
}

impl ChannelError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ChannelError::Transient { .. })
    }
}

#[derive(Error, Debug)]
pub enum AutopilotError {
    #[error("transient failure on {channel}: {message}")]
    TransientChannel { channel: Channel, message: String },

    #[error("permanent failure on {channel}: {message}")]
    PermanentChannel { channel: Channel, message: String },

    /// A tick fired while the tenant's cycle lease was held. Logged and
    /// skipped, never surfaced to the user.
    #[error("cycle already active for tenant {tenant_id}")]
    OrchestrationConflict { tenant_id: TenantId },

    #[error("illegal cycle transition: {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    #[error("data integrity violation: {message}")]
    DataIntegrity { message: String },

    #[error("unknown tenant: {tenant_id}")]
    UnknownTenant { tenant_id: TenantId },

    #[error("no usable channel collaborators configured")]
    NoChannelsConfigured,

    #[error("control surface unavailable: {message}")]
    ControlChannelClosed { message: String },

    #[error("shared component error")]
    SharedError(#[from] SharedError),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl AutopilotError {
    pub fn integrity(message: impl Into<String>) -> Self {
        Self::DataIntegrity {
            message: message.into(),
        }
    }

    /// Whether this error is fatal to a single cycle but must never take
    /// down the scheduler process
    pub fn is_cycle_local(&self) -> bool {
        !matches!(self, AutopilotError::NoChannelsConfigured)
    }
}

pub type AutopilotResult<T> = Result<T, AutopilotError>;
