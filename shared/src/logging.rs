//! Shared logging utilities for consistent tracing across components
//!
//! Cycle work for many tenants interleaves on the same runtime, so every
//! log line carries the tenant it belongs to. The `tenant_*!` macros add
//! that context the same way for every call site.

use chrono::{DateTime, Utc};
use tracing::{error, info};

/// Initialize tracing to stdout with the default `info` level
pub fn init_tracing() {
    init_tracing_with_level(None);
}

/// Initialize tracing to stdout with an explicit base level
///
/// `RUST_LOG` still wins when set, matching the usual EnvFilter behavior.
pub fn init_tracing_with_level(log_level: Option<&str>) {
    use tracing_subscriber::{fmt, EnvFilter};

    let base_level = log_level.unwrap_or("info");
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("autopilot={base_level},shared={base_level}")));

    fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

/// Get formatted timestamp for consistent logging
pub fn format_timestamp() -> String {
    let now: DateTime<Utc> = Utc::now();
    now.format("%H:%M:%S%.3f").to_string()
}

/// Macro for tenant-aware info logging
#[macro_export]
macro_rules! tenant_info {
    ($tenant_id:expr, $($arg:tt)*) => {
        tracing::info!(
            tenant = %$tenant_id,
            timestamp = shared::logging::format_timestamp(),
            $($arg)*
        );
    };
}

/// Macro for tenant-aware warning logging
#[macro_export]
macro_rules! tenant_warn {
    ($tenant_id:expr, $($arg:tt)*) => {
        tracing::warn!(
            tenant = %$tenant_id,
            timestamp = shared::logging::format_timestamp(),
            $($arg)*
        );
    };
}

/// Macro for tenant-aware error logging
#[macro_export]
macro_rules! tenant_error {
    ($tenant_id:expr, $($arg:tt)*) => {
        tracing::error!(
            tenant = %$tenant_id,
            timestamp = shared::logging::format_timestamp(),
            $($arg)*
        );
    };
}

/// Macro for tenant-aware debug logging
#[macro_export]
macro_rules! tenant_debug {
    ($tenant_id:expr, $($arg:tt)*) => {
        tracing::debug!(
            tenant = %$tenant_id,
            timestamp = shared::logging::format_timestamp(),
            $($arg)*
        );
    };
}

/// Contextual logging helper for startup messages
pub fn log_startup(details: &str) {
    info!(timestamp = format_timestamp(), "🚀 Starting {}", details);
}

/// Contextual logging helper for shutdown messages
pub fn log_shutdown(reason: &str) {
    info!(timestamp = format_timestamp(), "🛑 Shutting down: {}", reason);
}

/// Contextual logging helper for error conditions
pub fn log_error(context: &str, error: &dyn std::fmt::Display) {
    error!(
        timestamp = format_timestamp(),
        error = %error,
        "❌ {} failed: {}",
        context,
        error
    );
}

/// Contextual logging helper for success conditions
pub fn log_success(message: &str) {
    info!(timestamp = format_timestamp(), "✅ {}", message);
}
