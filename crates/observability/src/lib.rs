//! Tracing/logging setup shared by every classhub binary and test harness.

/// Initialize process-wide logging with the defaults (`RUST_LOG`, JSON).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Subscriber configuration (filters, output format).
pub mod tracing;

pub use self::tracing::{LogConfig, LogConfigError, LogFormat, init_with};
