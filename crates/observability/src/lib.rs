//! Tracing and logging setup shared by every binary.

/// Initialize process-wide tracing.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Subscriber configuration (filter, output format).
pub mod tracing;

pub use tracing::{LOG_FORMAT_VAR, LogFormat, UnknownLogFormat};
