//! Tracing/logging setup shared by the `conduit` binaries.

/// Tracing configuration (filters, formatters).
pub mod tracing;

pub use crate::tracing::{LogFormat, Verbosity};

/// Initialize process-wide tracing.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init(verbosity: Verbosity) {
    crate::tracing::init(verbosity, LogFormat::from_env());
}
