//! Tracing and logging setup shared by the engine binaries and tests.

/// Initialize process-wide observability (JSON logs, `RUST_LOG` filter).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Tracing configuration (filters, layers).
pub mod tracing;

pub use tracing::{init_test, init_with_default};
