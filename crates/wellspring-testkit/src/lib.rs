//! Test utilities shared by Wellspring crate tests.
//!
//! Dev-dependency only. Provides a manually advanced clock, scripted
//! backend operations for exercising retry and queue paths, and a
//! one-time tracing initializer for test binaries.

#![forbid(unsafe_code)]

/// Manually advanced clock
pub mod clock;

/// Scripted backend operations
pub mod ops;

pub use clock::ManualClock;
pub use ops::ScriptedOp;

use once_cell::sync::OnceCell;

static TRACING: OnceCell<()> = OnceCell::new();

/// Install a fmt subscriber honoring `RUST_LOG`, at most once per process.
pub fn init_tracing() {
    TRACING.get_or_init(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .with_test_writer()
            .try_init();
    });
}
