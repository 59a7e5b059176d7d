//! Injected clock capability.
//!
//! Components that read time or sleep take an `Arc<dyn Clock>` instead of
//! probing the runtime ad hoc. Production code uses [`SystemClock`]; tests
//! inject a manual clock and advance it explicitly.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

/// Time source and timer used by the orchestration layer.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current monotonic instant.
    fn now(&self) -> Instant;

    /// Suspend the calling task for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Default clock backed by the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Shared handle to the default clock.
pub fn system_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}
