//! Request deduplication.
//!
//! Policy: **time-window sharing**. An entry persists for the configured
//! window after creation regardless of settlement, so callers arriving
//! within the window attach to the same shared future and observe the
//! identical resolution or rejection, even when it already settled. A
//! fresh call after the window triggers a fresh execution. This absorbs
//! near-simultaneous duplicate triggers (double-submitted forms, effect
//! re-runs) without a separate debounce layer.
//!
//! The underlying future is spawned onto the runtime, so a caller that
//! stops waiting never cancels the operation for the callers still
//! attached.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use tracing::{debug, trace};
use wellspring_core::clock::{system_clock, Clock};
use wellspring_core::{CancelToken, RequestError};

type SharedResult<T> = Shared<BoxFuture<'static, Result<T, RequestError>>>;

struct PendingRequest<T> {
    shared: SharedResult<T>,
    created_at: Instant,
}

/// Collapses calls sharing a deduplication key into one execution.
///
/// Keys are opaque strings; by convention they mirror cache keys
/// (`table:operation:param-hash`). At most one [`PendingRequest`] exists
/// per key at any instant.
pub struct RequestDeduplicator<T> {
    entries: Mutex<HashMap<String, PendingRequest<T>>>,
    window: Duration,
    clock: Arc<dyn Clock>,
}

impl<T> RequestDeduplicator<T>
where
    T: Clone + Send + 'static,
{
    /// Create a deduplicator with the given sharing window.
    pub fn new(window: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            window,
            clock: system_clock(),
        }
    }

    /// Inject a clock (tests use a manual one).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Run `thunk` for `key`, or attach to the execution already sharing it.
    ///
    /// The thunk is invoked exactly once per window; every caller gets a
    /// clone of the same `Result`.
    pub async fn dedupe<F, Fut>(&self, key: &str, thunk: F) -> Result<T, RequestError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, RequestError>> + Send + 'static,
    {
        self.attach(key, thunk).await
    }

    /// Like [`Self::dedupe`], but the caller stops waiting when `token`
    /// fires. Cancellation is local: the shared execution keeps running
    /// for the other attached callers.
    pub async fn dedupe_with_cancel<F, Fut>(
        &self,
        key: &str,
        thunk: F,
        token: &CancelToken,
    ) -> Result<T, RequestError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, RequestError>> + Send + 'static,
    {
        // Aborted before the shared execution would be created: fail
        // locally without spawning anything.
        if token.is_cancelled() {
            return Err(RequestError::cancelled("aborted before request started"));
        }

        let shared = self.attach(key, thunk);
        tokio::select! {
            result = shared => result,
            () = token.cancelled() => {
                Err(RequestError::cancelled("caller aborted while awaiting shared request"))
            }
        }
    }

    /// Number of keys currently inside their sharing window.
    pub fn pending_len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Drop the entry for `key`, forcing the next call to execute fresh.
    pub fn forget(&self, key: &str) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    fn attach<F, Fut>(&self, key: &str, thunk: F) -> SharedResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, RequestError>> + Send + 'static,
    {
        let now = self.clock.now();
        let window = self.window;
        let mut entries = self.entries.lock();

        // Opportunistic sweep so settled entries do not pile up between
        // unrelated keys.
        entries.retain(|_, pending| now.duration_since(pending.created_at) < window);

        if let Some(pending) = entries.get(key) {
            trace!(key, "attaching to in-window request");
            return pending.shared.clone();
        }

        debug!(key, "starting deduplicated request");
        // Spawn so abandonment by every caller cannot cancel the work; a
        // panic inside the thunk's future surfaces as a network-class
        // error to all sharers rather than wedging the key.
        let task = tokio::spawn(thunk());
        let shared = async move {
            match task.await {
                Ok(result) => result,
                Err(join_error) => Err(RequestError::network(format!(
                    "deduplicated request aborted: {join_error}"
                ))),
            }
        }
        .boxed()
        .shared();

        entries.insert(
            key.to_string(),
            PendingRequest {
                shared: shared.clone(),
                created_at: now,
            },
        );
        shared
    }
}
