//! Request coordinator.
//!
//! Owns the priority queue, the concurrency cap, and the cooldown logic
//! for rate-limit and network failures. The read-path facade
//! ([`Coordinator::fetch`]) consults the query cache first, collapses
//! concurrent misses through the deduplicator, and populates the cache on
//! success; [`Coordinator::mutate`] invalidates the affected tags after
//! the write completes.

use std::future::Future;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};

use wellspring_cache::{QueryCache, RequestDeduplicator};
use wellspring_client::{ClientHandle, ClientRegistry, RetryableTransport};
use wellspring_core::clock::{system_clock, Clock};
use wellspring_core::{RequestError, RetryPolicy};

use crate::events::{CoordinatorEvent, EventBus, Subscription};
use crate::queue::{OperationOptions, PriorityQueue, QueuedOperation};

/// Tunables for the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Maximum simultaneously active operations
    pub max_concurrent: usize,
    /// Cooldown applied after a 429 without a server-suggested delay
    pub rate_limit_cooldown: Duration,
    /// Default TTL for values the read path caches
    pub cache_ttl: Duration,
    /// Sharing window for deduplicated fetches
    pub dedup_window: Duration,
    /// Backoff policy handed to the transport
    pub retry: RetryPolicy,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            rate_limit_cooldown: Duration::from_secs(1),
            cache_ttl: Duration::from_secs(30),
            dedup_window: Duration::from_secs(2),
            retry: RetryPolicy::default(),
        }
    }
}

/// Derived, read-only snapshot of the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorStatus {
    /// Operations waiting in the queue
    pub queued: usize,
    /// Operations currently executing
    pub active: usize,
    /// Whether dequeuing is paused
    pub paused: bool,
    /// Whether the last rate-limit cooldown has not been cleared by a success
    pub rate_limited: bool,
    /// Whether a network-class failure has not been cleared by a success
    pub network_error: bool,
}

#[derive(Default)]
struct DispatchState {
    queue: PriorityQueue,
    active: usize,
    paused: bool,
    rate_limited: bool,
    rate_limited_until: Option<std::time::Instant>,
    cooldown_wake_pending: bool,
    network_error: bool,
}

struct Inner {
    registry: Arc<ClientRegistry>,
    transport: RetryableTransport,
    cache: QueryCache<Value>,
    dedup: RequestDeduplicator<Value>,
    events: Arc<EventBus>,
    state: Mutex<DispatchState>,
    config: CoordinatorConfig,
    next_id: AtomicU64,
    clock: Arc<dyn Clock>,
}

/// Queues and prioritizes outgoing backend operations.
///
/// Cloning is cheap; clones share the same queue and state.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    /// Create a coordinator with default configuration.
    pub fn new(registry: Arc<ClientRegistry>) -> Self {
        Self::with_config(registry, CoordinatorConfig::default())
    }

    /// Create a coordinator with explicit configuration.
    pub fn with_config(registry: Arc<ClientRegistry>, config: CoordinatorConfig) -> Self {
        Self::with_clock(registry, config, system_clock())
    }

    /// Create a coordinator with an injected clock (tests use a manual one).
    pub fn with_clock(
        registry: Arc<ClientRegistry>,
        config: CoordinatorConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let transport = RetryableTransport::new(registry.error_counter())
            .with_policy(config.retry.clone())
            .with_clock(Arc::clone(&clock));
        let cache = QueryCache::new(config.cache_ttl).with_clock(Arc::clone(&clock));
        let dedup = RequestDeduplicator::new(config.dedup_window).with_clock(Arc::clone(&clock));

        Self {
            inner: Arc::new(Inner {
                registry,
                transport,
                cache,
                dedup,
                events: EventBus::new(),
                state: Mutex::new(DispatchState::default()),
                config,
                next_id: AtomicU64::new(0),
                clock,
            }),
        }
    }

    /// Register an event listener.
    pub fn subscribe(
        &self,
        listener: impl Fn(&CoordinatorEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.events.subscribe(listener)
    }

    /// The registry this coordinator routes operations through.
    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.inner.registry
    }

    /// The query cache backing the read path.
    pub fn cache(&self) -> &QueryCache<Value> {
        &self.inner.cache
    }

    /// Enqueue an operation; the returned future resolves when it completes.
    ///
    /// The operation is enqueued immediately (before the future is first
    /// polled). One operation's failure never affects its siblings.
    pub fn add<F, Fut>(
        &self,
        opts: OperationOptions,
        mut operation: F,
    ) -> impl Future<Output = Result<Value, RequestError>>
    where
        F: FnMut(Arc<ClientHandle>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, RequestError>> + Send + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (reply, reply_rx) = oneshot::channel();
        let op = QueuedOperation {
            id,
            category: opts.category.clone(),
            priority: opts.priority,
            transport: opts.transport,
            thunk: Box::new(move |client| operation(client).boxed()),
            enqueued_at: self.inner.clock.now(),
            reply,
        };

        self.inner.state.lock().queue.push(op);
        trace!(id, category = %opts.category, priority = ?opts.priority, "operation queued");
        self.inner.events.emit(&CoordinatorEvent::Queued {
            id,
            category: opts.category,
            priority: opts.priority,
        });
        Inner::dispatch(&self.inner);

        async move {
            match reply_rx.await {
                Ok(result) => result,
                Err(_) => Err(RequestError::cancelled("coordinator dropped the operation")),
            }
        }
    }

    /// Stop dequeuing. Already-active operations run to completion.
    pub fn pause(&self) {
        let newly_paused = {
            let mut state = self.inner.state.lock();
            !mem::replace(&mut state.paused, true)
        };
        if newly_paused {
            info!("coordinator paused");
            self.inner.events.emit(&CoordinatorEvent::Paused);
        }
    }

    /// Restart dequeuing in priority order.
    pub fn resume(&self) {
        let was_paused = {
            let mut state = self.inner.state.lock();
            mem::replace(&mut state.paused, false)
        };
        if was_paused {
            info!("coordinator resumed");
            self.inner.events.emit(&CoordinatorEvent::Resumed);
            Inner::dispatch(&self.inner);
        }
    }

    /// Reject all queued-but-not-started operations.
    ///
    /// Active operations are unaffected. On an empty queue this is a no-op
    /// apart from the `Cleared` event.
    pub fn clear(&self) {
        let dropped_ops = self.inner.state.lock().queue.drain_all();
        let dropped = dropped_ops.len();
        for op in dropped_ops {
            let _ = op.reply.send(Err(RequestError::cancelled("queue cleared")));
        }
        debug!(dropped, "queue cleared");
        self.inner.events.emit(&CoordinatorEvent::Cleared { dropped });
    }

    /// Recompute the status snapshot.
    pub fn status(&self) -> CoordinatorStatus {
        let state = self.inner.state.lock();
        CoordinatorStatus {
            queued: state.queue.len(),
            active: state.active,
            paused: state.paused,
            rate_limited: state.rate_limited,
            network_error: state.network_error,
        }
    }

    /// Read path: cache, then deduplicated fetch through the queue.
    ///
    /// On a cache hit the queue is never touched. On a miss, concurrent
    /// callers for the same key share one queued operation; the result is
    /// cached under `tags` with `ttl` (or the configured default).
    pub async fn fetch<F, Fut>(
        &self,
        key: &str,
        tags: &[&str],
        ttl: Option<Duration>,
        opts: OperationOptions,
        operation: F,
    ) -> Result<Value, RequestError>
    where
        F: FnMut(Arc<ClientHandle>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, RequestError>> + Send + 'static,
    {
        if let Some(hit) = self.inner.cache.get(key) {
            trace!(key, "query cache hit");
            return Ok(hit);
        }

        let coordinator = self.clone();
        let key_owned = key.to_string();
        let tags_owned: Vec<String> = tags.iter().map(|tag| (*tag).to_string()).collect();
        self.inner
            .dedup
            .dedupe(key, move || async move {
                let value = coordinator.add(opts, operation).await?;
                let tag_refs: Vec<&str> = tags_owned.iter().map(String::as_str).collect();
                coordinator
                    .inner
                    .cache
                    .insert(key_owned, value.clone(), &tag_refs, ttl);
                Ok(value)
            })
            .await
    }

    /// Write path: run the mutation, then invalidate the affected tags.
    pub async fn mutate<F, Fut>(
        &self,
        tags: &[&str],
        opts: OperationOptions,
        operation: F,
    ) -> Result<Value, RequestError>
    where
        F: FnMut(Arc<ClientHandle>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, RequestError>> + Send + 'static,
    {
        let value = self.add(opts, operation).await?;
        let invalidated = self.inner.cache.invalidate_tags(tags);
        debug!(?tags, invalidated, "mutation invalidated cached queries");
        Ok(value)
    }
}

impl Inner {
    /// Drain the queue while capacity allows and nothing blocks dequeues.
    fn dispatch(self: &Arc<Self>) {
        loop {
            let op = {
                let mut state = self.state.lock();
                if state.paused {
                    return;
                }
                if let Some(until) = state.rate_limited_until {
                    let now = self.clock.now();
                    if now < until {
                        self.schedule_cooldown_wake(&mut state, until - now);
                        return;
                    }
                    state.rate_limited_until = None;
                }
                if state.active >= self.config.max_concurrent {
                    return;
                }
                let Some(op) = state.queue.pop_next() else {
                    return;
                };
                state.active += 1;
                op
            };
            self.spawn_operation(op);
        }
    }

    /// Arrange for dispatch to run again once the cooldown expires.
    fn schedule_cooldown_wake(self: &Arc<Self>, state: &mut DispatchState, delay: Duration) {
        if state.cooldown_wake_pending {
            return;
        }
        state.cooldown_wake_pending = true;
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            inner.clock.sleep(delay).await;
            inner.state.lock().cooldown_wake_pending = false;
            Inner::dispatch(&inner);
        });
    }

    fn spawn_operation(self: &Arc<Self>, mut op: QueuedOperation) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            inner.events.emit(&CoordinatorEvent::BatchStart {
                id: op.id,
                category: op.category.clone(),
            });
            debug!(id = op.id, category = %op.category, "operation started");

            let result = inner
                .transport
                .execute_with_client(&inner.registry, &op.transport, |client| (op.thunk)(client))
                .await;

            inner.note_outcome(&result);
            inner.events.emit(&CoordinatorEvent::BatchComplete {
                id: op.id,
                category: op.category.clone(),
                success: result.is_ok(),
            });
            let _ = op.reply.send(result);

            inner.state.lock().active -= 1;
            Inner::dispatch(&inner);
        });
    }

    /// Update the rate-limit / network flags and emit transition events.
    fn note_outcome(&self, result: &Result<Value, RequestError>) {
        match result {
            Ok(_) => {
                let (was_rate_limited, had_network_error) = {
                    let mut state = self.state.lock();
                    (
                        mem::take(&mut state.rate_limited),
                        mem::take(&mut state.network_error),
                    )
                };
                if was_rate_limited {
                    info!("rate limit cleared");
                    self.events.emit(&CoordinatorEvent::RateLimitReset);
                }
                if had_network_error {
                    info!("network restored");
                    self.events.emit(&CoordinatorEvent::NetworkRestored);
                }
            }
            Err(RequestError::RateLimited { retry_after, .. }) => {
                let cooldown = retry_after.unwrap_or(self.config.rate_limit_cooldown);
                {
                    let mut state = self.state.lock();
                    state.rate_limited = true;
                    state.rate_limited_until = Some(self.clock.now() + cooldown);
                }
                warn!(?cooldown, "rate limited; dequeues paused for cooldown");
                self.events.emit(&CoordinatorEvent::RateLimited { cooldown });
            }
            Err(error) if error.is_network_class() => {
                let fresh = {
                    let mut state = self.state.lock();
                    !mem::replace(&mut state.network_error, true)
                };
                if fresh {
                    warn!(error = %error, "network-class failure");
                    self.events.emit(&CoordinatorEvent::NetworkError {
                        message: error.to_string(),
                    });
                }
            }
            Err(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::Priority;
    use serde_json::json;
    use wellspring_client::TransportOptions;
    use wellspring_core::BackendConfig;

    fn test_registry() -> Arc<ClientRegistry> {
        Arc::new(ClientRegistry::new(BackendConfig::new(
            "https://project.wellspring.dev",
            "anon-key",
        )))
    }

    fn fast_config() -> CoordinatorConfig {
        CoordinatorConfig {
            rate_limit_cooldown: Duration::from_millis(50),
            retry: RetryPolicy::default()
                .with_base_delay(Duration::from_millis(1))
                .with_max_delay(Duration::from_millis(5)),
            ..CoordinatorConfig::default()
        }
    }

    fn no_retry() -> OperationOptions {
        OperationOptions::default().with_transport(TransportOptions {
            max_retries: 0,
            ..TransportOptions::default()
        })
    }

    fn collect_events(coordinator: &Coordinator) -> (Arc<Mutex<Vec<CoordinatorEvent>>>, Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let subscription = {
            let seen = Arc::clone(&seen);
            coordinator.subscribe(move |event| seen.lock().push(event.clone()))
        };
        (seen, subscription)
    }

    fn batch_start_categories(events: &[CoordinatorEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|event| match event {
                CoordinatorEvent::BatchStart { category, .. } => Some(category.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn drains_strictly_by_priority_then_fifo() {
        let config = CoordinatorConfig {
            max_concurrent: 1,
            ..fast_config()
        };
        let coordinator = Coordinator::with_config(test_registry(), config);
        let (seen, _subscription) = collect_events(&coordinator);

        coordinator.pause();
        let ops: Vec<_> = [
            ("low1", Priority::Low),
            ("high1", Priority::High),
            ("medium1", Priority::Medium),
            ("high2", Priority::High),
        ]
        .into_iter()
        .map(|(name, priority)| {
            let opts = OperationOptions::default()
                .with_priority(priority)
                .with_category(name);
            coordinator.add(opts, move |_| async move { Ok(json!(name)) })
        })
        .collect();
        coordinator.resume();

        for op in ops {
            op.await.unwrap();
        }

        assert_eq!(
            batch_start_categories(&seen.lock()),
            vec!["high1", "high2", "medium1", "low1"]
        );
    }

    #[tokio::test]
    async fn pause_blocks_batch_start_until_resume() {
        let coordinator = Coordinator::with_config(test_registry(), fast_config());
        let (seen, _subscription) = collect_events(&coordinator);

        coordinator.pause();
        let pending = coordinator.add(OperationOptions::default(), |_| async {
            Ok(json!("done"))
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(batch_start_categories(&seen.lock()).is_empty());
        let status = coordinator.status();
        assert!(status.paused);
        assert_eq!(status.queued, 1);

        coordinator.resume();
        assert_eq!(pending.await.unwrap(), json!("done"));
        assert_eq!(batch_start_categories(&seen.lock()).len(), 1);
    }

    #[tokio::test]
    async fn clear_on_an_empty_queue_emits_only_cleared() {
        let coordinator = Coordinator::with_config(test_registry(), fast_config());
        let (seen, _subscription) = collect_events(&coordinator);

        coordinator.clear();

        assert_eq!(
            seen.lock().as_slice(),
            &[CoordinatorEvent::Cleared { dropped: 0 }]
        );
    }

    #[tokio::test]
    async fn clear_rejects_queued_operations_without_touching_active_ones() {
        let coordinator = Coordinator::with_config(test_registry(), fast_config());

        coordinator.pause();
        let queued = coordinator.add(OperationOptions::default(), |_| async {
            Ok(json!("never"))
        });
        coordinator.clear();
        coordinator.resume();

        assert!(matches!(
            queued.await.unwrap_err(),
            RequestError::Cancelled { .. }
        ));
        assert_eq!(coordinator.status().queued, 0);
    }

    #[tokio::test]
    async fn rate_limit_triggers_cooldown_then_reset_on_success() {
        let coordinator = Coordinator::with_config(test_registry(), fast_config());
        let (seen, _subscription) = collect_events(&coordinator);

        let limited = coordinator
            .add(no_retry(), |_| async {
                Err(RequestError::from_status(429, "slow down"))
            })
            .await;
        assert!(matches!(
            limited.unwrap_err(),
            RequestError::RateLimited { .. }
        ));
        assert!(coordinator.status().rate_limited);

        // The next operation waits out the cooldown, then clears the flag.
        let value = coordinator
            .add(no_retry(), |_| async { Ok(json!("recovered")) })
            .await
            .unwrap();
        assert_eq!(value, json!("recovered"));
        assert!(!coordinator.status().rate_limited);

        let events = seen.lock();
        assert!(events
            .iter()
            .any(|event| matches!(event, CoordinatorEvent::RateLimited { .. })));
        assert!(events.contains(&CoordinatorEvent::RateLimitReset));
    }

    #[tokio::test]
    async fn network_failures_flag_and_clear_with_events() {
        let coordinator = Coordinator::with_config(test_registry(), fast_config());
        let (seen, _subscription) = collect_events(&coordinator);

        let failed = coordinator
            .add(no_retry(), |_| async {
                Err(RequestError::network("connection reset"))
            })
            .await;
        assert!(failed.is_err());
        assert!(coordinator.status().network_error);

        coordinator
            .add(no_retry(), |_| async { Ok(json!(1)) })
            .await
            .unwrap();
        assert!(!coordinator.status().network_error);

        let events = seen.lock();
        assert!(events
            .iter()
            .any(|event| matches!(event, CoordinatorEvent::NetworkError { .. })));
        assert!(events.contains(&CoordinatorEvent::NetworkRestored));
    }

    #[tokio::test]
    async fn one_operations_failure_does_not_affect_siblings() {
        let coordinator = Coordinator::with_config(test_registry(), fast_config());

        let failing = coordinator.add(no_retry(), |_| async {
            Err(RequestError::from_status(422, "invalid payload"))
        });
        let succeeding = coordinator.add(no_retry(), |_| async { Ok(json!("fine")) });

        assert!(failing.await.is_err());
        assert_eq!(succeeding.await.unwrap(), json!("fine"));
    }
}
