//! Retryable transport.
//!
//! Drives caller-supplied backend operations under a per-attempt timeout
//! and the consolidated retry policy. The transport never constructs a
//! client handle itself; [`Self::execute_with_client`] borrows one from the
//! registry per attempt, so a reset mid-retry picks up the fresh handle.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;
use wellspring_core::clock::{system_clock, Clock};
use wellspring_core::{RequestError, RetryPolicy};

use crate::handle::ClientHandle;
use crate::registry::ClientRegistry;

/// Per-call knobs for [`RetryableTransport::execute`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportOptions {
    /// Hard deadline applied to each attempt
    pub timeout: Duration,
    /// Retries after the initial attempt
    pub max_retries: u32,
    /// Whether network-class failures are retried
    pub retry_on_network_error: bool,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_retries: 3,
            retry_on_network_error: true,
        }
    }
}

/// Process-wide count of consecutive failed attempts.
///
/// Incremented per failed attempt, reset to zero on any success. Shared
/// between the transport and the registry so it is visible through
/// [`crate::RegistryStats`].
#[derive(Debug, Clone, Default)]
pub struct ErrorCounter {
    count: Arc<AtomicU32>,
}

impl ErrorCounter {
    /// Record a failed attempt, returning the new consecutive count.
    pub fn record_failure(&self) -> u32 {
        self.count.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Record a success, resetting the count.
    pub fn record_success(&self) {
        self.count.store(0, Ordering::SeqCst);
    }

    /// Current consecutive-failure count.
    pub fn get(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }
}

/// Transport wrapper applying timeout, backoff, and rate-limit-aware retry.
pub struct RetryableTransport {
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    errors: ErrorCounter,
}

impl RetryableTransport {
    /// Create a transport sharing the given consecutive-error counter.
    pub fn new(errors: ErrorCounter) -> Self {
        Self {
            policy: RetryPolicy::default(),
            clock: system_clock(),
            errors,
        }
    }

    /// Override the backoff policy (base delay, cap, jitter).
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Inject a clock (tests use a manual one).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Run `operation` to completion under `opts`.
    ///
    /// The closure is invoked once per attempt. A timed-out attempt is
    /// surfaced as [`RequestError::Timeout`] and retried like any other
    /// network-class failure. The final error after exhaustion is returned
    /// unchanged; nothing is swallowed.
    pub async fn execute<T, F, Fut>(
        &self,
        opts: &TransportOptions,
        mut operation: F,
    ) -> Result<T, RequestError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RequestError>>,
    {
        let policy = self
            .policy
            .clone()
            .with_max_retries(opts.max_retries)
            .with_retry_on_network_error(opts.retry_on_network_error);
        let timeout = opts.timeout;
        let errors = self.errors.clone();

        policy
            .execute(self.clock.as_ref(), |attempt| {
                let fut = operation();
                let errors = errors.clone();
                async move {
                    let result = match tokio::time::timeout(timeout, fut).await {
                        Ok(result) => result,
                        Err(_) => Err(RequestError::Timeout { timeout }),
                    };
                    match &result {
                        Ok(_) => errors.record_success(),
                        Err(error) => {
                            let consecutive = errors.record_failure();
                            warn!(attempt, consecutive, error = %error, "backend attempt failed");
                        }
                    }
                    result
                }
            })
            .await
    }

    /// Like [`Self::execute`], borrowing the singleton handle per attempt.
    pub async fn execute_with_client<T, F, Fut>(
        &self,
        registry: &ClientRegistry,
        opts: &TransportOptions,
        mut operation: F,
    ) -> Result<T, RequestError>
    where
        F: FnMut(Arc<ClientHandle>) -> Fut,
        Fut: Future<Output = Result<T, RequestError>>,
    {
        self.execute(opts, || {
            let client = registry.get_client();
            let fut = client.map(&mut operation);
            async move {
                match fut {
                    Ok(fut) => fut.await,
                    Err(error) => Err(error),
                }
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use wellspring_core::BackendConfig;
    use wellspring_testkit::ScriptedOp;

    fn transport() -> RetryableTransport {
        RetryableTransport::new(ErrorCounter::default()).with_policy(
            RetryPolicy::default()
                .with_base_delay(Duration::from_millis(1))
                .with_max_delay(Duration::from_millis(5)),
        )
    }

    #[tokio::test]
    async fn retries_network_failures_until_success() {
        let op = ScriptedOp::new([
            Err(RequestError::network("connection reset")),
            Err(RequestError::network("connection reset")),
            Ok(json!({"ok": true})),
        ]);
        let transport = transport();

        let result = transport
            .execute(&TransportOptions::default(), || op.invoke())
            .await
            .unwrap();

        assert_eq!(result, json!({"ok": true}));
        assert_eq!(op.calls(), 3);
    }

    #[tokio::test]
    async fn counter_tracks_consecutive_failures_and_resets_on_success() {
        let errors = ErrorCounter::default();
        let op = ScriptedOp::new([
            Err(RequestError::network("connection reset")),
            Err(RequestError::network("connection reset")),
            Ok(json!(1)),
        ]);
        let transport = RetryableTransport::new(errors.clone()).with_policy(
            RetryPolicy::default().with_base_delay(Duration::from_millis(1)),
        );

        transport
            .execute(&TransportOptions::default(), || op.invoke())
            .await
            .unwrap();

        assert_eq!(errors.get(), 0);
    }

    #[tokio::test]
    async fn exhausted_rate_limit_surfaces_with_attempt_count() {
        let op = ScriptedOp::new([
            Err(RequestError::from_status(429, "slow down")),
            Err(RequestError::from_status(429, "slow down")),
            Err(RequestError::from_status(429, "slow down")),
        ]);
        let opts = TransportOptions {
            max_retries: 2,
            ..TransportOptions::default()
        };

        let err = transport()
            .execute::<Value, _, _>(&opts, || op.invoke())
            .await
            .unwrap_err();

        assert_eq!(op.calls(), 3);
        assert!(matches!(
            err,
            RequestError::RateLimited { attempts: 3, .. }
        ));
    }

    #[tokio::test]
    async fn validation_failures_are_not_retried() {
        let op = ScriptedOp::new([Err(RequestError::from_status(422, "invalid payload"))]);

        let err = transport()
            .execute::<Value, _, _>(&TransportOptions::default(), || op.invoke())
            .await
            .unwrap_err();

        assert_eq!(op.calls(), 1);
        assert!(matches!(err, RequestError::Validation { status: 422, .. }));
    }

    #[tokio::test]
    async fn attempts_time_out_and_count_as_network_failures() {
        let opts = TransportOptions {
            timeout: Duration::from_millis(10),
            max_retries: 0,
            ..TransportOptions::default()
        };
        let errors = ErrorCounter::default();
        let transport = RetryableTransport::new(errors.clone());

        let err = transport
            .execute::<Value, _, _>(&opts, || futures::future::pending())
            .await
            .unwrap_err();

        assert!(matches!(err, RequestError::Timeout { .. }));
        assert_eq!(errors.get(), 1);
    }

    #[tokio::test]
    async fn execute_with_client_borrows_the_singleton_handle() {
        let registry = ClientRegistry::new(BackendConfig::new(
            "https://project.wellspring.dev",
            "anon-key",
        ));
        let transport = RetryableTransport::new(registry.error_counter());

        let header = transport
            .execute_with_client(&registry, &TransportOptions::default(), |client| async move {
                Ok(client.auth_header())
            })
            .await
            .unwrap();

        assert_eq!(header, "Bearer anon-key");
        assert_eq!(registry.stats().instance_count, 1);
    }

    #[tokio::test]
    async fn configuration_failures_from_the_registry_propagate() {
        let registry = ClientRegistry::new(BackendConfig::new("not-a-url", "anon-key"));
        let transport = RetryableTransport::new(registry.error_counter());

        let err = transport
            .execute_with_client::<Value, _, _>(
                &registry,
                &TransportOptions::default(),
                |_| async move { unreachable!("client construction must fail") },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, RequestError::Configuration { .. }));
    }
}
