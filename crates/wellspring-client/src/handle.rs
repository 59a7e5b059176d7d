//! Backend client handle.
//!
//! A [`ClientHandle`] is the long-lived session object every backend call
//! goes through. Construction registers exactly one auth listener in the
//! shared [`ListenerTable`]; the registry watches that table to detect a
//! handle constructed behind its back.

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use tracing::{debug, trace};
use wellspring_core::{BackendConfig, RequestError};

/// Live auth-listener instance sequence numbers, one per constructed handle.
#[derive(Debug, Default)]
pub struct ListenerTable {
    listeners: Mutex<Vec<u64>>,
}

impl ListenerTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live auth listeners.
    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Whether no listeners are registered.
    pub fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }

    fn register(&self, instance_seq: u64) {
        self.listeners.lock().push(instance_seq);
    }

    fn deregister(&self, instance_seq: u64) {
        self.listeners.lock().retain(|seq| *seq != instance_seq);
    }

    /// Drop every listener except `keep`, returning how many were removed.
    pub(crate) fn prune_to(&self, keep: u64) -> usize {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|seq| *seq == keep);
        before - listeners.len()
    }
}

/// Long-lived session handle for the hosted backend.
///
/// Constructed by [`crate::ClientRegistry`]; other components borrow it
/// via `Arc`. A handle that outlives its replacement stays valid for the
/// callers still holding it and deregisters its listener on drop.
pub struct ClientHandle {
    base_url: String,
    api_key: String,
    instance_seq: u64,
    created_at: SystemTime,
    listeners: Arc<ListenerTable>,
}

impl ClientHandle {
    /// Validate the configuration and open a session.
    ///
    /// Only the registry should call this in production code; the shared
    /// listener table exists so a handle constructed anywhere else is
    /// still detected and pruned.
    pub fn connect(
        config: &BackendConfig,
        instance_seq: u64,
        listeners: Arc<ListenerTable>,
    ) -> Result<Self, RequestError> {
        config.validate()?;
        listeners.register(instance_seq);
        debug!(instance_seq, url = %config.base_url(), "backend client constructed");
        Ok(Self {
            base_url: config.base_url().to_string(),
            api_key: config.api_key().to_string(),
            instance_seq,
            created_at: SystemTime::now(),
            listeners,
        })
    }

    /// The backend base URL this handle talks to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Monotonically increasing sequence number assigned by the registry.
    pub fn instance_seq(&self) -> u64 {
        self.instance_seq
    }

    /// When this handle was constructed.
    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// `Authorization` header value for outgoing requests.
    pub fn auth_header(&self) -> String {
        format!("Bearer {}", self.api_key)
    }

    /// Absolute URL for a backend path.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        self.listeners.deregister(self.instance_seq);
        trace!(instance_seq = self.instance_seq, "backend client dropped");
    }
}

// Keep the API key out of logs.
impl fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandle")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("instance_seq", &self.instance_seq)
            .field("created_at", &self.created_at)
            .finish()
    }
}
