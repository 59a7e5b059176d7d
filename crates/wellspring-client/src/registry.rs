//! Client registry.
//!
//! Owns the single live [`ClientHandle`] per process. The registry is an
//! explicit context object handed to the components that need the handle;
//! there is no module-level singleton, so tests and multi-tenant embedders
//! can run registries side by side.

use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use wellspring_core::{BackendConfig, RequestError};

use crate::handle::{ClientHandle, ListenerTable};
use crate::transport::ErrorCounter;

/// Read-only snapshot of the registry's lifecycle counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryStats {
    /// Total handles constructed over the registry's lifetime
    pub instance_count: u64,
    /// Whether a handle is currently live
    pub has_client: bool,
    /// When the current (or most recent) handle was constructed
    pub created_at: Option<SystemTime>,
    /// When the registry was last reset
    pub last_reset_at: Option<SystemTime>,
    /// Consecutive failed transport attempts since the last success
    pub consecutive_errors: u32,
}

#[derive(Default)]
struct RegistryState {
    handle: Option<Arc<ClientHandle>>,
    instance_count: u64,
    created_at: Option<SystemTime>,
    last_reset_at: Option<SystemTime>,
}

/// Owner of the single live backend client handle.
///
/// All mutation of the handle reference goes through the registry lock, so
/// overlapping forced replacements serialize: the last caller wins and
/// earlier handles are simply dropped (callers still holding an `Arc` keep
/// a valid session until they let go).
pub struct ClientRegistry {
    config: BackendConfig,
    state: Mutex<RegistryState>,
    listeners: Arc<ListenerTable>,
    errors: ErrorCounter,
}

impl ClientRegistry {
    /// Create a registry for the given backend configuration.
    ///
    /// The configuration is validated lazily when the first handle is
    /// constructed, so an invalid value surfaces at `get_client` time.
    pub fn new(config: BackendConfig) -> Self {
        Self {
            config,
            state: Mutex::new(RegistryState::default()),
            listeners: Arc::new(ListenerTable::new()),
            errors: ErrorCounter::default(),
        }
    }

    /// Create a registry from the process environment.
    pub fn from_env() -> Result<Self, RequestError> {
        Ok(Self::new(BackendConfig::from_env()?))
    }

    /// Return the live handle, constructing one lazily if needed.
    pub fn get_client(&self) -> Result<Arc<ClientHandle>, RequestError> {
        let handle = {
            let mut state = self.state.lock();
            if let Some(handle) = &state.handle {
                Arc::clone(handle)
            } else {
                self.construct(&mut state)?
            }
        };
        self.enforce_single_listener(&handle);
        Ok(handle)
    }

    /// Tear down the current handle (if any) and construct a fresh one.
    pub fn force_new_client(&self) -> Result<Arc<ClientHandle>, RequestError> {
        let handle = {
            let mut state = self.state.lock();
            if let Some(old) = state.handle.take() {
                debug!(discarded = old.instance_seq(), "replacing client handle");
            }
            self.construct(&mut state)?
        };
        self.enforce_single_listener(&handle);
        Ok(handle)
    }

    /// Tear down the current handle; the next `get_client` rebuilds lazily.
    pub fn reset_client(&self) {
        let mut state = self.state.lock();
        state.handle = None;
        state.last_reset_at = Some(SystemTime::now());
        info!("backend client reset");
    }

    /// Read-only lifecycle snapshot.
    pub fn stats(&self) -> RegistryStats {
        let state = self.state.lock();
        RegistryStats {
            instance_count: state.instance_count,
            has_client: state.handle.is_some(),
            created_at: state.created_at,
            last_reset_at: state.last_reset_at,
            consecutive_errors: self.errors.get(),
        }
    }

    /// The shared auth-listener table for this registry's handles.
    pub fn listener_table(&self) -> Arc<ListenerTable> {
        Arc::clone(&self.listeners)
    }

    /// Counter of consecutive failed transport attempts, shared with the
    /// transport so it shows up in [`RegistryStats`].
    pub fn error_counter(&self) -> ErrorCounter {
        self.errors.clone()
    }

    fn construct(&self, state: &mut RegistryState) -> Result<Arc<ClientHandle>, RequestError> {
        let instance_seq = state.instance_count + 1;
        let handle = Arc::new(ClientHandle::connect(
            &self.config,
            instance_seq,
            Arc::clone(&self.listeners),
        )?);
        state.instance_count = instance_seq;
        state.created_at = Some(SystemTime::now());
        state.handle = Some(Arc::clone(&handle));
        info!(instance_seq, url = %self.config.base_url(), "backend client ready");
        Ok(handle)
    }

    /// A second live auth listener means something constructed a handle
    /// behind the registry's back. Warn and prune down to the current one;
    /// this is never an error for the caller.
    fn enforce_single_listener(&self, current: &ClientHandle) {
        if self.listeners.len() > 1 {
            let pruned = self.listeners.prune_to(current.instance_seq());
            warn!(
                pruned,
                kept = current.instance_seq(),
                "multiple auth listeners detected; pruned to one"
            );
        }
    }
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}
