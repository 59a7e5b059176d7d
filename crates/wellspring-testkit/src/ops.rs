//! Scripted backend operations.
//!
//! A [`ScriptedOp`] plays back a fixed sequence of results, one per
//! invocation, and counts how often it was called. Tests use it to force
//! specific failure sequences through the transport and coordinator.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use serde_json::Value;
use wellspring_core::RequestError;

/// Replays a fixed result sequence and counts invocations.
#[derive(Debug)]
pub struct ScriptedOp {
    script: Mutex<VecDeque<Result<Value, RequestError>>>,
    fallback: Option<Value>,
    calls: AtomicU32,
}

impl ScriptedOp {
    /// Build an op from the results to return, in order.
    pub fn new(script: impl IntoIterator<Item = Result<Value, RequestError>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback: None,
            calls: AtomicU32::new(0),
        }
    }

    /// An op that always succeeds with `value`.
    pub fn always_ok(value: Value) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Some(value),
            calls: AtomicU32::new(0),
        }
    }

    /// Number of invocations so far.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Play the next scripted result.
    ///
    /// Once the script is exhausted the op returns its fallback value if
    /// one was configured, otherwise it fails with a network error so a
    /// test that over-runs its script fails loudly instead of hanging.
    pub async fn invoke(&self) -> Result<Value, RequestError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(result) = self.script.lock().pop_front() {
            return result;
        }
        match &self.fallback {
            Some(value) => Ok(value.clone()),
            None => Err(RequestError::network("scripted results exhausted")),
        }
    }
}
