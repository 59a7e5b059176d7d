//! Wellspring Core - Foundation for the request-orchestration layer
//!
//! This crate provides the shared vocabulary the orchestration crates build
//! on: the error taxonomy with its retry classification, backend endpoint
//! configuration, the single consolidated retry/backoff primitive, a
//! cooperative cancellation token, and the injected clock capability.
//!
//! Nothing here talks to the network. The components that do
//! (`wellspring-client`, `wellspring-coordinator`) consume these types so
//! that retry classification and timing behavior are defined in exactly one
//! place.

#![forbid(unsafe_code)]

/// Cooperative cancellation token
pub mod cancel;

/// Injected clock capability with a deterministic default
pub mod clock;

/// Backend endpoint configuration
pub mod config;

/// Unified error taxonomy and retry classification
pub mod error;

/// Consolidated retry/backoff primitive
pub mod retry;

pub use cancel::CancelToken;
pub use clock::{Clock, SystemClock};
pub use config::BackendConfig;
pub use error::RequestError;
pub use retry::RetryPolicy;
