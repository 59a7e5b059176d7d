//! Wellspring Client - Backend client lifecycle and retryable transport
//!
//! This crate owns the two components that touch the network seam:
//!
//! - [`ClientRegistry`]: an explicit context object holding the single
//!   live [`ClientHandle`] per process, with lazy construction, forced
//!   replacement, reset, and duplicate auth-listener detection.
//! - [`RetryableTransport`]: drives caller-supplied backend operations
//!   under a per-attempt timeout with the consolidated retry/backoff
//!   policy from `wellspring-core`.
//!
//! Everything above this layer (caching, deduplication, queuing) borrows
//! the handle; only the registry constructs or destroys it.

#![forbid(unsafe_code)]

/// Backend client handle and auth-listener table
pub mod handle;

/// Registry owning the single live client handle
pub mod registry;

/// Retryable transport over caller-supplied operations
pub mod transport;

pub use handle::{ClientHandle, ListenerTable};
pub use registry::{ClientRegistry, RegistryStats};
pub use transport::{ErrorCounter, RetryableTransport, TransportOptions};
