//! Wellspring Cache - Query result caching and request deduplication
//!
//! Two independent maps with same-key coherency guarantees:
//!
//! - [`QueryCache`]: tag-indexed, TTL-based cache of query results with
//!   explicit invalidation by tag or key. Reads never return a value past
//!   its TTL.
//! - [`RequestDeduplicator`]: collapses calls sharing a key into one
//!   underlying execution; every attached caller observes the identical
//!   resolution or rejection.
//!
//! The two are deliberately unaware of each other: while a cached value
//! for a key has expired and a refresh is in flight, a cache entry and a
//! dedup entry for the same logical query coexist.

#![forbid(unsafe_code)]

/// Request deduplication with time-window sharing
pub mod dedupe;

/// Tag-indexed TTL cache
pub mod query;

pub use dedupe::RequestDeduplicator;
pub use query::{CacheStats, QueryCache};
