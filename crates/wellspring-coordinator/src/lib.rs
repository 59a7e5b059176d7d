//! Wellspring Coordinator - Prioritized request queue and read-path facade
//!
//! The [`Coordinator`] is the entry point the rest of the application
//! calls: it queues operations by priority, bounds concurrency, reacts to
//! rate-limit and network failures with cooldowns and lifecycle events,
//! and wires the read path through the query cache and deduplicator before
//! anything touches the transport.
//!
//! Queue semantics: strict priority across tiers, FIFO within a tier,
//! in-flight operations are never preempted. Pausing stops dequeues only;
//! active operations run to completion.

#![forbid(unsafe_code)]

/// Coordinator implementation and read-path facade
pub mod coordinator;

/// Lifecycle events and the typed observer surface
pub mod events;

/// Priority lanes and queued operation bookkeeping
pub mod queue;

pub use coordinator::{Coordinator, CoordinatorConfig, CoordinatorStatus};
pub use events::{CoordinatorEvent, EventBus, Subscription};
pub use queue::{OperationOptions, Priority};
