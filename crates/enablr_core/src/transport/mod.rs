//! Event transport between change detection and reconciliation.
//!
//! # Responsibility
//! - Define the publish side (batched, at most `MAX_PUBLISH_BATCH` per call)
//!   and the consume side (receive, acknowledge, release, dead-letter).
//! - Provide an in-process FIFO queue with per-partition ordering.
//!
//! # Invariants
//! - Messages of one partition are delivered in publish order, one at a time.
//! - Delivery is at-least-once: an unacknowledged message comes back.

pub mod memory_queue;
pub mod publisher;

pub use memory_queue::{DeadLetter, InMemoryQueue, QueueSettings};
pub use publisher::{
    publish_all, Delivery, EventPublisher, EventSource, OutboundEvent, TransportError,
    MAX_PUBLISH_BATCH,
};
