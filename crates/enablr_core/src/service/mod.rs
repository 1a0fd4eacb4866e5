//! Use-case services on top of the store and transport seams.
//!
//! # Responsibility
//! - `change_service`: accept task-list writes and publish change events.
//! - `reconciler`: turn one change event into reminder deletions/creations.
//! - `consumer`: pull events from a transport and settle each delivery.
//!
//! # Invariants
//! - Services receive their store and transport handles; nothing is global.

pub mod change_service;
pub mod consumer;
pub mod reconciler;

pub use change_service::{ChangeDetector, ChangeError, ChangeResult};
pub use consumer::{ConsumerReport, EventConsumer, RECEIVE_BATCH};
pub use reconciler::{
    ReconcileError, ReconcileFailure, ReconcileReport, Reconciler, WritePhase,
};
