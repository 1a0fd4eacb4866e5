//! Domain model for individuals, task definitions and reminder instances.
//!
//! # Responsibility
//! - Define the records shared by the store, generator and reconciler.
//! - Validate task definitions before they are persisted or scheduled.
//!
//! # Invariants
//! - `task_id` is unique within one individual's task list.
//! - A reminder is identified by `(reminder_id, due)`, never by row order.
//! - Task `steps` keep their persisted order.

pub mod event;
pub mod individual;
pub mod reminder;
pub mod task;
