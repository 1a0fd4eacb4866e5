//! Task-list change detection.
//!
//! # Responsibility
//! - Reconstruct per-task CREATE/UPDATE/DELETE events from two full
//!   task-list snapshots of one individual.
//!
//! # Invariants
//! - A snapshot with duplicate `task_id`s is rejected, never diffed.
//! - Each `task_id` yields at most one event per diff.

pub mod change_detector;

pub use change_detector::{diff_task_lists, touch_all, DetectedChange, DiffError};
