//! Time-window scheduling.
//!
//! # Responsibility
//! - Turn a task's daily window and frequency into concrete reminder instants.
//! - Normalize epoch values received from external callers.
//!
//! # Invariants
//! - Generation is pure: no I/O, no clock reads, no shared state.

pub mod epoch;
pub mod generator;

pub use generator::{generate_reminders, resolve_timezone, schedule_dues, ScheduleError};
