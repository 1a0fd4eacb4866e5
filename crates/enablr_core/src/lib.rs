//! Core of the Enablr reminder scheduler.
//!
//! Task-list writes are diffed into per-task change events, carried over a
//! partitioned transport and reconciled into concrete reminder instances in
//! the store.

pub mod config;
pub mod db;
pub mod diff;
pub mod logging;
pub mod model;
pub mod repo;
pub mod retry;
pub mod schedule;
pub mod service;
pub mod transport;

pub use config::{ConfigError, CoreConfig};
pub use db::{open_db, open_db_in_memory, DbError};
pub use diff::{diff_task_lists, DetectedChange, DiffError};
pub use logging::{init_logging, logging_status, LogLevel, LoggingError};
pub use model::event::{ChangeEvent, EventError, UpdateType};
pub use model::individual::Individual;
pub use model::reminder::{ReminderInstance, ReminderKey};
pub use model::task::{TaskDefinition, TaskDetails, TimeOfDay, ValidationError};
pub use repo::sqlite_store::SqliteReminderStore;
pub use repo::store::{ReminderStore, StoreError, StoreResult, MAX_WRITE_CHUNK};
pub use retry::{BackoffConfig, RetryPolicy};
pub use schedule::{generate_reminders, ScheduleError};
pub use service::{
    ChangeDetector, ChangeError, ConsumerReport, EventConsumer, ReconcileError, ReconcileReport,
    Reconciler,
};
pub use transport::{EventPublisher, EventSource, InMemoryQueue, QueueSettings, TransportError};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
