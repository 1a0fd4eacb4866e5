//! Store adapter contract shared by the change detector and the reconciler.
//!
//! # Responsibility
//! - Define keyed access to individuals and reminder instances.
//! - Bound batch writes to the backend's per-call item limit.
//!
//! # Invariants
//! - `batch_delete`/`batch_put` accept at most `MAX_WRITE_CHUNK` items.
//! - `batch_put` never overwrites an existing `(reminder_id, due)` row.
//! - `batch_delete` never removes a completed reminder.

use crate::db::DbError;
use crate::model::individual::Individual;
use crate::model::reminder::{ReminderInstance, ReminderKey};
use crate::model::task::ValidationError;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Per-call item limit for batch writes.
pub const MAX_WRITE_CHUNK: usize = 25;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug)]
pub enum StoreError {
    Db(DbError),
    Validation(ValidationError),
    InvalidData(String),
    ChunkTooLarge { len: usize, max: usize },
    /// Backend did not answer in time or refused the call for now.
    Unavailable(String),
}

impl StoreError {
    /// Whether repeating the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Db(err) => err.is_transient(),
            Self::Unavailable(_) => true,
            Self::Validation(_) | Self::InvalidData(_) | Self::ChunkTooLarge { .. } => false,
        }
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Validation(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
            Self::ChunkTooLarge { len, max } => {
                write!(f, "batch of {len} items exceeds the limit of {max}")
            }
            Self::Unavailable(message) => write!(f, "store unavailable: {message}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Validation(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<ValidationError> for StoreError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

/// Keyed access to individuals and their reminder instances.
pub trait ReminderStore {
    fn get_individual(&self, individual_id: &str) -> StoreResult<Option<Individual>>;

    /// Inserts or wholesale replaces an individual and its task list.
    fn put_individual(&self, individual: &Individual) -> StoreResult<()>;

    /// Returns whether a row was removed.
    fn delete_individual(&self, individual_id: &str) -> StoreResult<bool>;

    fn scan_all_individuals(&self) -> StoreResult<Vec<Individual>>;

    /// Incomplete reminders of one series with `due > after_epoch`, by `due`.
    fn query_future_incomplete_reminders(
        &self,
        reminder_id: &str,
        after_epoch: i64,
    ) -> StoreResult<Vec<ReminderInstance>>;

    /// All reminders of one series with `due > since_epoch`, by `due`.
    fn list_reminders_since(
        &self,
        reminder_id: &str,
        since_epoch: i64,
    ) -> StoreResult<Vec<ReminderInstance>>;

    fn batch_delete(&self, keys: &[ReminderKey]) -> StoreResult<()>;

    fn batch_put(&self, items: &[ReminderInstance]) -> StoreResult<()>;

    /// Marks one reminder complete with a caregiver note.
    ///
    /// Returns `false` when no reminder has this key.
    fn complete_reminder(&self, key: &ReminderKey, note: &str) -> StoreResult<bool>;
}

impl<S: ReminderStore + ?Sized> ReminderStore for &S {
    fn get_individual(&self, individual_id: &str) -> StoreResult<Option<Individual>> {
        (**self).get_individual(individual_id)
    }

    fn put_individual(&self, individual: &Individual) -> StoreResult<()> {
        (**self).put_individual(individual)
    }

    fn delete_individual(&self, individual_id: &str) -> StoreResult<bool> {
        (**self).delete_individual(individual_id)
    }

    fn scan_all_individuals(&self) -> StoreResult<Vec<Individual>> {
        (**self).scan_all_individuals()
    }

    fn query_future_incomplete_reminders(
        &self,
        reminder_id: &str,
        after_epoch: i64,
    ) -> StoreResult<Vec<ReminderInstance>> {
        (**self).query_future_incomplete_reminders(reminder_id, after_epoch)
    }

    fn list_reminders_since(
        &self,
        reminder_id: &str,
        since_epoch: i64,
    ) -> StoreResult<Vec<ReminderInstance>> {
        (**self).list_reminders_since(reminder_id, since_epoch)
    }

    fn batch_delete(&self, keys: &[ReminderKey]) -> StoreResult<()> {
        (**self).batch_delete(keys)
    }

    fn batch_put(&self, items: &[ReminderInstance]) -> StoreResult<()> {
        (**self).batch_put(items)
    }

    fn complete_reminder(&self, key: &ReminderKey, note: &str) -> StoreResult<bool> {
        (**self).complete_reminder(key, note)
    }
}

/// Splits `items` into write chunks of at most `max` items, in order.
pub fn write_chunks<T>(items: &[T], max: usize) -> std::slice::Chunks<'_, T> {
    items.chunks(max.max(1))
}

/// Rejects batches above the per-call limit.
pub fn ensure_chunk_size(len: usize) -> StoreResult<()> {
    if len > MAX_WRITE_CHUNK {
        return Err(StoreError::ChunkTooLarge {
            len,
            max: MAX_WRITE_CHUNK,
        });
    }
    Ok(())
}
