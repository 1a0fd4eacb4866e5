//! Task-list writes with change detection.
//!
//! # Responsibility
//! - Accept whole-snapshot writes of an individual's task list.
//! - Persist the snapshot, derive per-task change events and publish them.
//!
//! # Invariants
//! - A snapshot is persisted before any of its events is published; a lost
//!   publish is reported with the events that still need sending.
//! - Every write carries a fresh write id. Dedup ids are scoped to it, so
//!   only a resend of the same write is collapsed by the transport.
//! - Invalid snapshots (bad tasks, duplicate ids, unknown zone) are rejected
//!   before anything is written.

use crate::diff::{diff_task_lists, touch_all, DetectedChange, DiffError};
use crate::model::event::{ChangeEvent, UpdateType, ALL_PARTITION_KEY};
use crate::model::individual::Individual;
use crate::model::task::{TaskDefinition, ValidationError};
use crate::repo::store::{ReminderStore, StoreError};
use crate::schedule::{resolve_timezone, ScheduleError};
use crate::transport::{publish_all, EventPublisher, OutboundEvent, TransportError};
use chrono::{DateTime, Utc};
use log::{error, info};
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

#[derive(Debug)]
pub enum ChangeError {
    Validation(ValidationError),
    InvalidTimezone(ScheduleError),
    Diff(DiffError),
    Store(StoreError),
    IndividualNotFound(String),
    IndividualExists(String),
    /// The snapshot was saved but some events never reached the transport.
    /// Pass `write_id` and `unpublished` to [`ChangeDetector::resend`].
    Publish {
        write_id: Uuid,
        unpublished: Vec<DetectedChange>,
        source: TransportError,
    },
}

impl Display for ChangeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::InvalidTimezone(err) => write!(f, "{err}"),
            Self::Diff(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "{err}"),
            Self::IndividualNotFound(id) => write!(f, "individual not found: {id}"),
            Self::IndividualExists(id) => write!(f, "individual already exists: {id}"),
            Self::Publish {
                unpublished,
                source,
                ..
            } => write!(
                f,
                "snapshot saved but {} event(s) were not published: {source}",
                unpublished.len()
            ),
        }
    }
}

impl Error for ChangeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::InvalidTimezone(err) => Some(err),
            Self::Diff(err) => Some(err),
            Self::Store(err) => Some(err),
            Self::Publish { source, .. } => Some(source),
            Self::IndividualNotFound(_) | Self::IndividualExists(_) => None,
        }
    }
}

impl From<ValidationError> for ChangeError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DiffError> for ChangeError {
    fn from(value: DiffError) -> Self {
        Self::Diff(value)
    }
}

impl From<StoreError> for ChangeError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

pub type ChangeResult<T> = Result<T, ChangeError>;

/// Entry point for task-list writes.
pub struct ChangeDetector<S: ReminderStore, P: EventPublisher> {
    store: S,
    publisher: P,
}

impl<S: ReminderStore, P: EventPublisher> ChangeDetector<S, P> {
    pub fn new(store: S, publisher: P) -> Self {
        Self { store, publisher }
    }

    /// Stores a new individual; every task becomes a CREATE.
    pub fn create_individual(&self, individual: &Individual) -> ChangeResult<Vec<DetectedChange>> {
        check_snapshot(individual)?;
        if self.store.get_individual(&individual.individual_id)?.is_some() {
            return Err(ChangeError::IndividualExists(
                individual.individual_id.clone(),
            ));
        }

        let changes = diff_task_lists(
            &individual.individual_id,
            None,
            Some(individual.tasks.as_slice()),
        )?;
        self.store.put_individual(individual)?;
        self.publish("create_individual", &individual.individual_id, changes)
    }

    /// Creates or overwrites an individual, timezone included.
    ///
    /// A timezone change moves every reminder, so each surviving task is
    /// reported as updated even when its details did not change.
    pub fn save_individual(&self, individual: &Individual) -> ChangeResult<Vec<DetectedChange>> {
        check_snapshot(individual)?;
        let previous = self.store.get_individual(&individual.individual_id)?;

        let mut changes = diff_task_lists(
            &individual.individual_id,
            previous.as_ref().map(|old| old.tasks.as_slice()),
            Some(individual.tasks.as_slice()),
        )?;
        if let Some(previous) = &previous {
            if previous.timezone != individual.timezone {
                changes = with_all_touched(individual, changes)?;
            }
        }

        self.store.put_individual(individual)?;
        self.publish("save_individual", &individual.individual_id, changes)
    }

    /// Replaces the task list of an existing individual.
    pub fn replace_tasks(
        &self,
        individual_id: &str,
        new_tasks: Vec<TaskDefinition>,
    ) -> ChangeResult<Vec<DetectedChange>> {
        let Some(previous) = self.store.get_individual(individual_id)? else {
            return Err(ChangeError::IndividualNotFound(individual_id.to_string()));
        };

        let updated = Individual {
            tasks: new_tasks,
            ..previous.clone()
        };
        updated.validate()?;

        let changes = diff_task_lists(
            individual_id,
            Some(previous.tasks.as_slice()),
            Some(updated.tasks.as_slice()),
        )?;
        if changes.is_empty() {
            info!(
                "event=replace_tasks module=change_service status=skip individual_id={individual_id} reason=unchanged"
            );
            return Ok(changes);
        }

        self.store.put_individual(&updated)?;
        self.publish("replace_tasks", individual_id, changes)
    }

    /// Removes an individual; every task becomes a DELETE.
    pub fn delete_individual(&self, individual_id: &str) -> ChangeResult<Vec<DetectedChange>> {
        let Some(previous) = self.store.get_individual(individual_id)? else {
            return Err(ChangeError::IndividualNotFound(individual_id.to_string()));
        };

        let changes = diff_task_lists(individual_id, Some(previous.tasks.as_slice()), None)?;
        self.store.delete_individual(individual_id)?;
        self.publish("delete_individual", individual_id, changes)
    }

    /// Publishes a sweep over every individual.
    ///
    /// `requested_at` is part of the dedup id, so repeated requests for the
    /// same instant collapse into one sweep.
    pub fn request_sweep(&self, requested_at: DateTime<Utc>) -> ChangeResult<()> {
        let sweep = DetectedChange {
            event: ChangeEvent::All {
                update_type: UpdateType::Update,
            },
            revision: requested_at.timestamp().to_string().into_bytes(),
        };
        // The request time alone identifies a sweep.
        self.publish_write("request_sweep", ALL_PARTITION_KEY, Uuid::nil(), vec![sweep])?;
        Ok(())
    }

    /// Sends events left over from a failed write again.
    ///
    /// Events of that write which did reach the transport keep their dedup
    /// ids and are dropped there instead of being delivered twice.
    pub fn resend(
        &self,
        write_id: Uuid,
        changes: Vec<DetectedChange>,
    ) -> ChangeResult<Vec<DetectedChange>> {
        let partition = changes
            .first()
            .map(|change| change.event.partition_key().to_string())
            .unwrap_or_default();
        self.publish_write("resend", &partition, write_id, changes)
    }

    fn publish(
        &self,
        operation: &str,
        individual_id: &str,
        changes: Vec<DetectedChange>,
    ) -> ChangeResult<Vec<DetectedChange>> {
        self.publish_write(operation, individual_id, Uuid::new_v4(), changes)
    }

    fn publish_write(
        &self,
        operation: &str,
        individual_id: &str,
        write_id: Uuid,
        mut changes: Vec<DetectedChange>,
    ) -> ChangeResult<Vec<DetectedChange>> {
        let outbound: Vec<OutboundEvent> = changes
            .iter()
            .map(|change| OutboundEvent::from_change(change, &write_id))
            .collect();

        match publish_all(&self.publisher, &outbound) {
            Ok(published) => {
                info!(
                    "event={operation} module=change_service status=ok individual_id={individual_id} write_id={write_id} changes={published}"
                );
                Ok(changes)
            }
            Err((published, source)) => {
                error!(
                    "event={operation} module=change_service status=error individual_id={individual_id} write_id={write_id} published={published} pending={} error={source}",
                    changes.len() - published
                );
                Err(ChangeError::Publish {
                    write_id,
                    unpublished: changes.split_off(published),
                    source,
                })
            }
        }
    }
}

fn check_snapshot(individual: &Individual) -> ChangeResult<()> {
    individual.validate()?;
    resolve_timezone(&individual.timezone).map_err(ChangeError::InvalidTimezone)?;
    Ok(())
}

/// Adds an UPDATE for every task the diff left untouched, keeping DELETEs
/// last.
fn with_all_touched(
    individual: &Individual,
    changes: Vec<DetectedChange>,
) -> ChangeResult<Vec<DetectedChange>> {
    let (mut merged, deletes): (Vec<_>, Vec<_>) = changes
        .into_iter()
        .partition(|change| change.event.update_type() != UpdateType::Delete);

    let touched: HashSet<String> = merged
        .iter()
        .filter_map(|change| match &change.event {
            ChangeEvent::Individual { task_id, .. } => Some(task_id.clone()),
            ChangeEvent::All { .. } => None,
        })
        .collect();
    let untouched: Vec<TaskDefinition> = individual
        .tasks
        .iter()
        .filter(|task| !touched.contains(&task.task_id))
        .cloned()
        .collect();

    merged.extend(touch_all(&individual.individual_id, &untouched)?);
    merged.extend(deletes);
    Ok(merged)
}
