//! Snapshot diff between an old and a new task list.
//!
//! `details` are compared by their canonical JSON encoding, so any field
//! change, including step order, counts as an update.

use crate::model::event::{ChangeEvent, UpdateType};
use crate::model::task::{TaskDefinition, ValidationError};
use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

#[derive(Debug)]
pub enum DiffError {
    Validation(ValidationError),
    Encoding(serde_json::Error),
}

impl Display for DiffError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Encoding(err) => write!(f, "failed to encode task details: {err}"),
        }
    }
}

impl Error for DiffError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Encoding(err) => Some(err),
        }
    }
}

impl From<ValidationError> for DiffError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<serde_json::Error> for DiffError {
    fn from(value: serde_json::Error) -> Self {
        Self::Encoding(value)
    }
}

/// One change event plus the task revision it was derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedChange {
    pub event: ChangeEvent,
    /// Canonical `details` encoding: the new revision for CREATE/UPDATE,
    /// the removed one for DELETE.
    pub revision: Vec<u8>,
}

impl DetectedChange {
    /// Dedup id of this change within one write.
    ///
    /// The same change sent again under the same `write_id` keeps its id;
    /// an identical change from a later write gets a new one.
    pub fn dedup_id(&self, write_id: &Uuid) -> Uuid {
        let mut revision = self.revision.clone();
        revision.push(b'|');
        revision.extend_from_slice(write_id.as_bytes());
        self.event.dedup_id(&revision)
    }
}

/// Diffs two snapshots of one individual's task list.
///
/// `None` stands for "no snapshot": `old = None` is a newly created
/// individual, `new = None` a removed one.
///
/// Events come out as CREATEs and UPDATEs in new-snapshot order, then
/// DELETEs in old-snapshot order.
pub fn diff_task_lists(
    individual_id: &str,
    old: Option<&[TaskDefinition]>,
    new: Option<&[TaskDefinition]>,
) -> Result<Vec<DetectedChange>, DiffError> {
    let old = old.unwrap_or_default();
    let new = new.unwrap_or_default();
    ensure_unique_ids(old)?;
    ensure_unique_ids(new)?;

    let old_by_id: HashMap<&str, &TaskDefinition> = old
        .iter()
        .map(|task| (task.task_id.as_str(), task))
        .collect();
    let new_ids: HashSet<&str> = new.iter().map(|task| task.task_id.as_str()).collect();

    let mut created = Vec::new();
    let mut updated = Vec::new();
    for task in new {
        let revision = task.details_fingerprint()?;
        match old_by_id.get(task.task_id.as_str()) {
            None => created.push(change(individual_id, task, UpdateType::Create, revision)),
            Some(previous) => {
                if previous.details_fingerprint()? != revision {
                    updated.push(change(individual_id, task, UpdateType::Update, revision));
                }
            }
        }
    }

    let mut deleted = Vec::new();
    for task in old
        .iter()
        .filter(|task| !new_ids.contains(task.task_id.as_str()))
    {
        let revision = task.details_fingerprint()?;
        deleted.push(change(individual_id, task, UpdateType::Delete, revision));
    }

    created.extend(updated);
    created.extend(deleted);
    Ok(created)
}

/// Marks every task as updated, e.g. after the individual moved timezone.
pub fn touch_all(
    individual_id: &str,
    tasks: &[TaskDefinition],
) -> Result<Vec<DetectedChange>, DiffError> {
    tasks
        .iter()
        .map(|task| {
            let revision = task.details_fingerprint()?;
            Ok(change(individual_id, task, UpdateType::Update, revision))
        })
        .collect()
}

fn change(
    individual_id: &str,
    task: &TaskDefinition,
    update_type: UpdateType,
    revision: Vec<u8>,
) -> DetectedChange {
    DetectedChange {
        event: ChangeEvent::individual(individual_id, task.task_id.as_str(), update_type),
        revision,
    }
}

fn ensure_unique_ids(tasks: &[TaskDefinition]) -> Result<(), ValidationError> {
    let mut seen = HashSet::with_capacity(tasks.len());
    for task in tasks {
        if !seen.insert(task.task_id.as_str()) {
            return Err(ValidationError::DuplicateTaskId(task.task_id.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{diff_task_lists, touch_all, DiffError};
    use crate::model::event::{ChangeEvent, UpdateType};
    use crate::model::task::{TaskDefinition, TaskDetails, TimeOfDay, ValidationError};
    use uuid::Uuid;

    fn task(task_id: &str, name: &str) -> TaskDefinition {
        TaskDefinition::new(
            task_id,
            TaskDetails {
                name: name.to_string(),
                description: String::new(),
                start_time: TimeOfDay::new(8, 0),
                end_time: TimeOfDay::new(12, 0),
                frequency: 3,
                steps: vec!["one".to_string(), "two".to_string()],
            },
        )
    }

    fn events(old: Option<&[TaskDefinition]>, new: Option<&[TaskDefinition]>) -> Vec<ChangeEvent> {
        diff_task_lists("ind-1", old, new)
            .unwrap()
            .into_iter()
            .map(|change| change.event)
            .collect()
    }

    #[test]
    fn identical_snapshots_yield_nothing() {
        let old = vec![task("a", "d1")];
        let new = vec![task("a", "d1")];
        assert!(events(Some(old.as_slice()), Some(new.as_slice())).is_empty());
    }

    #[test]
    fn changed_details_yield_one_update() {
        let old = vec![task("a", "d1")];
        let new = vec![task("a", "d2")];
        assert_eq!(
            events(Some(old.as_slice()), Some(new.as_slice())),
            vec![ChangeEvent::individual("ind-1", "a", UpdateType::Update)]
        );
    }

    #[test]
    fn reordered_steps_count_as_update() {
        let old = vec![task("a", "d1")];
        let mut changed = task("a", "d1");
        changed.details.steps.reverse();
        assert_eq!(
            events(Some(old.as_slice()), Some(std::slice::from_ref(&changed))),
            vec![ChangeEvent::individual("ind-1", "a", UpdateType::Update)]
        );
    }

    #[test]
    fn added_task_yields_one_create() {
        let old = vec![task("a", "d1")];
        let new = vec![task("a", "d1"), task("b", "d1")];
        assert_eq!(
            events(Some(old.as_slice()), Some(new.as_slice())),
            vec![ChangeEvent::individual("ind-1", "b", UpdateType::Create)]
        );
    }

    #[test]
    fn removed_task_yields_one_delete() {
        let old = vec![task("a", "d1"), task("b", "d1")];
        let new = vec![task("a", "d1")];
        assert_eq!(
            events(Some(old.as_slice()), Some(new.as_slice())),
            vec![ChangeEvent::individual("ind-1", "b", UpdateType::Delete)]
        );
    }

    #[test]
    fn task_order_does_not_matter() {
        let old = vec![task("a", "d1"), task("b", "d1")];
        let new = vec![task("b", "d1"), task("a", "d1")];
        assert!(events(Some(old.as_slice()), Some(new.as_slice())).is_empty());
    }

    #[test]
    fn missing_snapshots_mean_create_all_or_delete_all() {
        let tasks = vec![task("a", "d1"), task("b", "d1")];

        assert_eq!(
            events(None, Some(tasks.as_slice())),
            vec![
                ChangeEvent::individual("ind-1", "a", UpdateType::Create),
                ChangeEvent::individual("ind-1", "b", UpdateType::Create),
            ]
        );
        assert_eq!(
            events(Some(tasks.as_slice()), None),
            vec![
                ChangeEvent::individual("ind-1", "a", UpdateType::Delete),
                ChangeEvent::individual("ind-1", "b", UpdateType::Delete),
            ]
        );
    }

    #[test]
    fn mixed_changes_group_creates_updates_then_deletes() {
        let old = vec![task("keep", "d1"), task("edit", "d1"), task("drop", "d1")];
        let new = vec![task("edit", "d2"), task("add", "d1"), task("keep", "d1")];

        assert_eq!(
            events(Some(old.as_slice()), Some(new.as_slice())),
            vec![
                ChangeEvent::individual("ind-1", "add", UpdateType::Create),
                ChangeEvent::individual("ind-1", "edit", UpdateType::Update),
                ChangeEvent::individual("ind-1", "drop", UpdateType::Delete),
            ]
        );
    }

    #[test]
    fn duplicate_task_ids_are_a_validation_error() {
        let new = vec![task("a", "d1"), task("a", "d2")];
        let err = diff_task_lists("ind-1", None, Some(new.as_slice())).unwrap_err();
        assert!(matches!(
            err,
            DiffError::Validation(ValidationError::DuplicateTaskId(id)) if id == "a"
        ));
    }

    #[test]
    fn dedup_ids_follow_revision_and_write() {
        let first = diff_task_lists("ind-1", None, Some(&[task("a", "d1")][..])).unwrap();
        let again = diff_task_lists("ind-1", None, Some(&[task("a", "d1")][..])).unwrap();
        let edited = diff_task_lists("ind-1", None, Some(&[task("a", "d2")][..])).unwrap();

        let write = Uuid::from_u128(1);

        assert_eq!(first[0].dedup_id(&write), again[0].dedup_id(&write));
        assert_ne!(first[0].dedup_id(&write), edited[0].dedup_id(&write));
        assert_ne!(
            first[0].dedup_id(&write),
            again[0].dedup_id(&Uuid::from_u128(2))
        );
    }

    #[test]
    fn touch_all_updates_every_task() {
        let changes = touch_all("ind-1", &[task("a", "d1"), task("b", "d1")]).unwrap();
        assert_eq!(changes.len(), 2);
        assert!(changes
            .iter()
            .all(|change| change.event.update_type() == UpdateType::Update));
    }
}
