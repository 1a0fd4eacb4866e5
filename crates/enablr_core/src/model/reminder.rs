//! Reminder instance model.
//!
//! # Invariants
//! - `(reminder_id, due)` is the identity of a reminder.
//! - `due` is whole epoch seconds.
//! - Reconciliation only deletes reminders with `completed == false`.

use crate::model::task::TaskDefinition;
use serde::{Deserialize, Serialize};

/// Builds the reminder series id shared by all instances of one task.
pub fn reminder_id(individual_id: &str, task_id: &str) -> String {
    format!("{individual_id}-{task_id}")
}

/// Composite store key of one reminder instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReminderKey {
    pub reminder_id: String,
    pub due: i64,
}

/// One scheduled occurrence of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderInstance {
    pub reminder_id: String,
    pub individual_id: String,
    pub task_id: String,
    /// Epoch seconds.
    pub due: i64,
    pub readable_timestamp: String,
    /// Task snapshot at generation time.
    pub details: TaskDefinition,
    pub completed: bool,
    #[serde(default)]
    pub note: String,
}

impl ReminderInstance {
    /// Creates an incomplete reminder with an empty note.
    pub fn pending(
        individual_id: &str,
        task: &TaskDefinition,
        due: i64,
        readable_timestamp: impl Into<String>,
    ) -> Self {
        Self {
            reminder_id: reminder_id(individual_id, &task.task_id),
            individual_id: individual_id.to_string(),
            task_id: task.task_id.clone(),
            due,
            readable_timestamp: readable_timestamp.into(),
            details: task.clone(),
            completed: false,
            note: String::new(),
        }
    }

    pub fn key(&self) -> ReminderKey {
        ReminderKey {
            reminder_id: self.reminder_id.clone(),
            due: self.due,
        }
    }
}
