//! Individual model: a tracked person, their timezone and task list.
//!
//! # Invariants
//! - The task list is replaced wholesale, never merged.
//! - `task_id` values are unique within one task list.

use crate::model::task::{TaskDefinition, ValidationError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A tracked individual with the tasks reminders are generated from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Individual {
    pub individual_id: String,
    /// IANA zone name, e.g. `Australia/Melbourne`.
    pub timezone: String,
    #[serde(default)]
    pub tasks: Vec<TaskDefinition>,
}

impl Individual {
    pub fn new(individual_id: impl Into<String>, timezone: impl Into<String>) -> Self {
        Self {
            individual_id: individual_id.into(),
            timezone: timezone.into(),
            tasks: Vec::new(),
        }
    }

    pub fn with_tasks(mut self, tasks: Vec<TaskDefinition>) -> Self {
        self.tasks = tasks;
        self
    }

    pub fn find_task(&self, task_id: &str) -> Option<&TaskDefinition> {
        self.tasks.iter().find(|task| task.task_id == task_id)
    }

    /// Validates identity and every task in the list.
    ///
    /// The timezone is not resolved here; an unknown zone only fails
    /// scheduling for this individual.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.individual_id.trim().is_empty() {
            return Err(ValidationError::EmptyIndividualId);
        }
        validate_task_list(&self.tasks)
    }
}

/// Validates each task and rejects duplicate `task_id`s.
pub fn validate_task_list(tasks: &[TaskDefinition]) -> Result<(), ValidationError> {
    let mut seen = HashSet::with_capacity(tasks.len());
    for task in tasks {
        task.validate()?;
        if !seen.insert(task.task_id.as_str()) {
            return Err(ValidationError::DuplicateTaskId(task.task_id.clone()));
        }
    }
    Ok(())
}
