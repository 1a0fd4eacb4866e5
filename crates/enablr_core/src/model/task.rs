//! Task definition model.
//!
//! # Responsibility
//! - Define the recurring task shape embedded in an individual.
//! - Validate the daily time window and frequency.
//!
//! # Invariants
//! - `end_time` is not earlier than `start_time` within the same day.
//! - `frequency` is at least one reminder per day.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Validation failure for task definitions and individuals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    EmptyTaskId,
    EmptyIndividualId,
    InvalidTimeOfDay { task_id: String, hour: u8, minute: u8 },
    InvalidTimeWindow { task_id: String },
    InvalidFrequency { task_id: String },
    DuplicateTaskId(String),
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyTaskId => write!(f, "task_id cannot be empty"),
            Self::EmptyIndividualId => write!(f, "individual_id cannot be empty"),
            Self::InvalidTimeOfDay {
                task_id,
                hour,
                minute,
            } => write!(
                f,
                "task `{task_id}` has invalid time of day {hour:02}:{minute:02}"
            ),
            Self::InvalidTimeWindow { task_id } => {
                write!(f, "task `{task_id}` ends before it starts")
            }
            Self::InvalidFrequency { task_id } => {
                write!(f, "task `{task_id}` frequency must be at least 1")
            }
            Self::DuplicateTaskId(task_id) => write!(f, "duplicate task_id `{task_id}`"),
        }
    }
}

impl Error for ValidationError {}

/// Local wall-clock time without a date, as stored on the wire (`{h, m}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeOfDay {
    pub h: u8,
    pub m: u8,
}

impl TimeOfDay {
    pub const fn new(h: u8, m: u8) -> Self {
        Self { h, m }
    }

    pub fn is_valid(&self) -> bool {
        self.h < 24 && self.m < 60
    }
}

/// Everything about a task except its identity.
///
/// Serialized field order is part of change detection: two details are the
/// same task revision only when their JSON encodings are byte-identical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDetails {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "startTime")]
    pub start_time: TimeOfDay,
    #[serde(rename = "endTime")]
    pub end_time: TimeOfDay,
    pub frequency: u32,
    #[serde(default)]
    pub steps: Vec<String>,
}

/// One recurring task owned by an individual.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub task_id: String,
    pub details: TaskDetails,
}

impl TaskDefinition {
    pub fn new(task_id: impl Into<String>, details: TaskDetails) -> Self {
        Self {
            task_id: task_id.into(),
            details,
        }
    }

    /// Checks the identity, time window and frequency of this task.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.task_id.trim().is_empty() {
            return Err(ValidationError::EmptyTaskId);
        }

        for time in [self.details.start_time, self.details.end_time] {
            if !time.is_valid() {
                return Err(ValidationError::InvalidTimeOfDay {
                    task_id: self.task_id.clone(),
                    hour: time.h,
                    minute: time.m,
                });
            }
        }

        if self.details.end_time < self.details.start_time {
            return Err(ValidationError::InvalidTimeWindow {
                task_id: self.task_id.clone(),
            });
        }

        if self.details.frequency == 0 {
            return Err(ValidationError::InvalidFrequency {
                task_id: self.task_id.clone(),
            });
        }

        Ok(())
    }

    /// Canonical encoding of `details` used to compare task revisions.
    pub fn details_fingerprint(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.details)
    }
}
