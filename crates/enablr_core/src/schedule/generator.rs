//! Reminder generator.
//!
//! # Responsibility
//! - Compute the remaining reminder instants of "today" for one task, where
//!   "today" is the calendar date of `now` in the individual's timezone.
//!
//! # Invariants
//! - Window bounds are resolved with the zone offset of the reminder date,
//!   not the offset in effect at `now`.
//! - Returned `due` values are whole seconds, strictly increasing and
//!   strictly after `now`.
//! - `frequency = N > 1` spreads N instants evenly from start to end.

use crate::model::reminder::ReminderInstance;
use crate::model::task::{TaskDefinition, TimeOfDay, ValidationError};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use std::error::Error;
use std::fmt::{Display, Formatter};

const READABLE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%:z";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    InvalidTimezone(String),
    InvalidTask(ValidationError),
    NonexistentLocalTime {
        task_id: String,
        date: NaiveDate,
        time: TimeOfDay,
    },
}

impl Display for ScheduleError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidTimezone(name) => write!(f, "unknown timezone `{name}`"),
            Self::InvalidTask(err) => write!(f, "{err}"),
            Self::NonexistentLocalTime {
                task_id,
                date,
                time,
            } => write!(
                f,
                "task `{task_id}` time {:02}:{:02} does not exist on {date}",
                time.h, time.m
            ),
        }
    }
}

impl Error for ScheduleError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidTask(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ValidationError> for ScheduleError {
    fn from(value: ValidationError) -> Self {
        Self::InvalidTask(value)
    }
}

/// Resolves an IANA zone name.
pub fn resolve_timezone(name: &str) -> Result<Tz, ScheduleError> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| ScheduleError::InvalidTimezone(name.to_string()))
}

/// Generates the future reminders of `task` for the local day containing `now`.
pub fn generate_reminders(
    individual_id: &str,
    task: &TaskDefinition,
    timezone: Tz,
    now: DateTime<Utc>,
) -> Result<Vec<ReminderInstance>, ScheduleError> {
    let dues = schedule_dues(task, timezone, now)?;
    let mut reminders = Vec::with_capacity(dues.len());

    for due in dues {
        let readable = match DateTime::from_timestamp(due, 0) {
            Some(instant) => instant
                .with_timezone(&timezone)
                .format(READABLE_FORMAT)
                .to_string(),
            None => due.to_string(),
        };
        reminders.push(ReminderInstance::pending(individual_id, task, due, readable));
    }

    Ok(reminders)
}

/// Computes the epoch-second due times of `task` that are still ahead of `now`.
pub fn schedule_dues(
    task: &TaskDefinition,
    timezone: Tz,
    now: DateTime<Utc>,
) -> Result<Vec<i64>, ScheduleError> {
    task.validate()?;

    let day = now.with_timezone(&timezone).date_naive();
    let earliest = local_instant(task, timezone, day, task.details.start_time)?;
    let latest = local_instant(task, timezone, day, task.details.end_time)?;

    let now_seconds = now.timestamp();
    let mut dues = Vec::new();
    for candidate in candidate_instants(earliest, latest, task.details.frequency) {
        let due = candidate.floor() as i64;
        if due <= now_seconds {
            continue;
        }
        if dues.last().is_some_and(|previous| due <= *previous) {
            continue;
        }
        dues.push(due);
    }

    Ok(dues)
}

/// Evenly spaced instants from `earliest` to `latest`, both inclusive.
///
/// Each candidate is computed from its index rather than by accumulating the
/// spacing, so exactly `frequency` values come out and the last one lands on
/// `latest`.
fn candidate_instants(earliest: i64, latest: i64, frequency: u32) -> Vec<f64> {
    if frequency <= 1 || latest <= earliest {
        return vec![earliest as f64];
    }

    let intervals = f64::from(frequency - 1);
    let distance = (latest - earliest) as f64 / intervals;
    (0..frequency)
        .map(|index| {
            if index == frequency - 1 {
                latest as f64
            } else {
                earliest as f64 + f64::from(index) * distance
            }
        })
        .collect()
}

fn local_instant(
    task: &TaskDefinition,
    timezone: Tz,
    day: NaiveDate,
    time: TimeOfDay,
) -> Result<i64, ScheduleError> {
    let nonexistent = || ScheduleError::NonexistentLocalTime {
        task_id: task.task_id.clone(),
        date: day,
        time,
    };

    let naive = day
        .and_hms_opt(u32::from(time.h), u32::from(time.m), 0)
        .ok_or_else(nonexistent)?;

    // Ambiguous (clocks going back) takes the first occurrence; a DST gap
    // moves the wall time forward by the usual one-hour shift.
    let resolved = timezone
        .from_local_datetime(&naive)
        .earliest()
        .or_else(|| {
            timezone
                .from_local_datetime(&(naive + Duration::hours(1)))
                .earliest()
        })
        .ok_or_else(nonexistent)?;

    Ok(resolved.timestamp())
}
