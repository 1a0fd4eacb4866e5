//! Reminder reconciliation.
//!
//! # Responsibility
//! - Bring stored reminder instances in line with current task definitions
//!   for one change event (or one full sweep).
//!
//! # Invariants
//! - Deletions are applied before creations within one pass, and creations
//!   are skipped when any deletion chunk could not be written.
//! - Only incomplete reminders with `due > now` are ever deleted.
//! - Store writes go out in chunks of at most `MAX_WRITE_CHUNK`; each chunk
//!   is retried on its own and earlier chunks stay committed.
//! - A failure in one task never stops sibling tasks of a sweep; failures
//!   are collected and reported once at the end.

use crate::model::event::{ChangeEvent, UpdateType};
use crate::model::individual::Individual;
use crate::model::reminder::{reminder_id, ReminderInstance, ReminderKey};
use crate::model::task::TaskDefinition;
use crate::repo::store::{write_chunks, ReminderStore, StoreError, MAX_WRITE_CHUNK};
use crate::retry::{thread_sleep, RetryPolicy};
use crate::schedule::{generate_reminders, resolve_timezone, ScheduleError};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use log::{error, info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::{Duration, Instant};

/// Counts of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub tasks_processed: usize,
    /// Individuals or tasks that no longer exist.
    pub skipped: usize,
    pub deleted: usize,
    pub created: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePhase {
    Delete,
    Create,
}

impl WritePhase {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Delete => "delete",
            Self::Create => "create",
        }
    }
}

/// One problem found during a pass.
#[derive(Debug)]
pub enum ReconcileFailure {
    /// A read the pass depends on failed after retries.
    Read { scope: String, error: StoreError },
    /// Reminders for one individual or task could not be computed.
    Schedule {
        individual_id: String,
        task_id: Option<String>,
        error: ScheduleError,
    },
    /// A write chunk failed after retries.
    Write {
        phase: WritePhase,
        chunk_index: usize,
        items: usize,
        attempts: u32,
        error: StoreError,
    },
}

impl ReconcileFailure {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Read { error, .. } | Self::Write { error, .. } => error.is_retryable(),
            Self::Schedule { .. } => false,
        }
    }
}

impl Display for ReconcileFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read { scope, error } => write!(f, "read {scope} failed: {error}"),
            Self::Schedule {
                individual_id,
                task_id,
                error,
            } => match task_id {
                Some(task_id) => write!(f, "task {individual_id}/{task_id}: {error}"),
                None => write!(f, "individual {individual_id}: {error}"),
            },
            Self::Write {
                phase,
                chunk_index,
                items,
                attempts,
                error,
            } => write!(
                f,
                "{} chunk {chunk_index} ({items} items) failed after {attempts} attempts: {error}",
                phase.as_str()
            ),
        }
    }
}

/// Failures of one pass, with what was applied regardless.
#[derive(Debug)]
pub struct ReconcileError {
    pub report: ReconcileReport,
    pub failures: Vec<ReconcileFailure>,
}

impl ReconcileError {
    /// Redelivery can help only when some failure was transient.
    pub fn is_retryable(&self) -> bool {
        self.failures.iter().any(ReconcileFailure::is_retryable)
    }
}

impl Display for ReconcileError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "reconciliation failed with {} error(s)", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "; {failure}")?;
        }
        Ok(())
    }
}

impl Error for ReconcileError {}

/// Deletions and creations staged for one pass.
#[derive(Debug, Default)]
struct Plan {
    deletes: Vec<ReminderKey>,
    creates: Vec<ReminderInstance>,
    report: ReconcileReport,
    failures: Vec<ReconcileFailure>,
}

/// Applies change events to the reminder store.
pub struct Reconciler<S: ReminderStore> {
    store: S,
    retry: RetryPolicy,
    sleep: fn(Duration),
}

impl<S: ReminderStore> Reconciler<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            retry: RetryPolicy::default(),
            sleep: thread_sleep,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replaces the function used to wait between retries.
    pub fn with_sleep(mut self, sleep: fn(Duration)) -> Self {
        self.sleep = sleep;
        self
    }

    /// Runs one event to completion.
    ///
    /// Running the same event again with the same `now` converges to the same
    /// reminder set, so redelivery is safe.
    pub fn reconcile(
        &self,
        event: &ChangeEvent,
        now: DateTime<Utc>,
    ) -> Result<ReconcileReport, ReconcileError> {
        let started_at = Instant::now();
        let mut plan = Plan::default();

        match event {
            ChangeEvent::Individual {
                target_id,
                task_id,
                update_type,
            } => self.plan_task_change(&mut plan, target_id, task_id, *update_type, now),
            ChangeEvent::All { .. } => self.plan_sweep(&mut plan, now),
        }

        info!(
            "event=reconcile_plan module=reconciler status=ok partition={} update_type={} deletes={} creates={}",
            event.partition_key(),
            event.update_type().as_wire(),
            plan.deletes.len(),
            plan.creates.len()
        );

        self.apply(&mut plan);

        let Plan {
            report, failures, ..
        } = plan;
        if failures.is_empty() {
            info!(
                "event=reconcile module=reconciler status=ok partition={} tasks={} skipped={} deleted={} created={} duration_ms={}",
                event.partition_key(),
                report.tasks_processed,
                report.skipped,
                report.deleted,
                report.created,
                started_at.elapsed().as_millis()
            );
            return Ok(report);
        }

        for failure in &failures {
            error!(
                "event=reconcile module=reconciler status=error partition={} retryable={} error={}",
                event.partition_key(),
                failure.is_retryable(),
                failure
            );
        }
        Err(ReconcileError { report, failures })
    }

    fn plan_task_change(
        &self,
        plan: &mut Plan,
        individual_id: &str,
        task_id: &str,
        update_type: UpdateType,
        now: DateTime<Utc>,
    ) {
        plan.report.tasks_processed += 1;

        if update_type.removes_existing() && !self.stage_deletes(plan, individual_id, task_id, now)
        {
            return;
        }
        if !update_type.generates_new() {
            return;
        }

        let individual = match self.read(&format!("individual {individual_id}"), || {
            self.store.get_individual(individual_id)
        }) {
            Ok(Some(individual)) => individual,
            Ok(None) => {
                warn!(
                    "event=reconcile_skip module=reconciler status=skip individual_id={individual_id} task_id={task_id} reason=individual_not_found"
                );
                plan.report.skipped += 1;
                return;
            }
            Err(failure) => {
                plan.failures.push(failure);
                return;
            }
        };

        let Some(task) = individual.find_task(task_id) else {
            warn!(
                "event=reconcile_skip module=reconciler status=skip individual_id={individual_id} task_id={task_id} reason=task_not_found"
            );
            plan.report.skipped += 1;
            return;
        };

        match resolve_timezone(&individual.timezone) {
            Ok(timezone) => stage_creates(plan, &individual, task, timezone, now),
            Err(error) => plan.failures.push(ReconcileFailure::Schedule {
                individual_id: individual.individual_id.clone(),
                task_id: None,
                error,
            }),
        }
    }

    fn plan_sweep(&self, plan: &mut Plan, now: DateTime<Utc>) {
        let individuals = match self.read("all individuals", || self.store.scan_all_individuals())
        {
            Ok(individuals) => individuals,
            Err(failure) => {
                plan.failures.push(failure);
                return;
            }
        };

        for individual in &individuals {
            let timezone = resolve_timezone(&individual.timezone);
            if let Err(error) = &timezone {
                plan.failures.push(ReconcileFailure::Schedule {
                    individual_id: individual.individual_id.clone(),
                    task_id: None,
                    error: error.clone(),
                });
            }

            for task in &individual.tasks {
                plan.report.tasks_processed += 1;
                if !self.stage_deletes(plan, &individual.individual_id, &task.task_id, now) {
                    continue;
                }
                if let Ok(timezone) = &timezone {
                    stage_creates(plan, individual, task, *timezone, now);
                }
            }
        }
    }

    /// Stages removal of the task's future incomplete reminders.
    ///
    /// Returns `false` when they could not be read; the task must then not
    /// get fresh reminders either.
    fn stage_deletes(
        &self,
        plan: &mut Plan,
        individual_id: &str,
        task_id: &str,
        now: DateTime<Utc>,
    ) -> bool {
        let series = reminder_id(individual_id, task_id);
        let after_epoch = now.timestamp();
        match self.read(&format!("reminders {series}"), || {
            self.store
                .query_future_incomplete_reminders(&series, after_epoch)
        }) {
            Ok(existing) => {
                plan.deletes.extend(
                    existing
                        .iter()
                        .filter(|reminder| !reminder.completed)
                        .map(ReminderInstance::key),
                );
                true
            }
            Err(failure) => {
                plan.failures.push(failure);
                false
            }
        }
    }

    fn read<T>(
        &self,
        scope: &str,
        op: impl Fn() -> Result<T, StoreError>,
    ) -> Result<T, ReconcileFailure> {
        self.retry
            .run(|_| op(), StoreError::is_retryable, &self.sleep)
            .map_err(|exhausted| ReconcileFailure::Read {
                scope: scope.to_string(),
                error: exhausted.last_error,
            })
    }

    fn apply(&self, plan: &mut Plan) {
        let (deleted, delete_failures) =
            self.write_chunked(WritePhase::Delete, &plan.deletes, |chunk| {
                self.store.batch_delete(chunk)
            });
        plan.report.deleted = deleted;

        if !delete_failures.is_empty() {
            warn!(
                "event=reconcile_apply module=reconciler status=skip phase=create reason=delete_failed pending_creates={}",
                plan.creates.len()
            );
            plan.failures.extend(delete_failures);
            return;
        }

        let (created, create_failures) =
            self.write_chunked(WritePhase::Create, &plan.creates, |chunk| {
                self.store.batch_put(chunk)
            });
        plan.report.created = created;
        plan.failures.extend(create_failures);
    }

    /// Writes `items` chunk by chunk; returns the number of items written and
    /// the chunks that failed after retries.
    fn write_chunked<T>(
        &self,
        phase: WritePhase,
        items: &[T],
        write: impl Fn(&[T]) -> Result<(), StoreError>,
    ) -> (usize, Vec<ReconcileFailure>) {
        let mut written = 0;
        let mut failures = Vec::new();

        for (chunk_index, chunk) in write_chunks(items, MAX_WRITE_CHUNK).enumerate() {
            let result = self.retry.run(
                |attempt| {
                    if attempt > 1 {
                        warn!(
                            "event=reconcile_write module=reconciler status=retry phase={} chunk={} attempt={}",
                            phase.as_str(),
                            chunk_index,
                            attempt
                        );
                    }
                    write(chunk)
                },
                StoreError::is_retryable,
                &self.sleep,
            );

            match result {
                Ok(()) => written += chunk.len(),
                Err(exhausted) => failures.push(ReconcileFailure::Write {
                    phase,
                    chunk_index,
                    items: chunk.len(),
                    attempts: exhausted.attempts,
                    error: exhausted.last_error,
                }),
            }
        }

        (written, failures)
    }
}

fn stage_creates(
    plan: &mut Plan,
    individual: &Individual,
    task: &TaskDefinition,
    timezone: Tz,
    now: DateTime<Utc>,
) {
    match generate_reminders(&individual.individual_id, task, timezone, now) {
        Ok(reminders) => plan.creates.extend(reminders),
        Err(error) => plan.failures.push(ReconcileFailure::Schedule {
            individual_id: individual.individual_id.clone(),
            task_id: Some(task.task_id.clone()),
            error,
        }),
    }
}
