use chrono::{DateTime, TimeZone, Utc};
use enablr_core::db::open_db_in_memory;
use enablr_core::service::ReconcileFailure;
use enablr_core::{
    ChangeEvent, Individual, ReminderInstance, ReminderKey, ReminderStore, Reconciler,
    RetryPolicy, SqliteReminderStore, StoreError, StoreResult, TaskDefinition, TaskDetails,
    TimeOfDay, UpdateType,
};
use std::cell::{Cell, RefCell};
use std::time::Duration;

const SERIES: &str = "ind-1-t1";

fn task(task_id: &str, frequency: u32) -> TaskDefinition {
    TaskDefinition::new(
        task_id,
        TaskDetails {
            name: "Take medication".to_string(),
            description: String::new(),
            start_time: TimeOfDay::new(7, 30),
            end_time: TimeOfDay::new(20, 30),
            frequency,
            steps: vec!["Fill glass".to_string(), "Swallow tablet".to_string()],
        },
    )
}

/// 2024-03-01 06:00 in Melbourne (UTC+11).
fn melbourne_morning() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 2, 29, 19, 0, 0).unwrap()
}

fn no_sleep(_: Duration) {}

fn reconciler<S: ReminderStore>(store: S) -> Reconciler<S> {
    Reconciler::new(store).with_sleep(no_sleep)
}

fn seed(store: &SqliteReminderStore<'_>, tasks: Vec<TaskDefinition>) {
    store
        .put_individual(&Individual::new("ind-1", "Australia/Melbourne").with_tasks(tasks))
        .unwrap();
}

fn event(update_type: UpdateType) -> ChangeEvent {
    ChangeEvent::individual("ind-1", "t1", update_type)
}

fn stored(store: &SqliteReminderStore<'_>) -> Vec<ReminderInstance> {
    store.list_reminders_since(SERIES, i64::MIN).unwrap()
}

/// Store wrapper that fails selected calls with a transient error.
struct FlakyStore<'conn> {
    inner: SqliteReminderStore<'conn>,
    put_failures: Cell<u32>,
    delete_failures: Cell<u32>,
    put_sizes: RefCell<Vec<usize>>,
}

impl<'conn> FlakyStore<'conn> {
    fn new(inner: SqliteReminderStore<'conn>) -> Self {
        Self {
            inner,
            put_failures: Cell::new(0),
            delete_failures: Cell::new(0),
            put_sizes: RefCell::new(Vec::new()),
        }
    }

    fn take_failure(counter: &Cell<u32>) -> StoreResult<()> {
        match counter.get() {
            0 => Ok(()),
            left => {
                counter.set(left - 1);
                Err(StoreError::Unavailable("throttled".to_string()))
            }
        }
    }
}

impl ReminderStore for FlakyStore<'_> {
    fn get_individual(&self, individual_id: &str) -> StoreResult<Option<Individual>> {
        self.inner.get_individual(individual_id)
    }

    fn put_individual(&self, individual: &Individual) -> StoreResult<()> {
        self.inner.put_individual(individual)
    }

    fn delete_individual(&self, individual_id: &str) -> StoreResult<bool> {
        self.inner.delete_individual(individual_id)
    }

    fn scan_all_individuals(&self) -> StoreResult<Vec<Individual>> {
        self.inner.scan_all_individuals()
    }

    fn query_future_incomplete_reminders(
        &self,
        reminder_id: &str,
        after_epoch: i64,
    ) -> StoreResult<Vec<ReminderInstance>> {
        self.inner
            .query_future_incomplete_reminders(reminder_id, after_epoch)
    }

    fn list_reminders_since(
        &self,
        reminder_id: &str,
        since_epoch: i64,
    ) -> StoreResult<Vec<ReminderInstance>> {
        self.inner.list_reminders_since(reminder_id, since_epoch)
    }

    fn batch_delete(&self, keys: &[ReminderKey]) -> StoreResult<()> {
        Self::take_failure(&self.delete_failures)?;
        self.inner.batch_delete(keys)
    }

    fn batch_put(&self, items: &[ReminderInstance]) -> StoreResult<()> {
        Self::take_failure(&self.put_failures)?;
        self.put_sizes.borrow_mut().push(items.len());
        self.inner.batch_put(items)
    }

    fn complete_reminder(&self, key: &ReminderKey, note: &str) -> StoreResult<bool> {
        self.inner.complete_reminder(key, note)
    }
}

#[test]
fn create_writes_the_melbourne_schedule() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteReminderStore::new(&conn);
    seed(&store, vec![task("t1", 9)]);

    let report = reconciler(store)
        .reconcile(&event(UpdateType::Create), melbourne_morning())
        .unwrap();

    assert_eq!(report.created, 9);
    assert_eq!(report.deleted, 0);
    let reminders = stored(&store);
    assert_eq!(reminders.len(), 9);
    assert_eq!(reminders[0].readable_timestamp, "2024-03-01 07:30:00+11:00");
    assert_eq!(reminders[1].readable_timestamp, "2024-03-01 09:07:30+11:00");
    assert_eq!(reminders[8].readable_timestamp, "2024-03-01 20:30:00+11:00");
    assert_eq!(
        reminders[0].due,
        Utc.with_ymd_and_hms(2024, 2, 29, 20, 30, 0).unwrap().timestamp()
    );
    for pair in reminders.windows(2) {
        assert_eq!(pair[1].due - pair[0].due, 5850);
    }
    assert!(reminders
        .iter()
        .all(|reminder| !reminder.completed && reminder.note.is_empty()));
}

#[test]
fn repeated_update_converges_to_the_same_set() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteReminderStore::new(&conn);
    seed(&store, vec![task("t1", 4)]);
    let reconciler = reconciler(store);
    let now = melbourne_morning();

    reconciler.reconcile(&event(UpdateType::Create), now).unwrap();
    let after_create = stored(&store);

    let first = reconciler.reconcile(&event(UpdateType::Update), now).unwrap();
    let after_first = stored(&store);
    let second = reconciler.reconcile(&event(UpdateType::Update), now).unwrap();
    let after_second = stored(&store);

    assert_eq!(after_create, after_first);
    assert_eq!(after_first, after_second);
    assert_eq!(first, second);
    assert_eq!((first.deleted, first.created), (4, 4));
}

#[test]
fn update_replaces_pending_reminders_but_keeps_completed_ones() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteReminderStore::new(&conn);
    seed(&store, vec![task("t1", 9)]);
    let reconciler = reconciler(store);
    let now = melbourne_morning();
    reconciler.reconcile(&event(UpdateType::Create), now).unwrap();

    let completed = stored(&store)[1].key();
    assert!(store.complete_reminder(&completed, "taken").unwrap());

    seed(&store, vec![task("t1", 2)]);
    let report = reconciler.reconcile(&event(UpdateType::Update), now).unwrap();

    assert_eq!(report.deleted, 8);
    assert_eq!(report.created, 2);
    let reminders = stored(&store);
    let readable: Vec<&str> = reminders
        .iter()
        .map(|reminder| reminder.readable_timestamp.as_str())
        .collect();
    assert_eq!(
        readable,
        vec![
            "2024-03-01 07:30:00+11:00",
            "2024-03-01 09:07:30+11:00",
            "2024-03-01 20:30:00+11:00",
        ]
    );
    assert!(reminders[1].completed);
    assert_eq!(reminders[1].note, "taken");
}

#[test]
fn delete_only_removes_future_reminders() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteReminderStore::new(&conn);
    seed(&store, vec![task("t1", 9)]);
    let reconciler = reconciler(store);
    reconciler
        .reconcile(&event(UpdateType::Create), melbourne_morning())
        .unwrap();

    // 12:00 local.
    let noon = Utc.with_ymd_and_hms(2024, 3, 1, 1, 0, 0).unwrap();
    let report = reconciler.reconcile(&event(UpdateType::Delete), noon).unwrap();

    assert_eq!(report.deleted, 6);
    assert_eq!(report.created, 0);
    let remaining: Vec<String> = stored(&store)
        .into_iter()
        .map(|reminder| reminder.readable_timestamp)
        .collect();
    assert_eq!(
        remaining,
        vec![
            "2024-03-01 07:30:00+11:00",
            "2024-03-01 09:07:30+11:00",
            "2024-03-01 10:45:00+11:00",
        ]
    );
}

#[test]
fn missing_individual_or_task_is_a_logged_skip() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteReminderStore::new(&conn);
    seed(&store, vec![task("t1", 3)]);
    let reconciler = reconciler(store);
    let now = melbourne_morning();

    let unknown_individual = ChangeEvent::individual("ghost", "t1", UpdateType::Create);
    let unknown_task = ChangeEvent::individual("ind-1", "t9", UpdateType::Update);

    assert_eq!(reconciler.reconcile(&unknown_individual, now).unwrap().skipped, 1);
    assert_eq!(reconciler.reconcile(&unknown_task, now).unwrap().skipped, 1);
    assert!(stored(&store).is_empty());
}

#[test]
fn sweep_reports_bad_individuals_without_stopping_others() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteReminderStore::new(&conn);
    seed(&store, vec![task("t1", 9), task("t2", 1)]);
    store
        .put_individual(&Individual::new("ind-0", "Mars/Olympus").with_tasks(vec![task("t1", 2)]))
        .unwrap();

    let sweep = ChangeEvent::All {
        update_type: UpdateType::Update,
    };
    let err = reconciler(store)
        .reconcile(&sweep, melbourne_morning())
        .unwrap_err();

    assert_eq!(err.failures.len(), 1);
    assert!(matches!(
        &err.failures[0],
        ReconcileFailure::Schedule { individual_id, .. } if individual_id == "ind-0"
    ));
    assert!(!err.is_retryable());
    assert_eq!(err.report.tasks_processed, 3);
    assert_eq!(err.report.created, 10);
    assert_eq!(stored(&store).len(), 9);
}

#[test]
fn invalid_timezone_on_single_event_is_permanent() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteReminderStore::new(&conn);
    store
        .put_individual(&Individual::new("ind-1", "Nowhere/City").with_tasks(vec![task("t1", 2)]))
        .unwrap();

    let err = reconciler(store)
        .reconcile(&event(UpdateType::Create), melbourne_morning())
        .unwrap_err();

    assert!(!err.is_retryable());
}

#[test]
fn writes_are_chunked_by_twenty_five() {
    let conn = open_db_in_memory().unwrap();
    let inner = SqliteReminderStore::new(&conn);
    seed(&inner, vec![task("t1", 60)]);
    let flaky = FlakyStore::new(inner);

    let report = reconciler(&flaky)
        .reconcile(&event(UpdateType::Create), melbourne_morning())
        .unwrap();

    assert_eq!(report.created, 60);
    assert_eq!(*flaky.put_sizes.borrow(), vec![25, 25, 10]);
    assert_eq!(stored(&inner).len(), 60);
}

#[test]
fn transient_write_failures_are_retried() {
    let conn = open_db_in_memory().unwrap();
    let inner = SqliteReminderStore::new(&conn);
    seed(&inner, vec![task("t1", 9)]);
    let flaky = FlakyStore::new(inner);
    flaky.put_failures.set(2);

    let report = reconciler(&flaky)
        .reconcile(&event(UpdateType::Create), melbourne_morning())
        .unwrap();

    assert_eq!(report.created, 9);
    assert_eq!(flaky.put_failures.get(), 0);
}

#[test]
fn failed_deletes_block_creations_and_stay_retryable() {
    let conn = open_db_in_memory().unwrap();
    let inner = SqliteReminderStore::new(&conn);
    seed(&inner, vec![task("t1", 9)]);
    let now = melbourne_morning();
    reconciler(inner)
        .reconcile(&event(UpdateType::Create), now)
        .unwrap();
    let before = stored(&inner);

    seed(&inner, vec![task("t1", 2)]);
    let flaky = FlakyStore::new(inner);
    flaky.delete_failures.set(u32::MAX);
    let err = Reconciler::new(&flaky)
        .with_retry_policy(RetryPolicy {
            max_attempts: 2,
            ..RetryPolicy::default()
        })
        .with_sleep(no_sleep)
        .reconcile(&event(UpdateType::Update), now)
        .unwrap_err();

    assert!(err.is_retryable());
    assert_eq!(err.report.created, 0);
    assert!(matches!(
        err.failures[0],
        ReconcileFailure::Write { attempts: 2, .. }
    ));
    assert!(flaky.put_sizes.borrow().is_empty());
    assert_eq!(stored(&inner), before);
}
