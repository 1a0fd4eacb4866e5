//! Operator entry point.
//!
//! Wires config, logging, the SQLite store and an in-process queue, then runs
//! one command to completion.

mod cli;

use chrono::Utc;
use clap::Parser;
use cli::{Cli, Command, Unit};
use enablr_core::model::reminder::{reminder_id, ReminderKey};
use enablr_core::schedule::epoch::{to_epoch_seconds, EpochUnit};
use enablr_core::transport::OutboundEvent;
use enablr_core::{
    init_logging, open_db, ChangeDetector, ChangeEvent, ConsumerReport, CoreConfig,
    EventConsumer, EventPublisher, InMemoryQueue, Individual, Reconciler, ReminderInstance,
    ReminderStore, SqliteReminderStore,
};
use std::error::Error;
use std::io::{self, BufRead};

type CliResult<T> = Result<T, Box<dyn Error>>;

/// Upper bound on receive rounds per command.
const MAX_DRAIN_ROUNDS: usize = 10_000;

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("ERROR: {err}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> CliResult<()> {
    let config = CoreConfig::from_env()?;
    if let Some(log_dir) = &config.log_dir {
        init_logging(config.log_level, log_dir)?;
    }

    let conn = open_db(&config.db_path)?;
    let store = SqliteReminderStore::new(&conn);
    let queue = InMemoryQueue::new(config.queue);
    let reconciler = Reconciler::new(store).with_retry_policy(config.retry);

    match cli.command {
        Command::Import { path } => {
            let raw = std::fs::read_to_string(&path)?;
            let individuals: Vec<Individual> = serde_json::from_str(&raw)?;
            let detector = ChangeDetector::new(store, &queue);
            let mut changes = 0;
            for individual in &individuals {
                changes += detector.save_individual(individual)?.len();
            }
            let report = drain(&queue, &reconciler)?;
            print_summary(
                cli.json,
                &format!("imported={} changes={changes}", individuals.len()),
                report,
            );
        }
        Command::Sweep => {
            ChangeDetector::new(store, &queue).request_sweep(Utc::now())?;
            let report = drain(&queue, &reconciler)?;
            print_summary(cli.json, "sweep", report);
        }
        Command::Consume => {
            let mut accepted = 0;
            for line in io::stdin().lock().lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let partition = ChangeEvent::from_wire(&line)
                    .map(|event| event.partition_key().to_string())
                    .unwrap_or_else(|_| "malformed".to_string());
                queue.publish_batch(&[OutboundEvent::from_raw(line, partition)])?;
                accepted += 1;
            }
            let report = drain(&queue, &reconciler)?;
            print_summary(cli.json, &format!("accepted={accepted}"), report);
        }
        Command::Reminders {
            individual_id,
            task_id,
            since,
            unit,
        } => {
            let since = since
                .map(|value| to_epoch_seconds(value, unit.map(epoch_unit)))
                .unwrap_or_else(|| Utc::now().timestamp());
            let reminders =
                store.list_reminders_since(&reminder_id(&individual_id, &task_id), since)?;
            print_reminders(cli.json, &reminders)?;
        }
        Command::Complete {
            individual_id,
            task_id,
            due,
            unit,
            note,
        } => {
            let key = ReminderKey {
                reminder_id: reminder_id(&individual_id, &task_id),
                due: to_epoch_seconds(due, unit.map(epoch_unit)),
            };
            if !store.complete_reminder(&key, &note)? {
                return Err(format!("no reminder {} at {}", key.reminder_id, key.due).into());
            }
            println!("completed {} at {}", key.reminder_id, key.due);
        }
    }

    Ok(())
}

fn drain(
    queue: &InMemoryQueue,
    reconciler: &Reconciler<SqliteReminderStore<'_>>,
) -> CliResult<ConsumerReport> {
    let report = EventConsumer::new(queue, reconciler).drain(Utc::now(), MAX_DRAIN_ROUNDS)?;
    for dead in queue.dead_letters() {
        eprintln!(
            "dead-lettered message={} partition={} reason={}",
            dead.message_id, dead.partition_key, dead.reason
        );
    }
    Ok(report)
}

fn epoch_unit(unit: Unit) -> EpochUnit {
    match unit {
        Unit::Seconds => EpochUnit::Seconds,
        Unit::Millis => EpochUnit::Millis,
    }
}

fn print_summary(json: bool, label: &str, report: ConsumerReport) {
    if json {
        println!(
            "{}",
            serde_json::json!({
                "summary": label,
                "received": report.received,
                "acked": report.acked,
                "released": report.released,
                "dead_lettered": report.dead_lettered,
            })
        );
    } else {
        println!(
            "{label} received={} acked={} released={} dead_lettered={}",
            report.received, report.acked, report.released, report.dead_lettered
        );
    }
}

fn print_reminders(json: bool, reminders: &[ReminderInstance]) -> CliResult<()> {
    if json {
        println!("{}", serde_json::to_string(reminders)?);
        return Ok(());
    }
    for reminder in reminders {
        let status = if reminder.completed { "done" } else { "pending" };
        println!(
            "{} | {} | {} | {}",
            reminder.due, reminder.readable_timestamp, status, reminder.note
        );
    }
    Ok(())
}
