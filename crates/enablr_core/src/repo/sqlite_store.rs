//! SQLite implementation of the reminder store.
//!
//! # Invariants
//! - Individuals are validated before they are written.
//! - Each batch write runs in its own transaction: a chunk is all-or-nothing,
//!   separate chunks are independent.
//! - Read paths reject rows that cannot be decoded instead of skipping them.

use crate::model::individual::Individual;
use crate::model::reminder::{ReminderInstance, ReminderKey};
use crate::model::task::TaskDefinition;
use crate::repo::store::{ensure_chunk_size, ReminderStore, StoreError, StoreResult};
use rusqlite::{params, Connection, OptionalExtension, Row};

const REMINDER_SELECT_SQL: &str = "SELECT
    reminder_id,
    due,
    individual_id,
    task_id,
    readable_timestamp,
    details_json,
    completed,
    note
FROM reminders";

/// SQLite-backed reminder store borrowing an open connection.
#[derive(Clone, Copy)]
pub struct SqliteReminderStore<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteReminderStore<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl ReminderStore for SqliteReminderStore<'_> {
    fn get_individual(&self, individual_id: &str) -> StoreResult<Option<Individual>> {
        let row = self
            .conn
            .query_row(
                "SELECT individual_id, timezone, tasks_json
                 FROM individuals
                 WHERE individual_id = ?1;",
                [individual_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(id, timezone, tasks_json)| decode_individual(id, timezone, &tasks_json))
            .transpose()
    }

    fn put_individual(&self, individual: &Individual) -> StoreResult<()> {
        individual.validate()?;
        let tasks_json = serde_json::to_string(&individual.tasks)
            .map_err(|err| StoreError::InvalidData(err.to_string()))?;

        self.conn.execute(
            "INSERT INTO individuals (individual_id, timezone, tasks_json)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(individual_id) DO UPDATE SET
                timezone = excluded.timezone,
                tasks_json = excluded.tasks_json,
                updated_at = (strftime('%s', 'now') * 1000);",
            params![
                individual.individual_id.as_str(),
                individual.timezone.as_str(),
                tasks_json
            ],
        )?;
        Ok(())
    }

    fn delete_individual(&self, individual_id: &str) -> StoreResult<bool> {
        let changed = self.conn.execute(
            "DELETE FROM individuals WHERE individual_id = ?1;",
            [individual_id],
        )?;
        Ok(changed > 0)
    }

    fn scan_all_individuals(&self) -> StoreResult<Vec<Individual>> {
        let mut stmt = self.conn.prepare(
            "SELECT individual_id, timezone, tasks_json
             FROM individuals
             ORDER BY individual_id ASC;",
        )?;
        let mut rows = stmt.query([])?;
        let mut individuals = Vec::new();

        while let Some(row) = rows.next()? {
            individuals.push(decode_individual(
                row.get(0)?,
                row.get(1)?,
                &row.get::<_, String>(2)?,
            )?);
        }

        Ok(individuals)
    }

    fn query_future_incomplete_reminders(
        &self,
        reminder_id: &str,
        after_epoch: i64,
    ) -> StoreResult<Vec<ReminderInstance>> {
        self.query_reminders(
            &format!(
                "{REMINDER_SELECT_SQL}
                 WHERE reminder_id = ?1 AND due > ?2 AND completed = 0
                 ORDER BY due ASC;"
            ),
            reminder_id,
            after_epoch,
        )
    }

    fn list_reminders_since(
        &self,
        reminder_id: &str,
        since_epoch: i64,
    ) -> StoreResult<Vec<ReminderInstance>> {
        self.query_reminders(
            &format!(
                "{REMINDER_SELECT_SQL}
                 WHERE reminder_id = ?1 AND due > ?2
                 ORDER BY due ASC;"
            ),
            reminder_id,
            since_epoch,
        )
    }

    fn batch_delete(&self, keys: &[ReminderKey]) -> StoreResult<()> {
        ensure_chunk_size(keys.len())?;
        if keys.is_empty() {
            return Ok(());
        }

        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "DELETE FROM reminders
                 WHERE reminder_id = ?1 AND due = ?2 AND completed = 0;",
            )?;
            for key in keys {
                stmt.execute(params![key.reminder_id.as_str(), key.due])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn batch_put(&self, items: &[ReminderInstance]) -> StoreResult<()> {
        ensure_chunk_size(items.len())?;
        if items.is_empty() {
            return Ok(());
        }

        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO reminders (
                    reminder_id,
                    due,
                    individual_id,
                    task_id,
                    readable_timestamp,
                    details_json,
                    completed,
                    note
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT(reminder_id, due) DO NOTHING;",
            )?;
            for item in items {
                let details_json = serde_json::to_string(&item.details)
                    .map_err(|err| StoreError::InvalidData(err.to_string()))?;
                stmt.execute(params![
                    item.reminder_id.as_str(),
                    item.due,
                    item.individual_id.as_str(),
                    item.task_id.as_str(),
                    item.readable_timestamp.as_str(),
                    details_json,
                    bool_to_int(item.completed),
                    item.note.as_str(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn complete_reminder(&self, key: &ReminderKey, note: &str) -> StoreResult<bool> {
        let changed = self.conn.execute(
            "UPDATE reminders
             SET completed = 1, note = ?1
             WHERE reminder_id = ?2 AND due = ?3;",
            params![note, key.reminder_id.as_str(), key.due],
        )?;
        Ok(changed > 0)
    }
}

impl SqliteReminderStore<'_> {
    fn query_reminders(
        &self,
        sql: &str,
        reminder_id: &str,
        after_epoch: i64,
    ) -> StoreResult<Vec<ReminderInstance>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(params![reminder_id, after_epoch])?;
        let mut reminders = Vec::new();

        while let Some(row) = rows.next()? {
            reminders.push(parse_reminder_row(row)?);
        }

        Ok(reminders)
    }
}

fn decode_individual(
    individual_id: String,
    timezone: String,
    tasks_json: &str,
) -> StoreResult<Individual> {
    let tasks: Vec<TaskDefinition> = serde_json::from_str(tasks_json).map_err(|err| {
        StoreError::InvalidData(format!(
            "invalid tasks_json for individual `{individual_id}`: {err}"
        ))
    })?;

    Ok(Individual {
        individual_id,
        timezone,
        tasks,
    })
}

fn parse_reminder_row(row: &Row<'_>) -> StoreResult<ReminderInstance> {
    let reminder_id: String = row.get("reminder_id")?;
    let due: i64 = row.get("due")?;

    let details_json: String = row.get("details_json")?;
    let details: TaskDefinition = serde_json::from_str(&details_json).map_err(|err| {
        StoreError::InvalidData(format!(
            "invalid details_json for reminder `{reminder_id}` due {due}: {err}"
        ))
    })?;

    let completed = match row.get::<_, i64>("completed")? {
        0 => false,
        1 => true,
        other => {
            return Err(StoreError::InvalidData(format!(
                "invalid completed value `{other}` in reminders.completed"
            )));
        }
    };

    Ok(ReminderInstance {
        reminder_id,
        due,
        individual_id: row.get("individual_id")?,
        task_id: row.get("task_id")?,
        readable_timestamp: row.get("readable_timestamp")?,
        details,
        completed,
        note: row.get("note")?,
    })
}

fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}
