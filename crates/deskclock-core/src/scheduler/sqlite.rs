use std::sync::{Arc, Mutex};

use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension};

use super::{ScheduledTransition, TransitionScheduler};
use crate::alarm::{InstanceId, InstanceState};
use crate::error::StoreError;

/// Sortable text form; lexical order equals chronological order.
const DUE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Durable scheduler sharing the alarm database connection.
///
/// Obtained through [`Database::scheduler`](crate::storage::Database::scheduler).
pub struct SqliteScheduler {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteScheduler {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }
}

fn row_to_transition(row: &rusqlite::Row) -> Result<ScheduledTransition, rusqlite::Error> {
    let target: String = row.get(1)?;
    let at: String = row.get(2)?;
    let epoch: i64 = row.get(3)?;
    let decode = |column: usize, message: String| {
        rusqlite::Error::FromSqlConversionFailure(
            column,
            rusqlite::types::Type::Text,
            message.into(),
        )
    };
    Ok(ScheduledTransition {
        instance_id: row.get(0)?,
        target: target
            .parse::<InstanceState>()
            .map_err(|e| decode(1, e.to_string()))?,
        at: NaiveDateTime::parse_from_str(&at, DUE_FORMAT)
            .map_err(|e| decode(2, e.to_string()))?,
        epoch: u64::try_from(epoch).map_err(|e| decode(3, e.to_string()))?,
    })
}

impl TransitionScheduler for SqliteScheduler {
    fn schedule(&self, transition: ScheduledTransition) -> Result<(), StoreError> {
        let epoch = i64::try_from(transition.epoch).map_err(|_| StoreError::Corrupt {
            table: "scheduled_transitions",
            id: transition.instance_id,
            message: format!("epoch {} out of range", transition.epoch),
        })?;
        let conn = self.conn.lock()?;
        conn.execute(
            "INSERT INTO scheduled_transitions (instance_id, target, due_at, epoch)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(instance_id) DO UPDATE SET
                target = excluded.target, due_at = excluded.due_at, epoch = excluded.epoch",
            params![
                transition.instance_id,
                transition.target.as_str(),
                transition.at.format(DUE_FORMAT).to_string(),
                epoch,
            ],
        )?;
        Ok(())
    }

    fn cancel(&self, instance_id: InstanceId) -> Result<bool, StoreError> {
        let conn = self.conn.lock()?;
        Ok(conn.execute(
            "DELETE FROM scheduled_transitions WHERE instance_id = ?1",
            [instance_id],
        )? > 0)
    }

    fn pending(&self, instance_id: InstanceId) -> Result<Option<ScheduledTransition>, StoreError> {
        let conn = self.conn.lock()?;
        let transition = conn
            .query_row(
                "SELECT instance_id, target, due_at, epoch FROM scheduled_transitions
                 WHERE instance_id = ?1",
                [instance_id],
                row_to_transition,
            )
            .optional()?;
        Ok(transition)
    }

    fn take_due(&self, now: NaiveDateTime) -> Result<Vec<ScheduledTransition>, StoreError> {
        let conn = self.conn.lock()?;
        let tx = conn.unchecked_transaction()?;
        let cutoff = now.format(DUE_FORMAT).to_string();
        let due = {
            let mut stmt = tx.prepare(
                "SELECT instance_id, target, due_at, epoch FROM scheduled_transitions
                 WHERE due_at <= ?1 ORDER BY due_at, instance_id",
            )?;
            let rows = stmt.query_map([&cutoff], row_to_transition)?;
            rows.collect::<Result<Vec<_>, _>>()?
        };
        tx.execute(
            "DELETE FROM scheduled_transitions WHERE due_at <= ?1",
            [&cutoff],
        )?;
        tx.commit()?;
        Ok(due)
    }

    fn next_deadline(&self) -> Result<Option<NaiveDateTime>, StoreError> {
        let conn = self.conn.lock()?;
        let raw: Option<String> = conn.query_row(
            "SELECT MIN(due_at) FROM scheduled_transitions",
            [],
            |row| row.get(0),
        )?;
        raw.map(|at| {
            NaiveDateTime::parse_from_str(&at, DUE_FORMAT).map_err(|e| StoreError::Corrupt {
                table: "scheduled_transitions",
                id: 0,
                message: e.to_string(),
            })
        })
        .transpose()
    }
}
