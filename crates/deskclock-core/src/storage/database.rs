//! SQLite-backed alarm store.
//!
//! Provides persistent storage for:
//! - Alarm definitions
//! - Alarm instances, with wall-clock fire time columns
//! - Key-value store for the scheduling epoch
//!
//! The same connection also backs [`SqliteScheduler`](crate::scheduler::SqliteScheduler).

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{Datelike, NaiveDate, Timelike};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use super::{data_dir, migrations, AlarmStore, InstanceFilter};
use crate::alarm::{
    Alarm, AlarmId, AlarmInstance, InstanceId, InstanceState, Ringtone, Weekdays,
};
use crate::error::StoreError;
use crate::scheduler::SqliteScheduler;

const EPOCH_KEY: &str = "schedule_epoch";

const ALARM_COLUMNS: &str = "id, hour, minute, enabled, repeat_days, ringtone, vibrate,
    snooze_minutes, auto_silence_minutes, missed_repeat_limit, crescendo_secs, volume,
    label, delete_after_use";

const INSTANCE_COLUMNS: &str = "id, alarm_id, year, month, day, hour, minute, state,
    ringtone, vibrate, label, volume, crescendo_secs, snooze_minutes, auto_silence_minutes,
    timeout_snoozes";

/// SQLite database for alarms and instances.
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open the database at `~/.config/deskclock/deskclock.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self, StoreError> {
        let dir = data_dir().map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        Self::open_at(dir.join("deskclock.db"))
    }

    /// Open (or create) the database at an explicit path.
    pub fn open_at(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|source| StoreError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        migrations::migrate(&conn).map_err(|e| StoreError::MigrationFailed(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// A scheduler persisting its wake-ups in this database.
    pub fn scheduler(&self) -> SqliteScheduler {
        SqliteScheduler::new(Arc::clone(&self.conn))
    }

    pub fn kv_get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock()?;
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    pub fn kv_set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock()?;
        conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }
}

fn row_to_alarm(row: &rusqlite::Row) -> Result<Alarm, rusqlite::Error> {
    let repeat_bits: u8 = row.get(4)?;
    let ringtone: String = row.get(5)?;
    Ok(Alarm {
        id: row.get(0)?,
        hour: row.get(1)?,
        minute: row.get(2)?,
        enabled: row.get(3)?,
        repeat: Weekdays::from_bits(repeat_bits).map_err(|e| conversion_error(4, e))?,
        ringtone: Ringtone::from_stored(&ringtone),
        vibrate: row.get(6)?,
        snooze_minutes: row.get(7)?,
        auto_silence_minutes: row.get(8)?,
        missed_repeat_limit: row.get(9)?,
        crescendo_secs: row.get(10)?,
        volume: row.get(11)?,
        label: row.get(12)?,
        delete_after_use: row.get(13)?,
    })
}

fn row_to_instance(row: &rusqlite::Row) -> Result<AlarmInstance, rusqlite::Error> {
    let year: i32 = row.get(2)?;
    let fire_time = NaiveDate::from_ymd_opt(year, row.get(3)?, row.get(4)?)
        .and_then(|date| date.and_hms_opt(row.get(5).ok()?, row.get(6).ok()?, 0))
        .ok_or_else(|| conversion_error(2, "invalid fire time columns"))?;
    let state: String = row.get(7)?;
    let state = state
        .parse::<InstanceState>()
        .map_err(|e| conversion_error(7, e))?;
    let ringtone: String = row.get(8)?;

    let mut instance = AlarmInstance::new(row.get(1)?, fire_time);
    instance.id = row.get(0)?;
    instance.state = state;
    instance.ringtone = Ringtone::from_stored(&ringtone);
    instance.vibrate = row.get(9)?;
    instance.label = row.get(10)?;
    instance.volume = row.get(11)?;
    instance.crescendo_secs = row.get(12)?;
    instance.snooze_minutes = row.get(13)?;
    instance.auto_silence_minutes = row.get(14)?;
    instance.timeout_snoozes = row.get(15)?;
    Ok(instance)
}

fn conversion_error(
    column: usize,
    err: impl std::fmt::Display,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Integer,
        err.to_string().into(),
    )
}

/// Undecodable column values become [`StoreError::Corrupt`]; anything else
/// is a genuine storage failure.
fn decode_error(table: &'static str, id: i64, err: rusqlite::Error) -> StoreError {
    match err {
        rusqlite::Error::FromSqlConversionFailure(_, _, source) => StoreError::Corrupt {
            table,
            id,
            message: source.to_string(),
        },
        other => other.into(),
    }
}

impl AlarmStore for Database {
    fn get_alarm(&self, id: AlarmId) -> Result<Option<Alarm>, StoreError> {
        let conn = self.conn.lock()?;
        let alarm = conn
            .query_row(
                &format!("SELECT {ALARM_COLUMNS} FROM alarms WHERE id = ?1"),
                [id],
                row_to_alarm,
            )
            .optional()
            .map_err(|e| decode_error("alarms", id, e))?;
        Ok(alarm)
    }

    fn alarms(&self) -> Result<Vec<Alarm>, StoreError> {
        let conn = self.conn.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ALARM_COLUMNS} FROM alarms ORDER BY hour, minute, id"
        ))?;
        let rows = stmt.query_map([], row_to_alarm)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn add_alarm(&self, alarm: &Alarm) -> Result<AlarmId, StoreError> {
        let conn = self.conn.lock()?;
        conn.execute(
            "INSERT INTO alarms (hour, minute, enabled, repeat_days, ringtone, vibrate,
                snooze_minutes, auto_silence_minutes, missed_repeat_limit, crescendo_secs,
                volume, label, delete_after_use)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                alarm.hour,
                alarm.minute,
                alarm.enabled,
                alarm.repeat.bits(),
                alarm.ringtone.as_stored(),
                alarm.vibrate,
                alarm.snooze_minutes,
                alarm.auto_silence_minutes,
                alarm.missed_repeat_limit,
                alarm.crescendo_secs,
                alarm.volume,
                alarm.label,
                alarm.delete_after_use,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn update_alarm(&self, alarm: &Alarm) -> Result<bool, StoreError> {
        let conn = self.conn.lock()?;
        let changed = conn.execute(
            "UPDATE alarms SET hour = ?2, minute = ?3, enabled = ?4, repeat_days = ?5,
                ringtone = ?6, vibrate = ?7, snooze_minutes = ?8, auto_silence_minutes = ?9,
                missed_repeat_limit = ?10, crescendo_secs = ?11, volume = ?12, label = ?13,
                delete_after_use = ?14
             WHERE id = ?1",
            params![
                alarm.id,
                alarm.hour,
                alarm.minute,
                alarm.enabled,
                alarm.repeat.bits(),
                alarm.ringtone.as_stored(),
                alarm.vibrate,
                alarm.snooze_minutes,
                alarm.auto_silence_minutes,
                alarm.missed_repeat_limit,
                alarm.crescendo_secs,
                alarm.volume,
                alarm.label,
                alarm.delete_after_use,
            ],
        )?;
        Ok(changed > 0)
    }

    fn delete_alarm(&self, id: AlarmId) -> Result<bool, StoreError> {
        let conn = self.conn.lock()?;
        Ok(conn.execute("DELETE FROM alarms WHERE id = ?1", [id])? > 0)
    }

    fn get_instance(&self, id: InstanceId) -> Result<Option<AlarmInstance>, StoreError> {
        let conn = self.conn.lock()?;
        let instance = conn
            .query_row(
                &format!("SELECT {INSTANCE_COLUMNS} FROM alarm_instances WHERE id = ?1"),
                [id],
                row_to_instance,
            )
            .optional()
            .map_err(|e| decode_error("alarm_instances", id, e))?;
        Ok(instance)
    }

    fn instances(&self, filter: InstanceFilter) -> Result<Vec<AlarmInstance>, StoreError> {
        let conn = self.conn.lock()?;
        let base = format!("SELECT {INSTANCE_COLUMNS} FROM alarm_instances");
        let order = "ORDER BY year, month, day, hour, minute, id";
        let rows = match filter {
            InstanceFilter::All => {
                let mut stmt = conn.prepare(&format!("{base} {order}"))?;
                let rows = stmt.query_map([], row_to_instance)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
            InstanceFilter::State(state) => {
                let mut stmt = conn.prepare(&format!("{base} WHERE state = ?1 {order}"))?;
                let rows = stmt.query_map([state.as_str()], row_to_instance)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
            InstanceFilter::StateBelow(limit) => {
                let states: Vec<&str> = InstanceState::ALL
                    .iter()
                    .filter(|s| **s < limit)
                    .map(|s| s.as_str())
                    .collect();
                if states.is_empty() {
                    return Ok(Vec::new());
                }
                let placeholders = vec!["?"; states.len()].join(", ");
                let mut stmt = conn.prepare(&format!(
                    "{base} WHERE state IN ({placeholders}) {order}"
                ))?;
                let rows = stmt.query_map(params_from_iter(states), row_to_instance)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
            InstanceFilter::Alarm(alarm_id) => {
                let mut stmt = conn.prepare(&format!("{base} WHERE alarm_id = ?1 {order}"))?;
                let rows = stmt.query_map([alarm_id], row_to_instance)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
        };
        Ok(rows)
    }

    fn add_instance(&self, instance: &AlarmInstance) -> Result<InstanceId, StoreError> {
        let conn = self.conn.lock()?;
        let time = instance.fire_time();
        conn.execute(
            "INSERT INTO alarm_instances (alarm_id, year, month, day, hour, minute, state,
                ringtone, vibrate, label, volume, crescendo_secs, snooze_minutes,
                auto_silence_minutes, timeout_snoozes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                instance.alarm_id,
                time.year(),
                time.month(),
                time.day(),
                time.hour(),
                time.minute(),
                instance.state.as_str(),
                instance.ringtone.as_stored(),
                instance.vibrate,
                instance.label,
                instance.volume,
                instance.crescendo_secs,
                instance.snooze_minutes,
                instance.auto_silence_minutes,
                instance.timeout_snoozes,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn update_instance(&self, instance: &AlarmInstance) -> Result<bool, StoreError> {
        let conn = self.conn.lock()?;
        let time = instance.fire_time();
        let changed = conn.execute(
            "UPDATE alarm_instances SET alarm_id = ?2, year = ?3, month = ?4, day = ?5,
                hour = ?6, minute = ?7, state = ?8, ringtone = ?9, vibrate = ?10, label = ?11,
                volume = ?12, crescendo_secs = ?13, snooze_minutes = ?14,
                auto_silence_minutes = ?15, timeout_snoozes = ?16
             WHERE id = ?1",
            params![
                instance.id,
                instance.alarm_id,
                time.year(),
                time.month(),
                time.day(),
                time.hour(),
                time.minute(),
                instance.state.as_str(),
                instance.ringtone.as_stored(),
                instance.vibrate,
                instance.label,
                instance.volume,
                instance.crescendo_secs,
                instance.snooze_minutes,
                instance.auto_silence_minutes,
                instance.timeout_snoozes,
            ],
        )?;
        Ok(changed > 0)
    }

    fn delete_instance(&self, id: InstanceId) -> Result<bool, StoreError> {
        let conn = self.conn.lock()?;
        Ok(conn.execute("DELETE FROM alarm_instances WHERE id = ?1", [id])? > 0)
    }

    fn delete_other_instances(
        &self,
        alarm_id: AlarmId,
        keep: InstanceId,
    ) -> Result<usize, StoreError> {
        let conn = self.conn.lock()?;
        Ok(conn.execute(
            "DELETE FROM alarm_instances WHERE alarm_id = ?1 AND id != ?2",
            params![alarm_id, keep],
        )?)
    }

    fn epoch(&self) -> Result<u64, StoreError> {
        match self.kv_get(EPOCH_KEY)? {
            Some(raw) => raw.parse().map_err(|_| StoreError::Corrupt {
                table: "kv",
                id: 0,
                message: format!("epoch '{raw}' is not a number"),
            }),
            None => Ok(0),
        }
    }

    fn set_epoch(&self, epoch: u64) -> Result<(), StoreError> {
        self.kv_set(EPOCH_KEY, &epoch.to_string())
    }
}
