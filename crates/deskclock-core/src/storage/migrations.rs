//! Database schema migrations for deskclock.
//!
//! Migrations are versioned and applied automatically when opening the database.
//! The `schema_version` table tracks the current migration version.

use rusqlite::{Connection, Result as SqliteResult};

/// Current schema version.
///
/// Increment this when adding new migrations.
pub const SCHEMA_VERSION: i32 = 2;

/// Apply all pending migrations to bring the database to the current schema version.
///
/// # Errors
/// Returns an error if migration fails.
pub fn migrate(conn: &Connection) -> SqliteResult<()> {
    create_schema_version_table(conn)?;

    let current_version = get_schema_version(conn);

    if current_version < 1 {
        migrate_v1(conn)?;
    }
    if current_version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

fn create_schema_version_table(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );",
    )
}

/// Get the current schema version from the database.
///
/// Returns 0 if no version is set (initial database).
pub fn get_schema_version(conn: &Connection) -> i32 {
    conn.query_row("SELECT version FROM schema_version", [], |row| {
        row.get::<_, i32>(0)
    })
    .unwrap_or_else(|e| {
        if !matches!(e, rusqlite::Error::QueryReturnedNoRows) {
            tracing::warn!(error = %e, "failed to read schema_version");
        }
        0
    })
}

fn set_schema_version(conn: &Connection, version: i32) -> SqliteResult<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Migration v1: alarms, alarm instances and the key-value table.
///
/// Instance fire times are stored as separate wall-clock columns so that a
/// timezone change never silently shifts them.
fn migrate_v1(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS alarms (
            id                   INTEGER PRIMARY KEY AUTOINCREMENT,
            hour                 INTEGER NOT NULL,
            minute               INTEGER NOT NULL,
            enabled              INTEGER NOT NULL DEFAULT 1,
            repeat_days          INTEGER NOT NULL DEFAULT 0,
            ringtone             TEXT NOT NULL DEFAULT 'default',
            vibrate              INTEGER NOT NULL DEFAULT 1,
            snooze_minutes       INTEGER,
            auto_silence_minutes INTEGER,
            missed_repeat_limit  INTEGER NOT NULL DEFAULT 0,
            crescendo_secs       INTEGER NOT NULL DEFAULT 0,
            volume               INTEGER,
            label                TEXT NOT NULL DEFAULT '',
            delete_after_use     INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS alarm_instances (
            id                   INTEGER PRIMARY KEY AUTOINCREMENT,
            alarm_id             INTEGER,
            year                 INTEGER NOT NULL,
            month                INTEGER NOT NULL,
            day                  INTEGER NOT NULL,
            hour                 INTEGER NOT NULL,
            minute               INTEGER NOT NULL,
            state                TEXT NOT NULL,
            ringtone             TEXT NOT NULL DEFAULT 'default',
            vibrate              INTEGER NOT NULL DEFAULT 1,
            label                TEXT NOT NULL DEFAULT '',
            volume               INTEGER,
            crescendo_secs       INTEGER NOT NULL DEFAULT 0,
            snooze_minutes       INTEGER,
            auto_silence_minutes INTEGER
        );

        CREATE TABLE IF NOT EXISTS kv (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_instances_alarm_id ON alarm_instances(alarm_id);
        CREATE INDEX IF NOT EXISTS idx_instances_state ON alarm_instances(state);",
    )?;
    set_schema_version(&tx, 1)?;
    tx.commit()
}

/// Migration v2: durable scheduled transitions and the timeout snooze counter.
fn migrate_v2(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        "ALTER TABLE alarm_instances ADD COLUMN timeout_snoozes INTEGER NOT NULL DEFAULT 0;

        CREATE TABLE IF NOT EXISTS scheduled_transitions (
            instance_id INTEGER PRIMARY KEY,
            target      TEXT NOT NULL,
            due_at      TEXT NOT NULL,
            epoch       INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_scheduled_due_at ON scheduled_transitions(due_at);",
    )?;
    set_schema_version(&tx, 2)?;
    tx.commit()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_database_reaches_current_version() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), SCHEMA_VERSION);
    }

    #[test]
    fn migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), SCHEMA_VERSION);

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM pragma_table_info('alarm_instances') WHERE name = 'timeout_snoozes'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }
}
