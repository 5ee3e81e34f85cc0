//! Database schema and migrations.

use rusqlite::{Connection, OptionalExtension};

use crate::error::{Error, Result};
use crate::models::TableName;

/// Ordered migrations; entry `n` brings the schema to version `n + 1`.
///
/// Readings tables are not listed here; one is created per monitor at
/// registration through [`create_readings_table`].
const MIGRATIONS: &[&str] = &[
    // v1: monitor registry, keyed by the underscore form of the monitor id
    r#"
    CREATE TABLE IF NOT EXISTS monitors (
        monitor_id TEXT PRIMARY KEY,
        display_name TEXT NOT NULL,
        location TEXT,
        status TEXT DEFAULT 'active',
        data_table_name TEXT NOT NULL UNIQUE,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        last_sync_time INTEGER,
        sync_status TEXT
    );
    "#,
];

/// Current schema version.
pub const SCHEMA_VERSION: i32 = MIGRATIONS.len() as i32;

/// Bring the database up to [`SCHEMA_VERSION`], applying pending migrations
/// in order. Each step commits together with its version bump.
///
/// A database stamped with a newer version is refused untouched.
pub fn initialize(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version INTEGER NOT NULL
        );",
    )?;

    let current = stored_version(conn)?;
    if current > SCHEMA_VERSION {
        return Err(Error::UnsupportedSchema {
            found: current,
            supported: SCHEMA_VERSION,
        });
    }
    for (index, sql) in MIGRATIONS.iter().enumerate().skip(current.max(0) as usize) {
        let version = index as i32 + 1;
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(sql)?;
        tx.execute(
            "INSERT INTO schema_version (id, version) VALUES (1, ?1)
             ON CONFLICT(id) DO UPDATE SET version = excluded.version",
            [version],
        )?;
        tx.commit()?;
        tracing::debug!("Applied schema migration v{}", version);
    }

    Ok(())
}

/// Recorded schema version; 0 for a fresh database.
fn stored_version(conn: &Connection) -> Result<i32> {
    let version = conn
        .query_row("SELECT version FROM schema_version WHERE id = 1", [], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(version.unwrap_or(0))
}

/// Create a monitor's readings table if it does not exist.
///
/// The timestamp is the row key, so a second insert for the same second
/// conflicts instead of duplicating.
pub fn create_readings_table(conn: &Connection, table: &TableName) -> Result<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            timestamp INTEGER PRIMARY KEY,
            laeq REAL NOT NULL,
            la10 REAL NOT NULL,
            la90 REAL NOT NULL,
            lafmax REAL NOT NULL,
            lceq REAL NOT NULL,
            lcfmax REAL NOT NULL,
            lc10 REAL NOT NULL,
            lc90 REAL NOT NULL
        );"
    ))?;
    Ok(())
}
