//! Main store implementation.

use std::collections::BTreeSet;
use std::path::Path;

use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row};
use time::{Duration, OffsetDateTime};
use tracing::{debug, info, warn};

use noise_types::{Metrics, MonitorId, MonitorStatus, Reading, ReadingRecord, SyncOutcome};

use crate::error::{Error, Result};
use crate::models::{
    MonitorSyncStatus, PurgeOutcome, PurgeResult, ReadingStats, StoredMonitor, TableName,
    UpsertSummary,
};
use crate::queries::RangeQuery;
use crate::schema;

const MONITOR_COLUMNS: &str = "monitor_id, display_name, location, status, data_table_name, \
                               created_at, updated_at, last_sync_time, sync_status";

/// SQLite-based store for noise monitor readings.
///
/// Holds the monitor registry and one readings table per monitor. The store
/// owns a single connection; callers share it behind a mutex.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        info!("Opening database at {}", path.display());
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        schema::initialize(&conn)?;

        Ok(Self { conn })
    }

    /// Open the default database location.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_db_path())
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }

    /// Close the database, flushing pending writes.
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| Error::Database(e))?;
        info!("Database closed");
        Ok(())
    }
}

fn conversion_error<E>(idx: usize, ty: Type, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, ty, Box::new(err))
}

fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<OffsetDateTime> {
    let secs: i64 = row.get(idx)?;
    OffsetDateTime::from_unix_timestamp(secs).map_err(|e| conversion_error(idx, Type::Integer, e))
}

fn optional_timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<OffsetDateTime>> {
    row.get::<_, Option<i64>>(idx)?
        .map(|secs| {
            OffsetDateTime::from_unix_timestamp(secs)
                .map_err(|e| conversion_error(idx, Type::Integer, e))
        })
        .transpose()
}

fn monitor_from_row(row: &Row<'_>) -> rusqlite::Result<StoredMonitor> {
    let raw_id: String = row.get(0)?;
    Ok(StoredMonitor {
        id: MonitorId::parse(&raw_id).map_err(|e| conversion_error(0, Type::Text, e))?,
        display_name: row.get(1)?,
        location: row.get(2)?,
        status: MonitorStatus::from_column(row.get::<_, Option<String>>(3)?.as_deref()),
        data_table: row.get(4)?,
        created_at: timestamp_column(row, 5)?,
        updated_at: timestamp_column(row, 6)?,
        last_sync_time: optional_timestamp_column(row, 7)?,
        sync_status: row
            .get::<_, Option<String>>(8)?
            .and_then(|s| SyncOutcome::from_column(&s)),
    })
}

fn reading_from_row(row: &Row<'_>) -> rusqlite::Result<Reading> {
    Ok(Reading {
        timestamp: timestamp_column(row, 0)?,
        metrics: Metrics {
            laeq: row.get(1)?,
            la10: row.get(2)?,
            la90: row.get(3)?,
            lafmax: row.get(4)?,
            lceq: row.get(5)?,
            lcfmax: row.get(6)?,
            lc10: row.get(7)?,
            lc90: row.get(8)?,
        },
    })
}

// Monitor registry operations
impl Store {
    /// Register a monitor, creating its readings table on first sight.
    ///
    /// Re-registering a known monitor refreshes its name and location and
    /// marks it active again.
    pub fn register_monitor(
        &self,
        id: &MonitorId,
        display_name: &str,
        location: Option<&str>,
    ) -> Result<StoredMonitor> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let table = TableName::for_monitor(id);

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO monitors (monitor_id, display_name, location, status, data_table_name,
                created_at, updated_at)
             VALUES (?1, ?2, ?3, 'active', ?4, ?5, ?5)
             ON CONFLICT(monitor_id) DO UPDATE SET
                display_name = ?2,
                location = COALESCE(?3, location),
                status = 'active',
                updated_at = ?5",
            rusqlite::params![id.storage_key(), display_name, location, table.as_str(), now],
        )?;
        schema::create_readings_table(&tx, &table)?;
        tx.commit()?;

        debug!("Registered monitor {} ({})", id, table);

        self.get_monitor(id)?
            .ok_or_else(|| Error::MonitorNotFound(id.to_string()))
    }

    /// Get a monitor by ID.
    pub fn get_monitor(&self, id: &MonitorId) -> Result<Option<StoredMonitor>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {MONITOR_COLUMNS} FROM monitors WHERE monitor_id = ?"
        ))?;

        let monitor = stmt
            .query_row([id.storage_key()], monitor_from_row)
            .optional()?;

        Ok(monitor)
    }

    /// List all registered monitors, including inactive ones.
    pub fn list_monitors(&self) -> Result<Vec<StoredMonitor>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {MONITOR_COLUMNS} FROM monitors ORDER BY monitor_id"
        ))?;

        let monitors = stmt
            .query_map([], monitor_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(monitors)
    }

    /// List monitors whose status is active or unknown.
    pub fn list_active_monitors(&self) -> Result<Vec<StoredMonitor>> {
        Ok(self
            .list_monitors()?
            .into_iter()
            .filter(|m| m.status.is_tracked())
            .collect())
    }

    /// Flip every tracked monitor absent from `listed` to inactive.
    ///
    /// Returns the number of monitors deactivated.
    pub fn mark_missing_inactive(&self, listed: &[MonitorId]) -> Result<usize> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let mut deactivated = 0;

        for monitor in self.list_active_monitors()? {
            if listed.contains(&monitor.id) {
                continue;
            }
            deactivated += self.conn.execute(
                "UPDATE monitors SET status = 'inactive', updated_at = ?2 WHERE monitor_id = ?1",
                rusqlite::params![monitor.id.storage_key(), now],
            )?;
            info!("Monitor {} no longer listed upstream, marked inactive", monitor.id);
        }

        Ok(deactivated)
    }

    /// Resolve the validated readings table of a registered monitor.
    fn monitor_table(&self, id: &MonitorId) -> Result<TableName> {
        let raw: String = self
            .conn
            .query_row(
                "SELECT data_table_name FROM monitors WHERE monitor_id = ?",
                [id.storage_key()],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| Error::MonitorNotFound(id.to_string()))?;

        TableName::parse(&raw)
    }

    /// Record the outcome of a sync attempt at the current time.
    pub fn record_sync_outcome(&self, id: &MonitorId, outcome: SyncOutcome) -> Result<()> {
        self.record_sync_outcome_at(id, outcome, OffsetDateTime::now_utc())
    }

    /// Record the outcome of a sync attempt.
    ///
    /// A successful sync moves `last_sync_time` to `synced_until`; a failure
    /// only updates the outcome. Reading rows are never touched.
    pub fn record_sync_outcome_at(
        &self,
        id: &MonitorId,
        outcome: SyncOutcome,
        synced_until: OffsetDateTime,
    ) -> Result<()> {
        let now = OffsetDateTime::now_utc().unix_timestamp();

        let updated = match outcome {
            SyncOutcome::Synchronized => self.conn.execute(
                "UPDATE monitors SET last_sync_time = ?2, sync_status = ?3, updated_at = ?4
                 WHERE monitor_id = ?1",
                rusqlite::params![
                    id.storage_key(),
                    synced_until.unix_timestamp(),
                    outcome.as_str(),
                    now
                ],
            )?,
            SyncOutcome::Failed => self.conn.execute(
                "UPDATE monitors SET sync_status = ?2, updated_at = ?3 WHERE monitor_id = ?1",
                rusqlite::params![id.storage_key(), outcome.as_str(), now],
            )?,
        };

        if updated == 0 {
            return Err(Error::MonitorNotFound(id.to_string()));
        }

        debug!("Recorded sync outcome {} for {}", outcome, id);
        Ok(())
    }
}

// Reading operations
impl Store {
    /// Insert or overwrite readings for a monitor in one transaction.
    ///
    /// Malformed records are logged and skipped; the rest of the batch still
    /// commits. If the same timestamp appears twice, the later record wins and
    /// `saved` counts it once.
    pub fn upsert_readings(
        &mut self,
        id: &MonitorId,
        records: &[ReadingRecord],
    ) -> Result<UpsertSummary> {
        let table = self.monitor_table(id)?;
        let now = OffsetDateTime::now_utc();
        let mut written = BTreeSet::new();
        let mut skipped = 0;

        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {table} (timestamp, laeq, la10, la90, lafmax, lceq, lcfmax, lc10, lc90)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(timestamp) DO UPDATE SET
                    laeq = excluded.laeq,
                    la10 = excluded.la10,
                    la90 = excluded.la90,
                    lafmax = excluded.lafmax,
                    lceq = excluded.lceq,
                    lcfmax = excluded.lcfmax,
                    lc10 = excluded.lc10,
                    lc90 = excluded.lc90"
            ))?;

            for record in records {
                let reading = match record.to_reading(now) {
                    Ok(reading) => reading,
                    Err(e) => {
                        warn!("Skipping malformed reading for {}: {} ({:?})", id, e, record);
                        skipped += 1;
                        continue;
                    }
                };
                let m = &reading.metrics;
                stmt.execute(rusqlite::params![
                    reading.timestamp.unix_timestamp(),
                    m.laeq,
                    m.la10,
                    m.la90,
                    m.lafmax,
                    m.lceq,
                    m.lcfmax,
                    m.lc10,
                    m.lc90,
                ])?;
                written.insert(reading.timestamp);
            }
        }
        tx.commit()?;

        let summary = UpsertSummary {
            attempted: records.len(),
            saved: written.len(),
            skipped,
        };
        info!(
            "Saved {} of {} readings for {}",
            summary.saved, summary.attempted, id
        );
        Ok(summary)
    }

    /// Query readings with filters.
    pub fn query_readings(&self, id: &MonitorId, query: &RangeQuery) -> Result<Vec<Reading>> {
        let table = self.monitor_table(id)?;
        let sql = query.build_sql(&table);
        let (_, params) = query.build_where();

        debug!("Executing query: {}", sql);

        let mut stmt = self.conn.prepare(&sql)?;
        let readings = stmt
            .query_map(rusqlite::params_from_iter(params.iter()), reading_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(readings)
    }

    /// Readings in `[start, end]`, oldest first.
    pub fn query_range(
        &self,
        id: &MonitorId,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<Reading>> {
        self.query_readings(id, &RangeQuery::between(start, end))
    }

    /// The most recent reading for a monitor.
    pub fn query_latest(&self, id: &MonitorId) -> Result<Option<Reading>> {
        let mut readings = self.query_readings(id, &RangeQuery::new().newest_first().limit(1))?;
        Ok(readings.pop())
    }

    /// Count all readings stored for a monitor.
    pub fn count_readings(&self, id: &MonitorId) -> Result<u64> {
        let table = self.monitor_table(id)?;
        let count: i64 =
            self.conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Aggregate statistics over the trailing `window_days`.
    pub fn query_stats(&self, id: &MonitorId, window_days: u32) -> Result<ReadingStats> {
        let table = self.monitor_table(id)?;
        let since = OffsetDateTime::now_utc() - Duration::days(i64::from(window_days));

        let stats = self.conn.query_row(
            &format!(
                "SELECT COUNT(*), MIN(timestamp), MAX(timestamp),
                        MIN(laeq), MAX(laeq), AVG(laeq), AVG(la10), AVG(la90)
                 FROM {table} WHERE timestamp >= ?"
            ),
            [since.unix_timestamp()],
            |row| {
                Ok(ReadingStats {
                    count: row.get::<_, i64>(0)? as u64,
                    oldest: optional_timestamp_column(row, 1)?,
                    newest: optional_timestamp_column(row, 2)?,
                    min_laeq: row.get(3)?,
                    max_laeq: row.get(4)?,
                    avg_laeq: row.get(5)?,
                    avg_la10: row.get(6)?,
                    avg_la90: row.get(7)?,
                })
            },
        )?;

        Ok(stats)
    }
}

// Retention and maintenance
impl Store {
    /// Delete a monitor's readings strictly older than `cutoff`.
    pub fn delete_readings_before(&self, id: &MonitorId, cutoff: OffsetDateTime) -> Result<usize> {
        let table = self.monitor_table(id)?;
        let deleted = self.conn.execute(
            &format!("DELETE FROM {table} WHERE timestamp < ?"),
            [cutoff.unix_timestamp()],
        )?;
        Ok(deleted)
    }

    /// Retention sweep over every active or unknown monitor.
    ///
    /// A failure on one monitor is reported in its outcome and does not stop
    /// the sweep.
    pub fn purge_before(&self, cutoff: OffsetDateTime) -> Result<Vec<PurgeOutcome>> {
        let monitors = self.list_active_monitors()?;
        let mut outcomes = Vec::with_capacity(monitors.len());

        for monitor in monitors {
            let result = match self.delete_readings_before(&monitor.id, cutoff) {
                Ok(deleted_count) => {
                    info!("Cleaned {} rows for monitor {}", deleted_count, monitor.id);
                    PurgeResult::Deleted { deleted_count }
                }
                Err(e) => {
                    warn!("Failed to clean data for monitor {}: {}", monitor.id, e);
                    PurgeResult::Failed {
                        error: e.to_string(),
                    }
                }
            };
            outcomes.push(PurgeOutcome {
                monitor_id: monitor.id,
                result,
            });
        }

        Ok(outcomes)
    }

    /// Per-monitor record counts and sync bookkeeping.
    pub fn sync_overview(&self) -> Result<Vec<MonitorSyncStatus>> {
        let recent_since = (OffsetDateTime::now_utc() - Duration::hours(1)).unix_timestamp();
        let monitors = self.list_monitors()?;
        let mut overview = Vec::with_capacity(monitors.len());

        for monitor in monitors {
            let mut status = MonitorSyncStatus {
                monitor_id: monitor.id.clone(),
                data_table: monitor.data_table.clone(),
                total_records: 0,
                oldest_record: None,
                latest_record: None,
                recent_records: 0,
                last_sync_time: monitor.last_sync_time,
                sync_status: monitor.sync_status,
                error: None,
            };

            let counts = self.monitor_table(&monitor.id).and_then(|table| {
                self.conn
                    .query_row(
                        &format!(
                            "SELECT COUNT(*), MIN(timestamp), MAX(timestamp),
                                    COALESCE(SUM(timestamp >= ?1), 0)
                             FROM {table}"
                        ),
                        [recent_since],
                        |row| {
                            Ok((
                                row.get::<_, i64>(0)? as u64,
                                optional_timestamp_column(row, 1)?,
                                optional_timestamp_column(row, 2)?,
                                row.get::<_, i64>(3)? as u64,
                            ))
                        },
                    )
                    .map_err(Error::from)
            });

            match counts {
                Ok((total, oldest, latest, recent)) => {
                    status.total_records = total;
                    status.oldest_record = oldest;
                    status.latest_record = latest;
                    status.recent_records = recent;
                }
                Err(e) => {
                    warn!("Error checking sync status for monitor {}: {}", monitor.id, e);
                    status.error = Some(e.to_string());
                }
            }

            overview.push(status);
        }

        Ok(overview)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use noise_types::RawValue;

    fn monitor_id(raw: &str) -> MonitorId {
        MonitorId::parse(raw).unwrap()
    }

    fn record_at(timestamp: OffsetDateTime, laeq: f64) -> ReadingRecord {
        ReadingRecord {
            datetime: Some(RawValue::Text(noise_types::format_datetime(timestamp))),
            laeq: Some(laeq.into()),
            la10: Some((laeq + 3.0).into()),
            la90: Some((laeq - 5.0).into()),
            lafmax: Some((laeq + 15.0).into()),
            lceq: Some((laeq + 8.0).into()),
            lcfmax: Some((laeq + 20.0).into()),
            lc10: Some((laeq + 10.0).into()),
            lc90: Some((laeq + 2.0).into()),
        }
    }

    /// A whole-second instant `minutes_ago` minutes before now.
    fn minutes_ago(minutes: i64) -> OffsetDateTime {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        OffsetDateTime::from_unix_timestamp(now - minutes * 60).unwrap()
    }

    fn store_with_monitor(raw: &str) -> (Store, MonitorId) {
        let store = Store::open_in_memory().unwrap();
        let id = monitor_id(raw);
        store
            .register_monitor(&id, "Noise Monitor - Test", Some("Test Street"))
            .unwrap();
        (store, id)
    }

    #[test]
    fn test_open_in_memory() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.list_monitors().unwrap().is_empty());
    }

    #[test]
    fn test_open_file_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("data.db");

        let store = Store::open(&path).unwrap();
        store
            .register_monitor(&monitor_id("10.1.1.1"), "Noise", None)
            .unwrap();
        store.close().unwrap();

        let reopened = Store::open(&path).unwrap();
        assert_eq!(reopened.list_monitors().unwrap().len(), 1);
    }

    #[test]
    fn test_register_monitor() {
        let (store, id) = store_with_monitor("10.1.1.1");

        let monitor = store.get_monitor(&id).unwrap().unwrap();
        assert_eq!(monitor.id, id);
        assert_eq!(monitor.display_name, "Noise Monitor - Test");
        assert_eq!(monitor.location.as_deref(), Some("Test Street"));
        assert_eq!(monitor.status, MonitorStatus::Active);
        assert_eq!(monitor.data_table, "readings_10_1_1_1");
        assert!(monitor.last_sync_time.is_none());
        assert!(monitor.sync_status.is_none());
        assert_eq!(store.count_readings(&id).unwrap(), 0);
    }

    #[test]
    fn test_register_monitor_updates_existing() {
        let (store, id) = store_with_monitor("10.1.1.1");

        // Storage form refers to the same monitor
        let again = store
            .register_monitor(&monitor_id("10_1_1_1"), "Renamed", None)
            .unwrap();
        assert_eq!(again.display_name, "Renamed");
        assert_eq!(again.location.as_deref(), Some("Test Street"));
        assert_eq!(store.list_monitors().unwrap().len(), 1);
        assert_eq!(store.get_monitor(&id).unwrap().unwrap().display_name, "Renamed");
    }

    #[test]
    fn test_get_monitor_not_registered() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.get_monitor(&monitor_id("10.9.9.9")).unwrap().is_none());
    }

    #[test]
    fn test_upsert_and_query_range() {
        let (mut store, id) = store_with_monitor("10.1.1.1");
        let t0 = minutes_ago(30);
        let t1 = minutes_ago(25);
        let t2 = minutes_ago(20);

        // Out of order within the batch
        let records = vec![record_at(t2, 52.0), record_at(t0, 50.0), record_at(t1, 51.0)];
        let summary = store.upsert_readings(&id, &records).unwrap();
        assert_eq!(summary, UpsertSummary { attempted: 3, saved: 3, skipped: 0 });

        let readings = store.query_range(&id, t0, t2).unwrap();
        assert_eq!(readings.len(), 3);
        assert_eq!(readings[0].timestamp, t0);
        assert_eq!(readings[0].metrics.laeq, 50.0);
        assert_eq!(readings[0].metrics.lcfmax, 70.0);
        assert_eq!(readings[2].timestamp, t2);

        // Bounds are inclusive on both ends
        assert_eq!(store.query_range(&id, t1, t1).unwrap().len(), 1);
        assert_eq!(store.query_range(&id, t0 + Duration::seconds(1), t2).unwrap().len(), 2);
    }

    #[test]
    fn test_upsert_last_value_wins_within_batch() {
        let (mut store, id) = store_with_monitor("10.1.1.1");
        let t = minutes_ago(10);

        let records = vec![record_at(t, 50.0), record_at(t, 60.0)];
        let summary = store.upsert_readings(&id, &records).unwrap();
        assert_eq!(summary.attempted, 2);
        assert_eq!(summary.saved, 1);
        assert_eq!(summary.skipped, 0);

        let readings = store.query_range(&id, t, t).unwrap();
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].metrics.laeq, 60.0);
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let (mut store, id) = store_with_monitor("10.1.1.1");
        let records = vec![record_at(minutes_ago(15), 50.0), record_at(minutes_ago(10), 51.0)];

        store.upsert_readings(&id, &records).unwrap();
        let first = store.query_range(&id, minutes_ago(60), minutes_ago(0)).unwrap();

        store.upsert_readings(&id, &records).unwrap();
        let second = store.query_range(&id, minutes_ago(60), minutes_ago(0)).unwrap();

        assert_eq!(first, second);
        assert_eq!(store.count_readings(&id).unwrap(), 2);
    }

    #[test]
    fn test_upsert_overwrites_existing_timestamp() {
        let (mut store, id) = store_with_monitor("10.1.1.1");
        let t = minutes_ago(5);

        store.upsert_readings(&id, &[record_at(t, 50.0)]).unwrap();
        store.upsert_readings(&id, &[record_at(t, 65.5)]).unwrap();

        let latest = store.query_latest(&id).unwrap().unwrap();
        assert_eq!(latest.metrics.laeq, 65.5);
        assert_eq!(store.count_readings(&id).unwrap(), 1);
    }

    #[test]
    fn test_upsert_skips_malformed_records() {
        let (mut store, id) = store_with_monitor("10.1.1.1");
        let good = record_at(minutes_ago(10), 50.0);
        let mut bad_metric = record_at(minutes_ago(9), 51.0);
        bad_metric.la90 = Some("n/a".into());
        let mut bad_time = record_at(minutes_ago(8), 52.0);
        bad_time.datetime = Some("31/12/2024".into());

        let summary = store
            .upsert_readings(&id, &[good, bad_metric, bad_time])
            .unwrap();
        assert_eq!(summary.attempted, 3);
        assert_eq!(summary.saved, 1);
        assert_eq!(summary.skipped, 2);
        assert_eq!(store.count_readings(&id).unwrap(), 1);
    }

    #[test]
    fn test_upsert_unknown_monitor() {
        let mut store = Store::open_in_memory().unwrap();
        let result = store.upsert_readings(&monitor_id("10.9.9.9"), &[]);
        assert!(matches!(result, Err(Error::MonitorNotFound(_))));
    }

    #[test]
    fn test_query_latest() {
        let (mut store, id) = store_with_monitor("10.1.1.1");
        assert!(store.query_latest(&id).unwrap().is_none());

        let newest = minutes_ago(5);
        store
            .upsert_readings(&id, &[record_at(minutes_ago(10), 50.0), record_at(newest, 70.0)])
            .unwrap();

        let latest = store.query_latest(&id).unwrap().unwrap();
        assert_eq!(latest.metrics.laeq, 70.0);
        assert_eq!(latest.timestamp, newest);
    }

    #[test]
    fn test_query_stats() {
        let (mut store, id) = store_with_monitor("10.1.1.1");

        let empty = store.query_stats(&id, 7).unwrap();
        assert_eq!(empty.count, 0);
        assert!(empty.avg_laeq.is_none());

        let oldest = minutes_ago(30);
        let records = vec![
            record_at(oldest, 40.0),
            record_at(minutes_ago(20), 50.0),
            record_at(minutes_ago(10), 60.0),
            // Outside a one-day window
            record_at(minutes_ago(60 * 48), 90.0),
        ];
        store.upsert_readings(&id, &records).unwrap();

        let stats = store.query_stats(&id, 1).unwrap();
        assert_eq!(stats.count, 3);
        assert_eq!(stats.min_laeq, Some(40.0));
        assert_eq!(stats.max_laeq, Some(60.0));
        assert_eq!(stats.avg_laeq, Some(50.0));
        assert_eq!(stats.avg_la10, Some(53.0));
        assert_eq!(stats.avg_la90, Some(45.0));
        assert_eq!(stats.oldest, Some(oldest));

        assert_eq!(store.query_stats(&id, 7).unwrap().count, 4);
    }

    #[test]
    fn test_record_sync_outcome() {
        let (mut store, id) = store_with_monitor("10.1.1.1");
        store.upsert_readings(&id, &[record_at(minutes_ago(5), 50.0)]).unwrap();

        let synced_until = minutes_ago(1);
        store
            .record_sync_outcome_at(&id, SyncOutcome::Synchronized, synced_until)
            .unwrap();
        let monitor = store.get_monitor(&id).unwrap().unwrap();
        assert_eq!(monitor.sync_status, Some(SyncOutcome::Synchronized));
        assert_eq!(monitor.last_sync_time, Some(synced_until));

        // A failure keeps the last successful sync time
        store.record_sync_outcome(&id, SyncOutcome::Failed).unwrap();
        let monitor = store.get_monitor(&id).unwrap().unwrap();
        assert_eq!(monitor.sync_status, Some(SyncOutcome::Failed));
        assert_eq!(monitor.last_sync_time, Some(synced_until));

        // Readings are untouched
        assert_eq!(store.count_readings(&id).unwrap(), 1);
    }

    #[test]
    fn test_record_sync_outcome_unknown_monitor() {
        let store = Store::open_in_memory().unwrap();
        let result = store.record_sync_outcome(&monitor_id("10.9.9.9"), SyncOutcome::Failed);
        assert!(matches!(result, Err(Error::MonitorNotFound(_))));
    }

    #[test]
    fn test_mark_missing_inactive() {
        let (store, a) = store_with_monitor("10.1.1.1");
        let b = monitor_id("10.1.1.2");
        store.register_monitor(&b, "Noise B", None).unwrap();

        let deactivated = store.mark_missing_inactive(std::slice::from_ref(&a)).unwrap();
        assert_eq!(deactivated, 1);

        let active = store.list_active_monitors().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, a);
        assert_eq!(
            store.get_monitor(&b).unwrap().unwrap().status,
            MonitorStatus::Inactive
        );

        // Seen again upstream: reactivated
        store.register_monitor(&b, "Noise B", None).unwrap();
        assert_eq!(store.list_active_monitors().unwrap().len(), 2);
    }

    #[test]
    fn test_null_status_reads_as_unknown_and_is_tracked() {
        let (store, id) = store_with_monitor("10.1.1.1");
        store
            .conn
            .execute("UPDATE monitors SET status = NULL", [])
            .unwrap();

        let monitor = store.get_monitor(&id).unwrap().unwrap();
        assert_eq!(monitor.status, MonitorStatus::Unknown);
        assert_eq!(store.list_active_monitors().unwrap().len(), 1);
    }

    #[test]
    fn test_tampered_table_name_is_rejected() {
        let (store, id) = store_with_monitor("10.1.1.1");
        store
            .conn
            .execute(
                "UPDATE monitors SET data_table_name = 'readings_x; DROP TABLE monitors'",
                [],
            )
            .unwrap();

        let result = store.count_readings(&id);
        assert!(matches!(result, Err(Error::InvalidTableName(_))));
        assert_eq!(store.list_monitors().unwrap().len(), 1);
    }

    #[test]
    fn test_purge_before_boundary() {
        let (mut store, id) = store_with_monitor("10.1.1.1");
        let cutoff = minutes_ago(60);

        let records = vec![
            record_at(cutoff - Duration::seconds(1), 40.0),
            record_at(cutoff, 50.0),
            record_at(cutoff + Duration::minutes(5), 60.0),
        ];
        store.upsert_readings(&id, &records).unwrap();

        let outcomes = store.purge_before(cutoff).unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].result, PurgeResult::Deleted { deleted_count: 1 });

        let remaining = store.query_range(&id, minutes_ago(120), minutes_ago(0)).unwrap();
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining[0].timestamp, cutoff);
    }

    #[test]
    fn test_purge_failure_is_isolated() {
        let (mut store, a) = store_with_monitor("10.1.1.1");
        let b = monitor_id("10.1.1.2");
        store.register_monitor(&b, "Noise B", None).unwrap();

        let old = minutes_ago(120);
        store.upsert_readings(&a, &[record_at(old, 50.0)]).unwrap();
        store.upsert_readings(&b, &[record_at(old, 50.0)]).unwrap();

        // Break monitor A's table
        store.conn.execute("DROP TABLE readings_10_1_1_1", []).unwrap();

        let outcomes = store.purge_before(minutes_ago(60)).unwrap();
        assert_eq!(outcomes.len(), 2);

        let outcome_a = outcomes.iter().find(|o| o.monitor_id == a).unwrap();
        assert!(matches!(outcome_a.result, PurgeResult::Failed { .. }));

        let outcome_b = outcomes.iter().find(|o| o.monitor_id == b).unwrap();
        assert_eq!(outcome_b.result, PurgeResult::Deleted { deleted_count: 1 });
        assert_eq!(store.count_readings(&b).unwrap(), 0);
    }

    #[test]
    fn test_purge_skips_inactive_monitors() {
        let (mut store, id) = store_with_monitor("10.1.1.1");
        store.upsert_readings(&id, &[record_at(minutes_ago(120), 50.0)]).unwrap();
        store.mark_missing_inactive(&[]).unwrap();

        let outcomes = store.purge_before(minutes_ago(60)).unwrap();
        assert!(outcomes.is_empty());
        assert_eq!(store.count_readings(&id).unwrap(), 1);
    }

    #[test]
    fn test_purge_outcome_serialization() {
        let outcome = PurgeOutcome {
            monitor_id: monitor_id("10.1.1.1"),
            result: PurgeResult::Deleted { deleted_count: 4 },
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["monitor_id"], "10.1.1.1");
        assert_eq!(json["deleted_count"], 4);
    }

    #[test]
    fn test_sync_overview() {
        let (mut store, id) = store_with_monitor("10.1.1.1");
        let old = minutes_ago(180);
        let recent = minutes_ago(10);
        store
            .upsert_readings(&id, &[record_at(old, 50.0), record_at(recent, 55.0)])
            .unwrap();

        let overview = store.sync_overview().unwrap();
        assert_eq!(overview.len(), 1);
        assert_eq!(overview[0].total_records, 2);
        assert_eq!(overview[0].recent_records, 1);
        assert_eq!(overview[0].oldest_record, Some(old));
        assert_eq!(overview[0].latest_record, Some(recent));
        assert!(overview[0].error.is_none());
    }
}
