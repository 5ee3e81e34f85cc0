//! Data models for stored data.

use std::fmt;

use serde::Serialize;
use time::OffsetDateTime;

use noise_types::{MonitorId, MonitorStatus, SyncOutcome};

use crate::error::{Error, Result};

/// Name of a monitor's dedicated readings table.
///
/// SQLite cannot bind identifiers as parameters, so table names are the only
/// values ever formatted into SQL. A `TableName` is either derived from a
/// validated [`MonitorId`] or parsed from the registry and re-validated, and
/// only ever contains `[A-Za-z0-9_]` after the `readings_` prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName(String);

impl TableName {
    /// Prefix shared by every readings table.
    pub const PREFIX: &'static str = "readings_";

    /// Derive the table name for a monitor.
    pub fn for_monitor(id: &MonitorId) -> Self {
        Self(format!("{}{}", Self::PREFIX, id.storage_key()))
    }

    /// Validate a table name read back from the registry.
    pub fn parse(raw: &str) -> Result<Self> {
        let suffix = raw
            .strip_prefix(Self::PREFIX)
            .ok_or_else(|| Error::InvalidTableName(raw.to_string()))?;
        let valid = !suffix.is_empty()
            && raw.len() <= Self::PREFIX.len() + noise_types::MAX_MONITOR_ID_LEN
            && suffix.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if valid {
            Ok(Self(raw.to_string()))
        } else {
            Err(Error::InvalidTableName(raw.to_string()))
        }
    }

    /// The validated identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A monitor in the registry.
#[derive(Debug, Clone, Serialize)]
pub struct StoredMonitor {
    /// Monitor identifier (upstream form).
    pub id: MonitorId,
    /// Display name.
    pub display_name: String,
    /// Installation location.
    pub location: Option<String>,
    /// Operational status.
    pub status: MonitorStatus,
    /// Name of the monitor's readings table.
    pub data_table: String,
    /// When the monitor was first registered.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Last registry update.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    /// End of the last successfully synchronized window.
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_sync_time: Option<OffsetDateTime>,
    /// Outcome of the last sync attempt.
    pub sync_status: Option<SyncOutcome>,
}

/// Counts returned by an upsert batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertSummary {
    /// Records submitted.
    pub attempted: usize,
    /// Distinct timestamps written (inserted or overwritten).
    pub saved: usize,
    /// Records skipped as malformed.
    pub skipped: usize,
}

/// Aggregate statistics over a trailing window.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReadingStats {
    /// Number of readings in the window.
    pub count: u64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub oldest: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub newest: Option<OffsetDateTime>,
    pub min_laeq: Option<f64>,
    pub max_laeq: Option<f64>,
    pub avg_laeq: Option<f64>,
    pub avg_la10: Option<f64>,
    pub avg_la90: Option<f64>,
}

/// Outcome of the retention sweep for one monitor.
#[derive(Debug, Clone, Serialize)]
pub struct PurgeOutcome {
    pub monitor_id: MonitorId,
    #[serde(flatten)]
    pub result: PurgeResult,
}

/// Deleted row count, or the error that prevented deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum PurgeResult {
    Deleted { deleted_count: usize },
    Failed { error: String },
}

/// Per-monitor data and sync summary.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorSyncStatus {
    pub monitor_id: MonitorId,
    pub data_table: String,
    pub total_records: u64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub oldest_record: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub latest_record: Option<OffsetDateTime>,
    /// Readings within the last hour.
    pub recent_records: u64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_sync_time: Option<OffsetDateTime>,
    pub sync_status: Option<SyncOutcome>,
    /// Set when the monitor's table could not be inspected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
