//! Local data persistence for noise monitor readings.
//!
//! This crate provides SQLite-based storage for the relay: a registry of
//! monitors and one readings table per monitor, keyed by timestamp.
//!
//! # Features
//!
//! - Monitor registry with status and sync bookkeeping
//! - Idempotent batch upserts (the latest value for a timestamp wins)
//! - Range, latest, and aggregate queries
//! - Retention sweeps that isolate per-monitor failures
//!
//! # Example
//!
//! ```no_run
//! use noise_store::{RangeQuery, Store};
//! use noise_types::MonitorId;
//!
//! let store = Store::open_default()?;
//! let id = MonitorId::parse("10.1.1.1").unwrap();
//!
//! // The ten most recent readings
//! let query = RangeQuery::new().newest_first().limit(10);
//! let readings = store.query_readings(&id, &query)?;
//! # Ok::<(), noise_store::Error>(())
//! ```

mod error;
mod models;
mod queries;
mod schema;
mod store;

pub use error::{Error, Result};
pub use models::{
    MonitorSyncStatus, PurgeOutcome, PurgeResult, ReadingStats, StoredMonitor, TableName,
    UpsertSummary,
};
pub use queries::RangeQuery;
pub use schema::SCHEMA_VERSION;
pub use store::Store;

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/noise-dashboard/data.db`
/// - macOS: `~/Library/Application Support/noise-dashboard/data.db`
/// - Windows: `C:\Users\<user>\AppData\Local\noise-dashboard\data.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("noise-dashboard")
        .join("data.db")
}
