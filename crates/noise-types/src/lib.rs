//! Platform-agnostic types for environmental noise monitors.
//!
//! This crate provides the types shared by the store, the upstream client,
//! and the relay service.
//!
//! # Features
//!
//! - Monitor identifiers with their upstream and storage encodings
//! - Readings carrying the eight A/C-weighted decibel metrics
//! - Lenient wire records and their validation into readings
//! - Error types for data parsing
//!
//! # Example
//!
//! ```
//! use noise_types::{MonitorId, ReadingRecord, RawValue};
//! use time::OffsetDateTime;
//!
//! let id = MonitorId::parse("10.1.1.1")?;
//! assert_eq!(id.storage_key(), "10_1_1_1");
//!
//! let record = ReadingRecord {
//!     datetime: Some("2024-05-01 10:00:00".into()),
//!     laeq: Some(55.2.into()),
//!     la10: Some("58.0".into()),
//!     la90: Some(49.1.into()),
//!     lafmax: Some(71.3.into()),
//!     lceq: Some(63.0.into()),
//!     lcfmax: Some(80.4.into()),
//!     lc10: Some(66.2.into()),
//!     lc90: Some(57.5.into()),
//! };
//! let reading = record.to_reading(OffsetDateTime::now_utc())?;
//! assert_eq!(reading.metrics.la10, 58.0);
//! # Ok::<(), noise_types::ParseError>(())
//! ```

pub mod error;
pub mod types;

pub use error::{ParseError, ParseResult};
pub use types::{
    FUTURE_TOLERANCE_SECS, MAX_MONITOR_ID_LEN, Metrics, MonitorId, MonitorStatus,
    NormalizedBatch, REALTIME_WINDOW, RETENTION_DAYS, RawValue, Reading, ReadingRecord,
    SyncOutcome, UpstreamMonitor, format_datetime, normalize_records, parse_datetime,
    retention_window,
};
