//! Mock upstream implementation for testing.
//!
//! [`MockUpstream`] implements the [`Upstream`] trait over canned data, so
//! sync logic can be exercised without network access.
//!
//! # Features
//!
//! - **Call counting**: per-monitor fetch counts and listing counts
//! - **Failure injection**: fail the listing or individual monitors
//! - **Latency simulation**: delay every call to test overlapping work

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use noise_types::{MonitorId, RawValue, ReadingRecord, UpstreamMonitor, parse_datetime};

use crate::error::{Result, UpstreamError};
use crate::traits::Upstream;

/// An in-memory upstream for tests.
///
/// # Example
///
/// ```
/// use noise_types::{MonitorId, Reading, Metrics};
/// use noise_upstream::{MockUpstream, Upstream};
/// use time::{Duration, OffsetDateTime};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let id = MonitorId::parse("10.1.1.1").unwrap();
/// let now = OffsetDateTime::now_utc();
/// let reading = Reading::new(now - Duration::minutes(5), Metrics::default());
///
/// let upstream = MockUpstream::builder()
///     .monitor("10.1.1.1", "Noise Monitor - Drumcondra")
///     .readings(&id, vec![(&reading).into()])
///     .build();
///
/// let records = upstream
///     .fetch_readings(&id, now - Duration::hours(1), now)
///     .await
///     .unwrap();
/// assert_eq!(records.len(), 1);
/// assert_eq!(upstream.fetch_count(&id), 1);
/// # }
/// ```
#[derive(Default)]
pub struct MockUpstream {
    monitors: RwLock<Vec<UpstreamMonitor>>,
    readings: RwLock<HashMap<MonitorId, Vec<ReadingRecord>>>,
    failing: RwLock<HashSet<MonitorId>>,
    listing_fails: AtomicBool,
    list_calls: AtomicU32,
    fetch_calls: std::sync::Mutex<HashMap<MonitorId, u32>>,
    latency_ms: AtomicU64,
}

impl std::fmt::Debug for MockUpstream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockUpstream")
            .field("list_calls", &self.list_count())
            .field("fetch_calls", &self.total_fetch_count())
            .finish()
    }
}

impl MockUpstream {
    /// Create an empty mock: no monitors, no readings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start building a mock with canned data.
    pub fn builder() -> MockUpstreamBuilder {
        MockUpstreamBuilder::default()
    }

    async fn simulate_latency(&self) {
        let latency = self.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
    }

    // --- Test control methods ---

    /// Add a monitor to the upstream listing.
    pub async fn add_monitor(&self, monitor: UpstreamMonitor) {
        self.monitors.write().await.push(monitor);
    }

    /// Replace the upstream listing.
    pub async fn set_monitors(&self, monitors: Vec<UpstreamMonitor>) {
        *self.monitors.write().await = monitors;
    }

    /// Append canned records for a monitor.
    pub async fn add_readings(&self, id: &MonitorId, records: Vec<ReadingRecord>) {
        self.readings
            .write()
            .await
            .entry(id.clone())
            .or_default()
            .extend(records);
    }

    /// Make fetches for one monitor fail (or succeed again).
    pub async fn set_failing(&self, id: &MonitorId, fail: bool) {
        let mut failing = self.failing.write().await;
        if fail {
            failing.insert(id.clone());
        } else {
            failing.remove(id);
        }
    }

    /// Make the monitor listing fail.
    pub fn set_listing_fails(&self, fail: bool) {
        self.listing_fails.store(fail, Ordering::Relaxed);
    }

    /// Delay every call by this duration. `Duration::ZERO` disables it.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Number of `list_monitors` calls.
    pub fn list_count(&self) -> u32 {
        self.list_calls.load(Ordering::Relaxed)
    }

    /// Number of `fetch_readings` calls for one monitor.
    pub fn fetch_count(&self, id: &MonitorId) -> u32 {
        self.fetch_calls
            .lock()
            .map(|calls| calls.get(id).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Number of `fetch_readings` calls across all monitors.
    pub fn total_fetch_count(&self) -> u32 {
        self.fetch_calls
            .lock()
            .map(|calls| calls.values().sum())
            .unwrap_or(0)
    }

    /// Reset all call counters.
    pub fn reset_counts(&self) {
        self.list_calls.store(0, Ordering::Relaxed);
        if let Ok(mut calls) = self.fetch_calls.lock() {
            calls.clear();
        }
    }
}

/// Whether a canned record falls inside `[start, end]`.
///
/// Records without a readable datetime are always returned so malformed
/// upstream data can be simulated.
fn in_window(record: &ReadingRecord, start: OffsetDateTime, end: OffsetDateTime) -> bool {
    let timestamp = match &record.datetime {
        Some(RawValue::Text(text)) => parse_datetime(text).ok(),
        Some(RawValue::Number(secs)) => OffsetDateTime::from_unix_timestamp(*secs as i64).ok(),
        _ => None,
    };
    timestamp.is_none_or(|ts| ts >= start && ts <= end)
}

#[async_trait]
impl Upstream for MockUpstream {
    async fn list_monitors(&self) -> Result<Vec<UpstreamMonitor>> {
        self.list_calls.fetch_add(1, Ordering::Relaxed);
        self.simulate_latency().await;

        if self.listing_fails.load(Ordering::Relaxed) {
            return Err(UpstreamError::Status {
                status: 503,
                message: "Mock listing failure".to_string(),
            });
        }

        Ok(self.monitors.read().await.clone())
    }

    async fn fetch_readings(
        &self,
        monitor: &MonitorId,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<ReadingRecord>> {
        if let Ok(mut calls) = self.fetch_calls.lock() {
            *calls.entry(monitor.clone()).or_default() += 1;
        }
        self.simulate_latency().await;

        if self.failing.read().await.contains(monitor) {
            return Err(UpstreamError::Timeout(format!(
                "mock://api/data?monitor={}",
                monitor
            )));
        }

        Ok(self
            .readings
            .read()
            .await
            .get(monitor)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| in_window(r, start, end))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Builder for [`MockUpstream`].
#[derive(Debug, Default)]
pub struct MockUpstreamBuilder {
    monitors: Vec<UpstreamMonitor>,
    readings: HashMap<MonitorId, Vec<ReadingRecord>>,
    failing: HashSet<MonitorId>,
    listing_fails: bool,
}

impl MockUpstreamBuilder {
    /// Add a monitor with a label and no location.
    pub fn monitor(mut self, serial_number: &str, label: &str) -> Self {
        self.monitors.push(UpstreamMonitor {
            serial_number: serial_number.to_string(),
            label: label.to_string(),
            location: None,
        });
        self
    }

    /// Add canned records for a monitor.
    pub fn readings(mut self, id: &MonitorId, records: Vec<ReadingRecord>) -> Self {
        self.readings.entry(id.clone()).or_default().extend(records);
        self
    }

    /// Make fetches for a monitor fail.
    pub fn failing(mut self, id: &MonitorId) -> Self {
        self.failing.insert(id.clone());
        self
    }

    /// Make the monitor listing fail.
    pub fn listing_fails(mut self) -> Self {
        self.listing_fails = true;
        self
    }

    pub fn build(self) -> MockUpstream {
        MockUpstream {
            monitors: RwLock::new(self.monitors),
            readings: RwLock::new(self.readings),
            failing: RwLock::new(self.failing),
            listing_fails: AtomicBool::new(self.listing_fails),
            ..MockUpstream::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use noise_types::{Metrics, Reading};
    use time::macros::datetime;

    fn id(raw: &str) -> MonitorId {
        MonitorId::parse(raw).unwrap()
    }

    fn record(ts: OffsetDateTime) -> ReadingRecord {
        ReadingRecord::from(&Reading::new(ts, Metrics::default()))
    }

    #[tokio::test]
    async fn test_fetch_filters_window_and_counts() {
        let monitor = id("10.1.1.1");
        let upstream = MockUpstream::builder()
            .readings(
                &monitor,
                vec![
                    record(datetime!(2024-05-01 09:00:00 UTC)),
                    record(datetime!(2024-05-01 10:30:00 UTC)),
                ],
            )
            .build();

        let records = upstream
            .fetch_readings(
                &monitor,
                datetime!(2024-05-01 10:00:00 UTC),
                datetime!(2024-05-01 11:00:00 UTC),
            )
            .await
            .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(upstream.fetch_count(&monitor), 1);
        assert_eq!(upstream.fetch_count(&id("10.1.1.2")), 0);
        assert_eq!(upstream.total_fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_monitor_returns_empty() {
        let upstream = MockUpstream::new();
        let now = OffsetDateTime::now_utc();
        let records = upstream
            .fetch_readings(&id("10.9.9.9"), now - time::Duration::hours(1), now)
            .await
            .unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let monitor = id("10.1.1.1");
        let upstream = MockUpstream::builder().failing(&monitor).build();
        let now = OffsetDateTime::now_utc();

        let result = upstream
            .fetch_readings(&monitor, now - time::Duration::hours(1), now)
            .await;
        assert!(matches!(result, Err(UpstreamError::Timeout(_))));

        upstream.set_failing(&monitor, false).await;
        assert!(
            upstream
                .fetch_readings(&monitor, now - time::Duration::hours(1), now)
                .await
                .is_ok()
        );
        assert_eq!(upstream.fetch_count(&monitor), 2);
    }

    #[tokio::test]
    async fn test_listing() {
        let upstream = MockUpstream::builder()
            .monitor("10.1.1.1", "Noise Monitor - A")
            .build();
        assert_eq!(upstream.list_monitors().await.unwrap().len(), 1);

        upstream.set_listing_fails(true);
        assert!(upstream.list_monitors().await.is_err());
        assert_eq!(upstream.list_count(), 2);

        upstream.reset_counts();
        assert_eq!(upstream.list_count(), 0);
    }

    #[tokio::test]
    async fn test_canned_data_changes_at_runtime() {
        let monitor = id("10.1.1.1");
        let upstream = MockUpstream::new();
        let now = OffsetDateTime::now_utc();

        upstream
            .add_monitor(UpstreamMonitor {
                serial_number: "10.1.1.1".to_string(),
                label: "Noise Monitor - A".to_string(),
                location: None,
            })
            .await;
        assert_eq!(upstream.list_monitors().await.unwrap().len(), 1);

        upstream.set_monitors(Vec::new()).await;
        assert!(upstream.list_monitors().await.unwrap().is_empty());

        upstream
            .add_readings(&monitor, vec![record(now - time::Duration::minutes(10))])
            .await;
        upstream
            .add_readings(&monitor, vec![record(now - time::Duration::minutes(5))])
            .await;
        let records = upstream
            .fetch_readings(&monitor, now - time::Duration::hours(1), now)
            .await
            .unwrap();
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_records_pass_through() {
        let monitor = id("10.1.1.1");
        let bad = ReadingRecord {
            datetime: Some("not a date".into()),
            ..ReadingRecord::default()
        };
        let upstream = MockUpstream::builder().readings(&monitor, vec![bad]).build();
        let now = OffsetDateTime::now_utc();

        let records = upstream
            .fetch_readings(&monitor, now - time::Duration::hours(1), now)
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
    }
}
