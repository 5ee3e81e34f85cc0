//! Trait abstraction over the upstream sensor API.
//!
//! The [`Upstream`] trait lets the sync engine run against the real
//! [`SonitusClient`](crate::SonitusClient) or a [`MockUpstream`](crate::MockUpstream)
//! in tests.

use async_trait::async_trait;
use time::OffsetDateTime;

use noise_types::{MonitorId, ReadingRecord, UpstreamMonitor};

use crate::error::Result;

/// Source of monitor metadata and raw readings.
///
/// # Example
///
/// ```
/// use noise_types::MonitorId;
/// use noise_upstream::{MockUpstream, Upstream};
/// use time::{Duration, OffsetDateTime};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> noise_upstream::Result<()> {
/// async fn count_hour<U: Upstream>(upstream: &U, id: &MonitorId) -> noise_upstream::Result<usize> {
///     let end = OffsetDateTime::now_utc();
///     Ok(upstream.fetch_readings(id, end - Duration::hours(1), end).await?.len())
/// }
///
/// let upstream = MockUpstream::new();
/// let id = MonitorId::parse("10.1.1.1").unwrap();
/// assert_eq!(count_hour(&upstream, &id).await?, 0);
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait Upstream: Send + Sync {
    /// List every monitor known upstream, noise or otherwise.
    async fn list_monitors(&self) -> Result<Vec<UpstreamMonitor>>;

    /// Fetch raw readings for one monitor in `[start, end]`.
    ///
    /// Records are returned unvalidated; the caller decides what is malformed.
    async fn fetch_readings(
        &self,
        monitor: &MonitorId,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<ReadingRecord>>;
}
