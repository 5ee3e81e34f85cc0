//! Cache/fetch orchestration between the store and the upstream API.
//!
//! For a requested monitor set and window, [`SyncEngine::get_readings`]
//! serves cached rows when the store has any for the window and otherwise
//! fetches the full window upstream, persists it, and returns it. A window
//! with at least one cached row is trusted as complete; gaps inside it are
//! not detected.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use noise_store::{PurgeOutcome, Store, StoredMonitor, UpsertSummary};
use noise_types::{
    Metrics, MonitorId, REALTIME_WINDOW, Reading, ReadingRecord, SyncOutcome, normalize_records,
    retention_window,
};
use noise_upstream::{Upstream, UpstreamError};

/// Maximum distinct monitors per readings request.
pub const MAX_MONITORS_PER_REQUEST: usize = 5;

/// Errors from sync operations.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The request is malformed or out of bounds.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A requested monitor is not in the registry.
    #[error("Monitor not found: {0}")]
    MonitorNotFound(String),

    /// The upstream API could not be reached or answered badly.
    #[error("Upstream unavailable for {context}: {source}")]
    UpstreamUnavailable {
        context: String,
        #[source]
        source: UpstreamError,
    },

    /// The store failed to read or write.
    #[error("Persistence error: {0}")]
    Persistence(#[source] noise_store::Error),
}

impl SyncError {
    /// Whether retrying the same operation may succeed.
    ///
    /// Only persistence failures qualify; bad requests and missing monitors
    /// fail the same way every time.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Persistence(_))
    }

    fn upstream(id: &MonitorId, source: UpstreamError) -> Self {
        Self::UpstreamUnavailable {
            context: format!("monitor {}", id),
            source,
        }
    }
}

impl From<noise_store::Error> for SyncError {
    fn from(e: noise_store::Error) -> Self {
        match e {
            noise_store::Error::MonitorNotFound(id) => Self::MonitorNotFound(id),
            other => Self::Persistence(other),
        }
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Requested time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    /// The trailing hour, ending now.
    Realtime,
    /// An explicit inclusive range.
    Range {
        start: OffsetDateTime,
        end: OffsetDateTime,
    },
}

impl Window {
    /// Resolve to concrete bounds, validating explicit ranges against `now`.
    pub fn resolve(&self, now: OffsetDateTime) -> Result<(OffsetDateTime, OffsetDateTime)> {
        match *self {
            Window::Realtime => Ok((now - REALTIME_WINDOW, now)),
            Window::Range { start, end } => {
                if start >= end {
                    return Err(SyncError::InvalidRequest(
                        "startTime must be before endTime".to_string(),
                    ));
                }
                if start < now - retention_window() {
                    return Err(SyncError::InvalidRequest(format!(
                        "Data is only available for the last {} days",
                        noise_types::RETENTION_DAYS
                    )));
                }
                Ok((start, end))
            }
        }
    }
}

/// Where a monitor's readings came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadingSource {
    Cache,
    Upstream,
}

/// Readings for one monitor.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadingSet {
    pub source: ReadingSource,
    /// Ascending, unique timestamps.
    pub readings: Vec<Reading>,
}

/// Per-monitor outcome of a readings request.
#[derive(Debug)]
pub struct MonitorReadings {
    pub monitor: StoredMonitor,
    pub outcome: Result<ReadingSet>,
}

/// One row of a multi-monitor result: every monitor with a reading at
/// exactly this timestamp.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedRow {
    #[serde(with = "noise_types::types::datetime")]
    pub datetime: OffsetDateTime,
    pub entries: BTreeMap<MonitorId, Metrics>,
}

/// Merge per-monitor readings on the union of their timestamps.
///
/// A monitor without a reading at a timestamp is omitted from that row; the
/// row is kept. Failed monitors contribute nothing.
pub fn merge_by_timestamp(results: &[MonitorReadings]) -> Vec<MergedRow> {
    let mut rows: BTreeMap<OffsetDateTime, BTreeMap<MonitorId, Metrics>> = BTreeMap::new();

    for result in results {
        let Ok(set) = &result.outcome else {
            continue;
        };
        for reading in &set.readings {
            rows.entry(reading.timestamp)
                .or_default()
                .insert(result.monitor.id.clone(), reading.metrics);
        }
    }

    rows.into_iter()
        .map(|(datetime, entries)| MergedRow { datetime, entries })
        .collect()
}

/// Result of initializing a monitor's cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitOutcome {
    /// Whether the monitor has cached data after the call.
    pub initialized: bool,
    /// Rows already cached, or rows saved by this call.
    pub record_count: u64,
    /// Backfilled window, when an upstream fetch happened.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_range: Option<TimeRange>,
}

/// A unix-seconds window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRange {
    pub start_time: i64,
    pub end_time: i64,
}

/// Result of reconciling the registry with the upstream listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistrySync {
    /// Noise monitors listed upstream.
    pub listed: usize,
    /// Monitors registered or refreshed.
    pub registered: usize,
    /// Registered monitors flipped to inactive.
    pub deactivated: usize,
}

/// Result of one background refresh step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshOutcome {
    pub monitor_id: MonitorId,
    pub fetched: usize,
    pub saved: usize,
}

/// Orchestrates reads and writes across the store and the upstream API.
///
/// The store lock is taken per store call and never held across an upstream
/// request.
#[derive(Clone)]
pub struct SyncEngine {
    store: Arc<Mutex<Store>>,
    upstream: Arc<dyn Upstream>,
}

impl SyncEngine {
    pub fn new(store: Arc<Mutex<Store>>, upstream: Arc<dyn Upstream>) -> Self {
        Self { store, upstream }
    }

    /// Readings for up to five monitors over a window.
    ///
    /// Request validation and registry lookup happen before any readings are
    /// touched: an invalid request or an unknown monitor fails the whole call.
    /// After that, each monitor succeeds or fails on its own.
    pub async fn get_readings(
        &self,
        ids: &[MonitorId],
        window: Window,
    ) -> Result<Vec<MonitorReadings>> {
        let now = OffsetDateTime::now_utc();

        // Bounded by the limit, so the linear scan stays cheap.
        let mut unique: Vec<&MonitorId> = Vec::with_capacity(MAX_MONITORS_PER_REQUEST);
        for id in ids {
            if unique.contains(&id) {
                continue;
            }
            if unique.len() == MAX_MONITORS_PER_REQUEST {
                return Err(SyncError::InvalidRequest(format!(
                    "Maximum {} monitors can be selected",
                    MAX_MONITORS_PER_REQUEST
                )));
            }
            unique.push(id);
        }
        if unique.is_empty() {
            return Err(SyncError::InvalidRequest(
                "At least one monitor id is required".to_string(),
            ));
        }
        let (start, end) = window.resolve(now)?;

        let monitors = {
            let store = self.store.lock().await;
            unique
                .iter()
                .map(|id| {
                    store
                        .get_monitor(id)?
                        .ok_or_else(|| SyncError::MonitorNotFound(id.to_string()))
                })
                .collect::<Result<Vec<_>>>()?
        };

        debug!(
            "Readings request for {} monitor(s) in [{}, {}]",
            monitors.len(),
            start.unix_timestamp(),
            end.unix_timestamp()
        );

        let results = join_all(monitors.into_iter().map(|monitor| async move {
            let outcome = self.readings_for(&monitor.id, start, end, now).await;
            if let Err(e) = &outcome {
                warn!("Failed to load readings for {}: {}", monitor.id, e);
            }
            MonitorReadings { monitor, outcome }
        }))
        .await;

        Ok(results)
    }

    /// One monitor: store read, then fetch and persist only on a miss.
    async fn readings_for(
        &self,
        id: &MonitorId,
        start: OffsetDateTime,
        end: OffsetDateTime,
        now: OffsetDateTime,
    ) -> Result<ReadingSet> {
        let cached = self.store.lock().await.query_range(id, start, end)?;
        if !cached.is_empty() {
            debug!("Serving {} cached readings for {}", cached.len(), id);
            return Ok(ReadingSet {
                source: ReadingSource::Cache,
                readings: cached,
            });
        }

        let records = self
            .upstream
            .fetch_readings(id, start, end)
            .await
            .map_err(|e| SyncError::upstream(id, e))?;

        self.store.lock().await.upsert_readings(id, &records)?;

        let readings = normalize_records(&records, now)
            .readings
            .into_iter()
            .filter(|r| r.timestamp >= start && r.timestamp <= end)
            .collect();

        Ok(ReadingSet {
            source: ReadingSource::Upstream,
            readings,
        })
    }

    /// Backfill the retention window for a monitor with an empty cache.
    pub async fn initialize_monitor(&self, id: &MonitorId) -> Result<InitOutcome> {
        let existing = self.store.lock().await.count_readings(id)?;
        if existing > 0 {
            return Ok(InitOutcome {
                initialized: true,
                record_count: existing,
                time_range: None,
            });
        }

        let end = OffsetDateTime::now_utc();
        let start = end - retention_window();
        info!("Initializing data for monitor {}", id);

        let records = self
            .upstream
            .fetch_readings(id, start, end)
            .await
            .map_err(|e| SyncError::upstream(id, e))?;

        let summary = self.store.lock().await.upsert_readings(id, &records)?;
        info!("Initialized {} records for monitor {}", summary.saved, id);

        Ok(InitOutcome {
            initialized: summary.saved > 0,
            record_count: summary.saved as u64,
            time_range: Some(TimeRange {
                start_time: start.unix_timestamp(),
                end_time: end.unix_timestamp(),
            }),
        })
    }

    /// Persist caller-supplied records.
    pub async fn save_readings(
        &self,
        id: &MonitorId,
        records: &[ReadingRecord],
    ) -> Result<UpsertSummary> {
        Ok(self.store.lock().await.upsert_readings(id, records)?)
    }

    /// Delete readings past the retention horizon.
    pub async fn cleanup(&self) -> Result<Vec<PurgeOutcome>> {
        let cutoff = OffsetDateTime::now_utc() - retention_window();
        let outcomes = self.store.lock().await.purge_before(cutoff)?;
        info!("Cleanup finished for {} monitor(s)", outcomes.len());
        Ok(outcomes)
    }

    /// Reconcile the registry with the upstream monitor listing.
    ///
    /// Non-noise entries and entries with unusable ids are ignored. When the
    /// listing has no noise monitors at all, nothing is deactivated.
    pub async fn sync_registry(&self) -> Result<RegistrySync> {
        let listing = self
            .upstream
            .list_monitors()
            .await
            .map_err(|source| SyncError::UpstreamUnavailable {
                context: "monitor listing".to_string(),
                source,
            })?;

        let mut listed = Vec::new();
        let mut outcome = RegistrySync::default();
        let store = self.store.lock().await;

        for entry in listing.iter().filter(|m| m.is_noise_monitor()) {
            let id = match MonitorId::parse(&entry.serial_number) {
                Ok(id) => id,
                Err(e) => {
                    warn!("Ignoring upstream monitor {:?}: {}", entry.serial_number, e);
                    continue;
                }
            };
            store.register_monitor(&id, &entry.label, entry.location.as_deref())?;
            outcome.registered += 1;
            listed.push(id);
        }
        outcome.listed = listed.len();

        if listed.is_empty() {
            warn!("Upstream listed no noise monitors; leaving registry statuses unchanged");
        } else {
            outcome.deactivated = store.mark_missing_inactive(&listed)?;
        }

        info!(
            "Registry sync: {} listed, {} registered, {} deactivated",
            outcome.listed, outcome.registered, outcome.deactivated
        );
        Ok(outcome)
    }

    /// Active and unknown-status monitors.
    pub async fn tracked_monitors(&self) -> Result<Vec<StoredMonitor>> {
        Ok(self.store.lock().await.list_active_monitors()?)
    }

    /// Background sync step for one monitor.
    ///
    /// Fetches from the last successful sync (or the retention horizon) to
    /// now. An empty response leaves the bookkeeping untouched; a failure is
    /// recorded and returned.
    pub async fn refresh_monitor(&self, monitor: &StoredMonitor) -> Result<RefreshOutcome> {
        let now = OffsetDateTime::now_utc();
        let horizon = now - retention_window();
        let start = monitor
            .last_sync_time
            .map_or(horizon, |last| last.max(horizon));

        let result = self.fetch_and_save(&monitor.id, start, now).await;

        let store = self.store.lock().await;
        match result {
            Ok((fetched, _)) if fetched == 0 => {
                debug!("No new readings for {}", monitor.id);
                Ok(RefreshOutcome {
                    monitor_id: monitor.id.clone(),
                    fetched: 0,
                    saved: 0,
                })
            }
            Ok((fetched, summary)) => {
                store.record_sync_outcome_at(&monitor.id, SyncOutcome::Synchronized, now)?;
                Ok(RefreshOutcome {
                    monitor_id: monitor.id.clone(),
                    fetched,
                    saved: summary.saved,
                })
            }
            Err(e) => {
                if let Err(record_err) = store.record_sync_outcome(&monitor.id, SyncOutcome::Failed)
                {
                    warn!(
                        "Could not record failed sync for {}: {}",
                        monitor.id, record_err
                    );
                }
                Err(e)
            }
        }
    }

    async fn fetch_and_save(
        &self,
        id: &MonitorId,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<(usize, UpsertSummary)> {
        let records = self
            .upstream
            .fetch_readings(id, start, end)
            .await
            .map_err(|e| SyncError::upstream(id, e))?;
        if records.is_empty() {
            return Ok((0, UpsertSummary::default()));
        }
        let summary = self.store.lock().await.upsert_readings(id, &records)?;
        Ok((records.len(), summary))
    }
}
