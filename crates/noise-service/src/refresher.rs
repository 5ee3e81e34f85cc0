//! Background cache refresher.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

use crate::state::AppState;

/// Background task that re-syncs every tracked monitor on a timer.
pub struct Refresher {
    state: Arc<AppState>,
}

/// Summary of one completed sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Monitors refreshed without error.
    pub refreshed: usize,
    /// Monitors whose refresh failed.
    pub failed: usize,
    /// Readings saved across all monitors.
    pub saved: usize,
}

impl Refresher {
    /// Create a new refresher.
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Start the refresh loop.
    ///
    /// Returns immediately; sweeps run in the background until the stop
    /// signal is sent through [`RefresherState::signal_stop`](crate::state::RefresherState::signal_stop).
    /// A sweep in progress at that point is cancelled, and the returned handle
    /// completes only after it has been dropped.
    pub async fn start(&self) -> JoinHandle<()> {
        let period = Duration::from_secs(self.state.config.read().await.refresh.interval_secs);
        let state = Arc::clone(&self.state);

        state.refresher.reset_stop();
        state.refresher.set_running(true);
        info!("Starting refresher (interval: {}s)", period.as_secs());

        tokio::spawn(run_loop(state, period))
    }
}

async fn run_loop(state: Arc<AppState>, period: Duration) {
    let mut stop_rx = state.refresher.subscribe_stop();
    let mut timer = interval(period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // Sweeps run as their own task so a slow sweep cannot delay the stop signal.
    let mut in_flight: Option<JoinHandle<()>> = None;

    loop {
        tokio::select! {
            _ = timer.tick() => {
                if in_flight.as_ref().is_some_and(|sweep| !sweep.is_finished()) {
                    debug!("Previous sweep still running, skipping tick");
                    state.refresher.stats.write().await.sweeps_skipped += 1;
                    continue;
                }
                in_flight = Some(tokio::spawn(sweep_task(Arc::clone(&state))));
            }
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
        }
    }

    // Cancellation lands on an await point; store writes run synchronously
    // under the store lock, so no transaction is left half applied.
    if let Some(sweep) = in_flight.take() {
        if !sweep.is_finished() {
            info!("Cancelling sweep in progress");
        }
        sweep.abort();
        if let Err(e) = sweep.await
            && e.is_panic()
        {
            error!("Sweep task panicked: {}", e);
        }
    }

    state.refresher.set_running(false);
    info!("Refresher stopped");
}

async fn sweep_task(state: Arc<AppState>) {
    sweep(&state).await;
}

/// Run one sweep: registry sync, then each tracked monitor in turn.
///
/// Returns `None` without doing anything if another sweep is in progress.
pub async fn sweep(state: &AppState) -> Option<SweepReport> {
    let Some(_guard) = state.refresher.try_begin_sweep() else {
        debug!("Previous sweep still running, skipping tick");
        state.refresher.stats.write().await.sweeps_skipped += 1;
        return None;
    };

    let started = Instant::now();

    let registry_error = match state.sync.sync_registry().await {
        Ok(_) => None,
        Err(e) => {
            warn!("Registry sync failed: {}", e);
            Some(e.to_string())
        }
    };
    state.refresher.stats.write().await.last_registry_error = registry_error;

    let monitors = match state.sync.tracked_monitors().await {
        Ok(monitors) => monitors,
        Err(e) => {
            error!("Failed to list monitors for refresh: {}", e);
            return Some(SweepReport::default());
        }
    };

    let mut report = SweepReport::default();
    for monitor in &monitors {
        match state.sync.refresh_monitor(monitor).await {
            Ok(outcome) => {
                report.refreshed += 1;
                report.saved += outcome.saved;
                state
                    .refresher
                    .stats
                    .write()
                    .await
                    .record_success(&monitor.id, outcome.saved);
            }
            Err(e) => {
                report.failed += 1;
                warn!("Failed to refresh monitor {}: {}", monitor.id, e);
                state
                    .refresher
                    .stats
                    .write()
                    .await
                    .record_failure(&monitor.id, e.to_string());
            }
        }
    }

    let elapsed = started.elapsed();
    {
        let mut stats = state.refresher.stats.write().await;
        stats.last_sweep_at = Some(OffsetDateTime::now_utc());
        stats.last_sweep_ms = Some(elapsed.as_millis() as u64);
        stats.sweeps_completed += 1;
    }

    info!(
        "Sweep finished in {}ms: {} refreshed, {} failed, {} readings saved",
        elapsed.as_millis(),
        report.refreshed,
        report.failed,
        report.saved
    );
    Some(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use noise_store::Store;
    use noise_types::{Metrics, MonitorId, Reading, ReadingRecord, SyncOutcome};
    use noise_upstream::MockUpstream;

    use crate::config::Config;

    fn id(raw: &str) -> MonitorId {
        MonitorId::parse(raw).unwrap()
    }

    fn record(minutes_ago: i64) -> ReadingRecord {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let ts = OffsetDateTime::from_unix_timestamp(now - minutes_ago * 60).unwrap();
        ReadingRecord::from(&Reading::new(
            ts,
            Metrics {
                laeq: 55.0,
                ..Metrics::default()
            },
        ))
    }

    fn create_test_state(upstream: MockUpstream) -> Arc<AppState> {
        let store = Store::open_in_memory().unwrap();
        AppState::new(store, Arc::new(upstream), Config::default())
    }

    #[tokio::test]
    async fn test_sweep_registers_and_refreshes() {
        let a = id("10.1.1.1");
        let upstream = MockUpstream::builder()
            .monitor("10.1.1.1", "Noise Monitor - Drumcondra")
            .readings(&a, vec![record(20), record(10)])
            .build();
        let state = create_test_state(upstream);

        let report = sweep(&state).await.unwrap();
        assert_eq!(
            report,
            SweepReport {
                refreshed: 1,
                failed: 0,
                saved: 2
            }
        );

        let monitor = state.store.lock().await.get_monitor(&a).unwrap().unwrap();
        assert_eq!(monitor.sync_status, Some(SyncOutcome::Synchronized));

        let stats = state.refresher.stats.read().await;
        assert_eq!(stats.sweeps_completed, 1);
        assert!(stats.last_sweep_at.is_some());
        assert_eq!(stats.monitors[&a].success_count, 1);
        assert_eq!(stats.monitors[&a].last_saved, 2);
    }

    #[tokio::test]
    async fn test_failing_monitor_does_not_stop_sweep() {
        let a = id("10.1.1.1");
        let b = id("10.1.1.2");
        let upstream = MockUpstream::builder()
            .monitor("10.1.1.1", "Noise Monitor - A")
            .monitor("10.1.1.2", "Noise Monitor - B")
            .failing(&a)
            .readings(&b, vec![record(5)])
            .build();
        let state = create_test_state(upstream);

        let report = sweep(&state).await.unwrap();
        assert_eq!(report.refreshed, 1);
        assert_eq!(report.failed, 1);

        let stats = state.refresher.stats.read().await;
        assert_eq!(stats.monitors[&a].failure_count, 1);
        assert!(stats.monitors[&a].last_error.is_some());
        assert_eq!(stats.monitors[&b].success_count, 1);
    }

    #[tokio::test]
    async fn test_registry_failure_still_refreshes_known_monitors() {
        let a = id("10.1.1.1");
        let upstream = MockUpstream::builder()
            .listing_fails()
            .readings(&a, vec![record(5)])
            .build();
        let state = create_test_state(upstream);
        state
            .store
            .lock()
            .await
            .register_monitor(&a, "Noise Monitor - A", None)
            .unwrap();

        let report = sweep(&state).await.unwrap();
        assert_eq!(report.refreshed, 1);
        assert!(
            state
                .refresher
                .stats
                .read()
                .await
                .last_registry_error
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_overlapping_sweep_is_skipped() {
        let state = create_test_state(MockUpstream::new());

        let guard = state.refresher.try_begin_sweep().unwrap();
        assert!(sweep(&state).await.is_none());
        drop(guard);

        let stats = state.refresher.stats.read().await;
        assert_eq!(stats.sweeps_skipped, 1);
        assert_eq!(stats.sweeps_completed, 0);
    }

    #[tokio::test]
    async fn test_concurrent_sweeps_run_once() {
        let upstream = MockUpstream::builder()
            .monitor("10.1.1.1", "Noise Monitor - A")
            .build();
        upstream.set_latency(Duration::from_millis(50));
        let state = create_test_state(upstream);

        let (first, second) = tokio::join!(sweep(&state), sweep(&state));
        assert_eq!(first.is_some() as u8 + second.is_some() as u8, 1);
        assert_eq!(state.refresher.stats.read().await.sweeps_skipped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresher_stops_on_signal() {
        let state = create_test_state(MockUpstream::new());
        let refresher = Refresher::new(Arc::clone(&state));

        let handle = refresher.start().await;
        assert!(state.refresher.is_running());
        assert!(state.refresher.started_at().is_some());

        state.refresher.signal_stop();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(!state.refresher.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_sweep_in_progress() {
        let upstream = MockUpstream::builder()
            .monitor("10.1.1.1", "Noise Monitor - A")
            .build();
        upstream.set_latency(Duration::from_secs(60));
        let state = create_test_state(upstream);
        let refresher = Refresher::new(Arc::clone(&state));

        let handle = refresher.start().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(state.refresher.is_sweeping());

        state.refresher.signal_stop();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(!state.refresher.is_running());
        assert!(!state.refresher.is_sweeping());
        assert_eq!(state.refresher.stats.read().await.sweeps_completed, 0);

        drop(refresher);
        assert!(state.into_store().is_some());
    }
}
