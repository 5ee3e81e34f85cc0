//! Application state shared across handlers and the refresher.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::{Mutex, RwLock, watch};

use noise_store::Store;
use noise_types::MonitorId;
use noise_upstream::Upstream;

use crate::config::Config;
use crate::sync::SyncEngine;

/// Shared application state.
pub struct AppState {
    /// The data store, shared with the sync engine.
    pub store: Arc<Mutex<Store>>,
    /// Cache/fetch orchestration over the store and upstream.
    pub sync: SyncEngine,
    /// Configuration (RwLock for runtime updates).
    pub config: RwLock<Config>,
    /// Background refresher control state.
    pub refresher: RefresherState,
}

impl AppState {
    /// Create new application state.
    pub fn new(store: Store, upstream: Arc<dyn Upstream>, config: Config) -> Arc<Self> {
        let store = Arc::new(Mutex::new(store));
        Arc::new(Self {
            sync: SyncEngine::new(Arc::clone(&store), upstream),
            store,
            config: RwLock::new(config),
            refresher: RefresherState::new(),
        })
    }

    /// Take back the store once no other handle to the state remains.
    ///
    /// Returns `None` while a router, refresher, or sweep still holds a clone.
    pub fn into_store(self: Arc<Self>) -> Option<Store> {
        let AppState { store, sync, .. } = Arc::try_unwrap(self).ok()?;
        drop(sync);
        Arc::try_unwrap(store).ok().map(Mutex::into_inner)
    }
}

/// State for tracking and controlling the background refresher.
pub struct RefresherState {
    /// Whether the refresher loop is running.
    running: AtomicBool,
    /// When the refresher was started (Unix timestamp).
    started_at: AtomicU64,
    /// Set while a sweep is in progress.
    sweeping: AtomicBool,
    /// Channel to signal the refresher loop to stop.
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
    /// Sweep and per-monitor statistics.
    pub stats: RwLock<RefresherStats>,
}

impl RefresherState {
    /// Create a new refresher state.
    pub fn new() -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            running: AtomicBool::new(false),
            started_at: AtomicU64::new(0),
            sweeping: AtomicBool::new(false),
            stop_tx,
            stop_rx,
            stats: RwLock::new(RefresherStats::default()),
        }
    }

    /// Check if the refresher is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Mark the refresher as started or stopped.
    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
        if running {
            let now = OffsetDateTime::now_utc().unix_timestamp() as u64;
            self.started_at.store(now, Ordering::SeqCst);
        }
    }

    /// Get the refresher start time.
    pub fn started_at(&self) -> Option<OffsetDateTime> {
        let ts = self.started_at.load(Ordering::SeqCst);
        if ts == 0 {
            None
        } else {
            OffsetDateTime::from_unix_timestamp(ts as i64).ok()
        }
    }

    /// Whether a sweep is currently in progress.
    pub fn is_sweeping(&self) -> bool {
        self.sweeping.load(Ordering::SeqCst)
    }

    /// Claim the sweep slot.
    ///
    /// Returns `None` if another sweep holds it. The slot is released when
    /// the guard drops.
    pub fn try_begin_sweep(&self) -> Option<SweepGuard<'_>> {
        self.sweeping
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| SweepGuard { flag: &self.sweeping })
    }

    /// Get a receiver for the stop signal.
    pub fn subscribe_stop(&self) -> watch::Receiver<bool> {
        self.stop_rx.clone()
    }

    /// Signal the refresher loop to stop.
    pub fn signal_stop(&self) {
        let _ = self.stop_tx.send(true);
        self.running.store(false, Ordering::SeqCst);
    }

    /// Reset the stop signal (for restarting).
    pub fn reset_stop(&self) {
        let _ = self.stop_tx.send(false);
    }
}

impl Default for RefresherState {
    fn default() -> Self {
        Self::new()
    }
}

/// Holds the sweep slot; releases it on drop.
pub struct SweepGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Refresher statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RefresherStats {
    /// When the last completed sweep finished.
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_sweep_at: Option<OffsetDateTime>,
    /// Duration of the last completed sweep in milliseconds.
    pub last_sweep_ms: Option<u64>,
    /// Sweeps run to completion.
    pub sweeps_completed: u64,
    /// Ticks skipped because a sweep was still running.
    pub sweeps_skipped: u64,
    /// Last registry sync error, cleared on success.
    pub last_registry_error: Option<String>,
    /// Per-monitor refresh statistics.
    pub monitors: BTreeMap<MonitorId, MonitorRefreshStats>,
}

impl RefresherStats {
    /// Record a successful refresh of one monitor.
    pub fn record_success(&mut self, id: &MonitorId, saved: usize) {
        let entry = self.monitors.entry(id.clone()).or_default();
        entry.last_success_at = Some(OffsetDateTime::now_utc());
        entry.last_saved = saved;
        entry.success_count += 1;
    }

    /// Record a failed refresh of one monitor.
    pub fn record_failure(&mut self, id: &MonitorId, error: String) {
        let entry = self.monitors.entry(id.clone()).or_default();
        entry.last_error_at = Some(OffsetDateTime::now_utc());
        entry.last_error = Some(error);
        entry.failure_count += 1;
    }
}

/// Refresh statistics for a single monitor.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MonitorRefreshStats {
    /// Time of last successful refresh.
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_success_at: Option<OffsetDateTime>,
    /// Time of last failed refresh.
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_error_at: Option<OffsetDateTime>,
    /// Last error message.
    pub last_error: Option<String>,
    /// Readings saved by the last successful refresh.
    pub last_saved: usize,
    /// Total successful refreshes.
    pub success_count: u64,
    /// Total failed refreshes.
    pub failure_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use noise_upstream::MockUpstream;

    fn create_test_state() -> Arc<AppState> {
        let store = Store::open_in_memory().unwrap();
        AppState::new(store, Arc::new(MockUpstream::new()), Config::default())
    }

    #[tokio::test]
    async fn test_app_state_new() {
        let state = create_test_state();
        let config = state.config.read().await;
        assert_eq!(config.server.bind, "127.0.0.1:3001");
    }

    #[tokio::test]
    async fn test_app_state_store_access() {
        let state = create_test_state();
        let store = state.store.lock().await;
        assert!(store.list_monitors().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_into_store_requires_sole_owner() {
        let state = create_test_state();
        let extra = Arc::clone(&state);
        assert!(state.into_store().is_none());

        let store = extra.into_store().expect("sole owner gets the store back");
        store.close().unwrap();
    }

    #[test]
    fn test_refresher_state() {
        let refresher = RefresherState::new();
        assert!(!refresher.is_running());
        assert!(refresher.started_at().is_none());

        refresher.set_running(true);
        assert!(refresher.is_running());
        assert!(refresher.started_at().is_some());

        let stop_rx = refresher.subscribe_stop();
        refresher.signal_stop();
        assert!(!refresher.is_running());
        assert!(*stop_rx.borrow());

        refresher.reset_stop();
        assert!(!*stop_rx.borrow());
    }

    #[test]
    fn test_sweep_guard_excludes_overlap() {
        let refresher = RefresherState::new();

        let guard = refresher.try_begin_sweep();
        assert!(guard.is_some());
        assert!(refresher.is_sweeping());
        assert!(refresher.try_begin_sweep().is_none());

        drop(guard);
        assert!(!refresher.is_sweeping());
        assert!(refresher.try_begin_sweep().is_some());
    }

    #[test]
    fn test_refresher_stats_counters() {
        let id = MonitorId::parse("10.1.1.1").unwrap();
        let mut stats = RefresherStats::default();

        stats.record_success(&id, 12);
        stats.record_failure(&id, "timed out".to_string());
        stats.record_success(&id, 3);

        let entry = &stats.monitors[&id];
        assert_eq!(entry.success_count, 2);
        assert_eq!(entry.failure_count, 1);
        assert_eq!(entry.last_saved, 3);
        assert_eq!(entry.last_error.as_deref(), Some("timed out"));

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["monitors"]["10.1.1.1"]["success_count"], 2);
    }
}
