//! Caching relay and HTTP REST API for Sonitus noise monitors.
//!
//! This crate provides a service that:
//! - Keeps a registry of the noise monitors listed by the upstream API
//! - Serves readings from the local database, fetching and persisting a
//!   window from upstream only when nothing is cached for it
//! - Refreshes every tracked monitor in the background
//! - Deletes readings older than the seven-day retention window on request
//!
//! # REST API Endpoints
//!
//! - `GET /api/health` - Service health check
//! - `GET /api/db/status` - Database and per-monitor sync overview
//! - `GET /api/status` - Background refresher state
//! - `GET|POST /api/monitors` - Active monitors
//! - `POST /api/data/{ids}` - Readings for up to five comma-separated monitors
//! - `POST /api/data/{id}/initialize` - Backfill an empty monitor
//! - `POST /api/data/{id}/save` - Persist caller-supplied readings
//! - `POST /api/data/{id}/latest` - Most recent reading
//! - `POST /api/stats/{id}` - Aggregate statistics (`?windowDays=1..7`)
//! - `POST /api/maintenance/cleanup` - Retention sweep
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/noise-dashboard/server.toml`:
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:3001"
//!
//! [storage]
//! path = "~/.local/share/noise-dashboard/data.db"
//!
//! [upstream]
//! base_url = "https://data.smartdublin.ie/sonitus-api"
//! username = "dashboard"
//! password = "secret"
//! timeout_secs = 30
//!
//! [refresh]
//! enabled = true
//! interval_secs = 300
//! ```
//!
//! `SONITUS_BASE_URL`, `SONITUS_USERNAME` and `SONITUS_PASSWORD` override the
//! `[upstream]` values when set.

pub mod api;
pub mod config;
pub mod refresher;
pub mod state;
pub mod sync;

pub use config::{
    Config, ConfigError, RefreshConfig, ServerConfig, StorageConfig, UpstreamConfig,
    ValidationError,
};
pub use refresher::{Refresher, SweepReport};
pub use state::{AppState, RefresherState, RefresherStats};
pub use sync::{
    MAX_MONITORS_PER_REQUEST, MergedRow, MonitorReadings, ReadingSet, ReadingSource, SyncEngine,
    SyncError, Window, merge_by_timestamp,
};
