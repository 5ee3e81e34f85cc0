//! REST API endpoints for the noise-service.
//!
//! Data endpoints under `/api/data` serve the dashboard and use camelCase
//! field names. Operational endpoints (health, status, stats) use snake_case.
//!
//! # Lock Acquisition
//!
//! Handlers never hold `state.store` across an upstream call; the sync engine
//! takes the lock per store operation. When several locks are needed they are
//! acquired in this order:
//! 1. `config`
//! 2. `store`
//! 3. `refresher.stats`
//!
//! # Error Handling
//!
//! All endpoints return structured JSON errors via [`AppError`]:
//! 400 for invalid requests, 404 for unknown monitors and empty results,
//! 502 when the upstream API fails, 500 for persistence failures.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State, rejection::QueryRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::warn;

use noise_store::{MonitorSyncStatus, PurgeOutcome, ReadingStats, StoredMonitor};
use noise_types::{MonitorId, RETENTION_DAYS, Reading, ReadingRecord};

use crate::state::{AppState, RefresherStats};
use crate::sync::{self, InitOutcome, MergedRow, ReadingSource, SyncError, Window, merge_by_timestamp};

/// Save attempts before giving up.
pub const SAVE_ATTEMPTS: u32 = 3;

/// Base delay between save attempts; attempt `n` waits `n` times this.
pub const SAVE_BACKOFF: Duration = Duration::from_secs(1);

/// Create the API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        // Health and status
        .route("/api/health", get(health))
        .route("/api/db/status", get(db_status))
        .route("/api/status", get(get_status))
        // Registry
        .route("/api/monitors", get(list_monitors).post(list_monitors))
        // Data endpoints
        .route("/api/data/{id}", post(get_readings))
        .route("/api/data/{id}/initialize", post(initialize_monitor))
        .route("/api/data/{id}/save", post(save_readings))
        .route("/api/data/{id}/latest", post(get_latest))
        .route("/api/stats/{id}", post(get_stats))
        // Maintenance
        .route("/api/maintenance/cleanup", post(cleanup))
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Health check endpoint.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: OffsetDateTime::now_utc(),
    })
}

/// Database and sync overview.
#[derive(Debug, Serialize)]
pub struct DbStatusResponse {
    pub status: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub database: DatabaseInfo,
    pub sync: Vec<MonitorSyncStatus>,
}

/// Database summary.
#[derive(Debug, Serialize)]
pub struct DatabaseInfo {
    pub path: String,
    pub monitor_count: usize,
    pub active_monitor_count: usize,
}

async fn db_status(State(state): State<Arc<AppState>>) -> Result<Json<DbStatusResponse>, AppError> {
    let path = state.config.read().await.storage.path.display().to_string();
    let store = state.store.lock().await;

    let monitors = store.list_monitors()?;
    let active_monitor_count = monitors.iter().filter(|m| m.status.is_tracked()).count();
    let sync = store.sync_overview()?;

    Ok(Json(DbStatusResponse {
        status: "ok",
        timestamp: OffsetDateTime::now_utc(),
        database: DatabaseInfo {
            path,
            monitor_count: monitors.len(),
            active_monitor_count,
        },
        sync,
    }))
}

/// Refresher status response.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub refresher: RefresherStatus,
}

/// Refresher state and statistics.
#[derive(Debug, Serialize)]
pub struct RefresherStatus {
    pub enabled: bool,
    pub running: bool,
    pub sweeping: bool,
    pub interval_secs: u64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(flatten)]
    pub stats: RefresherStats,
}

async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let (enabled, interval_secs) = {
        let config = state.config.read().await;
        (config.refresh.enabled, config.refresh.interval_secs)
    };
    let stats = state.refresher.stats.read().await.clone();

    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        timestamp: OffsetDateTime::now_utc(),
        refresher: RefresherStatus {
            enabled,
            running: state.refresher.is_running(),
            sweeping: state.refresher.is_sweeping(),
            interval_secs,
            started_at: state.refresher.started_at(),
            stats,
        },
    })
}

async fn list_monitors(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<StoredMonitor>>, AppError> {
    Ok(Json(state.sync.tracked_monitors().await?))
}

/// Body of a readings request.
///
/// Bounds are unix seconds given as numbers or numeric strings. `realtime`
/// accepts a boolean or `"true"`/`"false"`; when set, the bounds are ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingsRequest {
    #[serde(default, alias = "start_time")]
    pub start_time: Option<Value>,
    #[serde(default, alias = "end_time")]
    pub end_time: Option<Value>,
    #[serde(default)]
    pub realtime: Option<Value>,
}

impl ReadingsRequest {
    fn window(&self) -> Result<Window, AppError> {
        if realtime_flag(self.realtime.as_ref())? {
            return Ok(Window::Realtime);
        }
        Ok(Window::Range {
            start: unix_field(self.start_time.as_ref(), "startTime")?,
            end: unix_field(self.end_time.as_ref(), "endTime")?,
        })
    }
}

fn realtime_flag(value: Option<&Value>) -> Result<bool, AppError> {
    match value {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(flag)) => Ok(*flag),
        Some(Value::String(text)) if text.eq_ignore_ascii_case("true") => Ok(true),
        Some(Value::String(text)) if text.eq_ignore_ascii_case("false") => Ok(false),
        Some(other) => Err(AppError::BadRequest(format!(
            "realtime must be a boolean, got {}",
            other
        ))),
    }
}

fn unix_field(value: Option<&Value>, name: &str) -> Result<OffsetDateTime, AppError> {
    let secs = match value {
        None | Some(Value::Null) => {
            return Err(AppError::BadRequest(
                "startTime and endTime are required unless realtime is set".to_string(),
            ));
        }
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(Value::String(text)) => text.trim().parse::<i64>().ok(),
        Some(_) => None,
    };

    secs.and_then(|s| OffsetDateTime::from_unix_timestamp(s).ok())
        .ok_or_else(|| AppError::BadRequest(format!("{} must be a unix timestamp in seconds", name)))
}

/// Parse an optional JSON body; an empty body yields the default.
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| AppError::BadRequest(format!("Invalid request body: {}", e)))
}

fn parse_monitor_id(raw: &str) -> Result<MonitorId, AppError> {
    MonitorId::parse(raw).map_err(|e| AppError::BadRequest(e.to_string()))
}

fn parse_monitor_ids(raw: &str) -> Result<Vec<MonitorId>, AppError> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(parse_monitor_id)
        .collect()
}

/// A reading tagged with its monitor.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaggedReading {
    pub monitor_id: MonitorId,
    pub display_name: String,
    #[serde(flatten)]
    pub reading: Reading,
}

impl TaggedReading {
    fn new(monitor: &StoredMonitor, reading: Reading) -> Self {
        Self {
            monitor_id: monitor.id.clone(),
            display_name: monitor.display_name.clone(),
            reading,
        }
    }
}

/// Response for a multi-monitor readings request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiReadingsResponse {
    pub monitors: Vec<MonitorReadingsSummary>,
    pub rows: Vec<MergedRow>,
}

/// Per-monitor outcome within a multi-monitor response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorReadingsSummary {
    pub monitor_id: MonitorId,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<ReadingSource>,
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

async fn get_readings(
    State(state): State<Arc<AppState>>,
    Path(ids): Path<String>,
    body: Bytes,
) -> Result<axum::response::Response, AppError> {
    let ids = parse_monitor_ids(&ids)?;
    let request: ReadingsRequest = parse_body(&body)?;
    let window = request.window()?;

    let mut results = state.sync.get_readings(&ids, window).await?;

    if results.len() == 1 {
        let Some(result) = results.pop() else {
            return Err(AppError::Internal("missing readings result".to_string()));
        };
        let set = result.outcome?;
        if set.readings.is_empty() {
            return Err(AppError::NotFound(
                "No data available for the selected time range".to_string(),
            ));
        }
        let tagged: Vec<TaggedReading> = set
            .readings
            .into_iter()
            .map(|reading| TaggedReading::new(&result.monitor, reading))
            .collect();
        return Ok(Json(tagged).into_response());
    }

    let rows = merge_by_timestamp(&results);
    let monitors = results
        .iter()
        .map(|result| {
            let (source, count, error) = match &result.outcome {
                Ok(set) => (Some(set.source), set.readings.len(), None),
                Err(e) => (None, 0, Some(e.to_string())),
            };
            MonitorReadingsSummary {
                monitor_id: result.monitor.id.clone(),
                display_name: result.monitor.display_name.clone(),
                source,
                count,
                error,
            }
        })
        .collect();

    Ok(Json(MultiReadingsResponse { monitors, rows }).into_response())
}

async fn initialize_monitor(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<InitOutcome>, AppError> {
    let id = parse_monitor_id(&id)?;
    Ok(Json(state.sync.initialize_monitor(&id).await?))
}

/// Body of a save request.
#[derive(Debug, Default, Deserialize)]
pub struct SaveRequest {
    pub data: Option<Value>,
}

/// Save response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveResponse {
    pub success: bool,
    pub message: String,
    pub count: usize,
    pub attempted: usize,
    pub attempts: u32,
}

async fn save_readings(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<SaveResponse>, AppError> {
    let id = parse_monitor_id(&id)?;
    let request: SaveRequest = parse_body(&body)?;
    let records: Vec<ReadingRecord> = match request.data {
        Some(data @ Value::Array(_)) => serde_json::from_value(data)
            .map_err(|e| AppError::BadRequest(format!("Invalid data format: {}", e)))?,
        _ => {
            return Err(AppError::BadRequest(
                "Invalid data format: data must be an array".to_string(),
            ));
        }
    };

    let outcome = retry_linear(SAVE_ATTEMPTS, SAVE_BACKOFF, || {
        state.sync.save_readings(&id, &records)
    })
    .await;

    match outcome {
        Ok((summary, attempts)) => Ok(Json(SaveResponse {
            success: true,
            message: format!("Saved {} records for monitor {}", summary.saved, id),
            count: summary.saved,
            attempted: summary.attempted,
            attempts,
        })),
        Err((e, attempts)) if e.is_retryable() => Err(AppError::SaveFailed {
            message: e.to_string(),
            attempts,
        }),
        Err((e, _)) => Err(e.into()),
    }
}

/// Run `op` up to `attempts` times, sleeping `backoff * n` after failure `n`.
///
/// Only errors for which [`SyncError::is_retryable`] holds are retried.
/// Returns the value or the last error, with the number of attempts made.
pub async fn retry_linear<T, F, Fut>(
    attempts: u32,
    backoff: Duration,
    mut op: F,
) -> Result<(T, u32), (SyncError, u32)>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = sync::Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok((value, attempt)),
            Err(e) if e.is_retryable() && attempt < attempts => {
                warn!("Attempt {}/{} failed: {}", attempt, attempts, e);
                tokio::time::sleep(backoff * attempt).await;
                attempt += 1;
            }
            Err(e) => return Err((e, attempt)),
        }
    }
}

async fn get_latest(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TaggedReading>, AppError> {
    let id = parse_monitor_id(&id)?;
    let store = state.store.lock().await;

    let monitor = store
        .get_monitor(&id)?
        .ok_or_else(|| AppError::NotFound(format!("Monitor not found: {}", id)))?;
    let reading = store
        .query_latest(&id)?
        .ok_or_else(|| AppError::NotFound(format!("No readings for monitor {}", id)))?;

    Ok(Json(TaggedReading::new(&monitor, reading)))
}

/// Query parameters for the stats endpoint.
#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    #[serde(rename = "windowDays")]
    pub window_days: Option<u32>,
}

/// Stats response.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub monitor_id: MonitorId,
    pub window_days: u32,
    #[serde(flatten)]
    pub stats: ReadingStats,
}

async fn get_stats(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    query: Result<Query<StatsQuery>, QueryRejection>,
) -> Result<Json<StatsResponse>, AppError> {
    let id = parse_monitor_id(&id)?;
    let Query(query) = query.map_err(|e| AppError::BadRequest(e.body_text()))?;

    let window_days = query.window_days.unwrap_or(RETENTION_DAYS as u32);
    if !(1..=RETENTION_DAYS as u32).contains(&window_days) {
        return Err(AppError::BadRequest(format!(
            "windowDays must be between 1 and {}",
            RETENTION_DAYS
        )));
    }

    let stats = state.store.lock().await.query_stats(&id, window_days)?;
    Ok(Json(StatsResponse {
        monitor_id: id,
        window_days,
        stats,
    }))
}

/// Cleanup response.
#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub success: bool,
    pub message: String,
    pub results: Vec<PurgeOutcome>,
}

async fn cleanup(State(state): State<Arc<AppState>>) -> Result<Json<CleanupResponse>, AppError> {
    let results = state.sync.cleanup().await?;
    Ok(Json(CleanupResponse {
        success: true,
        message: format!("Cleanup completed for {} monitor(s)", results.len()),
        results,
    }))
}

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    BadGateway(String),
    SaveFailed { message: String, attempts: u32 },
    Store(noise_store::Error),
    Internal(String),
}

impl From<noise_store::Error> for AppError {
    fn from(e: noise_store::Error) -> Self {
        match e {
            noise_store::Error::MonitorNotFound(id) => {
                AppError::NotFound(format!("Monitor not found: {}", id))
            }
            other => AppError::Store(other),
        }
    }
}

impl From<SyncError> for AppError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::InvalidRequest(msg) => AppError::BadRequest(msg),
            SyncError::MonitorNotFound(id) => {
                AppError::NotFound(format!("Monitor not found: {}", id))
            }
            e @ SyncError::UpstreamUnavailable { .. } => AppError::BadGateway(e.to_string()),
            SyncError::Persistence(e) => AppError::Store(e),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, body) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, serde_json::json!({ "error": msg })),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, serde_json::json!({ "error": msg }))
            }
            AppError::BadGateway(msg) => {
                (StatusCode::BAD_GATEWAY, serde_json::json!({ "error": msg }))
            }
            AppError::SaveFailed { message, attempts } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({ "error": message, "attempts": attempts }),
            ),
            AppError::Store(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({ "error": e.to_string() }),
            ),
            AppError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({ "error": msg }),
            ),
        };

        (status, Json(body)).into_response()
    }
}
