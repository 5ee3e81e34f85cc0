//! Noise Service - caching relay and HTTP API for Sonitus noise monitors.
//!
//! Run with: `cargo run -p noise-service`

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use noise_service::{AppState, Config, Refresher, api};
use noise_store::Store;
use noise_upstream::SonitusClient;

/// How long to wait for the refresher loop to exit on shutdown.
const REFRESHER_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Noise Service - caching relay and HTTP REST API for noise monitors.
#[derive(Parser, Debug)]
#[command(name = "noise-service")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (overrides config).
    #[arg(short, long)]
    bind: Option<String>,

    /// Database path (overrides config).
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Disable the background refresher (API only mode).
    #[arg(long)]
    no_refresh: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("noise_service=info".parse()?)
                .add_directive("tower_http=debug".parse()?),
        )
        .init();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };

    // Override config with environment and CLI args
    for key in config.upstream.apply_env_overrides() {
        info!("Using {} from the environment", key);
    }
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(db_path) = args.database {
        config.storage.path = db_path;
    }
    config.validate()?;

    // Open the database
    info!("Opening database at {:?}", config.storage.path);
    let store = Store::open(&config.storage.path)?;

    let upstream = SonitusClient::new(
        &config.upstream.base_url,
        config.upstream.credentials(),
        Duration::from_secs(config.upstream.timeout_secs),
    )?;
    info!("Upstream API at {}", upstream.base_url());

    // Create application state
    let state = AppState::new(store, Arc::new(upstream), config.clone());

    match state.sync.sync_registry().await {
        Ok(outcome) => info!("Registered {} monitor(s)", outcome.registered),
        Err(e) => warn!("Initial registry sync failed, serving cached registry: {}", e),
    }

    // Start the background refresher
    let refresher = if args.no_refresh || !config.refresh.enabled {
        info!("Background refresher disabled");
        None
    } else {
        Some(Refresher::new(Arc::clone(&state)).start().await)
    };

    // Build the router
    let app = Router::new()
        .merge(api::router())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(Arc::clone(&state));

    // Parse bind address
    let addr: SocketAddr = config.server.bind.parse()?;

    info!("Starting server on {}", addr);

    // Run the server
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    state.refresher.signal_stop();
    if let Some(handle) = refresher
        && tokio::time::timeout(REFRESHER_STOP_TIMEOUT, handle)
            .await
            .is_err()
    {
        warn!("Refresher did not stop within {:?}", REFRESHER_STOP_TIMEOUT);
    }

    match state.into_store() {
        Some(store) => {
            if let Err(e) = store.close() {
                error!("Failed to close database: {}", e);
            }
        }
        None => warn!("Database still in use at shutdown; it closes when the last handle drops"),
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
