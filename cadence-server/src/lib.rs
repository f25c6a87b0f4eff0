//! # Cadence Server
//!
//! HTTP API for the tracker synchronization engine.
//!
//! - **Sync triggers**: kick off full, incremental, or dry-run cycles per
//!   squad, plus issue-only and worklog-only passes
//! - **Status and quota**: per-squad status records and sliding-window call
//!   accounting
//! - **Queue administration**: inspect deferred operations, manually retry
//!   terminally failed entries
//! - **Transport switching**: flip between REST and browser-driven access at
//!   runtime
//! - **Tracker overrides**: point individual squads at their own tracker
//!   deployments without a restart

pub mod errors;
pub mod handlers;
pub mod infra;
pub mod routes;

pub use infra::app_state::AppState;
pub use infra::config::Config;

use anyhow::Context;
use axum::routing::get;
use axum::Router;
use cadence_core::transport::{TransportSelect, TransportSwitch};
use cadence_core::{
    CallLedger, LoggingAlertSink, RateLimiter, SyncOrchestrator, TrackerRegistry,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

/// Wire the engine together: database pool, limiter, transports, and
/// orchestrator.
pub async fn build_state(config: Config) -> anyhow::Result<AppState> {
    let pool = cadence_core::db::connect(&config.database_url)
        .await
        .with_context(|| format!("opening {}", config.database_url))?;

    let limiter = RateLimiter::new(CallLedger::new(pool.clone()), config.quota.clone());
    let registry = Arc::new(TrackerRegistry::new(config.tracker.clone()));
    let transports = Arc::new(TransportSwitch::new(
        config.transport,
        Arc::clone(&registry),
        limiter.clone(),
        config.webdriver_url.clone(),
    ));

    let orchestrator = SyncOrchestrator::new(
        pool,
        limiter,
        Arc::clone(&transports) as Arc<dyn TransportSelect>,
        Arc::clone(&registry),
        Arc::new(LoggingAlertSink),
        config.sync.clone(),
    );

    Ok(AppState {
        orchestrator: Arc::new(orchestrator),
        transports,
        registry,
        config: Arc::new(config),
    })
}

/// Full application router with tracing and CORS applied.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(routes::create_api_router())
        .route("/health", get(handlers::sync::health))
        .route("/ping", get(|| async { "pong" }))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Background pass that drains due queue entries and prunes call records
/// past the retention horizon.
pub fn spawn_maintenance(state: AppState, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // First tick fires immediately; skip it so startup stays quiet.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match state.orchestrator.process_due_queue().await {
                Ok(0) => {}
                Ok(completed) => info!(completed, "queue entries processed"),
                Err(err) => error!(%err, "queue drain pass failed"),
            }
            match state.orchestrator.purge_ledger().await {
                Ok(0) => {}
                Ok(purged) => info!(purged, "stale call records purged"),
                Err(err) => error!(%err, "ledger purge failed"),
            }
        }
    });
}
