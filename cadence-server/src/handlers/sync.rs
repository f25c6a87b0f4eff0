//! Synchronization API handlers.

use crate::errors::{AppError, AppResult};
use crate::infra::app_state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use cadence_core::transport::TransportSelect;
use cadence_core::TrackerConfig;
use cadence_model::{
    IssueKey, QueueEntry, QueueEntryId, SquadId, SyncMode, SyncStatusRecord,
    TransportMethod,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info};

fn parse_squad(raw: &str) -> AppResult<SquadId> {
    SquadId::parse(raw).map_err(|e| AppError::bad_request(e.to_string()))
}

#[derive(Debug, Deserialize)]
pub struct SyncParams {
    /// FULL (default), INCREMENTAL, or DRY_RUN.
    pub mode: Option<String>,
}

impl SyncParams {
    fn mode(&self) -> AppResult<SyncMode> {
        match self.mode.as_deref() {
            None => Ok(SyncMode::Full),
            Some(raw) => {
                SyncMode::parse(raw).map_err(|e| AppError::bad_request(e.to_string()))
            }
        }
    }
}

/// POST /sync/{squad}: start a full cycle in the background and return the
/// squad's current status.
pub async fn trigger_sync(
    State(state): State<AppState>,
    Path(squad): Path<String>,
    Query(params): Query<SyncParams>,
) -> AppResult<(StatusCode, Json<SyncStatusRecord>)> {
    let squad = parse_squad(&squad)?;
    let mode = params.mode()?;

    let orchestrator = Arc::clone(&state.orchestrator);
    tokio::spawn(async move {
        if let Err(err) = orchestrator.run_cycle(squad, mode).await {
            error!(%squad, %err, "background sync cycle failed");
        }
    });

    let status = state.orchestrator.status(squad).await?;
    Ok((StatusCode::ACCEPTED, Json(status)))
}

/// POST /sync/{squad}/issues: issue search and remote links only.
pub async fn trigger_issue_sync(
    State(state): State<AppState>,
    Path(squad): Path<String>,
    Query(params): Query<SyncParams>,
) -> AppResult<(StatusCode, Json<SyncStatusRecord>)> {
    let squad = parse_squad(&squad)?;
    let mode = params.mode()?;

    let orchestrator = Arc::clone(&state.orchestrator);
    tokio::spawn(async move {
        if let Err(err) = orchestrator.run_issue_sync(squad, mode).await {
            error!(%squad, %err, "background issue sync failed");
        }
    });

    let status = state.orchestrator.status(squad).await?;
    Ok((StatusCode::ACCEPTED, Json(status)))
}

/// POST /sync/{squad}/worklogs: refresh worklogs for cached issues.
pub async fn trigger_worklog_sync(
    State(state): State<AppState>,
    Path(squad): Path<String>,
) -> AppResult<(StatusCode, Json<SyncStatusRecord>)> {
    let squad = parse_squad(&squad)?;

    let orchestrator = Arc::clone(&state.orchestrator);
    tokio::spawn(async move {
        if let Err(err) = orchestrator.run_worklog_sync(squad).await {
            error!(%squad, %err, "background worklog sync failed");
        }
    });

    let status = state.orchestrator.status(squad).await?;
    Ok((StatusCode::ACCEPTED, Json(status)))
}

#[derive(Debug, Deserialize)]
pub struct SubmitWorklogBody {
    pub issue_key: String,
    pub author_key: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub time_spent_seconds: i64,
    pub comment: Option<String>,
}

/// POST /sync/{squad}/worklogs/push: record a local worklog and queue its
/// transmission to the tracker.
pub async fn submit_worklog(
    State(state): State<AppState>,
    Path(squad): Path<String>,
    Json(body): Json<SubmitWorklogBody>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let squad = parse_squad(&squad)?;
    let issue_key = IssueKey::new(body.issue_key)
        .map_err(|e| AppError::bad_request(e.to_string()))?;

    let entry = state
        .orchestrator
        .submit_worklog(
            squad,
            issue_key,
            body.author_key,
            body.started_at,
            body.time_spent_seconds,
            body.comment,
        )
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({"queue_entry_id": entry.value()})),
    ))
}

/// GET /sync/{squad}/status
pub async fn get_status(
    State(state): State<AppState>,
    Path(squad): Path<String>,
) -> AppResult<Json<SyncStatusRecord>> {
    let squad = parse_squad(&squad)?;
    Ok(Json(state.orchestrator.status(squad).await?))
}

/// GET /sync/{squad}/quota: shared window usage plus the squad's own share.
pub async fn get_quota(
    State(state): State<AppState>,
    Path(squad): Path<String>,
) -> AppResult<Json<Value>> {
    let squad = parse_squad(&squad)?;
    let global = state.orchestrator.quota().await?;
    let own = state.orchestrator.limiter().usage_for(squad).await?;
    Ok(Json(json!({
        "used": global.used,
        "limit": global.limit,
        "remaining": global.remaining(),
        "squad_used": own.used,
    })))
}

/// GET /sync/queue: every queue entry, newest first.
pub async fn list_queue(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<QueueEntry>>> {
    Ok(Json(state.orchestrator.queue().list_all().await?))
}

/// POST /sync/queue/{id}/retry: reset a FAILED entry to PENDING.
pub async fn retry_queue_entry(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<QueueEntry>> {
    let entry = state
        .orchestrator
        .queue()
        .force_retry(QueueEntryId(id))
        .await?;
    info!(id, "queue entry reset via API");
    Ok(Json(entry))
}

#[derive(Debug, Deserialize)]
pub struct TransportBody {
    pub method: String,
}

/// GET /sync/transport
pub async fn get_transport(State(state): State<AppState>) -> Json<Value> {
    let method = state.transports.method().await;
    Json(json!({"method": method.as_str()}))
}

/// PUT /sync/transport: hot-swap the transport method.
pub async fn set_transport(
    State(state): State<AppState>,
    Json(body): Json<TransportBody>,
) -> AppResult<Json<Value>> {
    let method = TransportMethod::parse(&body.method)
        .map_err(|e| AppError::bad_request(e.to_string()))?;
    state.transports.set_method(method).await;
    Ok(Json(json!({"method": method.as_str()})))
}

#[derive(Debug, Deserialize)]
pub struct TrackerOverrideBody {
    pub base_url: String,
    pub user: String,
    pub token: String,
    pub page_size: Option<u32>,
    pub search_jql: Option<String>,
    pub login_path: Option<String>,
}

/// PUT /sync/{squad}/tracker: point one squad at its own tracker
/// deployment. Omitted fields fall back to the deployment-wide settings.
pub async fn set_tracker_override(
    State(state): State<AppState>,
    Path(squad): Path<String>,
    Json(body): Json<TrackerOverrideBody>,
) -> AppResult<StatusCode> {
    let squad = parse_squad(&squad)?;
    let defaults = state.config.tracker.clone();
    state
        .registry
        .set_override(
            squad,
            TrackerConfig {
                base_url: body.base_url,
                user: body.user,
                token: body.token,
                page_size: body.page_size.unwrap_or(defaults.page_size),
                search_jql: body.search_jql.unwrap_or(defaults.search_jql),
                login_path: body.login_path.unwrap_or(defaults.login_path),
            },
        )
        .await;
    info!(%squad, "tracker override set");
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /sync/{squad}/tracker: back to the deployment-wide tracker.
pub async fn clear_tracker_override(
    State(state): State<AppState>,
    Path(squad): Path<String>,
) -> AppResult<StatusCode> {
    let squad = parse_squad(&squad)?;
    state.registry.clear_override(squad).await;
    info!(%squad, "tracker override cleared");
    Ok(StatusCode::NO_CONTENT)
}

/// GET /health
pub async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}
