use axum::{
    routing::{get, post, put},
    Router,
};

use crate::handlers::sync;
use crate::infra::app_state::AppState;

/// Create all v1 API routes
pub fn create_v1_router() -> Router<AppState> {
    Router::new()
        // Sync triggers
        .route("/sync/{squad}", post(sync::trigger_sync))
        .route("/sync/{squad}/issues", post(sync::trigger_issue_sync))
        .route("/sync/{squad}/worklogs", post(sync::trigger_worklog_sync))
        .route("/sync/{squad}/worklogs/push", post(sync::submit_worklog))
        // Observability
        .route("/sync/{squad}/status", get(sync::get_status))
        .route("/sync/{squad}/quota", get(sync::get_quota))
        // Queue administration
        .route("/sync/queue", get(sync::list_queue))
        .route("/sync/queue/{id}/retry", post(sync::retry_queue_entry))
        // Transport switching
        .route(
            "/sync/transport",
            get(sync::get_transport).put(sync::set_transport),
        )
        // Per-squad tracker overrides
        .route(
            "/sync/{squad}/tracker",
            put(sync::set_tracker_override).delete(sync::clear_tracker_override),
        )
}
