//! API surface tests. The transport starts DISABLED so no tracker traffic
//! is attempted; engine behavior under a live transport is covered by the
//! core crate's tests.

use axum_test::TestServer;
use cadence_core::{SyncSettings, TrackerConfig};
use cadence_model::{OperationType, QuotaRule, SquadId, TransportMethod};
use cadence_server::{build_router, build_state, AppState, Config};
use serde_json::{json, Value};
use std::time::Duration;

async fn test_state(transport: TransportMethod) -> (AppState, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let database_url = format!(
        "sqlite://{}?mode=rwc",
        dir.path().join("cadence.db").display()
    );
    let config = Config {
        server_host: "127.0.0.1".to_string(),
        server_port: 0,
        database_url,
        tracker: TrackerConfig::default(),
        transport,
        webdriver_url: "http://localhost:4444".to_string(),
        quota: QuotaRule::default(),
        sync: SyncSettings::default(),
        drain_interval: Duration::from_secs(3600),
    };
    let state = build_state(config).await.unwrap();
    (state, dir)
}

async fn test_server(transport: TransportMethod) -> (TestServer, AppState, tempfile::TempDir) {
    let (state, dir) = test_state(transport).await;
    let server = TestServer::new(build_router(state.clone())).unwrap();
    (server, state, dir)
}

#[tokio::test]
async fn status_defaults_to_idle_for_unknown_squad() {
    let (server, _state, _dir) = test_server(TransportMethod::Disabled).await;
    let squad = SquadId::new();

    let response = server.get(&format!("/api/v1/sync/{squad}/status")).await;
    response.assert_status_ok();

    let body: Value = response.json();
    assert_eq!(body["state"], "IDLE");
    assert_eq!(body["pending_queue_count"], 0);
    assert!(body["last_successful_sync_at"].is_null());
}

#[tokio::test]
async fn malformed_squad_id_is_rejected() {
    let (server, _state, _dir) = test_server(TransportMethod::Disabled).await;

    let response = server.get("/api/v1/sync/not-a-uuid/status").await;
    response.assert_status_bad_request();

    let body: Value = response.json();
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("squad id"));
}

#[tokio::test]
async fn trigger_returns_accepted_with_current_status() {
    let (server, _state, _dir) = test_server(TransportMethod::Disabled).await;
    let squad = SquadId::new();

    let response = server.post(&format!("/api/v1/sync/{squad}")).await;
    assert_eq!(response.status_code(), 202);
    let body: Value = response.json();
    assert_eq!(body["state"], "IDLE");

    // Unknown mode is rejected up front.
    let response = server
        .post(&format!("/api/v1/sync/{squad}?mode=SIDEWAYS"))
        .await;
    response.assert_status_bad_request();
}

#[tokio::test]
async fn queue_listing_and_manual_retry() {
    let (server, state, _dir) = test_server(TransportMethod::Disabled).await;
    let squad = SquadId::new();

    let response = server.get("/api/v1/sync/queue").await;
    response.assert_status_ok();
    assert_eq!(response.json::<Vec<Value>>().len(), 0);

    // Retrying an entry that does not exist is a 404.
    let response = server.post("/api/v1/sync/queue/999/retry").await;
    response.assert_status_not_found();

    let id = state
        .orchestrator
        .queue()
        .enqueue(squad, OperationType::SyncIssues, json!({"start_at": 0}))
        .await
        .unwrap();

    // Pending entries cannot be force-retried.
    let response = server
        .post(&format!("/api/v1/sync/queue/{}/retry", id.value()))
        .await;
    assert_eq!(response.status_code(), 409);

    for _ in 0..3 {
        state
            .orchestrator
            .queue()
            .mark_failed(id, "tracker unreachable")
            .await
            .unwrap();
    }
    let response = server
        .post(&format!("/api/v1/sync/queue/{}/retry", id.value()))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["state"], "PENDING");

    let response = server.get("/api/v1/sync/queue").await;
    assert_eq!(response.json::<Vec<Value>>().len(), 1);
}

#[tokio::test]
async fn transport_method_is_hot_swappable() {
    let (server, _state, _dir) = test_server(TransportMethod::Disabled).await;

    let response = server.get("/api/v1/sync/transport").await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["method"], "DISABLED");

    let response = server
        .put("/api/v1/sync/transport")
        .json(&json!({"method": "REST"}))
        .await;
    response.assert_status_ok();

    let response = server.get("/api/v1/sync/transport").await;
    assert_eq!(response.json::<Value>()["method"], "REST");

    let response = server
        .put("/api/v1/sync/transport")
        .json(&json!({"method": "CARRIER_PIGEON"}))
        .await;
    response.assert_status_bad_request();
}

#[tokio::test]
async fn quota_endpoint_reports_untouched_window() {
    let (server, _state, _dir) = test_server(TransportMethod::Disabled).await;
    let squad = SquadId::new();

    let response = server.get(&format!("/api/v1/sync/{squad}/quota")).await;
    response.assert_status_ok();

    let body: Value = response.json();
    assert_eq!(body["used"], 0);
    assert_eq!(body["limit"], 200);
    assert_eq!(body["remaining"], 200);
    assert_eq!(body["squad_used"], 0);
}

#[tokio::test]
async fn submitted_worklog_lands_in_the_queue() {
    let (server, state, _dir) = test_server(TransportMethod::Disabled).await;
    let squad = SquadId::new();

    let response = server
        .post(&format!("/api/v1/sync/{squad}/worklogs/push"))
        .json(&json!({
            "issue_key": "CAP-12",
            "author_key": "jdoe",
            "time_spent_seconds": 1800,
            "comment": "standup prep"
        }))
        .await;
    assert_eq!(response.status_code(), 202);
    let body: Value = response.json();
    assert!(body["queue_entry_id"].is_i64());

    let pending = state.orchestrator.merger().cache().pending_push(squad).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].issue_key.as_str(), "CAP-12");

    let response = server.get("/api/v1/sync/queue").await;
    let entries: Vec<Value> = response.json();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["operation"], "PUSH_WORKLOG");
}

#[tokio::test]
async fn tracker_override_is_scoped_to_one_squad() {
    let (server, state, _dir) = test_server(TransportMethod::Disabled).await;
    let squad = SquadId::new();
    let other = SquadId::new();

    let response = server
        .put(&format!("/api/v1/sync/{squad}/tracker"))
        .json(&json!({
            "base_url": "https://tracker-eu.example.com",
            "user": "sync-bot",
            "token": "s3cret"
        }))
        .await;
    assert_eq!(response.status_code(), 204);

    assert_eq!(
        state.registry.for_squad(squad).await.base_url,
        "https://tracker-eu.example.com"
    );
    // Unset fields inherit the deployment-wide settings.
    assert_eq!(
        state.registry.for_squad(squad).await.page_size,
        TrackerConfig::default().page_size
    );
    assert_eq!(
        state.registry.for_squad(other).await.base_url,
        TrackerConfig::default().base_url
    );

    let response = server
        .delete(&format!("/api/v1/sync/{squad}/tracker"))
        .await;
    assert_eq!(response.status_code(), 204);
    assert_eq!(
        state.registry.for_squad(squad).await.base_url,
        TrackerConfig::default().base_url
    );
}

#[tokio::test]
async fn health_endpoints_respond() {
    let (server, _state, _dir) = test_server(TransportMethod::Disabled).await;
    server.get("/health").await.assert_status_ok();
    let response = server.get("/ping").await;
    response.assert_status_ok();
    assert_eq!(response.text(), "pong");
}
