//! End-to-end tests for the REST transport against a local fake tracker.
//!
//! The fake serves a fixed set of 120 issues, 50 per page, through the same
//! search endpoint shape the real tracker uses; quota accounting is checked
//! against the ledger after each scenario.

use axum::extract::Query;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use cadence_core::db::connect_memory;
use cadence_core::db::ledger::CallLedger;
use cadence_core::transport::rest::RestTransport;
use cadence_core::transport::TransportClient;
use cadence_core::{RateLimiter, SyncError, TrackerConfig};
use cadence_model::QuotaRule;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

const TOTAL: u32 = 120;
const PAGE: u32 = 50;

async fn search(Query(params): Query<HashMap<String, String>>) -> Json<Value> {
    let start: u32 = params
        .get("startAt")
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(0);
    let count = PAGE.min(TOTAL.saturating_sub(start));
    let issues: Vec<Value> = (start..start + count)
        .map(|n| {
            json!({
                "id": (10_000 + n).to_string(),
                "key": format!("CAP-{n}"),
                "fields": {
                    "summary": format!("issue {n}"),
                    "status": {"name": "To Do"},
                    "issuetype": {"name": "Task"},
                    "updated": "2026-08-01T09:30:00.000+0000"
                }
            })
        })
        .collect();
    Json(json!({
        "startAt": start,
        "maxResults": PAGE,
        "total": TOTAL,
        "issues": issues
    }))
}

async fn myself_unauthorized() -> StatusCode {
    StatusCode::UNAUTHORIZED
}

async fn spawn_tracker() -> SocketAddr {
    let app = Router::new()
        .route("/rest/api/2/search", get(search))
        .route("/rest/api/2/myself", get(myself_unauthorized));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn transport(addr: SocketAddr, limit: u32) -> (RestTransport, RateLimiter) {
    let pool = connect_memory().await.unwrap();
    let limiter = RateLimiter::new(
        CallLedger::new(pool),
        QuotaRule {
            limit,
            window: Duration::from_secs(7200),
            high_water_fraction: 0.975,
        },
    );
    let config = TrackerConfig {
        base_url: format!("http://{addr}"),
        user: "sync-bot".into(),
        token: "token".into(),
        ..TrackerConfig::default()
    };
    let transport = RestTransport::new(
        reqwest::Client::new(),
        config,
        limiter.clone(),
        cadence_model::SquadId::new(),
    );
    (transport, limiter)
}

#[tokio::test]
async fn paginates_to_completion_and_ledgers_every_call() {
    let addr = spawn_tracker().await;
    let (transport, limiter) = transport(addr, 10).await;

    let outcome = transport
        .search_issues("statusCategory != Done", 0)
        .await
        .unwrap();

    assert!(outcome.complete);
    assert_eq!(outcome.total, TOTAL);
    assert_eq!(outcome.issues.len(), TOTAL as usize);
    assert_eq!(outcome.next_start_at, TOTAL);
    assert_eq!(outcome.issues[0].key.as_str(), "CAP-0");
    assert_eq!(outcome.issues[119].key.as_str(), "CAP-119");

    // Three pages, three ledgered calls.
    assert_eq!(limiter.usage().await.unwrap().used, 3);
}

#[tokio::test]
async fn quota_decline_stops_pagination_with_resumable_offset() {
    let addr = spawn_tracker().await;
    let (transport, limiter) = transport(addr, 2).await;

    let outcome = transport
        .search_issues("statusCategory != Done", 0)
        .await
        .unwrap();

    assert!(!outcome.complete);
    assert_eq!(outcome.issues.len(), 100);
    assert_eq!(outcome.next_start_at, 100);
    assert_eq!(limiter.usage().await.unwrap().used, 2);

    // The quota is hard-spent; a direct call is declined outright.
    let err = transport
        .search_issues("statusCategory != Done", outcome.next_start_at)
        .await;
    match err {
        Ok(resumed) => {
            assert!(!resumed.complete);
            assert!(resumed.issues.is_empty());
            assert_eq!(resumed.next_start_at, 100);
        }
        Err(other) => panic!("expected a declined-but-resumable outcome, got {other}"),
    }
}

#[tokio::test]
async fn probe_reports_rejected_credentials() {
    let addr = spawn_tracker().await;
    let (transport, limiter) = transport(addr, 10).await;

    assert!(!transport.probe().await.unwrap());
    // The rejected call still consumed quota.
    assert_eq!(limiter.usage().await.unwrap().used, 1);
}

#[tokio::test]
async fn unreachable_tracker_is_a_network_error() {
    // Point at a port nothing listens on.
    let (transport, _limiter) = transport("127.0.0.1:1".parse().unwrap(), 10).await;
    let err = transport
        .search_issues("statusCategory != Done", 0)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Network(_)));
}
