//! Tracker transports.
//!
//! Two interchangeable implementations of [`TransportClient`] exist: direct
//! authenticated REST calls and a headless-browser fallback that scrapes the
//! same JSON through an interactive session. The active method is selected
//! at runtime through [`TransportSwitch`] and applies to all subsequent
//! operations immediately.

pub mod browser;
pub mod rest;
pub mod retry;
pub(crate) mod wire;

use crate::config::TrackerRegistry;
use crate::error::{Result, SyncError};
use crate::limiter::RateLimiter;
use async_trait::async_trait;
use cadence_model::{
    IssueKey, RemoteComment, RemoteIssue, RemoteLink, RemoteWorklog, SquadId,
    TransportMethod,
};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

pub use browser::BrowserTransport;
pub use rest::RestTransport;
pub use retry::RetryingHandle;

/// Result of one page of issue search.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub issues: Vec<RemoteIssue>,
    /// Total matches reported by the tracker, across all pages.
    pub total: u32,
    /// Offset to resume from if `complete` is false.
    pub next_start_at: u32,
    /// False when pagination stopped early (quota pressure or a transient
    /// page failure); the orchestrator queues a continuation in that case.
    pub complete: bool,
}

/// One squad's view of the tracker. Implementations record every outbound
/// call in the ledger and consult the limiter before each one.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransportClient: Send + Sync {
    /// Fetch matching issues starting at the given offset, paginating
    /// internally until done, the quota declines, or a page fails.
    async fn search_issues(&self, jql: &str, start_at: u32) -> Result<SearchOutcome>;

    async fn fetch_issue(&self, key: &IssueKey) -> Result<RemoteIssue>;

    async fn fetch_worklogs(&self, key: &IssueKey) -> Result<Vec<RemoteWorklog>>;

    async fn fetch_comments(&self, key: &IssueKey) -> Result<Vec<RemoteComment>>;

    async fn fetch_remote_links(&self, key: &IssueKey) -> Result<Vec<RemoteLink>>;

    /// Transmit a locally authored worklog; returns the tracker-assigned id.
    async fn push_worklog(
        &self,
        key: &IssueKey,
        worklog: &RemoteWorklog,
    ) -> Result<String>;

    /// Cheap authenticated liveness check.
    async fn probe(&self) -> Result<bool>;
}

/// Chooses which transport serves a squad's calls.
#[async_trait]
pub trait TransportSelect: Send + Sync {
    async fn method(&self) -> TransportMethod;

    async fn set_method(&self, method: TransportMethod);

    /// Build a transport bound to the squad's tracker configuration, or
    /// fail when synchronization is disabled.
    async fn transport_for(&self, squad: SquadId) -> Result<Box<dyn TransportClient>>;
}

/// Runtime-switchable transport selection shared across the engine.
#[derive(Debug)]
pub struct TransportSwitch {
    method: RwLock<TransportMethod>,
    registry: Arc<TrackerRegistry>,
    limiter: RateLimiter,
    http: reqwest::Client,
    webdriver_url: String,
}

impl TransportSwitch {
    pub fn new(
        initial: TransportMethod,
        registry: Arc<TrackerRegistry>,
        limiter: RateLimiter,
        webdriver_url: String,
    ) -> Self {
        Self {
            method: RwLock::new(initial),
            registry,
            limiter,
            http: reqwest::Client::new(),
            webdriver_url,
        }
    }
}

#[async_trait]
impl TransportSelect for TransportSwitch {
    async fn method(&self) -> TransportMethod {
        *self.method.read().await
    }

    async fn set_method(&self, method: TransportMethod) {
        let mut current = self.method.write().await;
        if *current != method {
            info!(from = current.as_str(), to = method.as_str(), "transport switched");
            *current = method;
        }
    }

    async fn transport_for(&self, squad: SquadId) -> Result<Box<dyn TransportClient>> {
        let config = self.registry.for_squad(squad).await;
        match self.method().await {
            TransportMethod::Rest => Ok(Box::new(RestTransport::new(
                self.http.clone(),
                config,
                self.limiter.clone(),
                squad,
            ))),
            TransportMethod::Browser => Ok(Box::new(BrowserTransport::new(
                self.webdriver_url.clone(),
                config,
                self.limiter.clone(),
                squad,
            ))),
            TransportMethod::Disabled => Err(SyncError::Permanent(
                "synchronization is disabled".to_string(),
            )),
        }
    }
}
