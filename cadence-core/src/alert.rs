//! Cycle-completion notifications.
//!
//! The orchestrator reports every finished cycle through an [`AlertSink`];
//! deployments can plug in chat webhooks or email without touching the
//! engine. The default sink just logs.

use async_trait::async_trait;
use cadence_model::{SquadId, SyncStatusRecord};
use tracing::info;

#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Called after every cycle, successful or not. Must not block the
    /// orchestrator for long.
    async fn cycle_completed(&self, squad: SquadId, status: &SyncStatusRecord);
}

#[derive(Debug, Default, Clone)]
pub struct LoggingAlertSink;

#[async_trait]
impl AlertSink for LoggingAlertSink {
    async fn cycle_completed(&self, squad: SquadId, status: &SyncStatusRecord) {
        info!(
            %squad,
            state = status.state.as_str(),
            issues = status.counters.issues,
            worklogs = status.counters.worklogs,
            comments = status.counters.comments,
            remote_links = status.counters.remote_links,
            calls_used = status.calls_used_in_window,
            "sync cycle finished"
        );
    }
}
