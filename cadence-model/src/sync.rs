use crate::error::ModelError;
use crate::ids::{QueueEntryId, SquadId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Processing state of a squad's synchronization, as persisted in the
/// per-squad status record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncState {
    Idle,
    Running,
    Error,
    QuotaExceeded,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Idle => "IDLE",
            SyncState::Running => "RUNNING",
            SyncState::Error => "ERROR",
            SyncState::QuotaExceeded => "QUOTA_EXCEEDED",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ModelError> {
        match value {
            "IDLE" => Ok(SyncState::Idle),
            "RUNNING" => Ok(SyncState::Running),
            "ERROR" => Ok(SyncState::Error),
            "QUOTA_EXCEEDED" => Ok(SyncState::QuotaExceeded),
            other => Err(ModelError::UnknownValue(format!("sync state {other:?}"))),
        }
    }
}

/// How a cycle treats the last-sync watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncMode {
    /// Ignore the last-sync timestamp and fetch everything open.
    Full,
    /// Server-side filter: only records updated since the last successful
    /// sync.
    Incremental,
    /// Fetch and count only; the merger and all writes are skipped.
    DryRun,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Full => "FULL",
            SyncMode::Incremental => "INCREMENTAL",
            SyncMode::DryRun => "DRY_RUN",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ModelError> {
        match value {
            "FULL" => Ok(SyncMode::Full),
            "INCREMENTAL" => Ok(SyncMode::Incremental),
            "DRY_RUN" => Ok(SyncMode::DryRun),
            other => Err(ModelError::UnknownValue(format!("sync mode {other:?}"))),
        }
    }
}

/// The kind of deferred work a queue entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    SyncIssues,
    SyncWorklogs,
    PushWorklog,
    SyncComments,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::SyncIssues => "SYNC_ISSUES",
            OperationType::SyncWorklogs => "SYNC_WORKLOGS",
            OperationType::PushWorklog => "PUSH_WORKLOG",
            OperationType::SyncComments => "SYNC_COMMENTS",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ModelError> {
        match value {
            "SYNC_ISSUES" => Ok(OperationType::SyncIssues),
            "SYNC_WORKLOGS" => Ok(OperationType::SyncWorklogs),
            "PUSH_WORKLOG" => Ok(OperationType::PushWorklog),
            "SYNC_COMMENTS" => Ok(OperationType::SyncComments),
            other => Err(ModelError::UnknownValue(format!("operation {other:?}"))),
        }
    }
}

/// Lifecycle state of a queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueState {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl QueueState {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueState::Pending => "PENDING",
            QueueState::InProgress => "IN_PROGRESS",
            QueueState::Completed => "COMPLETED",
            QueueState::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ModelError> {
        match value {
            "PENDING" => Ok(QueueState::Pending),
            "IN_PROGRESS" => Ok(QueueState::InProgress),
            "COMPLETED" => Ok(QueueState::Completed),
            "FAILED" => Ok(QueueState::Failed),
            other => Err(ModelError::UnknownValue(format!("queue state {other:?}"))),
        }
    }
}

/// Which transport implementation serves tracker calls.
///
/// Runtime-switchable; applied globally and immediately to all subsequent
/// operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransportMethod {
    /// Direct authenticated HTTP calls.
    Rest,
    /// Headless browser session against the tracker's web UI.
    Browser,
    /// Synchronization disabled for this deployment.
    Disabled,
}

impl TransportMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportMethod::Rest => "REST",
            TransportMethod::Browser => "BROWSER",
            TransportMethod::Disabled => "DISABLED",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ModelError> {
        match value.to_ascii_uppercase().as_str() {
            "REST" => Ok(TransportMethod::Rest),
            "BROWSER" => Ok(TransportMethod::Browser),
            "DISABLED" => Ok(TransportMethod::Disabled),
            other => Err(ModelError::UnknownValue(format!("transport {other:?}"))),
        }
    }
}

/// Records imported during one completed cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCounters {
    pub issues: u32,
    pub worklogs: u32,
    pub comments: u32,
    pub remote_links: u32,
}

impl SyncCounters {
    pub fn total(&self) -> u32 {
        self.issues + self.worklogs + self.comments + self.remote_links
    }
}

/// One record per squad summarizing the last completed cycle, current quota
/// usage, and current processing state. Written only by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatusRecord {
    pub squad_id: SquadId,
    pub state: SyncState,
    pub last_successful_sync_at: Option<DateTime<Utc>>,
    pub counters: SyncCounters,
    pub calls_used_in_window: u32,
    pub calls_remaining_in_window: u32,
    pub last_error: Option<String>,
    pub pending_queue_count: u32,
    pub updated_at: DateTime<Utc>,
}

impl SyncStatusRecord {
    /// Fresh IDLE record for a squad that has never synced.
    pub fn idle(squad_id: SquadId) -> Self {
        Self {
            squad_id,
            state: SyncState::Idle,
            last_successful_sync_at: None,
            counters: SyncCounters::default(),
            calls_used_in_window: 0,
            calls_remaining_in_window: 0,
            last_error: None,
            pending_queue_count: 0,
            updated_at: Utc::now(),
        }
    }
}

/// A durable, per-squad deferred synchronization operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: QueueEntryId,
    pub squad_id: SquadId,
    pub operation: OperationType,
    /// Opaque operation parameters (e.g. a resumption offset).
    pub payload: serde_json::Value,
    pub state: QueueState,
    pub attempts: u32,
    pub max_attempts: u32,
    pub not_before: Option<DateTime<Utc>>,
    pub last_executed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl QueueEntry {
    /// Whether the entry may be claimed at `now`.
    pub fn due_at(&self, now: DateTime<Utc>) -> bool {
        self.state == QueueState::Pending
            && self.not_before.map(|nb| nb <= now).unwrap_or(true)
    }
}

/// One outbound call to the tracker API. Immutable once written; used only
/// in aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    pub id: i64,
    pub endpoint: String,
    pub http_method: String,
    pub status_code: u16,
    pub squad_id: Option<SquadId>,
    pub executed_at: DateTime<Utc>,
}
