use crate::ids::IssueKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An issue as fetched from the tracker, already lifted out of the wire
/// envelope. The external id is the idempotency key for local caching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteIssue {
    pub external_id: String,
    pub key: IssueKey,
    pub summary: String,
    pub status: Option<String>,
    pub issue_type: Option<String>,
    /// Tracker account key of the assignee, resolved to an internal person
    /// on a best-effort basis during merge.
    pub assignee_key: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Origin of a cached worklog row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorklogOrigin {
    /// Fetched from the tracker.
    External,
    /// Created locally and awaiting transmission to the tracker.
    LocalPendingPush,
}

impl WorklogOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorklogOrigin::External => "EXTERNAL",
            WorklogOrigin::LocalPendingPush => "LOCAL_PENDING_PUSH",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "EXTERNAL" => Some(WorklogOrigin::External),
            "LOCAL_PENDING_PUSH" => Some(WorklogOrigin::LocalPendingPush),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteWorklog {
    pub external_id: String,
    pub author_key: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub time_spent_seconds: i64,
    pub comment: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteComment {
    pub external_id: String,
    pub author_key: Option<String>,
    pub body: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteLink {
    pub external_id: String,
    pub url: String,
    pub title: Option<String>,
}
