//! Persistence layer: pool setup, embedded schema, and the stores built on
//! top of it. All queries are runtime-checked against SQLite; timestamps are
//! stored as RFC 3339 text in a fixed width so lexicographic comparison in
//! SQL matches chronological order.

pub mod cache;
pub mod ledger;
pub mod queue;
pub mod status;

use crate::error::{Result, SyncError};
use cadence_model::ModelError;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS call_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    endpoint TEXT NOT NULL,
    http_method TEXT NOT NULL,
    status_code INTEGER NOT NULL,
    squad_id TEXT,
    executed_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_call_records_executed_at
    ON call_records(executed_at);

CREATE TABLE IF NOT EXISTS sync_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    squad_id TEXT NOT NULL,
    operation TEXT NOT NULL,
    payload TEXT NOT NULL DEFAULT '{}',
    state TEXT NOT NULL DEFAULT 'PENDING',
    attempts INTEGER NOT NULL DEFAULT 0,
    max_attempts INTEGER NOT NULL DEFAULT 3,
    not_before TEXT,
    last_executed_at TEXT,
    last_error TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_sync_queue_state
    ON sync_queue(state, not_before);

CREATE TABLE IF NOT EXISTS sync_status (
    squad_id TEXT PRIMARY KEY,
    state TEXT NOT NULL DEFAULT 'IDLE',
    last_successful_sync_at TEXT,
    issues_imported INTEGER NOT NULL DEFAULT 0,
    worklogs_imported INTEGER NOT NULL DEFAULT 0,
    comments_imported INTEGER NOT NULL DEFAULT 0,
    remote_links_imported INTEGER NOT NULL DEFAULT 0,
    calls_used INTEGER NOT NULL DEFAULT 0,
    calls_remaining INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    pending_queue_count INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS cached_issues (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    external_id TEXT NOT NULL UNIQUE,
    issue_key TEXT NOT NULL,
    squad_id TEXT NOT NULL,
    summary TEXT NOT NULL,
    status TEXT,
    issue_type TEXT,
    assignee_key TEXT,
    assignee_person_id TEXT,
    task_id TEXT,
    updated_at_remote TEXT,
    first_seen_at TEXT NOT NULL,
    refreshed_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_cached_issues_key ON cached_issues(issue_key);
CREATE INDEX IF NOT EXISTS idx_cached_issues_squad ON cached_issues(squad_id);

CREATE TABLE IF NOT EXISTS cached_worklogs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    external_id TEXT NOT NULL UNIQUE,
    issue_key TEXT NOT NULL,
    squad_id TEXT,
    author_key TEXT,
    author_person_id TEXT,
    started_at TEXT,
    time_spent_seconds INTEGER NOT NULL DEFAULT 0,
    comment TEXT,
    origin TEXT NOT NULL DEFAULT 'EXTERNAL',
    pushed INTEGER NOT NULL DEFAULT 0,
    updated_at_remote TEXT,
    refreshed_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_cached_worklogs_issue
    ON cached_worklogs(issue_key);

CREATE TABLE IF NOT EXISTS cached_comments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    external_id TEXT NOT NULL UNIQUE,
    issue_key TEXT NOT NULL,
    author_key TEXT,
    author_person_id TEXT,
    body TEXT NOT NULL,
    created_at_remote TEXT,
    updated_at_remote TEXT,
    refreshed_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_cached_comments_issue
    ON cached_comments(issue_key);

CREATE TABLE IF NOT EXISTS cached_remote_links (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    external_id TEXT NOT NULL UNIQUE,
    issue_key TEXT NOT NULL,
    url TEXT NOT NULL,
    title TEXT,
    refreshed_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS person_mappings (
    tracker_key TEXT PRIMARY KEY,
    person_id TEXT NOT NULL,
    display_name TEXT
);

CREATE TABLE IF NOT EXISTS task_mappings (
    issue_key TEXT PRIMARY KEY,
    task_id TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS task_assignees (
    task_id TEXT NOT NULL,
    person_id TEXT NOT NULL,
    assigned_at TEXT NOT NULL,
    PRIMARY KEY (task_id, person_id)
);
"#;

/// Connect to the given database URL and bootstrap the schema.
pub async fn connect(database_url: &str) -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;
    bootstrap(&pool).await?;
    Ok(pool)
}

/// Single-connection in-memory pool for tests and ephemeral deployments.
/// One connection, because every `:memory:` connection is its own database.
pub async fn connect_memory() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    bootstrap(&pool).await?;
    Ok(pool)
}

pub async fn bootstrap(pool: &SqlitePool) -> Result<()> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    Ok(())
}

/// Fixed-width RFC 3339 (microseconds, `Z` suffix) so string comparison in
/// SQL matches chronological order.
pub(crate) fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| {
            SyncError::Model(ModelError::InvalidTimestamp(format!("{raw:?}: {e}")))
        })
}

pub(crate) fn parse_opt_ts(raw: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    raw.map(parse_ts).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bootstrap_is_idempotent() {
        let pool = connect_memory().await.unwrap();
        bootstrap(&pool).await.unwrap();
    }

    #[test]
    fn timestamp_roundtrip_preserves_order() {
        let a = Utc::now();
        let b = a + chrono::Duration::microseconds(1);
        assert!(fmt_ts(a) < fmt_ts(b));
        assert_eq!(parse_ts(&fmt_ts(a)).unwrap(), a.trunc_subsecs_micros());
    }

    trait TruncMicros {
        fn trunc_subsecs_micros(&self) -> Self;
    }

    impl TruncMicros for DateTime<Utc> {
        fn trunc_subsecs_micros(&self) -> Self {
            use chrono::Timelike;
            self.with_nanosecond((self.nanosecond() / 1_000) * 1_000)
                .unwrap_or(*self)
        }
    }
}
