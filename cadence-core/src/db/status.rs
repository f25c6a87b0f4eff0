//! Per-squad sync status persistence. One row per squad, written only by the
//! orchestrator at cycle boundaries.

use crate::db::{fmt_ts, parse_opt_ts, parse_ts};
use crate::error::Result;
use cadence_model::{SquadId, SyncCounters, SyncState, SyncStatusRecord};
use chrono::Utc;
use sqlx::SqlitePool;

#[derive(Debug, sqlx::FromRow)]
struct StatusRow {
    squad_id: String,
    state: String,
    last_successful_sync_at: Option<String>,
    issues_imported: i64,
    worklogs_imported: i64,
    comments_imported: i64,
    remote_links_imported: i64,
    calls_used: i64,
    calls_remaining: i64,
    last_error: Option<String>,
    pending_queue_count: i64,
    updated_at: String,
}

impl StatusRow {
    fn into_record(self) -> Result<SyncStatusRecord> {
        Ok(SyncStatusRecord {
            squad_id: SquadId::parse(&self.squad_id)?,
            state: SyncState::parse(&self.state)?,
            last_successful_sync_at: parse_opt_ts(
                self.last_successful_sync_at.as_deref(),
            )?,
            counters: SyncCounters {
                issues: self.issues_imported.max(0) as u32,
                worklogs: self.worklogs_imported.max(0) as u32,
                comments: self.comments_imported.max(0) as u32,
                remote_links: self.remote_links_imported.max(0) as u32,
            },
            calls_used_in_window: self.calls_used.max(0) as u32,
            calls_remaining_in_window: self.calls_remaining.max(0) as u32,
            last_error: self.last_error,
            pending_queue_count: self.pending_queue_count.max(0) as u32,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SyncStatusStore {
    pool: SqlitePool,
}

impl SyncStatusStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, squad: SquadId) -> Result<Option<SyncStatusRecord>> {
        let row: Option<StatusRow> =
            sqlx::query_as("SELECT * FROM sync_status WHERE squad_id = ?")
                .bind(squad.to_string())
                .fetch_optional(&self.pool)
                .await?;
        row.map(StatusRow::into_record).transpose()
    }

    /// The persisted record, or a fresh IDLE one for squads that have never
    /// synced.
    pub async fn get_or_default(&self, squad: SquadId) -> Result<SyncStatusRecord> {
        Ok(self.get(squad).await?.unwrap_or_else(|| SyncStatusRecord::idle(squad)))
    }

    pub async fn upsert(&self, record: &SyncStatusRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_status (
                squad_id, state, last_successful_sync_at,
                issues_imported, worklogs_imported, comments_imported,
                remote_links_imported, calls_used, calls_remaining,
                last_error, pending_queue_count, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(squad_id) DO UPDATE SET
                state = excluded.state,
                last_successful_sync_at = excluded.last_successful_sync_at,
                issues_imported = excluded.issues_imported,
                worklogs_imported = excluded.worklogs_imported,
                comments_imported = excluded.comments_imported,
                remote_links_imported = excluded.remote_links_imported,
                calls_used = excluded.calls_used,
                calls_remaining = excluded.calls_remaining,
                last_error = excluded.last_error,
                pending_queue_count = excluded.pending_queue_count,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(record.squad_id.to_string())
        .bind(record.state.as_str())
        .bind(record.last_successful_sync_at.map(fmt_ts))
        .bind(i64::from(record.counters.issues))
        .bind(i64::from(record.counters.worklogs))
        .bind(i64::from(record.counters.comments))
        .bind(i64::from(record.counters.remote_links))
        .bind(i64::from(record.calls_used_in_window))
        .bind(i64::from(record.calls_remaining_in_window))
        .bind(record.last_error.as_deref())
        .bind(i64::from(record.pending_queue_count))
        .bind(fmt_ts(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_memory;

    #[tokio::test]
    async fn unknown_squad_defaults_to_idle() {
        let store = SyncStatusStore::new(connect_memory().await.unwrap());
        let squad = SquadId::new();

        assert!(store.get(squad).await.unwrap().is_none());
        let record = store.get_or_default(squad).await.unwrap();
        assert_eq!(record.state, SyncState::Idle);
        assert!(record.last_successful_sync_at.is_none());
        assert_eq!(record.counters, SyncCounters::default());
    }

    #[tokio::test]
    async fn upsert_replaces_previous_row() {
        let store = SyncStatusStore::new(connect_memory().await.unwrap());
        let squad = SquadId::new();

        let mut record = SyncStatusRecord::idle(squad);
        record.state = SyncState::Running;
        store.upsert(&record).await.unwrap();

        record.state = SyncState::Idle;
        record.last_successful_sync_at = Some(Utc::now());
        record.counters.issues = 42;
        record.last_error = None;
        store.upsert(&record).await.unwrap();

        let loaded = store.get(squad).await.unwrap().unwrap();
        assert_eq!(loaded.state, SyncState::Idle);
        assert_eq!(loaded.counters.issues, 42);
        assert!(loaded.last_successful_sync_at.is_some());
    }
}
