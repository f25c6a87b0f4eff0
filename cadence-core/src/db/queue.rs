//! Durable, per-squad FIFO queue of deferred synchronization operations.
//!
//! Entries are created whenever the rate limiter reports exhaustion or an
//! operation fails transiently. Claims are atomic via
//! `UPDATE ... WHERE state = 'PENDING'`, so an entry is executed by at most
//! one worker at a time.

use crate::db::{fmt_ts, parse_opt_ts, parse_ts};
use crate::error::{Result, SyncError};
use cadence_model::{
    OperationType, QueueEntry, QueueEntryId, QueueState, SquadId,
};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info};

/// First-failure backoff; doubles per attempt.
const BACKOFF_BASE_SECS: i64 = 30;
/// Backoff ceiling.
const BACKOFF_CAP_SECS: i64 = 30 * 60;

/// Monotonically increasing delay before a failed entry becomes due again.
fn backoff_delay(attempts: u32) -> chrono::Duration {
    let exponent = attempts.saturating_sub(1).min(16);
    let secs = BACKOFF_BASE_SECS
        .saturating_mul(1i64 << exponent)
        .min(BACKOFF_CAP_SECS);
    chrono::Duration::seconds(secs)
}

#[derive(Debug, sqlx::FromRow)]
struct QueueRow {
    id: i64,
    squad_id: String,
    operation: String,
    payload: String,
    state: String,
    attempts: i64,
    max_attempts: i64,
    not_before: Option<String>,
    last_executed_at: Option<String>,
    last_error: Option<String>,
    created_at: String,
}

impl QueueRow {
    fn into_entry(self) -> Result<QueueEntry> {
        Ok(QueueEntry {
            id: QueueEntryId(self.id),
            squad_id: SquadId::parse(&self.squad_id)?,
            operation: OperationType::parse(&self.operation)?,
            payload: serde_json::from_str(&self.payload)?,
            state: QueueState::parse(&self.state)?,
            attempts: self.attempts.max(0) as u32,
            max_attempts: self.max_attempts.max(0) as u32,
            not_before: parse_opt_ts(self.not_before.as_deref())?,
            last_executed_at: parse_opt_ts(self.last_executed_at.as_deref())?,
            last_error: self.last_error,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SyncQueue {
    pool: SqlitePool,
    max_attempts: u32,
}

impl SyncQueue {
    pub fn new(pool: SqlitePool, max_attempts: u32) -> Self {
        Self { pool, max_attempts }
    }

    /// Create a PENDING entry unless an equivalent one already exists.
    /// Deduplication key: (squad, operation, state = PENDING).
    pub async fn enqueue(
        &self,
        squad: SquadId,
        operation: OperationType,
        payload: serde_json::Value,
    ) -> Result<QueueEntryId> {
        let existing: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM sync_queue
            WHERE squad_id = ? AND operation = ? AND state = 'PENDING'
            LIMIT 1
            "#,
        )
        .bind(squad.to_string())
        .bind(operation.as_str())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(id) = existing {
            debug!(%squad, operation = operation.as_str(), id, "pending entry already queued");
            return Ok(QueueEntryId(id));
        }

        let result = sqlx::query(
            r#"
            INSERT INTO sync_queue (squad_id, operation, payload, state, attempts, max_attempts, created_at)
            VALUES (?, ?, ?, 'PENDING', 0, ?, ?)
            "#,
        )
        .bind(squad.to_string())
        .bind(operation.as_str())
        .bind(payload.to_string())
        .bind(i64::from(self.max_attempts))
        .bind(fmt_ts(Utc::now()))
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        info!(%squad, operation = operation.as_str(), id, "queued deferred sync operation");
        Ok(QueueEntryId(id))
    }

    /// Claim every due PENDING entry (oldest first), transitioning each to
    /// IN_PROGRESS atomically. Entries claimed by a concurrent worker in
    /// between are skipped.
    pub async fn claim_due(&self, squad: Option<SquadId>) -> Result<Vec<QueueEntry>> {
        let now = fmt_ts(Utc::now());
        let ids: Vec<i64> = match squad {
            Some(squad) => {
                sqlx::query_scalar(
                    r#"
                    SELECT id FROM sync_queue
                    WHERE squad_id = ? AND state = 'PENDING'
                      AND (not_before IS NULL OR not_before <= ?)
                    ORDER BY id ASC
                    "#,
                )
                .bind(squad.to_string())
                .bind(&now)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_scalar(
                    r#"
                    SELECT id FROM sync_queue
                    WHERE state = 'PENDING'
                      AND (not_before IS NULL OR not_before <= ?)
                    ORDER BY id ASC
                    "#,
                )
                .bind(&now)
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            let updated = sqlx::query(
                r#"
                UPDATE sync_queue
                SET state = 'IN_PROGRESS', last_executed_at = ?
                WHERE id = ? AND state = 'PENDING'
                "#,
            )
            .bind(&now)
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();

            if updated == 1 {
                if let Some(entry) = self.get(QueueEntryId(id)).await? {
                    claimed.push(entry);
                }
            }
        }
        Ok(claimed)
    }

    pub async fn get(&self, id: QueueEntryId) -> Result<Option<QueueEntry>> {
        let row: Option<QueueRow> =
            sqlx::query_as("SELECT * FROM sync_queue WHERE id = ?")
                .bind(id.value())
                .fetch_optional(&self.pool)
                .await?;
        row.map(QueueRow::into_entry).transpose()
    }

    /// All entries, newest first, across all squads.
    pub async fn list_all(&self) -> Result<Vec<QueueEntry>> {
        let rows: Vec<QueueRow> =
            sqlx::query_as("SELECT * FROM sync_queue ORDER BY id DESC")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(QueueRow::into_entry).collect()
    }

    pub async fn pending_count(&self, squad: SquadId) -> Result<u32> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sync_queue WHERE squad_id = ? AND state = 'PENDING'",
        )
        .bind(squad.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u32)
    }

    pub async fn mark_completed(&self, id: QueueEntryId) -> Result<()> {
        sqlx::query(
            "UPDATE sync_queue SET state = 'COMPLETED', last_error = NULL WHERE id = ?",
        )
        .bind(id.value())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a failed execution. The entry returns to PENDING with a
    /// backed-off `not_before` while attempts remain, and becomes terminal
    /// FAILED once `attempts` reaches `max_attempts`.
    pub async fn mark_failed(&self, id: QueueEntryId, error: &str) -> Result<QueueEntry> {
        let entry = self
            .get(id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("queue entry {id}")))?;

        let attempts = (entry.attempts + 1).min(entry.max_attempts.max(1));
        if attempts < entry.max_attempts {
            let not_before = Utc::now() + backoff_delay(attempts);
            sqlx::query(
                r#"
                UPDATE sync_queue
                SET state = 'PENDING', attempts = ?, not_before = ?, last_error = ?
                WHERE id = ?
                "#,
            )
            .bind(i64::from(attempts))
            .bind(fmt_ts(not_before))
            .bind(error)
            .bind(id.value())
            .execute(&self.pool)
            .await?;
            debug!(id = id.value(), attempts, %not_before, "queue entry backed off");
        } else {
            sqlx::query(
                r#"
                UPDATE sync_queue
                SET state = 'FAILED', attempts = ?, not_before = NULL, last_error = ?
                WHERE id = ?
                "#,
            )
            .bind(i64::from(attempts))
            .bind(error)
            .bind(id.value())
            .execute(&self.pool)
            .await?;
            info!(id = id.value(), attempts, "queue entry terminally failed");
        }

        self.get(id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("queue entry {id}")))
    }

    /// Return a claimed entry to PENDING without touching `attempts`. Used
    /// when execution was declined rather than attempted (quota pressure,
    /// squad already running).
    pub async fn release(
        &self,
        id: QueueEntryId,
        not_before: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE sync_queue SET state = 'PENDING', not_before = ? WHERE id = ?",
        )
        .bind(not_before.map(fmt_ts))
        .bind(id.value())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// The only way to reprocess a terminal FAILED entry: back to PENDING
    /// with `not_before` cleared, bypassing the attempts check once.
    pub async fn force_retry(&self, id: QueueEntryId) -> Result<QueueEntry> {
        let entry = self
            .get(id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("queue entry {id}")))?;

        if entry.state != QueueState::Failed {
            return Err(SyncError::Conflict(format!(
                "queue entry {id} is {}, only FAILED entries can be retried",
                entry.state.as_str()
            )));
        }

        sqlx::query(
            "UPDATE sync_queue SET state = 'PENDING', not_before = NULL WHERE id = ? AND state = 'FAILED'",
        )
        .bind(id.value())
        .execute(&self.pool)
        .await?;

        info!(id = id.value(), "queue entry manually reset for retry");
        self.get(id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("queue entry {id}")))
    }
}
