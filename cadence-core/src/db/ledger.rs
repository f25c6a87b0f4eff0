//! Append-only log of every outbound call to the tracker API.
//!
//! Quota window calls are counted only from this ledger, never estimated
//! from an in-memory counter, so concurrent cycles safely share one
//! external quota.

use crate::db::{fmt_ts, parse_ts};
use crate::error::Result;
use cadence_model::{CallRecord, SquadId};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

#[derive(Debug, Clone)]
pub struct CallLedger {
    pool: SqlitePool,
}

impl CallLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append one call attempt. Failed calls are recorded too, so they
    /// still consume quota.
    pub async fn record(
        &self,
        endpoint: &str,
        http_method: &str,
        status_code: u16,
        squad: Option<SquadId>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO call_records (endpoint, http_method, status_code, squad_id, executed_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(endpoint)
        .bind(http_method)
        .bind(i64::from(status_code))
        .bind(squad.map(|s| s.to_string()))
        .bind(fmt_ts(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Number of calls executed at or after `cutoff`, optionally restricted
    /// to one squad.
    pub async fn count_since(
        &self,
        cutoff: DateTime<Utc>,
        squad: Option<SquadId>,
    ) -> Result<u32> {
        let count: i64 = match squad {
            Some(squad) => {
                sqlx::query_scalar(
                    "SELECT COUNT(*) FROM call_records WHERE executed_at >= ? AND squad_id = ?",
                )
                .bind(fmt_ts(cutoff))
                .bind(squad.to_string())
                .fetch_one(&self.pool)
                .await?
            }
            None => {
                sqlx::query_scalar(
                    "SELECT COUNT(*) FROM call_records WHERE executed_at >= ?",
                )
                .bind(fmt_ts(cutoff))
                .fetch_one(&self.pool)
                .await?
            }
        };
        Ok(count.max(0) as u32)
    }

    /// Most recent calls, newest first. For inspection; quota math goes
    /// through `count_since`.
    pub async fn recent(&self, limit: u32) -> Result<Vec<CallRecord>> {
        #[derive(sqlx::FromRow)]
        struct Row {
            id: i64,
            endpoint: String,
            http_method: String,
            status_code: i64,
            squad_id: Option<String>,
            executed_at: String,
        }

        let rows: Vec<Row> = sqlx::query_as(
            "SELECT * FROM call_records ORDER BY id DESC LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(CallRecord {
                    id: row.id,
                    endpoint: row.endpoint,
                    http_method: row.http_method,
                    status_code: row.status_code.clamp(0, u16::MAX as i64) as u16,
                    squad_id: row
                        .squad_id
                        .as_deref()
                        .map(SquadId::parse)
                        .transpose()?,
                    executed_at: parse_ts(&row.executed_at)?,
                })
            })
            .collect()
    }

    /// Delete records older than `cutoff`. Returns the number removed.
    pub async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM call_records WHERE executed_at < ?")
            .bind(fmt_ts(cutoff))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_memory;

    #[tokio::test]
    async fn counts_only_inside_window() {
        let pool = connect_memory().await.unwrap();
        let ledger = CallLedger::new(pool.clone());
        let squad = SquadId::new();

        ledger.record("/rest/api/2/search", "GET", 200, Some(squad)).await.unwrap();
        ledger.record("/rest/api/2/search", "GET", 500, Some(squad)).await.unwrap();
        ledger.record("/rest/api/2/myself", "GET", 200, None).await.unwrap();

        let window_start = Utc::now() - chrono::Duration::hours(2);
        assert_eq!(ledger.count_since(window_start, None).await.unwrap(), 3);
        assert_eq!(
            ledger.count_since(window_start, Some(squad)).await.unwrap(),
            2
        );
        // A cutoff in the future excludes everything already recorded.
        let future = Utc::now() + chrono::Duration::minutes(1);
        assert_eq!(ledger.count_since(future, None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failed_calls_are_recorded() {
        let pool = connect_memory().await.unwrap();
        let ledger = CallLedger::new(pool);

        ledger.record("/rest/api/2/search", "GET", 503, None).await.unwrap();
        let window_start = Utc::now() - chrono::Duration::hours(2);
        assert_eq!(ledger.count_since(window_start, None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn recent_returns_full_records_newest_first() {
        let pool = connect_memory().await.unwrap();
        let ledger = CallLedger::new(pool);
        let squad = SquadId::new();

        ledger.record("/rest/api/2/search", "GET", 200, Some(squad)).await.unwrap();
        ledger.record("/rest/api/2/myself", "GET", 401, None).await.unwrap();

        let records = ledger.recent(10).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].endpoint, "/rest/api/2/myself");
        assert_eq!(records[0].status_code, 401);
        assert!(records[0].squad_id.is_none());
        assert_eq!(records[1].squad_id, Some(squad));

        assert_eq!(ledger.recent(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn purge_removes_old_records() {
        let pool = connect_memory().await.unwrap();
        let ledger = CallLedger::new(pool.clone());

        ledger.record("/rest/api/2/search", "GET", 200, None).await.unwrap();
        // Nothing is older than two hours yet.
        let removed = ledger
            .purge_older_than(Utc::now() - chrono::Duration::hours(2))
            .await
            .unwrap();
        assert_eq!(removed, 0);

        let removed = ledger
            .purge_older_than(Utc::now() + chrono::Duration::minutes(1))
            .await
            .unwrap();
        assert_eq!(removed, 1);
    }
}
