//! Local cache of tracker data plus the identity mappings the merger uses.
//!
//! All remote-record writes are keyed on the tracker-assigned external id
//! with last-write-wins upserts, so replaying a page after a partial cycle
//! never duplicates rows.

use crate::db::{fmt_ts, parse_opt_ts};
use crate::error::{Result, SyncError};
use cadence_model::{
    IssueKey, PersonId, RemoteComment, RemoteIssue, RemoteLink, RemoteWorklog,
    SquadId, TaskId, WorklogOrigin,
};
use chrono::Utc;
use sqlx::SqlitePool;

/// A locally created worklog waiting to be pushed to the tracker.
#[derive(Debug, Clone)]
pub struct PendingWorklog {
    pub external_id: String,
    pub issue_key: IssueKey,
    pub worklog: RemoteWorklog,
}

#[derive(Debug, Clone)]
pub struct CacheStore {
    pool: SqlitePool,
}

impl CacheStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn upsert_issue(
        &self,
        squad: SquadId,
        issue: &RemoteIssue,
        assignee_person: Option<PersonId>,
        task: Option<TaskId>,
    ) -> Result<()> {
        let now = fmt_ts(Utc::now());
        sqlx::query(
            r#"
            INSERT INTO cached_issues (
                external_id, issue_key, squad_id, summary, status, issue_type,
                assignee_key, assignee_person_id, task_id, updated_at_remote,
                first_seen_at, refreshed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(external_id) DO UPDATE SET
                issue_key = excluded.issue_key,
                summary = excluded.summary,
                status = excluded.status,
                issue_type = excluded.issue_type,
                assignee_key = excluded.assignee_key,
                assignee_person_id = excluded.assignee_person_id,
                task_id = excluded.task_id,
                updated_at_remote = excluded.updated_at_remote,
                refreshed_at = excluded.refreshed_at
            "#,
        )
        .bind(&issue.external_id)
        .bind(issue.key.as_str())
        .bind(squad.to_string())
        .bind(&issue.summary)
        .bind(issue.status.as_deref())
        .bind(issue.issue_type.as_deref())
        .bind(issue.assignee_key.as_deref())
        .bind(assignee_person.map(|p| p.to_string()))
        .bind(task.map(|t| t.to_string()))
        .bind(issue.updated_at.map(fmt_ts))
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_worklog(
        &self,
        issue_key: &IssueKey,
        worklog: &RemoteWorklog,
        author_person: Option<PersonId>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cached_worklogs (
                external_id, issue_key, author_key, author_person_id,
                started_at, time_spent_seconds, comment, origin, pushed,
                updated_at_remote, refreshed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, 'EXTERNAL', 1, ?, ?)
            ON CONFLICT(external_id) DO UPDATE SET
                issue_key = excluded.issue_key,
                author_key = excluded.author_key,
                author_person_id = excluded.author_person_id,
                started_at = excluded.started_at,
                time_spent_seconds = excluded.time_spent_seconds,
                comment = excluded.comment,
                updated_at_remote = excluded.updated_at_remote,
                refreshed_at = excluded.refreshed_at
            "#,
        )
        .bind(&worklog.external_id)
        .bind(issue_key.as_str())
        .bind(worklog.author_key.as_deref())
        .bind(author_person.map(|p| p.to_string()))
        .bind(worklog.started_at.map(fmt_ts))
        .bind(worklog.time_spent_seconds)
        .bind(worklog.comment.as_deref())
        .bind(worklog.updated_at.map(fmt_ts))
        .bind(fmt_ts(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_comment(
        &self,
        issue_key: &IssueKey,
        comment: &RemoteComment,
        author_person: Option<PersonId>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cached_comments (
                external_id, issue_key, author_key, author_person_id, body,
                created_at_remote, updated_at_remote, refreshed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(external_id) DO UPDATE SET
                issue_key = excluded.issue_key,
                author_key = excluded.author_key,
                author_person_id = excluded.author_person_id,
                body = excluded.body,
                created_at_remote = excluded.created_at_remote,
                updated_at_remote = excluded.updated_at_remote,
                refreshed_at = excluded.refreshed_at
            "#,
        )
        .bind(&comment.external_id)
        .bind(issue_key.as_str())
        .bind(comment.author_key.as_deref())
        .bind(author_person.map(|p| p.to_string()))
        .bind(&comment.body)
        .bind(comment.created_at.map(fmt_ts))
        .bind(comment.updated_at.map(fmt_ts))
        .bind(fmt_ts(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_remote_link(
        &self,
        issue_key: &IssueKey,
        link: &RemoteLink,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cached_remote_links (
                external_id, issue_key, url, title, refreshed_at
            ) VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(external_id) DO UPDATE SET
                issue_key = excluded.issue_key,
                url = excluded.url,
                title = excluded.title,
                refreshed_at = excluded.refreshed_at
            "#,
        )
        .bind(&link.external_id)
        .bind(issue_key.as_str())
        .bind(&link.url)
        .bind(link.title.as_deref())
        .bind(fmt_ts(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Count of cached issue rows for a squad.
    pub async fn issue_count(&self, squad: SquadId) -> Result<u32> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM cached_issues WHERE squad_id = ?",
        )
        .bind(squad.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u32)
    }

    /// Issue keys known for a squad, oldest cache entry first.
    pub async fn issue_keys(&self, squad: SquadId) -> Result<Vec<IssueKey>> {
        let keys: Vec<String> = sqlx::query_scalar(
            "SELECT issue_key FROM cached_issues WHERE squad_id = ? ORDER BY id ASC",
        )
        .bind(squad.to_string())
        .fetch_all(&self.pool)
        .await?;
        keys.into_iter()
            .map(|k| IssueKey::new(k).map_err(SyncError::from))
            .collect()
    }

    pub async fn person_for_key(&self, tracker_key: &str) -> Result<Option<PersonId>> {
        let raw: Option<String> = sqlx::query_scalar(
            "SELECT person_id FROM person_mappings WHERE tracker_key = ?",
        )
        .bind(tracker_key)
        .fetch_optional(&self.pool)
        .await?;
        raw.map(|r| PersonId::parse(&r).map_err(SyncError::from))
            .transpose()
    }

    pub async fn insert_person_mapping(
        &self,
        tracker_key: &str,
        person: PersonId,
        display_name: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO person_mappings (tracker_key, person_id, display_name)
            VALUES (?, ?, ?)
            ON CONFLICT(tracker_key) DO UPDATE SET
                person_id = excluded.person_id,
                display_name = excluded.display_name
            "#,
        )
        .bind(tracker_key)
        .bind(person.to_string())
        .bind(display_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn task_for_issue(&self, issue_key: &IssueKey) -> Result<Option<TaskId>> {
        let raw: Option<String> = sqlx::query_scalar(
            "SELECT task_id FROM task_mappings WHERE issue_key = ?",
        )
        .bind(issue_key.as_str())
        .fetch_optional(&self.pool)
        .await?;
        raw.map(|r| TaskId::parse(&r).map_err(SyncError::from))
            .transpose()
    }

    pub async fn insert_task_mapping(
        &self,
        issue_key: &IssueKey,
        task: TaskId,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO task_mappings (issue_key, task_id) VALUES (?, ?)
            ON CONFLICT(issue_key) DO UPDATE SET task_id = excluded.task_id
            "#,
        )
        .bind(issue_key.as_str())
        .bind(task.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Records the observed assignment. Idempotent on (task, person).
    pub async fn record_task_assignee(
        &self,
        task: TaskId,
        person: PersonId,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO task_assignees (task_id, person_id, assigned_at)
            VALUES (?, ?, ?)
            ON CONFLICT(task_id, person_id) DO NOTHING
            "#,
        )
        .bind(task.to_string())
        .bind(person.to_string())
        .bind(fmt_ts(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Store a locally authored worklog awaiting transmission. The caller
    /// supplies a provisional external id (local uuid) that is replaced by
    /// the tracker-assigned one once pushed.
    pub async fn insert_local_worklog(
        &self,
        squad: SquadId,
        issue_key: &IssueKey,
        worklog: &RemoteWorklog,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cached_worklogs (
                external_id, issue_key, squad_id, author_key, started_at,
                time_spent_seconds, comment, origin, pushed, refreshed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, 'LOCAL_PENDING_PUSH', 0, ?)
            "#,
        )
        .bind(&worklog.external_id)
        .bind(issue_key.as_str())
        .bind(squad.to_string())
        .bind(worklog.author_key.as_deref())
        .bind(worklog.started_at.map(fmt_ts))
        .bind(worklog.time_spent_seconds)
        .bind(worklog.comment.as_deref())
        .bind(fmt_ts(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Locally authored worklogs of one squad not yet acknowledged by the
    /// tracker. Scoped so a push entry never drains another squad's rows
    /// through the wrong tracker.
    pub async fn pending_push(&self, squad: SquadId) -> Result<Vec<PendingWorklog>> {
        #[derive(sqlx::FromRow)]
        struct Row {
            external_id: String,
            issue_key: String,
            author_key: Option<String>,
            started_at: Option<String>,
            time_spent_seconds: i64,
            comment: Option<String>,
        }

        let rows: Vec<Row> = sqlx::query_as(
            r#"
            SELECT external_id, issue_key, author_key, started_at,
                   time_spent_seconds, comment
            FROM cached_worklogs
            WHERE origin = ? AND pushed = 0 AND squad_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(WorklogOrigin::LocalPendingPush.as_str())
        .bind(squad.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(PendingWorklog {
                    external_id: row.external_id.clone(),
                    issue_key: IssueKey::new(row.issue_key)?,
                    worklog: RemoteWorklog {
                        external_id: row.external_id,
                        author_key: row.author_key,
                        started_at: parse_opt_ts(row.started_at.as_deref())?,
                        time_spent_seconds: row.time_spent_seconds,
                        comment: row.comment,
                        updated_at: None,
                    },
                })
            })
            .collect()
    }

    /// Mark a local worklog as transmitted, rekeying it to the id the
    /// tracker assigned so the next fetch upserts over the same row.
    pub async fn mark_pushed(
        &self,
        local_external_id: &str,
        tracker_external_id: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE cached_worklogs
            SET external_id = ?, origin = 'EXTERNAL', pushed = 1, refreshed_at = ?
            WHERE external_id = ?
            "#,
        )
        .bind(tracker_external_id)
        .bind(fmt_ts(Utc::now()))
        .bind(local_external_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_memory;

    fn issue(external_id: &str, key: &str, summary: &str) -> RemoteIssue {
        RemoteIssue {
            external_id: external_id.into(),
            key: IssueKey::new(key).unwrap(),
            summary: summary.into(),
            status: Some("In Progress".into()),
            issue_type: Some("Task".into()),
            assignee_key: None,
            updated_at: Some(Utc::now()),
        }
    }

    #[tokio::test]
    async fn issue_upsert_is_idempotent() {
        let cache = CacheStore::new(connect_memory().await.unwrap());
        let squad = SquadId::new();

        cache
            .upsert_issue(squad, &issue("10001", "CAP-1", "first"), None, None)
            .await
            .unwrap();
        cache
            .upsert_issue(squad, &issue("10001", "CAP-1", "renamed"), None, None)
            .await
            .unwrap();

        assert_eq!(cache.issue_count(squad).await.unwrap(), 1);
        let keys = cache.issue_keys(squad).await.unwrap();
        assert_eq!(keys, vec![IssueKey::new("CAP-1").unwrap()]);
    }

    #[tokio::test]
    async fn person_and_task_mappings_resolve() {
        let cache = CacheStore::new(connect_memory().await.unwrap());
        let person = PersonId::new();
        let task = TaskId::new();
        let key = IssueKey::new("CAP-9").unwrap();

        assert!(cache.person_for_key("jdoe").await.unwrap().is_none());
        cache
            .insert_person_mapping("jdoe", person, Some("J. Doe"))
            .await
            .unwrap();
        assert_eq!(cache.person_for_key("jdoe").await.unwrap(), Some(person));

        cache.insert_task_mapping(&key, task).await.unwrap();
        assert_eq!(cache.task_for_issue(&key).await.unwrap(), Some(task));

        // Assignment edge is idempotent.
        cache.record_task_assignee(task, person).await.unwrap();
        cache.record_task_assignee(task, person).await.unwrap();
    }

    #[tokio::test]
    async fn local_worklog_push_lifecycle() {
        let cache = CacheStore::new(connect_memory().await.unwrap());
        let squad = SquadId::new();
        let key = IssueKey::new("CAP-3").unwrap();

        let local = RemoteWorklog {
            external_id: "local-abc".into(),
            author_key: Some("jdoe".into()),
            started_at: Some(Utc::now()),
            time_spent_seconds: 3600,
            comment: Some("pairing".into()),
            updated_at: None,
        };
        cache.insert_local_worklog(squad, &key, &local).await.unwrap();

        let pending = cache.pending_push(squad).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].external_id, "local-abc");
        assert_eq!(pending[0].issue_key, key);
        assert!(cache.pending_push(SquadId::new()).await.unwrap().is_empty());

        cache.mark_pushed("local-abc", "20005").await.unwrap();
        assert!(cache.pending_push(squad).await.unwrap().is_empty());

        // The tracker's copy of the same worklog lands on the same row.
        let remote = RemoteWorklog {
            external_id: "20005".into(),
            ..local
        };
        cache.upsert_worklog(&key, &remote, None).await.unwrap();
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM cached_worklogs")
                .fetch_one(cache.pool())
                .await
                .unwrap();
        assert_eq!(count, 1);
    }

    impl CacheStore {
        fn pool(&self) -> &SqlitePool {
            &self.pool
        }
    }
}
