//! Merges fetched tracker records into the local cache.
//!
//! Merging is idempotent: every write is keyed on the tracker-assigned
//! external id, so replaying a page after a partial cycle converges on the
//! same rows. Identity resolution is best effort; records whose author or
//! assignee has no local mapping are still cached, just unlinked.

use crate::db::cache::CacheStore;
use crate::error::Result;
use cadence_model::{
    IssueKey, PersonId, RemoteComment, RemoteIssue, RemoteLink, RemoteWorklog,
    SquadId,
};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct IdempotentMerger {
    cache: CacheStore,
}

impl IdempotentMerger {
    pub fn new(cache: CacheStore) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Upsert one fetched issue. When the issue maps to an internal task and
    /// its assignee resolves to an internal person, the assignment edge is
    /// recorded as well.
    pub async fn merge_issue(&self, squad: SquadId, issue: &RemoteIssue) -> Result<()> {
        let assignee = self.resolve_person(issue.assignee_key.as_deref()).await?;
        let task = self.cache.task_for_issue(&issue.key).await?;

        self.cache.upsert_issue(squad, issue, assignee, task).await?;

        if let (Some(task), Some(person)) = (task, assignee) {
            self.cache.record_task_assignee(task, person).await?;
        } else if issue.assignee_key.is_some() && assignee.is_none() {
            debug!(
                issue = %issue.key,
                assignee = issue.assignee_key.as_deref().unwrap_or(""),
                "assignee has no local person mapping"
            );
        }
        Ok(())
    }

    pub async fn merge_worklog(
        &self,
        issue_key: &IssueKey,
        worklog: &RemoteWorklog,
    ) -> Result<()> {
        let author = self.resolve_person(worklog.author_key.as_deref()).await?;
        if self.cache.task_for_issue(issue_key).await?.is_none() {
            warn!(issue = %issue_key, "worklog merged for issue with no task mapping");
        }
        self.cache.upsert_worklog(issue_key, worklog, author).await
    }

    pub async fn merge_comment(
        &self,
        issue_key: &IssueKey,
        comment: &RemoteComment,
    ) -> Result<()> {
        let author = self.resolve_person(comment.author_key.as_deref()).await?;
        self.cache.upsert_comment(issue_key, comment, author).await
    }

    pub async fn merge_remote_link(
        &self,
        issue_key: &IssueKey,
        link: &RemoteLink,
    ) -> Result<()> {
        self.cache.upsert_remote_link(issue_key, link).await
    }

    async fn resolve_person(&self, tracker_key: Option<&str>) -> Result<Option<PersonId>> {
        match tracker_key {
            Some(key) => self.cache.person_for_key(key).await,
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_memory;
    use cadence_model::TaskId;
    use chrono::Utc;

    async fn merger() -> IdempotentMerger {
        IdempotentMerger::new(CacheStore::new(connect_memory().await.unwrap()))
    }

    fn issue(assignee: Option<&str>) -> RemoteIssue {
        RemoteIssue {
            external_id: "10001".into(),
            key: IssueKey::new("CAP-1").unwrap(),
            summary: "wire up the thing".into(),
            status: Some("To Do".into()),
            issue_type: Some("Task".into()),
            assignee_key: assignee.map(Into::into),
            updated_at: Some(Utc::now()),
        }
    }

    #[tokio::test]
    async fn merge_issue_twice_yields_one_row() {
        let merger = merger().await;
        let squad = SquadId::new();
        merger.merge_issue(squad, &issue(None)).await.unwrap();
        merger.merge_issue(squad, &issue(None)).await.unwrap();
        assert_eq!(merger.cache().issue_count(squad).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn mapped_assignee_records_assignment() {
        let merger = merger().await;
        let squad = SquadId::new();
        let person = PersonId::new();
        let task = TaskId::new();
        let key = IssueKey::new("CAP-1").unwrap();

        merger
            .cache()
            .insert_person_mapping("jdoe", person, None)
            .await
            .unwrap();
        merger.cache().insert_task_mapping(&key, task).await.unwrap();

        merger.merge_issue(squad, &issue(Some("jdoe"))).await.unwrap();

        // Unmapped assignee on a later merge does not error.
        merger
            .merge_issue(squad, &issue(Some("stranger")))
            .await
            .unwrap();
        assert_eq!(merger.cache().issue_count(squad).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn worklog_for_unmapped_issue_is_still_cached() {
        let merger = merger().await;
        let key = IssueKey::new("CAP-77").unwrap();
        let worklog = RemoteWorklog {
            external_id: "555".into(),
            author_key: None,
            started_at: Some(Utc::now()),
            time_spent_seconds: 900,
            comment: None,
            updated_at: None,
        };
        merger.merge_worklog(&key, &worklog).await.unwrap();
        merger.merge_worklog(&key, &worklog).await.unwrap();
    }
}
