//! Direct REST transport: authenticated HTTP against the tracker's API.

use crate::config::TrackerConfig;
use crate::error::{Result, SyncError};
use crate::limiter::RateLimiter;
use crate::transport::wire::{
    CommentsResponse, IssueDoc, RemoteLinkDoc, SearchResponse, WorklogDoc,
    WorklogsResponse,
};
use crate::transport::{SearchOutcome, TransportClient};
use async_trait::async_trait;
use cadence_model::{
    IssueKey, RemoteComment, RemoteIssue, RemoteLink, RemoteWorklog, SquadId,
};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, warn};

const SEARCH_PATH: &str = "/rest/api/2/search";

#[derive(Debug)]
pub struct RestTransport {
    http: reqwest::Client,
    config: TrackerConfig,
    limiter: RateLimiter,
    squad: SquadId,
}

impl RestTransport {
    pub fn new(
        http: reqwest::Client,
        config: TrackerConfig,
        limiter: RateLimiter,
        squad: SquadId,
    ) -> Self {
        Self {
            http,
            config,
            limiter,
            squad,
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        if !self.limiter.can_call().await? {
            return Err(SyncError::QuotaExceeded(format!("declined GET {path}")));
        }
        let url = format!("{}{}", self.config.base_url, path);
        let response = self
            .http
            .get(&url)
            .basic_auth(&self.config.user, Some(&self.config.token))
            .query(query)
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(err) => {
                // Failed attempts still consume quota; status 0 marks them.
                self.limiter.record_call(path, "GET", 0, Some(self.squad)).await?;
                return Err(SyncError::Network(err));
            }
        };

        let status = response.status().as_u16();
        self.limiter
            .record_call(path, "GET", status, Some(self.squad))
            .await?;
        if !response.status().is_success() {
            return Err(classify(status, path));
        }
        Ok(response.json::<T>().await?)
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T> {
        if !self.limiter.can_call().await? {
            return Err(SyncError::QuotaExceeded(format!("declined POST {path}")));
        }
        let url = format!("{}{}", self.config.base_url, path);
        let response = self
            .http
            .post(&url)
            .basic_auth(&self.config.user, Some(&self.config.token))
            .json(body)
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(err) => {
                self.limiter.record_call(path, "POST", 0, Some(self.squad)).await?;
                return Err(SyncError::Network(err));
            }
        };

        let status = response.status().as_u16();
        self.limiter
            .record_call(path, "POST", status, Some(self.squad))
            .await?;
        if !response.status().is_success() {
            return Err(classify(status, path));
        }
        Ok(response.json::<T>().await?)
    }
}

/// Map an unsuccessful HTTP status to the engine's failure taxonomy.
fn classify(status: u16, path: &str) -> SyncError {
    match status {
        401 | 403 => SyncError::Auth(format!("{status} from {path}")),
        400 => SyncError::Permanent(format!("400 from {path}")),
        402..=499 => SyncError::NotFound(format!("{status} from {path}")),
        _ => SyncError::Transport(format!("{status} from {path}")),
    }
}

#[async_trait]
impl TransportClient for RestTransport {
    async fn search_issues(&self, jql: &str, start_at: u32) -> Result<SearchOutcome> {
        let mut issues = Vec::new();
        let mut offset = start_at;
        let mut total = 0u32;

        loop {
            if !self.limiter.can_call().await? {
                debug!(offset, "quota declined mid-pagination");
                return Ok(SearchOutcome {
                    issues,
                    total,
                    next_start_at: offset,
                    complete: false,
                });
            }

            let query = [
                ("jql", jql.to_string()),
                ("startAt", offset.to_string()),
                ("maxResults", self.config.page_size.to_string()),
            ];
            let page: SearchResponse = match self.get_json(SEARCH_PATH, &query).await {
                Ok(page) => page,
                Err(SyncError::NotFound(msg)) => {
                    warn!(msg, "search returned a client error, treating as empty");
                    return Ok(SearchOutcome {
                        issues,
                        total,
                        next_start_at: offset,
                        complete: true,
                    });
                }
                Err(err) if err.is_transient() && !issues.is_empty() => {
                    warn!(%err, offset, "pagination stopped early");
                    return Ok(SearchOutcome {
                        issues,
                        total,
                        next_start_at: offset,
                        complete: false,
                    });
                }
                Err(err) => return Err(err),
            };

            total = page.total;
            let fetched = page.issues.len() as u32;
            for doc in page.issues {
                issues.push(doc.into_remote()?);
            }
            offset = page.start_at + fetched;

            if fetched == 0 || offset >= total {
                return Ok(SearchOutcome {
                    issues,
                    total,
                    next_start_at: offset,
                    complete: true,
                });
            }
        }
    }

    async fn fetch_issue(&self, key: &IssueKey) -> Result<RemoteIssue> {
        let doc: IssueDoc = self
            .get_json(&format!("/rest/api/2/issue/{key}"), &[])
            .await?;
        Ok(doc.into_remote()?)
    }

    async fn fetch_worklogs(&self, key: &IssueKey) -> Result<Vec<RemoteWorklog>> {
        let response: WorklogsResponse = self
            .get_json(&format!("/rest/api/2/issue/{key}/worklog"), &[])
            .await?;
        Ok(response
            .worklogs
            .into_iter()
            .map(WorklogDoc::into_remote)
            .collect())
    }

    async fn fetch_comments(&self, key: &IssueKey) -> Result<Vec<RemoteComment>> {
        let response: CommentsResponse = self
            .get_json(&format!("/rest/api/2/issue/{key}/comment"), &[])
            .await?;
        Ok(response
            .comments
            .into_iter()
            .map(|doc| doc.into_remote())
            .collect())
    }

    async fn fetch_remote_links(&self, key: &IssueKey) -> Result<Vec<RemoteLink>> {
        let docs: Vec<RemoteLinkDoc> = self
            .get_json(&format!("/rest/api/2/issue/{key}/remotelink"), &[])
            .await?;
        Ok(docs.into_iter().map(RemoteLinkDoc::into_remote).collect())
    }

    async fn push_worklog(
        &self,
        key: &IssueKey,
        worklog: &RemoteWorklog,
    ) -> Result<String> {
        let body = json!({
            "started": worklog
                .started_at
                .map(|ts| ts.format("%Y-%m-%dT%H:%M:%S%.3f%z").to_string()),
            "timeSpentSeconds": worklog.time_spent_seconds,
            "comment": worklog.comment,
        });
        let created: WorklogDoc = self
            .post_json(&format!("/rest/api/2/issue/{key}/worklog"), &body)
            .await?;
        Ok(created.id)
    }

    async fn probe(&self) -> Result<bool> {
        match self
            .get_json::<serde_json::Value>("/rest/api/2/myself", &[])
            .await
        {
            Ok(_) => Ok(true),
            Err(err @ SyncError::Network(_)) => Err(err),
            Err(err) => {
                debug!(%err, "probe rejected");
                Ok(false)
            }
        }
    }
}
