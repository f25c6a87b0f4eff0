//! Headless-browser transport.
//!
//! Drives a WebDriver session through the tracker's web UI, logging in with
//! the configured credentials and reading the same JSON payloads the REST
//! API serves. Used when direct API access is blocked; slower than REST and
//! read-only (worklog push is refused).

use crate::config::TrackerConfig;
use crate::error::{Result, SyncError};
use crate::limiter::RateLimiter;
use crate::transport::retry::RetryingHandle;
use crate::transport::wire::{
    CommentsResponse, IssueDoc, RemoteLinkDoc, SearchResponse, WorklogDoc,
    WorklogsResponse,
};
use crate::transport::{SearchOutcome, TransportClient};
use async_trait::async_trait;
use cadence_model::{
    IssueKey, RemoteComment, RemoteIssue, RemoteLink, RemoteWorklog, SquadId,
};
use fantoccini::{Client, ClientBuilder, Locator};
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::form_urlencoded;

const USERNAME_FIELD: &str = "#login-form-username";
const PASSWORD_FIELD: &str = "#login-form-password";
const SUBMIT_BUTTON: &str = "#login-form-submit";

pub struct BrowserTransport {
    webdriver_url: String,
    config: TrackerConfig,
    limiter: RateLimiter,
    squad: SquadId,
    handle: RetryingHandle,
    session: Mutex<Option<Client>>,
}

impl std::fmt::Debug for BrowserTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserTransport")
            .field("webdriver_url", &self.webdriver_url)
            .field("squad", &self.squad)
            .finish_non_exhaustive()
    }
}

impl BrowserTransport {
    pub fn new(
        webdriver_url: String,
        config: TrackerConfig,
        limiter: RateLimiter,
        squad: SquadId,
    ) -> Self {
        Self {
            webdriver_url,
            config,
            limiter,
            squad,
            handle: RetryingHandle::default(),
            session: Mutex::new(None),
        }
    }

    /// Connect and log in on first use; later calls reuse the session.
    async fn ensure_session(&self) -> Result<Client> {
        let mut session = self.session.lock().await;
        if let Some(client) = session.as_ref() {
            return Ok(client.clone());
        }

        let client = ClientBuilder::native()
            .connect(&self.webdriver_url)
            .await
            .map_err(|e| SyncError::Transport(format!("webdriver session: {e}")))?;

        self.login(&client).await?;
        info!(squad = %self.squad, "browser session established");
        *session = Some(client.clone());
        Ok(client)
    }

    async fn login(&self, client: &Client) -> Result<()> {
        let login_url = format!("{}{}", self.config.base_url, self.config.login_path);
        self.handle
            .run("open login form", || client.goto(&login_url))
            .await
            .map_err(|e| SyncError::Transport(format!("goto login: {e}")))?;

        // The form fields render asynchronously; find-and-type is retried
        // until the page settles.
        let username = self
            .handle
            .run("find username field", || {
                client.find(Locator::Css(USERNAME_FIELD))
            })
            .await
            .map_err(|e| SyncError::Transport(format!("username field: {e}")))?;
        username
            .send_keys(&self.config.user)
            .await
            .map_err(|e| SyncError::Transport(format!("type username: {e}")))?;

        let password = self
            .handle
            .run("find password field", || {
                client.find(Locator::Css(PASSWORD_FIELD))
            })
            .await
            .map_err(|e| SyncError::Transport(format!("password field: {e}")))?;
        password
            .send_keys(&self.config.token)
            .await
            .map_err(|e| SyncError::Transport(format!("type password: {e}")))?;

        let submit = self
            .handle
            .run("find submit button", || {
                client.find(Locator::Css(SUBMIT_BUTTON))
            })
            .await
            .map_err(|e| SyncError::Transport(format!("submit button: {e}")))?;
        submit
            .click()
            .await
            .map_err(|e| SyncError::Transport(format!("submit login: {e}")))?;
        Ok(())
    }

    /// Navigate to an API path and parse the JSON the page body carries.
    async fn fetch_json<T: DeserializeOwned>(&self, path_and_query: &str) -> Result<T> {
        if !self.limiter.can_call().await? {
            return Err(SyncError::QuotaExceeded(format!(
                "declined browser fetch {path_and_query}"
            )));
        }

        let client = self.ensure_session().await?;
        let url = format!("{}{}", self.config.base_url, path_and_query);
        let result = self.fetch_body(&client, &url).await;

        // The page carries no status line; success of the navigation and
        // parse is the only signal we have.
        let status = if result.is_ok() { 200 } else { 0 };
        self.limiter
            .record_call(path_and_query, "GET", status, Some(self.squad))
            .await?;
        result
    }

    async fn fetch_body<T: DeserializeOwned>(&self, client: &Client, url: &str) -> Result<T> {
        self.handle
            .run("open api page", || client.goto(url))
            .await
            .map_err(|e| SyncError::Transport(format!("goto {url}: {e}")))?;

        // Browsers wrap raw JSON responses in a <pre> element; fall back to
        // the whole body for trackers that serve it differently. Both reads
        // sit inside one retried operation so a missing <pre> falls through
        // immediately instead of burning retry attempts.
        let text = self
            .handle
            .run("read page body", || async {
                match client.find(Locator::Css("pre")).await {
                    Ok(pre) => pre.text().await,
                    Err(_) => client.find(Locator::Css("body")).await?.text().await,
                }
            })
            .await
            .map_err(|e| SyncError::Transport(format!("read body: {e}")))?;

        serde_json::from_str(&text).map_err(|e| {
            SyncError::Transport(format!("page at {url} is not the expected JSON: {e}"))
        })
    }
}

#[async_trait]
impl TransportClient for BrowserTransport {
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

            let query: String = form_urlencoded::Serializer::new(String::new())
                .append_pair("jql", jql)
                .append_pair("startAt", &offset.to_string())
                .append_pair("maxResults", &self.config.page_size.to_string())
                .finish();
            let path = format!("/rest/api/2/search?{query}");

            let page: SearchResponse = match self.fetch_json(&path).await {
                Ok(page) => page,
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
        let doc: IssueDoc = self.fetch_json(&format!("/rest/api/2/issue/{key}")).await?;
        Ok(doc.into_remote()?)
    }

    async fn fetch_worklogs(&self, key: &IssueKey) -> Result<Vec<RemoteWorklog>> {
        let response: WorklogsResponse = self
            .fetch_json(&format!("/rest/api/2/issue/{key}/worklog"))
            .await?;
        Ok(response
            .worklogs
            .into_iter()
            .map(WorklogDoc::into_remote)
            .collect())
    }

    async fn fetch_comments(&self, key: &IssueKey) -> Result<Vec<RemoteComment>> {
        let response: CommentsResponse = self
            .fetch_json(&format!("/rest/api/2/issue/{key}/comment"))
            .await?;
        Ok(response
            .comments
            .into_iter()
            .map(|doc| doc.into_remote())
            .collect())
    }

    async fn fetch_remote_links(&self, key: &IssueKey) -> Result<Vec<RemoteLink>> {
        let docs: Vec<RemoteLinkDoc> = self
            .fetch_json(&format!("/rest/api/2/issue/{key}/remotelink"))
            .await?;
        Ok(docs.into_iter().map(RemoteLinkDoc::into_remote).collect())
    }

    async fn push_worklog(
        &self,
        _key: &IssueKey,
        _worklog: &RemoteWorklog,
    ) -> Result<String> {
        Err(SyncError::Permanent(
            "worklog push requires the REST transport".to_string(),
        ))
    }

    async fn probe(&self) -> Result<bool> {
        match self.fetch_json::<serde_json::Value>("/rest/api/2/myself").await {
            Ok(_) => Ok(true),
            Err(err) => {
                debug!(%err, "browser probe failed");
                Ok(false)
            }
        }
    }
}
