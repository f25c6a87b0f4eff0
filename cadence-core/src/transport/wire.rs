//! Wire-format documents shared by both transports. The browser transport
//! scrapes the same JSON the REST API serves, so both deserialize into these
//! shapes before lifting into the model types.

use cadence_model::{
    IssueKey, ModelError, RemoteComment, RemoteIssue, RemoteLink, RemoteWorklog,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SearchResponse {
    pub start_at: u32,
    #[allow(dead_code)]
    pub max_results: u32,
    pub total: u32,
    pub issues: Vec<IssueDoc>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct IssueDoc {
    pub id: String,
    pub key: String,
    pub fields: IssueFields,
}

#[derive(Debug, Deserialize)]
pub(crate) struct IssueFields {
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub status: Option<NamedDoc>,
    #[serde(default)]
    pub issuetype: Option<NamedDoc>,
    #[serde(default)]
    pub assignee: Option<UserDoc>,
    #[serde(default)]
    pub updated: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct NamedDoc {
    pub name: String,
}

/// Tracker user reference. Cloud deployments send `accountId`; older server
/// deployments send `name` or just an email address.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UserDoc {
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email_address: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    pub display_name: Option<String>,
}

impl UserDoc {
    pub fn author_key(self) -> Option<String> {
        self.account_id.or(self.name).or(self.email_address)
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct WorklogsResponse {
    pub worklogs: Vec<WorklogDoc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WorklogDoc {
    pub id: String,
    #[serde(default)]
    pub author: Option<UserDoc>,
    #[serde(default)]
    pub started: Option<String>,
    #[serde(default)]
    pub time_spent_seconds: Option<i64>,
    #[serde(default)]
    pub comment: Option<serde_json::Value>,
    #[serde(default)]
    pub updated: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CommentsResponse {
    pub comments: Vec<CommentDoc>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CommentDoc {
    pub id: String,
    #[serde(default)]
    pub author: Option<UserDoc>,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub updated: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RemoteLinkDoc {
    pub id: serde_json::Value,
    pub object: RemoteLinkObject,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RemoteLinkObject {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
}

/// Tracker timestamps come as RFC 3339 or the legacy
/// `2024-03-01T10:15:30.000+0100` shape. Unparseable values are dropped.
pub(crate) fn parse_tracker_ts(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?;
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    match DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z") {
        Ok(ts) => Some(ts.with_timezone(&Utc)),
        Err(_) => {
            debug!(raw, "unparseable tracker timestamp dropped");
            None
        }
    }
}

/// Comment and worklog bodies may be plain strings or Atlassian Document
/// Format trees; flatten either into text.
pub(crate) fn body_text(value: Option<serde_json::Value>) -> Option<String> {
    fn collect(node: &serde_json::Value, out: &mut String) {
        match node {
            serde_json::Value::String(s) => out.push_str(s),
            serde_json::Value::Object(map) => {
                if let Some(serde_json::Value::String(text)) = map.get("text") {
                    out.push_str(text);
                }
                if let Some(serde_json::Value::Array(children)) = map.get("content") {
                    for child in children {
                        collect(child, out);
                    }
                }
            }
            serde_json::Value::Array(nodes) => {
                for n in nodes {
                    collect(n, out);
                }
            }
            _ => {}
        }
    }

    let value = value?;
    let mut out = String::new();
    collect(&value, &mut out);
    let out = out.trim().to_string();
    if out.is_empty() { None } else { Some(out) }
}

impl IssueDoc {
    pub fn into_remote(self) -> Result<RemoteIssue, ModelError> {
        Ok(RemoteIssue {
            external_id: self.id,
            key: IssueKey::new(self.key)?,
            summary: self.fields.summary.unwrap_or_default(),
            status: self.fields.status.map(|s| s.name),
            issue_type: self.fields.issuetype.map(|t| t.name),
            assignee_key: self.fields.assignee.and_then(UserDoc::author_key),
            updated_at: parse_tracker_ts(self.fields.updated.as_deref()),
        })
    }
}

impl WorklogDoc {
    pub fn into_remote(self) -> RemoteWorklog {
        RemoteWorklog {
            external_id: self.id,
            author_key: self.author.and_then(UserDoc::author_key),
            started_at: parse_tracker_ts(self.started.as_deref()),
            time_spent_seconds: self.time_spent_seconds.unwrap_or(0),
            comment: body_text(self.comment),
            updated_at: parse_tracker_ts(self.updated.as_deref()),
        }
    }
}

impl CommentDoc {
    pub fn into_remote(self) -> RemoteComment {
        RemoteComment {
            external_id: self.id,
            author_key: self.author.and_then(UserDoc::author_key),
            body: body_text(self.body).unwrap_or_default(),
            created_at: parse_tracker_ts(self.created.as_deref()),
            updated_at: parse_tracker_ts(self.updated.as_deref()),
        }
    }
}

impl RemoteLinkDoc {
    pub fn into_remote(self) -> RemoteLink {
        let external_id = match &self.id {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        RemoteLink {
            external_id,
            url: self.object.url,
            title: self.object.title,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn search_response_lifts_issue_fields() {
        let raw = json!({
            "startAt": 0,
            "maxResults": 50,
            "total": 1,
            "issues": [{
                "id": "10001",
                "key": "CAP-1",
                "fields": {
                    "summary": "Fix the widget",
                    "status": {"name": "In Progress"},
                    "issuetype": {"name": "Bug"},
                    "assignee": {"name": "jdoe", "displayName": "J. Doe"},
                    "updated": "2024-03-01T10:15:30.000+0100"
                }
            }]
        });
        let response: SearchResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(response.total, 1);

        let issue = response.issues.into_iter().next().unwrap().into_remote().unwrap();
        assert_eq!(issue.external_id, "10001");
        assert_eq!(issue.key.as_str(), "CAP-1");
        assert_eq!(issue.status.as_deref(), Some("In Progress"));
        assert_eq!(issue.assignee_key.as_deref(), Some("jdoe"));
        assert!(issue.updated_at.is_some());
    }

    #[test]
    fn user_doc_prefers_account_id() {
        let user: UserDoc = serde_json::from_value(json!({
            "accountId": "abc123",
            "name": "jdoe",
            "emailAddress": "j@example.com"
        }))
        .unwrap();
        assert_eq!(user.author_key().as_deref(), Some("abc123"));

        let legacy: UserDoc =
            serde_json::from_value(json!({"name": "jdoe"})).unwrap();
        assert_eq!(legacy.author_key().as_deref(), Some("jdoe"));
    }

    #[test]
    fn worklog_doc_flattens_adf_comment() {
        let doc: WorklogDoc = serde_json::from_value(json!({
            "id": "555",
            "timeSpentSeconds": 1800,
            "comment": {
                "type": "doc",
                "content": [{
                    "type": "paragraph",
                    "content": [{"type": "text", "text": "pairing session"}]
                }]
            }
        }))
        .unwrap();
        let worklog = doc.into_remote();
        assert_eq!(worklog.time_spent_seconds, 1800);
        assert_eq!(worklog.comment.as_deref(), Some("pairing session"));
    }

    #[test]
    fn plain_string_bodies_pass_through() {
        assert_eq!(
            body_text(Some(json!("just text"))).as_deref(),
            Some("just text")
        );
        assert_eq!(body_text(Some(json!(""))), None);
        assert_eq!(body_text(None), None);
    }

    #[test]
    fn remote_link_numeric_id_becomes_string() {
        let doc: RemoteLinkDoc = serde_json::from_value(json!({
            "id": 42,
            "object": {"url": "https://wiki.example.com/runbook", "title": "Runbook"}
        }))
        .unwrap();
        let link = doc.into_remote();
        assert_eq!(link.external_id, "42");
        assert_eq!(link.title.as_deref(), Some("Runbook"));
    }

    #[test]
    fn bad_timestamps_are_dropped() {
        assert!(parse_tracker_ts(Some("2024-03-01T10:15:30.000+0100")).is_some());
        assert!(parse_tracker_ts(Some("2024-03-01T10:15:30Z")).is_some());
        assert!(parse_tracker_ts(Some("yesterday")).is_none());
        assert!(parse_tracker_ts(None).is_none());
    }
}
