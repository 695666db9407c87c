use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::errors::ScmError;
use crate::models::MergeRequestDraft;
use crate::scm::{MergeRequestRef, ScmClient, Thread};

const USER_AGENT: &str = concat!("merge-agent/", env!("CARGO_PKG_VERSION"));
const MAX_ERROR_BODY: usize = 500;

#[derive(Debug, Deserialize)]
struct NoteResponse {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct MergeRequestResponse {
    iid: u64,
    web_url: String,
}

/// GitLab REST v4 client authenticated with a private/project access token.
#[derive(Clone)]
pub struct GitLabClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
}

impl std::fmt::Debug for GitLabClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitLabClient")
            .field("api_base", &self.api_base)
            .field("token", &"<redacted>")
            .finish()
    }
}

impl GitLabClient {
    pub fn new(base_url: &str, token: impl Into<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            http,
            api_base: format!("{}/api/v4", base_url.trim_end_matches('/')),
            token: token.into(),
        })
    }

    fn notes_url(&self, thread: &Thread) -> String {
        format!(
            "{}/projects/{}/{}/{}/notes",
            self.api_base,
            thread.project_id,
            thread.noteable.collection(),
            thread.noteable.iid()
        )
    }

    fn discussion_notes_url(&self, thread: &Thread, discussion_id: &str) -> String {
        format!(
            "{}/projects/{}/{}/{}/discussions/{}/notes",
            self.api_base,
            thread.project_id,
            thread.noteable.collection(),
            thread.noteable.iid(),
            discussion_id
        )
    }

    fn branches_url(&self, project_id: u64) -> String {
        format!("{}/projects/{}/repository/branches", self.api_base, project_id)
    }

    /// Branch names are a single path segment, so `/` is escaped.
    fn branch_url(&self, project_id: u64, branch: &str) -> String {
        format!(
            "{}/{}",
            self.branches_url(project_id),
            branch.replace('%', "%25").replace('/', "%2F")
        )
    }

    fn merge_requests_url(&self, project_id: u64) -> String {
        format!("{}/projects/{}/merge_requests", self.api_base, project_id)
    }

    async fn send(&self, request: RequestBuilder, url: &str) -> Result<reqwest::Response, ScmError> {
        let resp = request
            .header("PRIVATE-TOKEN", &self.token)
            .send()
            .await
            .map_err(|source| ScmError::Http {
                url: url.to_string(),
                source,
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ScmError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }
        Ok(resp)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        url: &str,
    ) -> Result<T, ScmError> {
        self.send(request, url)
            .await?
            .json::<T>()
            .await
            .map_err(|source| ScmError::Decode {
                url: url.to_string(),
                source,
            })
    }
}

fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

/// GitLab answers 404/405 when an endpoint or object does not allow the
/// operation; callers treat that as a missing capability.
fn missing_capability(err: ScmError, what: &str) -> ScmError {
    match err {
        ScmError::Status { status, .. }
            if status == StatusCode::NOT_FOUND.as_u16()
                || status == StatusCode::METHOD_NOT_ALLOWED.as_u16() =>
        {
            ScmError::NotSupported(what.to_string())
        }
        other => other,
    }
}

#[async_trait]
impl ScmClient for GitLabClient {
    async fn create_comment(&self, thread: &Thread, body: &str) -> Result<u64, ScmError> {
        let url = self.notes_url(thread);
        let note: NoteResponse = self
            .send_json(
                self.http.post(&url).json(&serde_json::json!({ "body": body })),
                &url,
            )
            .await?;
        Ok(note.id)
    }

    async fn update_comment(
        &self,
        thread: &Thread,
        comment_id: u64,
        body: &str,
    ) -> Result<(), ScmError> {
        let url = format!("{}/{}", self.notes_url(thread), comment_id);
        self.send(
            self.http.put(&url).json(&serde_json::json!({ "body": body })),
            &url,
        )
        .await
        .map_err(|e| missing_capability(e, "editing comments"))?;
        Ok(())
    }

    async fn reply_in_thread(&self, thread: &Thread, body: &str) -> Result<u64, ScmError> {
        let Some(discussion_id) = thread.discussion_id.as_deref() else {
            return Err(ScmError::NotSupported("threaded replies".to_string()));
        };
        let url = self.discussion_notes_url(thread, discussion_id);
        let note: NoteResponse = self
            .send_json(
                self.http.post(&url).json(&serde_json::json!({ "body": body })),
                &url,
            )
            .await
            .map_err(|e| missing_capability(e, "threaded replies"))?;
        Ok(note.id)
    }

    async fn create_branch(
        &self,
        project_id: u64,
        branch: &str,
        from_ref: &str,
    ) -> Result<(), ScmError> {
        let url = self.branches_url(project_id);
        self.send(
            self.http
                .post(&url)
                .query(&[("branch", branch), ("ref", from_ref)]),
            &url,
        )
        .await?;
        Ok(())
    }

    async fn delete_branch(&self, project_id: u64, branch: &str) -> Result<(), ScmError> {
        let url = self.branch_url(project_id, branch);
        self.send(self.http.delete(&url), &url).await?;
        Ok(())
    }

    async fn create_merge_request(
        &self,
        project_id: u64,
        draft: &MergeRequestDraft,
    ) -> Result<MergeRequestRef, ScmError> {
        let url = self.merge_requests_url(project_id);
        let payload = serde_json::json!({
            "source_branch": draft.source_branch,
            "target_branch": draft.target_branch,
            "title": draft.title,
            "description": draft.description,
            "remove_source_branch": true,
        });
        let mr: MergeRequestResponse = self
            .send_json(self.http.post(&url).json(&payload), &url)
            .await?;
        Ok(MergeRequestRef {
            iid: mr.iid,
            web_url: mr.web_url,
        })
    }
}
