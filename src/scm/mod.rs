//! Repository host API: status comments, branches and merge requests.

pub mod gitlab;

use async_trait::async_trait;
use serde::Serialize;

use crate::errors::ScmError;
use crate::models::MergeRequestDraft;

pub use gitlab::GitLabClient;

/// The object a comment is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "iid", rename_all = "snake_case")]
pub enum Noteable {
    Issue(u64),
    MergeRequest(u64),
}

impl Noteable {
    pub fn iid(&self) -> u64 {
        match self {
            Self::Issue(iid) | Self::MergeRequest(iid) => *iid,
        }
    }

    /// Path segment used by the REST API.
    pub fn collection(&self) -> &'static str {
        match self {
            Self::Issue(_) => "issues",
            Self::MergeRequest(_) => "merge_requests",
        }
    }
}

/// Conversation the run reports into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Thread {
    pub project_id: u64,
    pub noteable: Noteable,
    /// Set when the triggering comment lives in a discussion; replies go there.
    pub discussion_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRequestRef {
    pub iid: u64,
    pub web_url: String,
}

/// Abstraction over the repository host for testability.
/// Real implementation: `GitLabClient`.
#[async_trait]
pub trait ScmClient: Send + Sync {
    /// Post a top-level comment. Returns the new comment id.
    async fn create_comment(&self, thread: &Thread, body: &str) -> Result<u64, ScmError>;

    async fn update_comment(
        &self,
        thread: &Thread,
        comment_id: u64,
        body: &str,
    ) -> Result<(), ScmError> {
        let _ = (thread, comment_id, body);
        Err(ScmError::NotSupported("editing comments".to_string()))
    }

    /// Reply inside `thread.discussion_id`. Returns the new comment id.
    async fn reply_in_thread(&self, thread: &Thread, body: &str) -> Result<u64, ScmError> {
        let _ = (thread, body);
        Err(ScmError::NotSupported("threaded replies".to_string()))
    }

    async fn create_branch(
        &self,
        project_id: u64,
        branch: &str,
        from_ref: &str,
    ) -> Result<(), ScmError>;

    /// Remove a branch this run created but could not fill.
    async fn delete_branch(&self, project_id: u64, branch: &str) -> Result<(), ScmError> {
        let _ = (project_id, branch);
        Err(ScmError::NotSupported("deleting branches".to_string()))
    }

    async fn create_merge_request(
        &self,
        project_id: u64,
        draft: &MergeRequestDraft,
    ) -> Result<MergeRequestRef, ScmError>;
}
