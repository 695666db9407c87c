//! Typed error hierarchy for the merge agent.
//!
//! One enum per collaborator boundary:
//! - `AuthenticationError`: inbound webhook rejected before any processing
//! - `WorkspaceError`: clone / branch / commit / push / status failures
//! - `AgentError`: terminal failure of a coding agent run
//! - `ScmError`: comment, branch and merge request API failures
//! - `PublishError`: publishing a finished agent run failed
//!
//! "No instruction found" is not an error: extraction returns `None` and the
//! run exits silently.

use std::path::PathBuf;

use thiserror::Error;

/// Inbound delivery failed authentication.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthenticationError {
    #[error("Missing webhook signature header")]
    MissingHeader,

    #[error("Webhook signature did not match")]
    Mismatch,
}

/// Errors from preparing or mutating a run's git checkout.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("Failed to prepare workspace for {url}: {message}")]
    Preparation { url: String, message: String },

    #[error("Remote branch {branch} not found")]
    BranchNotFound { branch: String },

    #[error("git {command} failed: {stderr}")]
    Git { command: String, stderr: String },

    #[error("Failed to run git {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Workspace I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read repository status: {0}")]
    Status(#[from] git2::Error),
}

/// Terminal failure classes of an agent run.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AgentError {
    #[error("Agent transport unavailable: {0}")]
    Unavailable(String),

    #[error("Agent run timed out after {0} seconds")]
    TimedOut(u64),

    #[error("Agent run was cancelled")]
    Cancelled,

    #[error("Agent run failed: {0}")]
    Failed(String),
}

/// Errors from the repository host's comment / branch / merge request API.
#[derive(Debug, Error)]
pub enum ScmError {
    /// The host does not offer this capability; callers may fall back.
    #[error("Not supported by the repository host: {0}")]
    NotSupported(String),

    #[error("Request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned {status}: {body}")]
    Status { url: String, status: u16, body: String },

    #[error("Failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Publishing a successful agent run failed after the agent finished.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Failed to create branch {branch}: {source}")]
    Branch {
        branch: String,
        #[source]
        source: ScmError,
    },

    #[error("Failed to push branch {branch}: {source}")]
    Push {
        branch: String,
        #[source]
        source: WorkspaceError,
    },

    #[error("Failed to open merge request from {branch}: {source}")]
    MergeRequest {
        branch: String,
        #[source]
        source: ScmError,
    },
}

impl PublishError {
    /// Instructions for finishing the publication by hand.
    pub fn recovery_hint(&self, target_branch: &str) -> String {
        match self {
            PublishError::Branch { .. } | PublishError::Push { .. } => format!(
                "The agent's changes could not be pushed. They are attached below as a patch: \
                 save it and run `git apply` on a checkout of `{}`, then push and open a merge \
                 request yourself.",
                target_branch
            ),
            PublishError::MergeRequest { branch, .. } => format!(
                "The changes were pushed to `{}`. Open a merge request from `{}` into `{}` manually.",
                branch, branch, target_branch
            ),
        }
    }
}
