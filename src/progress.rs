//! Running status comment for one run.
//!
//! `ProgressLog` is the pure, per-run buffer; `ProgressReporter` renders it
//! into a single comment on the originating thread and keeps it current.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::errors::ScmError;
use crate::scm::{ScmClient, Thread};

/// Hidden marker embedded in every status comment so the agent never reacts
/// to its own notes.
pub const BOT_MARKER: &str = "<!-- merge-agent -->";

pub const DEFAULT_MAX_ENTRIES: usize = 15;

const UPDATE_PREFIX: &str = "**Update:**";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalState {
    Success(String),
    Failure(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEntry {
    pub at: DateTime<Utc>,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct ProgressLog {
    header: String,
    entries: Vec<ProgressEntry>,
    seen: HashSet<String>,
    terminal: Option<TerminalState>,
    max_rendered: usize,
}

impl ProgressLog {
    pub fn new(header: impl Into<String>, max_rendered: usize) -> Self {
        Self {
            header: header.into(),
            entries: Vec::new(),
            seen: HashSet::new(),
            terminal: None,
            max_rendered: max_rendered.max(1),
        }
    }

    /// Append a status line. Returns false for blank lines, duplicates, and
    /// anything pushed after the terminal state was set.
    pub fn push(&mut self, message: &str) -> bool {
        self.push_at(message, Utc::now())
    }

    pub fn push_at(&mut self, message: &str, at: DateTime<Utc>) -> bool {
        let message = message.trim();
        if message.is_empty() || self.terminal.is_some() {
            return false;
        }
        if !self.seen.insert(message.to_string()) {
            return false;
        }
        self.entries.push(ProgressEntry {
            at,
            message: message.to_string(),
        });
        true
    }

    /// Set the terminal state. Only the first call has any effect.
    pub fn finish(&mut self, state: TerminalState) -> bool {
        if self.terminal.is_some() {
            return false;
        }
        self.terminal = Some(state);
        true
    }

    pub fn terminal(&self) -> Option<&TerminalState> {
        self.terminal.as_ref()
    }

    pub fn entries(&self) -> &[ProgressEntry] {
        &self.entries
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(BOT_MARKER);
        out.push('\n');
        out.push_str(&self.header);
        out.push_str("\n\n");

        match &self.terminal {
            Some(TerminalState::Success(message)) => {
                out.push_str(&format!("✅ **Completed**: {}\n\n", message));
            }
            Some(TerminalState::Failure(message)) => {
                out.push_str(&format!("❌ **Failed**: {}\n\n", message));
            }
            None => out.push_str("⏳ **In progress**\n\n"),
        }

        if self.entries.is_empty() {
            return out;
        }

        let skipped = self.entries.len().saturating_sub(self.max_rendered);
        if skipped > 0 {
            out.push_str(&format!("_{} earlier updates not shown_\n\n", skipped));
        }
        for entry in &self.entries[skipped..] {
            out.push_str(&format!(
                "- `{}` {}\n",
                entry.at.format("%H:%M:%S"),
                entry.message
            ));
        }
        out
    }
}

/// Keeps one status comment per run in sync with its `ProgressLog`.
///
/// Comment delivery failures never fail the run; they are logged.
pub struct ProgressReporter {
    scm: Arc<dyn ScmClient>,
    thread: Thread,
    log: ProgressLog,
    comment_id: Option<u64>,
    edit_supported: bool,
}

impl ProgressReporter {
    pub fn new(scm: Arc<dyn ScmClient>, thread: Thread, log: ProgressLog) -> Self {
        Self {
            scm,
            thread,
            log,
            comment_id: None,
            edit_supported: true,
        }
    }

    pub fn log(&self) -> &ProgressLog {
        &self.log
    }

    pub fn comment_id(&self) -> Option<u64> {
        self.comment_id
    }

    /// Post the initial status comment.
    pub async fn start(&mut self, message: &str) {
        self.log.push(message);
        self.publish().await;
    }

    pub async fn update(&mut self, message: &str) {
        if self.log.push(message) {
            self.publish().await;
        }
    }

    /// Set the success banner and publish. No-op after the first terminal call.
    pub async fn succeed(&mut self, message: impl Into<String>) -> bool {
        self.finish(TerminalState::Success(message.into())).await
    }

    /// Set the failure banner and publish. No-op after the first terminal call.
    pub async fn fail(&mut self, message: impl Into<String>) -> bool {
        self.finish(TerminalState::Failure(message.into())).await
    }

    async fn finish(&mut self, state: TerminalState) -> bool {
        if !self.log.finish(state) {
            return false;
        }
        self.publish().await;
        true
    }

    async fn publish(&mut self) {
        let body = self.log.render();
        let result = match self.comment_id {
            None => self.post_new(&body).await.map(|id| {
                self.comment_id = Some(id);
            }),
            Some(id) if self.edit_supported => {
                match self.scm.update_comment(&self.thread, id, &body).await {
                    Err(ScmError::NotSupported(what)) => {
                        tracing::info!(%what, "comment editing unsupported, posting updates as new comments");
                        self.edit_supported = false;
                        self.post_update(&body).await
                    }
                    other => other,
                }
            }
            Some(_) => self.post_update(&body).await,
        };

        if let Err(e) = result {
            tracing::warn!(error = %e, "failed to deliver status comment");
        }
    }

    async fn post_update(&self, body: &str) -> Result<(), ScmError> {
        self.post_new(&format!("{}\n\n{}", UPDATE_PREFIX, body))
            .await
            .map(|_| ())
    }

    /// Reply in the originating discussion when there is one, falling back to
    /// a top-level comment only when threaded replies are unsupported.
    async fn post_new(&self, body: &str) -> Result<u64, ScmError> {
        if self.thread.discussion_id.is_none() {
            return self.scm.create_comment(&self.thread, body).await;
        }
        match self.scm.reply_in_thread(&self.thread, body).await {
            Err(ScmError::NotSupported(_)) => self.scm.create_comment(&self.thread, body).await,
            other => other,
        }
    }
}
