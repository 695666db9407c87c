//! Codex CLI transport (`codex exec --json`).
//!
//! The stream is turn based: `thread.started`, `turn.started`, a series of
//! `item.*` events, then `turn.completed` or `turn.failed`. There is no
//! explicit result field, so the final output is the last agent message.

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;

use crate::agent::process::{StreamDecoder, exit_failure, run_streaming};
use crate::agent::{
    AgentCommand, AgentOutcome, AgentRunOptions, AgentRunner, ProgressEvent, ProgressKind,
    TokenUsage,
};
use crate::errors::AgentError;
use crate::instruction::Provider;
use crate::util::{snippet, truncate_str};

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum CodexEvent {
    #[serde(rename = "thread.started")]
    ThreadStarted {
        #[serde(default)]
        thread_id: String,
    },

    #[serde(rename = "turn.started")]
    TurnStarted {},

    #[serde(rename = "item.started")]
    ItemStarted { item: CodexItem },

    #[serde(rename = "item.updated")]
    ItemUpdated { item: CodexItem },

    #[serde(rename = "item.completed")]
    ItemCompleted { item: CodexItem },

    #[serde(rename = "turn.completed")]
    TurnCompleted {
        #[serde(default)]
        usage: TokenUsage,
    },

    #[serde(rename = "turn.failed")]
    TurnFailed { error: CodexErrorBody },

    #[serde(rename = "error")]
    Error { message: String },

    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub struct CodexErrorBody {
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CodexItem {
    AgentMessage {
        #[serde(default)]
        text: String,
    },
    Reasoning {
        #[serde(default)]
        text: String,
    },
    CommandExecution {
        command: String,
        #[serde(default)]
        exit_code: Option<i32>,
    },
    FileChange {
        #[serde(default)]
        changes: Vec<CodexFileChange>,
    },
    McpToolCall {
        #[serde(default)]
        server: String,
        #[serde(default)]
        tool: String,
    },
    WebSearch {
        #[serde(default)]
        query: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub struct CodexFileChange {
    pub path: String,
    #[serde(default)]
    pub kind: String,
}

#[derive(Debug, Default)]
struct CodexDecoder {
    last_message: Option<String>,
    failure: Option<String>,
    usage: TokenUsage,
}

impl StreamDecoder for CodexDecoder {
    fn decode(&mut self, line: &str) -> Vec<ProgressEvent> {
        let line = line.trim();
        if line.is_empty() {
            return Vec::new();
        }
        let event: CodexEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(e) => {
                tracing::debug!(error = %e, "skipping non-protocol line from codex");
                return Vec::new();
            }
        };

        match event {
            CodexEvent::ThreadStarted { thread_id } => {
                tracing::debug!(%thread_id, "codex thread started");
                Vec::new()
            }
            CodexEvent::ItemStarted { item } => self.item_started(item).into_iter().collect(),
            CodexEvent::ItemCompleted { item } => self.item_completed(item).into_iter().collect(),
            CodexEvent::TurnCompleted { usage } => {
                self.usage.add(&usage);
                vec![ProgressEvent::new(
                    ProgressKind::TurnCompleted,
                    format!("Turn completed ({})", self.usage.summary()),
                )]
            }
            CodexEvent::TurnFailed { error } => {
                self.record_failure(error.message);
                Vec::new()
            }
            CodexEvent::Error { message } => {
                self.record_failure(message);
                Vec::new()
            }
            CodexEvent::TurnStarted {} | CodexEvent::ItemUpdated { .. } | CodexEvent::Other => {
                Vec::new()
            }
        }
    }

    fn finish(&mut self, exit_ok: bool, stderr: &str) -> Result<AgentOutcome, AgentError> {
        if let Some(reason) = self.failure.take() {
            return Err(AgentError::Failed(reason));
        }
        if !exit_ok {
            return Err(exit_failure("codex", stderr));
        }
        Ok(AgentOutcome {
            output: self.last_message.take().unwrap_or_default(),
            usage: self.usage,
        })
    }
}

impl CodexDecoder {
    fn record_failure(&mut self, message: String) {
        if self.failure.is_none() {
            self.failure = Some(message);
        }
    }

    fn item_started(&mut self, item: CodexItem) -> Option<ProgressEvent> {
        match item {
            CodexItem::CommandExecution { command, .. } => Some(ProgressEvent::new(
                ProgressKind::Tool,
                format!("Running: {}", truncate_str(&command, 40)),
            )),
            CodexItem::McpToolCall { server, tool } => Some(ProgressEvent::new(
                ProgressKind::Tool,
                format!("Tool: {}.{}", server, tool),
            )),
            CodexItem::WebSearch { query } => Some(ProgressEvent::new(
                ProgressKind::Tool,
                format!("Searching web: {}", truncate_str(&query, 40)),
            )),
            _ => None,
        }
    }

    fn item_completed(&mut self, item: CodexItem) -> Option<ProgressEvent> {
        match item {
            CodexItem::AgentMessage { text } if !text.trim().is_empty() => {
                let event = ProgressEvent::new(ProgressKind::Message, snippet(&text));
                self.last_message = Some(text);
                Some(event)
            }
            CodexItem::Reasoning { text } if !text.trim().is_empty() => Some(ProgressEvent::new(
                ProgressKind::Thinking,
                format!("Thinking: {}", snippet(&text)),
            )),
            CodexItem::FileChange { changes } if !changes.is_empty() => {
                let described: Vec<String> = changes
                    .iter()
                    .map(|c| match c.kind.as_str() {
                        "" => c.path.clone(),
                        kind => format!("{} ({})", c.path, kind),
                    })
                    .collect();
                Some(ProgressEvent::new(
                    ProgressKind::FileChange,
                    format!("Changed: {}", truncate_str(&described.join(", "), 100)),
                ))
            }
            CodexItem::CommandExecution {
                command,
                exit_code: Some(code),
            } if code != 0 => Some(ProgressEvent::new(
                ProgressKind::Tool,
                format!("Command failed ({}): {}", code, truncate_str(&command, 40)),
            )),
            _ => None,
        }
    }
}

/// Runs `codex exec` in full-auto mode against the workspace.
#[derive(Debug, Clone)]
pub struct CodexRunner {
    command: AgentCommand,
}

impl CodexRunner {
    pub fn new(command: AgentCommand) -> Self {
        Self { command }
    }

    fn build_args(prompt: &str, workspace: &Path, model: Option<&str>) -> Vec<String> {
        let mut args: Vec<String> = ["exec", "--json", "--full-auto", "--skip-git-repo-check"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        if let Some(model) = model {
            args.push("--model".to_string());
            args.push(model.to_string());
        }
        args.push("--cd".to_string());
        args.push(workspace.to_string_lossy().into_owned());
        args.push(prompt.to_string());
        args
    }
}

#[async_trait]
impl AgentRunner for CodexRunner {
    fn provider(&self) -> Provider {
        Provider::Codex
    }

    async fn run(
        &self,
        prompt: &str,
        workspace: &Path,
        options: AgentRunOptions,
    ) -> Result<AgentOutcome, AgentError> {
        let mut cmd = self.command.to_command(workspace);
        cmd.args(Self::build_args(prompt, workspace, options.model.as_deref()));
        run_streaming(cmd, &self.command.program, CodexDecoder::default(), &options).await
    }
}
